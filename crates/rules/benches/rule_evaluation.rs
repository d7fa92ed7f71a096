use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::NaiveDate;
use serde_json::json;

use keystone_rules::{evaluate_phased, Condition, ConditionOperator, Rule, RuleAction, RulePhase};

fn ruleset(size: usize) -> Vec<Rule> {
    (0..size)
        .map(|i| Rule {
            id: format!("bench-{i}"),
            name: format!("bench rule {i}"),
            priority: (i % 10) as i32,
            intent_type: "mdm.vendor.create".to_string(),
            phase: match i % 3 {
                0 => RulePhase::Validate,
                1 => RulePhase::Enrich,
                _ => RulePhase::Decide,
            },
            conditions: vec![Condition {
                field: "data.amount".to_string(),
                operator: ConditionOperator::Gt,
                value: Some(json!(i as i64)),
            }],
            action: RuleAction::Approve,
            effective_from: None,
            effective_to: None,
            rejection_message: None,
            approver_role: None,
            enrich_fields: None,
        })
        .collect()
}

fn bench_evaluate_phased(c: &mut Criterion) {
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let context = json!({
        "intent_type": "mdm.vendor.create",
        "data": { "name": "Acme", "amount": 5000 },
    });

    let mut group = c.benchmark_group("evaluate_phased");
    for size in [10usize, 100, 500] {
        let rules = ruleset(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rules, |b, rules| {
            b.iter(|| evaluate_phased(black_box(rules), black_box(&context), today));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_evaluate_phased);
criterion_main!(benches);
