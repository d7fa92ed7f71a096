//! Bearer-token claims and their mapping onto the platform actor.

pub mod claims;

pub use claims::{
    dev_actor, validate_claims, Claims, Hs256TokenValidator, TokenError, TokenValidator,
};
