//! Small shared primitives used across module boundaries: the duration
//! (de)serialization helper and the secret-masking rule. Kept together
//! because both are "ambient" concerns no single component owns.

pub mod duration_serde;
pub mod masking;
