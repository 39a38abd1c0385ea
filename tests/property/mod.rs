//! Property-based tests

pub mod conflict_proptest;
pub mod quantity_proptest;
