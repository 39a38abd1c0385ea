//! Integration tests for the sync engine

pub mod engine_test;
pub mod http_test;
pub mod offline_test;
