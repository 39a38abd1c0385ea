//! Test suite for Piggybank Sync
//!
//! This module organizes all tests

pub mod common;
pub mod integration;
pub mod property;
