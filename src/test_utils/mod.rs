//! Test utilities for integration testing.
//!
//! This module provides:
//! - Test data factories for records and processor payloads
//! - In-memory repository implementations for mocking persistence
//! - A scriptable payment processor mock
//! - A builder for an `AppState` wired to the mocks

mod app_state_builder;
mod billing_mocks;
mod factories;

pub use app_state_builder::*;
pub use billing_mocks::*;
pub use factories::*;
