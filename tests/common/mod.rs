//! Shared test utilities for coordinator and integration tests.
//!
//! This module provides:
//! - MongoDB replica set testcontainer setup
//! - In-memory source, targets and checkpoint for recording calls

#![allow(dead_code)] // Each test binary uses a different subset

pub mod mock_backend;

pub use containers::*;
pub use mock_backend::*;
