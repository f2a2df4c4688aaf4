//! Common test utilities and fixtures for tpush integration tests
//!
//! This module provides:
//! - `TestServer` for running a dispatcher on an ephemeral port
//! - `TestClient` wrapping a WebSocket client with batch helpers
//! - Assertions over received responses

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod assertions;
pub mod test_server;

pub use assertions::*;
pub use test_server::{login, start, TestClient, TestServer};
