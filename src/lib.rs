//! tpush: WebSocket push service
//!
//! Clients connect over WebSocket, log in with a user id, and receive a
//! server-assigned client id. Data can then be pushed to individual
//! connections (`snd2cli`), to every connection of a user (`snd2usr`), or to
//! every member of a named channel (`snd2chan`).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tpush::config::PushConfig;
//! use tpush::socket_server::{serve, Dispatcher};
//!
//! let config = PushConfig::load()?;
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
//! serve(listener, Arc::new(Dispatcher::new(config))).await;
//! ```

pub mod config;
pub mod error;
pub mod socket_server;

pub use config::PushConfig;
pub use error::{CommandError, DecodeError, PushError, Result};
