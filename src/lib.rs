//! lanyard — a gateway and REST client library for the Discord chat platform.
//!
//! The crate maintains a persistent, authenticated session against Discord's
//! real-time gateway, mirrors the entities the event stream describes in an
//! in-memory state store, and issues authorized REST mutations with
//! per-route rate limiting.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lanyard::{ClientConfig, EventKind, Session};
//!
//! let config = ClientConfig::new("my-bot-token");
//! let session = Session::connect(config, |handlers| {
//!     handlers.on(EventKind::MessageCreate, |session, event| async move {
//!         let channel = event.data["channel_id"].as_str().unwrap_or_default();
//!         session.send_message(channel, "pong").await?;
//!         Ok(())
//!     });
//! })
//! .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gateway;
mod limiter;
pub mod models;
pub mod rest;
pub mod schema;
pub mod session;
pub mod state;

pub use config::{ClientConfig, ShardConfig};
pub use dispatch::Handlers;
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use rest::{Body, Response, RestClient, SendOptions, Verb};
pub use session::Session;
