//! Session credential management for the Agora workplace board
//!
//! Every call a board client makes carries a short-lived access token.
//! When that token expires, any number of in-flight calls can fail at
//! once, and the worst possible reaction is a stampede of renewal
//! exchanges racing each other to the renewal endpoint.
//!
//! This crate owns that lifecycle. It holds the current session in a
//! [`SessionStore`][store::SessionStore], decides staleness with a
//! fail-closed expiry policy on [`Session`], and funnels every
//! authorization failure through a [`RenewalCoordinator`]: the first
//! failure performs the exchange, every concurrent failure suspends in a
//! FIFO queue behind it, and the whole queue settles together — either
//! with the renewed credential, or with the renewal's error after the
//! session has been torn down by the [`SessionTerminator`][terminator::SessionTerminator].
//!
//! Consumers of the renewed credentials need hardly be aware any of this
//! is happening: the companion `agora_reqwest` crate packages the whole
//! arrangement as a middleware that retries a rejected call exactly once
//! with the replacement token.
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use agora_sessions::{
//!     coordinator::RenewalCoordinator,
//!     notify::NullNotificationStream,
//!     renewal::RenewalClient,
//!     store::InMemorySessionStore,
//!     terminator::{NullNavigator, SessionTerminator},
//!     GateConfig,
//! };
//!
//! let config = GateConfig::new("https://board.example.com".parse().unwrap());
//!
//! let store = Arc::new(InMemorySessionStore::new());
//! let notifications = Arc::new(NullNotificationStream);
//! let terminator = SessionTerminator::new(
//!     store.clone(),
//!     notifications.clone(),
//!     Arc::new(NullNavigator),
//!     "/auth/sign-in",
//! );
//! let renewer = Arc::new(RenewalClient::new(
//!     reqwest::Client::new(),
//!     config.renew_url(),
//!     store.clone(),
//! ));
//!
//! let coordinator = RenewalCoordinator::new(renewer, store, notifications, terminator);
//! ```
//!
//! # Features
//!
//! * `file`: Provides a session store backed by a local file, enabled by
//!   default.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod config;
pub mod coordinator;
mod error;
pub mod notify;
pub mod renewal;
mod session;
pub mod store;
pub mod terminator;

pub use braids::*;
pub use config::GateConfig;
pub use coordinator::RenewalCoordinator;
pub use error::GateError;
pub use session::{Session, UnixMillis};
