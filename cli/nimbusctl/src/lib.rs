//! nimbusctl - CLI for the Nimbus cloud platform.
//!
//! Commands parse arguments, resolve user-supplied name-or-ID tokens to
//! concrete resources, issue REST calls, and render tabular output. The
//! interesting pieces live in:
//!
//! - [`resolve`]: the uniform name-or-ID resolution algorithm
//! - [`session`]: lazy authentication and scope/endpoint management
//! - [`registry`]: lazily-constructed, cached per-service clients

pub mod auth;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod registry;
pub mod resolve;
pub mod session;
