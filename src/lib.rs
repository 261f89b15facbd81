//! Vestibule - caching request router
//!
//! Vestibule sits between clients and an origin and answers every request from
//! the network, a versioned cache store or a synthetic offline fallback,
//! choosing the strategy by resource class.
//!
//! ## Components
//!
//! - **Router**: classifies requests and runs the caching strategies
//! - **Cache**: named, versioned stores over memory or sled
//! - **Lifecycle**: install (pre-warm) and activate (retire old stores)
//! - **Queue**: deferred submissions replayed when the origin is back
//! - **Server**: hyper front end with health, version and control endpoints

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod fetch;
pub mod lifecycle;
pub mod push;
pub mod queue;
pub mod router;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use router::{RequestCacheRouter, RouterConfig, Served};
pub use server::{run, AppState};
pub use types::{Result, VestibuleError};
