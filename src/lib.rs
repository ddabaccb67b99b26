//! Client for Ecolibrium, a personal carbon footprint tracker backed by
//! Firebase Authentication and Cloud Firestore.
//!
//! The interesting part is [`recorder`]: a submitted category (flights, for
//! now) is written into the user's month bucket and the month's Total record
//! is recomputed from every category in that bucket.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod firestore;
pub mod footprint;
pub mod logging;
pub mod models;
pub mod recorder;
pub mod store;

pub use client::EcolibriumClient;
pub use config::Config;
pub use error::{Error, Result};
pub use logging::{init_logging, Verbosity};
