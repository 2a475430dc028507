//! streamvault: automatic livestream archiving.
//!
//! Watches channel feeds for upcoming streams matching configured terms,
//! drives an external downloader for each capture job, and routes lifecycle
//! events to notification sinks.

pub mod config;
pub mod database;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod registry;
pub mod scheduler;
pub mod services;

pub use error::{Error, Result};
