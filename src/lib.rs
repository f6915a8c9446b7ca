#![forbid(unsafe_code)]

//! Subprocess transport and bidirectional control protocol for agent CLIs
//! that speak newline-delimited JSON over stdio.

pub mod callback;
pub mod client;
pub mod config;
pub mod control;
pub mod errors;
pub mod hooks;
pub mod mode;
pub mod options;
pub mod permission;
pub mod protocol;
pub mod query;
pub mod router;
pub mod session;
pub mod transport;

pub use client::Client;
pub use config::RelayConfig;
pub use errors::{AppError, ErrorKind, Result};
pub use options::SessionOptions;
pub use query::{query, QueryOutcome, QueryStream};
pub use session::{Session, SessionChannels};
