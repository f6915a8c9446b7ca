//! Input mode of a session.
//!
//! `InputMode` decides what happens to the agent's stdin after a write.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How the transport treats stdin.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Stdin closes after the first write; the agent runs one prompt and
    /// exits. Later control requests cannot be written.
    OneShot,
    /// Stdin stays open for repeated prompts and control requests.
    #[default]
    Persistent,
}
