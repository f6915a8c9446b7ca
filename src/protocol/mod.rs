//! Wire types of the stream-json protocol.

pub mod control;
pub mod message;

use serde::Serialize;

use crate::Result;

/// Serialize `value` as one newline-terminated JSON line.
///
/// # Errors
///
/// Returns `AppError::Json` if serialization fails.
pub fn encode_line<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}
