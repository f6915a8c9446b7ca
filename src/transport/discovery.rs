//! Agent executable discovery.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{AppError, Result};

/// Executable name searched on `PATH`.
pub const CLI_NAME: &str = "claude";

/// Install locations tried after `PATH`, relative to the home directory.
const HOME_FALLBACKS: &[&str] = &[
    ".npm-global/bin/claude",
    ".local/bin/claude",
    "node_modules/.bin/claude",
    ".yarn/bin/claude",
    ".claude/local/claude",
];

/// Absolute install locations tried after `PATH`.
const SYSTEM_FALLBACKS: &[&str] = &["/usr/local/bin/claude", "/opt/homebrew/bin/claude"];

/// Resolve the agent executable.
///
/// An explicit path wins and must exist. Otherwise `PATH` is searched, then
/// the usual npm, yarn and local install directories.
///
/// # Errors
///
/// Returns `AppError::CliNotFound` when no candidate exists.
pub fn find_cli(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(AppError::CliNotFound(format!(
                "configured cli_path does not exist: {}",
                path.display()
            )))
        };
    }

    if let Ok(path) = which::which(CLI_NAME) {
        debug!(path = %path.display(), "found agent cli on PATH");
        return Ok(path);
    }

    fallback_locations(dirs::home_dir().as_deref())
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            AppError::CliNotFound(format!(
                "`{CLI_NAME}` not found on PATH or in common install locations; \
                 install it with `npm install -g @anthropic-ai/claude-code` or set cli_path"
            ))
        })
}

/// Candidate paths checked after `PATH`, in order.
#[must_use]
pub fn fallback_locations(home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(HOME_FALLBACKS.len() + SYSTEM_FALLBACKS.len());
    if let Some(home) = home {
        candidates.extend(HOME_FALLBACKS.iter().take(1).map(|rel| home.join(rel)));
    }
    candidates.extend(SYSTEM_FALLBACKS.iter().map(PathBuf::from));
    if let Some(home) = home {
        candidates.extend(HOME_FALLBACKS.iter().skip(1).map(|rel| home.join(rel)));
    }
    candidates
}
