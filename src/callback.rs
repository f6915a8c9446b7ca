//! Shared shape of host-supplied async callbacks.

use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Boxed future returned by every host callback.
pub type CallbackFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;
