// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

/// Represents errors that can occur in the tickslice scheduler.
///
/// Note that a full task queue is *not* an error:
/// [`enqueue`](crate::WorkExecutor::enqueue) reports rejection through its
/// boolean return value so the caller can decide whether to drop, retry or
/// push back, with no state disturbed.
#[derive(Debug)]
pub enum Error {
    /// A scheduler was constructed with invalid tunables.
    Config {
        /// Description of the rejected configuration value.
        message: String,
    },
    /// Awaiting the tick driver's background task failed.
    Join {
        /// The original JoinError from tokio.
        source: tokio::task::JoinError,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config { message } => {
                write!(f, "Invalid scheduler configuration: {message}")
            }
            Error::Join { source } => {
                write!(f, "Failed to join tick driver task: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Join { source } => Some(source),
            _ => None,
        }
    }
}

/// A Result type specialized for tickslice operations.
pub type Result<T> = std::result::Result<T, Error>;
