// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckpost.

use thiserror::Error;

use crate::types::ErrorClass;

/// Top-level error type for all Druckpost operations.
#[derive(Debug, Error)]
pub enum DruckpostError {
    // -- Ingest errors --
    #[error("payload rejected: {0}")]
    Transform(String),

    // -- Printer errors --
    #[error("printer transport failed: {0}")]
    Transport(String),

    // -- Notification errors --
    #[error("callback failed: {0}")]
    Callback(String),

    // -- Startup --
    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Pipeline --
    #[error("queue closed")]
    QueueClosed,

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("background task failed: {0}")]
    Task(String),
}

impl DruckpostError {
    /// How the pipeline should treat this error.
    ///
    /// Only transport failures are worth another attempt; everything else is
    /// terminal for whatever it was attached to (a payload, a callback, or
    /// process startup).
    pub fn class(&self) -> ErrorClass {
        match self {
            DruckpostError::Transport(_) => ErrorClass::Recoverable,
            DruckpostError::Transform(_)
            | DruckpostError::Callback(_)
            | DruckpostError::Config(_)
            | DruckpostError::QueueClosed
            | DruckpostError::ShuttingDown
            | DruckpostError::Task(_) => ErrorClass::Fatal,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckpostError>;
