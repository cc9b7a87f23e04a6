// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared by the pipeline.

use std::fmt;
use thiserror::Error;

/// Pipeline errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("No {kind} callback has been registered")]
    NoConsumers { kind: &'static str },

    #[error("Failed to spawn consumer thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration error carrying the source position of the offending item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConfigError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl ConfigError {
    pub fn new(file: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}:{}", self.message, self.file, self.line)
    }
}
