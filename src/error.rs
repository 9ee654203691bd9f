// src/error.rs
//! Error handling for the texture cache.
//!
//! - **Performance**: Enum discriminant (cheap match), `#[inline]` everywhere, allocations *only* on error paths.
//! - **Features**: Context chaining, custom messages, transparent std errors, `is_*` helpers, `Result` alias.

use std::fmt;
use thiserror::Error;

/// Main error type — lightweight, Send + Sync + 'static.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors (most common): missing replacement file, failed atomic rename, etc.
    #[error("I/O error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    /// `rt64.json` failed to parse; callers reset the database to defaults and continue.
    #[error("database error: {0}")]
    Database(std::sync::Arc<serde_json::Error>),

    /// A replacement asset's bytes didn't match a known magic, or its header was malformed.
    #[error("replacement decode error: {0}")]
    Decode(String),

    /// Opaque wrapper for any other error (great for foreign crates).
    #[error(transparent)]
    Other(#[from] std::sync::Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Simple custom message (allocation only when error happens).
    #[error("{0}")]
    Custom(String),

    /// Rich context chaining (like anyhow but zero-cost when you control the types).
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(std::sync::Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Database(std::sync::Arc::new(e))
    }
}

impl Error {
    /// Create a custom error message (zero-cost when possible).
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a formatted custom error (like `format!` but returns `Error`).
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    /// Add context to any error (chainable, like `.context()` in anyhow).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Quick static message (no allocation if you pass `&'static str`).
    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    // === High-performance kind checks (branch prediction friendly) ===
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    #[inline]
    pub fn is_database(&self) -> bool {
        matches!(self, Error::Database(_))
    }

    #[inline]
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }

    #[inline]
    pub fn is_custom(&self) -> bool {
        matches!(self, Error::Custom(_))
    }

    // Add more `is_*` as you extend the enum.
}

// `#[derive(Error)]` already implements `Display` from the `#[error(...)]`
// attributes above; a second hand-written impl here would conflict with it.

/// Convenient `Result` alias — use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
