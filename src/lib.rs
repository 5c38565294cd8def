//! Flatshop Store is the persistence layer of a small storefront that keeps its
//! catalog and its order ledger in flat CSV files instead of a database.
//!
//! Each store owns exactly one file. Readers work against an in-memory snapshot
//! (catalog) or a fresh read of the file (ledger); writers are serialized by a
//! per-store lock and persist through an atomic write-then-rename so that no
//! reader ever observes a half-written file. Customer details on orders are
//! encrypted at rest with AES-256-GCM.
//!
//! ## Core Components
//! - [`engine`]: record codec, atomic persistence, field encryption and the two stores.
//! - [`shop`]: the [`Shop`] handle bundling a [`Catalog`](engine::Catalog) and a [`Ledger`](engine::Ledger).
//! - [`server`]: TCP line-protocol router exposing the stores.
//! - [`config`]: environment-driven [`StoreConfig`].

pub mod config;
pub mod engine;
pub mod server;
pub mod shop;

use std::fmt;
use thiserror::Error;

pub use config::StoreConfig;
pub use shop::Shop;

/// Errors returned by the stores.
#[derive(Error, Debug)]
pub enum Error {
    /// The input was rejected before anything was mutated.
    #[error("validation failed: {0}")]
    Validation(Violations),
    /// No product carries the requested SKU.
    #[error("product not found: {0}")]
    ProductNotFound(String),
    /// No order carries the requested id.
    #[error("order not found: {0}")]
    OrderNotFound(u64),
    /// A backing file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The CSV reader or writer failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// A field could not be encrypted or decrypted.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Error during JSON serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], used by callers that only need to
/// know which family a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Io,
    Crypto,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Shorthand for a validation error carrying a single message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Validation(Violations::single(message))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::ProductNotFound(_) | Error::OrderNotFound(_) => ErrorKind::NotFound,
            Error::Io(_) | Error::Csv(_) => ErrorKind::Io,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Serialization(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A list of human-readable validation messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self(vec![message.into()])
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// Turns the collected messages into `Err` when there is at least one.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
