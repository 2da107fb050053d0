//! Error types for the bucket engine

use crate::granularity::Granularity;
use thiserror::Error;

/// Main error type for the bucket engine
#[derive(Error, Debug)]
pub enum Error {
    /// Collection configuration error (rejected reconfiguration, bad options)
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Document validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A collection with this name already exists
    #[error("Collection already exists: {0}")]
    NamespaceExists(String),

    /// No collection with this name exists
    #[error("Collection not found: {0}")]
    NamespaceNotFound(String),

    /// Engine settings could not be loaded or saved
    #[error("Settings error: {0}")]
    Settings(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Collection configuration errors
///
/// Reported synchronously to the caller. The collection's state is never
/// modified when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Requested granularity is coarser-to-finer than the current one
    #[error("Granularity decrease not supported: cannot change from {current} to {requested}")]
    GranularityDecrease {
        /// Granularity in effect when the request was evaluated
        current: Granularity,
        /// Granularity that was requested
        requested: Granularity,
    },

    /// Unknown granularity name
    #[error("Invalid granularity '{0}': expected one of seconds, minutes, hours")]
    InvalidGranularity(String),

    /// Time-series options are malformed
    #[error("Invalid timeseries options: {0}")]
    InvalidOptions(String),
}

/// Document validation errors
///
/// Produced by the extraction layer before a measurement ever reaches
/// bucket assignment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Input is not a JSON object
    #[error("Measurement must be a document, got {0}")]
    NotADocument(String),

    /// The configured time field is absent
    #[error("Missing time field '{0}'")]
    MissingTimeField(String),

    /// The configured time field holds something other than a date
    #[error("Invalid value for time field '{field}': {message}")]
    InvalidTimeField {
        /// Time field name
        field: String,
        /// Description of the problem
        message: String,
    },
}

/// Persistence errors
///
/// A closed bucket that fails to persist stays closed in the catalog;
/// the failure is surfaced through the insert's persistence ticket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store rejected or failed the write
    #[error("Failed to persist bucket {bucket}: {message}")]
    WriteFailed {
        /// Display form of the bucket id
        bucket: String,
        /// Underlying failure
        message: String,
    },

    /// The persistence worker is no longer running
    #[error("Persistence queue closed")]
    QueueClosed,

    /// The bucket belongs to a collection that has since been dropped
    #[error("Collection dropped before bucket could be persisted: {0}")]
    CollectionDropped(String),

    /// Generic backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
