use crate::entities::ItemKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while resolving configuration blocks and plugin schemas.
/// These are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found at {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("Failed to parse configuration")]
    Parse(#[from] serde_yaml::Error),
    #[error("No platform block named '{0}' in the configuration")]
    UnknownBlock(String),
    #[error("No platform plugin registered under '{0}'")]
    UnknownPlugin(String),
    #[error("No id generator registered under '{0}'")]
    UnknownIdGenerator(String),
    #[error("Field '{field}' expects a {expected} value, got '{value}'")]
    Coerce {
        field: String,
        expected: &'static str,
        value: String,
    },
    #[error("Platform '{plugin}' requires field '{field}'")]
    MissingField { plugin: String, field: String },
    #[error("The 'item_sequence' id generator requires an 'item_sequence' section")]
    MissingSequenceSection,
    #[error("Failed to read configuration")]
    Io(#[from] std::io::Error),
}

/// An entity violated one of the model invariants. Fatal at submission time
/// and surfaced to the caller untouched.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Experiment '{0}' is frozen and can no longer be modified")]
    Frozen(String),
    #[error("Entity '{0}' already exists on the backend, resubmission creates a new entity")]
    AlreadyCreated(String),
    #[error("Duplicate asset at '{0}'")]
    DuplicateAsset(String),
    #[error("Sweep callback failed: {0}")]
    SweepCallback(String),
    #[error("Entity has not been created on a backend yet")]
    MissingId,
    #[error("Simulation is missing its parent experiment")]
    MissingParent,
    #[error("{0}")]
    Invalid(String),
}

/// Backend failures, split into the retriable and the hopeless.
///
/// The operations layer is responsible for translating backend specific
/// errors into these kinds; the orchestration engine only ever inspects
/// [`PlatformError::is_transient`].
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("{kind} '{id}' was not found")]
    NotFound { kind: ItemKind, id: String },
    #[error("Transient backend failure during {operation}")]
    Transient {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Backend rejected {operation} for '{id}': {reason}")]
    Permanent {
        operation: String,
        id: String,
        reason: String,
    },
    #[error("Operation {operation} is not supported for {kind}")]
    Unsupported {
        operation: &'static str,
        kind: ItemKind,
    },
    #[error("I/O failure during {operation} for '{id}'")]
    Io {
        operation: String,
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl PlatformError {
    pub fn transient<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transient {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn io(operation: impl Into<String>, id: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            id: id.into(),
            source,
        }
    }

    /// Whether the infra retry wrapper is allowed to retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failures of the orchestration engine itself.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Timed out after {elapsed:?} waiting on '{id}'")]
    Timeout { id: String, elapsed: Duration },
    #[error("Wait on '{id}' was canceled by the caller")]
    WaitCanceled { id: String },
    #[error("Submission of '{id}' failed")]
    Submission {
        id: String,
        #[source]
        source: PlatformError,
    },
    #[error("Failed to start the submission worker pool: {0}")]
    WorkerPool(String),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
