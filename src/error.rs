use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BootstrapError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonomyId(String),

    #[error("invalid experiment accession: {0}")]
    InvalidAccession(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing config file adage-bootstrap.json in current directory")]
    MissingConfig,

    #[error("deploy config file not found: {0}")]
    MissingDeployFile(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse config: {0}")]
    ConfigParse(String),

    #[error("failed to parse model definition {path}: {message}")]
    ModelDefinition { path: String, message: String },

    #[error("organism with taxonomy id {0} not found in database")]
    OrganismNotFound(u32),

    #[error("ML model not found in database: {0}")]
    ModelNotFound(String),

    #[error("participation type not found in database: {0}")]
    ParticipationTypeNotFound(String),

    #[error("signature {signature} not found for model {model}")]
    SignatureNotFound { signature: String, model: String },

    #[error("annotated experiments missing from database: {0}")]
    ExperimentsNotFound(String),

    #[error("{path} line #{line}: {message}")]
    MalformedRow {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{path}: {message}")]
    MalformedFile { path: String, message: String },

    #[error("annotation mismatches found. Total: {0} samples")]
    AnnotationMismatch(usize),

    #[error("database error: {0}")]
    Database(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("command failed: {0}")]
    CommandFailed(String),
}

impl From<rusqlite::Error> for BootstrapError {
    fn from(err: rusqlite::Error) -> Self {
        BootstrapError::Database(err.to_string())
    }
}
