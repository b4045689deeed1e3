use std::io;
use thiserror::Error;

use regtree_raw::{BindingError, RangeError};

#[derive(Error, Debug)]
pub enum RegtreeError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Conversion error at '{path}': {reason}")]
    Conversion { path: String, reason: String },

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("Invalid value '{value}' for {datatype} datatype")]
    DatatypeInvalid { datatype: String, value: String },

    #[error(transparent)]
    Io(#[from] BindingError),

    #[error("Invalid arguments: {0}")]
    Args(String),

    #[error("Driver '{0}' does not support discovery")]
    DriverNotSupported(String),

    #[error("Timed out after {attempts} polls of '{path}'")]
    Timeout { path: String, attempts: u32 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Definition error: {0}")]
    Definition(String),

    #[error("{path}: {source}")]
    At {
        path: String,
        #[source]
        source: Box<RegtreeError>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    SystemIo(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),
}

impl RegtreeError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RegtreeError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn conversion(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RegtreeError::Conversion {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach the path of the dirent being accessed
    pub fn at(self, path: impl Into<String>) -> Self {
        match self {
            already @ RegtreeError::At { .. } => already,
            source => RegtreeError::At {
                path: path.into(),
                source: Box::new(source),
            },
        }
    }

    pub fn datatype_invalid(datatype: impl Into<String>, value: impl ToString) -> Self {
        RegtreeError::DatatypeInvalid {
            datatype: datatype.into(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RegtreeError>;
