use std::{fmt, io};

use opentelemetry_otlp::ExporterBuildError;
use tracing::debug;

use crate::{entity_store, session_store};

#[derive(Debug)]
pub enum Error {
    ConfigMissing(String),
    InvalidValue { key: String, value: String },
    FileFormat(String),
    Io(io::Error),
    SessionStore(session_store::Error),
    EntityStore(entity_store::Error),
    ExporterInit(ExporterBuildError),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::ConfigMissing(a), Error::ConfigMissing(b))
            | (Error::FileFormat(a), Error::FileFormat(b)) => a == b,
            (
                Error::InvalidValue { key, value },
                Error::InvalidValue {
                    key: other_key,
                    value: other_value,
                },
            ) => key == other_key && value == other_value,
            (Error::Io(a), Error::Io(b)) => a.kind() == b.kind(),
            (Error::SessionStore(a), Error::SessionStore(b)) => a == b,
            (Error::EntityStore(a), Error::EntityStore(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ConfigMissing(key) => {
                write!(f, "Missing required configuration value: {key}")
            }
            Error::InvalidValue { key, value } => {
                write!(f, "Invalid value '{value}' for configuration key {key}")
            }
            Error::FileFormat(error) => {
                write!(f, "Configuration file format error: ")?;
                write!(f, "{error}")
            }
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::SessionStore(err) => write!(f, "Session store error: {err}"),
            Error::EntityStore(err) => write!(f, "Entity store error: {err}"),
            Error::ExporterInit(error) => {
                write!(f, "Exporter initialization error: {error}")
            }
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        debug!("TOML error: {error}");
        Error::FileFormat(error.to_string())
    }
}

impl From<session_store::Error> for Error {
    fn from(error: session_store::Error) -> Self {
        debug!("Session store error: {error}");
        Error::SessionStore(error)
    }
}

impl From<entity_store::Error> for Error {
    fn from(error: entity_store::Error) -> Self {
        debug!("Entity store error: {error}");
        Error::EntityStore(error)
    }
}

impl From<ExporterBuildError> for Error {
    fn from(error: ExporterBuildError) -> Self {
        Error::ExporterInit(error)
    }
}
