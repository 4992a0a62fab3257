use std::{fmt, io};

use tracing::debug;

use crate::{configuration, entity_store, server, session_store};

#[derive(Debug)]
pub enum Error {
    Initialization(String),
    Execution(String),
    IO(io::Error),
    Configuration(configuration::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Initialization(err) => write!(f, "Initialization error: {err}"),
            Error::Execution(err) => write!(f, "Execution error: {err}"),
            Error::IO(err) => write!(f, "IO error: {err}"),
            Error::Configuration(err) => {
                write!(f, "Configuration error: ")?;
                write!(f, "{err}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<configuration::Error> for Error {
    fn from(err: configuration::Error) -> Self {
        Error::Configuration(err)
    }
}

impl From<server::Error> for Error {
    fn from(err: server::Error) -> Self {
        debug!("Server error: {err}");
        match err {
            server::Error::Initialization(msg) => Error::Initialization(msg),
            server::Error::Execution(msg) => Error::Execution(msg),
        }
    }
}

impl From<session_store::Error> for Error {
    fn from(err: session_store::Error) -> Self {
        Error::Initialization(format!("Unable to open session store: {err}"))
    }
}

impl From<entity_store::Error> for Error {
    fn from(err: entity_store::Error) -> Self {
        Error::Initialization(format!("Unable to open entity store: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Execution(format!("Unable to render output: {err}"))
    }
}
