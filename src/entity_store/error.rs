use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Configuration(String),
    InvalidName(String),
    Io(String),
    Serialization(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Error::InvalidName(name) => write!(f, "Invalid collection or entity name: {name}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Serialization(e) => write!(f, "Serialization error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
