use std::fmt;

use tracing::{debug, warn};

use crate::session_store;

/// A provider refused, or failed, to turn a callback payload into a profile.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderExchangeError {
    /// The provider reported an error or the user declined consent.
    Rejected(String),
    /// The callback payload misses a parameter the provider protocol requires.
    MissingParameter(&'static str),
    Transport(String),
    InvalidResponse(String),
}

impl fmt::Display for ProviderExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderExchangeError::Rejected(reason) => write!(f, "Provider rejected: {reason}"),
            ProviderExchangeError::MissingParameter(name) => {
                write!(f, "Missing callback parameter: {name}")
            }
            ProviderExchangeError::Transport(msg) => write!(f, "Transport error: {msg}"),
            ProviderExchangeError::InvalidResponse(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ProviderExchangeError {}

impl From<reqwest::Error> for ProviderExchangeError {
    fn from(error: reqwest::Error) -> Self {
        debug!("Provider request error: {error}");
        if error.is_decode() {
            ProviderExchangeError::InvalidResponse(error.to_string())
        } else {
            ProviderExchangeError::Transport(error.to_string())
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum FederationError {
    UnknownProvider(String),
    /// No handshake correlation matches the callback (expired, replayed or forged).
    CorrelationMissing,
    Timeout,
    Exchange(ProviderExchangeError),
    Session(session_store::Error),
}

impl fmt::Display for FederationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FederationError::UnknownProvider(name) => write!(f, "Unknown provider: {name}"),
            FederationError::CorrelationMissing => write!(f, "Handshake correlation missing"),
            FederationError::Timeout => write!(f, "Provider exchange timed out"),
            FederationError::Exchange(e) => write!(f, "Provider exchange failed: {e}"),
            FederationError::Session(e) => write!(f, "Session store error: {e}"),
        }
    }
}

impl FederationError {
    /// Short label of the failure cause.
    pub fn cause(&self) -> &'static str {
        match self {
            FederationError::UnknownProvider(_) => "unknown_provider",
            FederationError::CorrelationMissing => "correlation",
            FederationError::Timeout => "timeout",
            FederationError::Exchange(ProviderExchangeError::Rejected(_)) => "rejected",
            FederationError::Exchange(_) => "exchange",
            FederationError::Session(_) => "session",
        }
    }
}

impl std::error::Error for FederationError {}

impl From<ProviderExchangeError> for FederationError {
    fn from(error: ProviderExchangeError) -> Self {
        FederationError::Exchange(error)
    }
}

impl From<session_store::Error> for FederationError {
    fn from(error: session_store::Error) -> Self {
        warn!("Session store error during handshake: {error}");
        FederationError::Session(error)
    }
}
