// Error taxonomy shared by every stage of a check run

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    // Missing or malformed input. Raised before any side effect.
    #[error("ConfigurationError: {0}")]
    Configuration(String),

    // Network, timeout, non-2xx or oversized body. The next scheduled run is the retry.
    #[error("FetchError: {0}")]
    Fetch(String),

    // Structurally unusable input only. A missing date is a normal verdict, not this.
    #[error("ParseError: {0}")]
    Parse(String),

    // Messaging channel failure. Never retried inside a run.
    #[error("DispatchError: {0}")]
    Dispatch(String),
}

impl MonitorError {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Configuration(_) => "ConfigurationError",
            MonitorError::Fetch(_) => "FetchError",
            MonitorError::Parse(_) => "ParseError",
            MonitorError::Dispatch(_) => "DispatchError",
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, MonitorError::Configuration(_))
    }
}

// Flattens an error and its `source()` chain into one diagnostic string.
// reqwest hides the interesting part (DNS, refused, timed out) a level or two down.
pub fn describe_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}
