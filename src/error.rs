use crate::environment::Capability;
use std::panic::{self, AssertUnwindSafe};

/// Result alias carrying the crate level [`HostError`].
pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("invalid parameter schema for '{id}': {reason}")]
    InvalidSchema { id: String, reason: String },
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),
    #[error("plugin '{0}' is disabled by configuration")]
    PluginDisabled(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("invalid value for parameter '{id}': {reason}")]
    InvalidValue { id: String, reason: String },
    #[error("failed to initialize {capability} environment: {source:#}")]
    EnvironmentInit {
        capability: Capability,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0} environment has been disposed")]
    EnvironmentDisposed(Capability),
    #[error("no active {0} environment")]
    EnvironmentUnavailable(Capability),
    #[error("plugin '{id}' failed to load: {source:#}")]
    LoadFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("activation of '{requested}' failed{}: {cause}", rolled_back_suffix(.rolled_back_to))]
    ActivationFailed { requested: String, rolled_back_to: Option<String>, cause: Box<HostError> },
}

fn rolled_back_suffix(rolled_back_to: &Option<String>) -> String {
    match rolled_back_to {
        Some(id) => format!(" (restored '{id}')"),
        None => String::new(),
    }
}

impl HostError {
    pub fn schema(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema { id: id.into(), reason: reason.into() }
    }

    pub fn invalid_value(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue { id: id.into(), reason: reason.into() }
    }

    /// True for errors that stem from caller input rather than a failed transition.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSchema { .. }
                | Self::UnknownPlugin(_)
                | Self::DuplicatePlugin(_)
                | Self::PluginDisabled(_)
                | Self::UnknownParameter(_)
                | Self::InvalidValue { .. }
        )
    }

    /// Innermost error for activation failures, otherwise `self`.
    pub fn root_cause(&self) -> &HostError {
        match self {
            Self::ActivationFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Runs a plugin-supplied callback, turning a panic into an error.
pub(crate) fn isolate<T>(f: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(anyhow::anyhow!("callback panicked: {message}"))
        }
    }
}
