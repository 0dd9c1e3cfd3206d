use std::collections::HashMap;
use std::fmt;
use std::io::Error as IoError;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::directory::{FamilyCodeError, JoinError};
use crate::identity::IdentityError;
use crate::remote::RemoteError;

/// A structured application error that can be serialized and surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(type = "Record<string, string>")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Emit the error as a structured `error` event.
    pub fn log_with_event(&self, event: &'static str) {
        tracing::error!(
            target: "famhealth",
            event,
            code = %self.code,
            message = %self.message,
            context = ?self.context
        );
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        let code = match &error {
            RemoteError::Network(_) => "REMOTE/NETWORK",
            RemoteError::Permission(_) => "REMOTE/PERMISSION",
            RemoteError::Status { .. } => "REMOTE/STATUS",
            RemoteError::Decode(_) => "REMOTE/DECODE",
            RemoteError::Unavailable(_) => "REMOTE/UNAVAILABLE",
        };
        let app_error = AppError::new(code, error.to_string());
        match error {
            RemoteError::Status { status, .. } => {
                app_error.with_context("status", status.to_string())
            }
            _ => app_error,
        }
    }
}

impl From<FamilyCodeError> for AppError {
    fn from(error: FamilyCodeError) -> Self {
        AppError::new("FAMILY/INVALID_CODE", error.to_string())
    }
}

impl From<JoinError> for AppError {
    fn from(error: JoinError) -> Self {
        match error {
            JoinError::InvalidCode(inner) => AppError::from(inner),
            JoinError::NotFound(code) => {
                AppError::new("FAMILY/NOT_FOUND", "Family not found. Check the code and try again.")
                    .with_context("family_code", code)
            }
            JoinError::NotSignedIn => {
                AppError::new("FAMILY/NOT_SIGNED_IN", "Sign in before joining a family.")
            }
            JoinError::Remote(inner) => {
                AppError::new("FAMILY/REMOTE", "Failed to reach the family directory.")
                    .with_cause(inner)
            }
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(error: IdentityError) -> Self {
        let code = match &error {
            IdentityError::Cancelled => "IDENTITY/CANCELLED",
            IdentityError::Denied(_) => "IDENTITY/DENIED",
            IdentityError::Unavailable(_) => "IDENTITY/UNAVAILABLE",
        };
        AppError::new(code, error.to_string())
    }
}
