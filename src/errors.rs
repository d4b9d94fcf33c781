//! Error handling for the gatelock runtime
//!
//! One central error type covers the token, session, and store paths so
//! every caller boundary can translate failures into the right HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for the gatelock runtime
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Token rejected: {reason}")]
    TokenMalformed { reason: String },

    #[error("Token expired: issued at {issued_at}")]
    TokenExpired { issued_at: DateTime<Utc> },

    #[error("Invalid progression: expected stage {expected}, claimed {claimed}")]
    InvalidProgression { expected: u32, claimed: u32 },

    #[error("Gateway already completed for session {session_id}")]
    AlreadyCompleted { session_id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Gateway not found: {id}")]
    GatewayNotFound { id: String },

    #[error("Store operation failed: {operation} - {source}")]
    Store {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Encryption operation failed: {operation}")]
    Encryption { operation: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Too many requests: {message}")]
    RateLimited { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with GateError
pub type GateResult<T> = Result<T, GateError>;

impl GateError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a malformed-token error
    pub fn token_malformed(reason: impl Into<String>) -> Self {
        Self::TokenMalformed {
            reason: reason.into(),
        }
    }

    /// Create an expired-token error
    pub fn token_expired(issued_at: DateTime<Utc>) -> Self {
        Self::TokenExpired { issued_at }
    }

    /// Create an invalid-progression error
    pub fn invalid_progression(expected: u32, claimed: u32) -> Self {
        Self::InvalidProgression { expected, claimed }
    }

    /// Create an already-completed rejection
    pub fn already_completed(session_id: impl Into<String>) -> Self {
        Self::AlreadyCompleted {
            session_id: session_id.into(),
        }
    }

    /// Create a session-not-found error
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { id: id.into() }
    }

    /// Create a gateway-not-found error
    pub fn gateway_not_found(id: impl Into<String>) -> Self {
        Self::GatewayNotFound { id: id.into() }
    }

    /// Create a store error
    pub fn store(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create an encryption error
    pub fn encryption(operation: impl Into<String>) -> Self {
        Self::Encryption {
            operation: operation.into(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a rate-limit rejection
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match self {
            GateError::TokenMalformed { .. }
            | GateError::InvalidProgression { .. }
            | GateError::Serialization { .. }
            | GateError::Validation { .. } => StatusCode::BAD_REQUEST,
            GateError::TokenExpired { .. } => StatusCode::UNAUTHORIZED,
            GateError::SessionNotFound { .. } | GateError::GatewayNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            // The advance route resolves this to 200 "already done" itself;
            // any other surface reports a conflict.
            GateError::AlreadyCompleted { .. } => StatusCode::CONFLICT,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            // Default to 500 for server-side failures
            GateError::Config { .. }
            | GateError::Store { .. }
            | GateError::Encryption { .. }
            | GateError::Io { .. }
            | GateError::LockPoisoned { .. }
            | GateError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Helper trait for safe RwLock read operations
pub trait SafeReadLock<T: ?Sized> {
    /// Safely acquire a read lock
    fn safe_read(&self) -> GateResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self) -> GateResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read().map_err(|_| GateError::LockPoisoned {
            resource: "rwlock_read".to_string(),
        })
    }
}

/// Helper trait for safe RwLock write operations
pub trait SafeWriteLock<T: ?Sized> {
    /// Safely acquire a write lock
    fn safe_write(&self) -> GateResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self) -> GateResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write().map_err(|_| GateError::LockPoisoned {
            resource: "rwlock_write".to_string(),
        })
    }
}

/// Convert from sled errors
impl From<sled::Error> for GateError {
    fn from(err: sled::Error) -> Self {
        GateError::store("sled_operation", err)
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::serialization("json_operation", err)
    }
}

/// Convert from std::io errors
impl From<std::io::Error> for GateError {
    fn from(err: std::io::Error) -> Self {
        GateError::io("io_operation", err)
    }
}
