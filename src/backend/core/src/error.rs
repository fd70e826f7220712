//! Error handling for the Warden authorization core.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable code
//! - The coarse taxonomy (`ErrorKind`) callers branch on
//! - HTTP status mapping for transport adapters
//! - User-facing vs internal messages
//! - Severity-aware logging through `tracing`
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::error::{Result, WardenError};
//!
//! fn lookup(selector: &Selector) -> Result<Role> {
//!     find_role(selector).ok_or_else(|| WardenError::role_not_found(selector.to_string()))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Taxonomy
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse error taxonomy exposed to collaborators.
///
/// Every [`ErrorCode`] belongs to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Forbidden,
    Unauthorized,
    Conflict,
    Upstream,
    CompensationFailed,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::InvalidInput => "invalid_input",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::Conflict => "conflict",
            Self::Upstream => "upstream",
            Self::CompensationFailed => "compensation_failed",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Which catalog entity a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundKind {
    Role,
    Resource,
    ResourceType,
    User,
    Domain,
}

impl NotFoundKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Resource => "resource",
            Self::ResourceType => "resource_type",
            Self::User => "user",
            Self::Domain => "domain",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Lookup Errors (1000-1099)
    RoleNotFound,
    ResourceNotFound,
    ResourceTypeNotFound,
    ParentNotFound,
    UserNotFound,
    DomainNotFound,

    // Input Errors (1100-1199)
    InvalidSubjectFormat,
    UnknownRoleExpression,
    UnknownAction,
    InvalidHierarchy,
    InvalidInput,

    // Access Errors (1200-1299)
    Unauthorized,
    Forbidden,

    // Storage Errors (2000-2099)
    DuplicateResource,
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseTransactionFailed,

    // Policy Store Errors (2100-2199)
    PolicyStoreUnavailable,
    CompensationFailed,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::RoleNotFound => 1000,
            Self::ResourceNotFound => 1001,
            Self::ResourceTypeNotFound => 1002,
            Self::ParentNotFound => 1003,
            Self::UserNotFound => 1004,
            Self::DomainNotFound => 1005,

            Self::InvalidSubjectFormat => 1100,
            Self::UnknownRoleExpression => 1101,
            Self::UnknownAction => 1102,
            Self::InvalidHierarchy => 1103,
            Self::InvalidInput => 1104,

            Self::Unauthorized => 1200,
            Self::Forbidden => 1201,

            Self::DuplicateResource => 2000,
            Self::DatabaseError => 2001,
            Self::DatabaseConnectionFailed => 2002,
            Self::DatabaseTransactionFailed => 2003,

            Self::PolicyStoreUnavailable => 2100,
            Self::CompensationFailed => 2101,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,

            Self::InternalError => 9000,
        }
    }

    /// Taxonomy tag for this code.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RoleNotFound
            | Self::ResourceNotFound
            | Self::ResourceTypeNotFound
            | Self::ParentNotFound
            | Self::UserNotFound
            | Self::DomainNotFound => ErrorKind::NotFound,

            Self::InvalidSubjectFormat
            | Self::UnknownRoleExpression
            | Self::UnknownAction
            | Self::InvalidHierarchy
            | Self::InvalidInput => ErrorKind::InvalidInput,

            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden => ErrorKind::Forbidden,

            Self::DuplicateResource => ErrorKind::Conflict,

            Self::DatabaseError
            | Self::DatabaseConnectionFailed
            | Self::DatabaseTransactionFailed
            | Self::PolicyStoreUnavailable => ErrorKind::Upstream,

            Self::CompensationFailed => ErrorKind::CompensationFailed,

            Self::SerializationError | Self::ConfigurationError | Self::InternalError => {
                ErrorKind::Internal
            }
        }
    }

    /// The entity a `NotFound` code refers to.
    ///
    /// A missing parent is a missing resource.
    pub const fn not_found_kind(&self) -> Option<NotFoundKind> {
        match self {
            Self::RoleNotFound => Some(NotFoundKind::Role),
            Self::ResourceNotFound | Self::ParentNotFound => Some(NotFoundKind::Resource),
            Self::ResourceTypeNotFound => Some(NotFoundKind::ResourceType),
            Self::UserNotFound => Some(NotFoundKind::User),
            Self::DomainNotFound => Some(NotFoundKind::Domain),
            _ => None,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Upstream => match self {
                Self::DatabaseError | Self::DatabaseTransactionFailed => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
            ErrorKind::CompensationFailed | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnectionFailed | Self::PolicyStoreUnavailable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing records, denials)
    Low,
    /// Operational issues
    Medium,
    /// System errors (database failures)
    High,
    /// Inconsistent state left behind
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code.kind() {
            ErrorKind::NotFound
            | ErrorKind::InvalidInput
            | ErrorKind::Conflict
            | ErrorKind::Forbidden
            | ErrorKind::Unauthorized => Self::Low,
            ErrorKind::Upstream => match code {
                ErrorCode::DatabaseConnectionFailed => Self::High,
                _ => Self::Medium,
            },
            ErrorKind::Internal => Self::High,
            ErrorKind::CompensationFailed => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (role value, resource uuid, email, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty() && self.entity_id.is_none() && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden.
#[derive(Error, Debug)]
#[allow(dead_code)]
pub struct WardenError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,

    /// Backtrace for debugging (captured in debug builds)
    #[cfg(debug_assertions)]
    backtrace: Option<std::backtrace::Backtrace>,
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WardenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
            #[cfg(debug_assertions)]
            backtrace: Some(std::backtrace::Backtrace::capture()),
        }
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error for a catalog entity.
    pub fn not_found(kind: NotFoundKind, entity_id: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let code = match kind {
            NotFoundKind::Role => ErrorCode::RoleNotFound,
            NotFoundKind::Resource => ErrorCode::ResourceNotFound,
            NotFoundKind::ResourceType => ErrorCode::ResourceTypeNotFound,
            NotFoundKind::User => ErrorCode::UserNotFound,
            NotFoundKind::Domain => ErrorCode::DomainNotFound,
        };
        Self::new(code, format!("{} not found: {}", kind.as_str(), entity_id))
            .with_details(ErrorDetails::new().with_entity(kind.as_str(), &entity_id))
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create a forbidden error.
    pub fn forbidden(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the taxonomy tag.
    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    /// Entity kind for `NotFound` errors.
    pub fn not_found_kind(&self) -> Option<NotFoundKind> {
        self.code.not_found_kind()
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let kind = self.kind();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    kind = %kind,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    kind = %kind,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    kind = %kind,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    kind = %kind,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// Taxonomy tag
    pub kind: ErrorKind,

    /// User-friendly error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&WardenError> for ErrorResponse {
    fn from(error: &WardenError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                kind: error.kind(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for WardenError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("unique") || constraint.contains("key") {
                        return Self::with_internal(
                            ErrorCode::DuplicateResource,
                            "A record with this identifier already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseError, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for WardenError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::DatabaseError,
            "Database migration failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<casbin::Error> for WardenError {
    fn from(error: casbin::Error) -> Self {
        Self::with_internal(
            ErrorCode::PolicyStoreUnavailable,
            "The policy store is unavailable",
            error.to_string(),
        )
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "Failed to process JSON data",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<anyhow::Error> for WardenError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<WardenError>() {
            Ok(warden_error) => warden_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for WardenError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Configuration error occurred",
            error.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl WardenError {
    // ─────────────────────────────────────────────────────────────────────────
    // Catalog
    // ─────────────────────────────────────────────────────────────────────────

    /// A role looked up by value does not exist.
    pub fn role_not_found(value: impl Into<String>) -> Self {
        Self::not_found(NotFoundKind::Role, value)
    }

    /// A resource looked up by selector does not exist.
    pub fn resource_not_found(selector: impl fmt::Display) -> Self {
        Self::not_found(NotFoundKind::Resource, selector.to_string())
    }

    /// A resource type looked up by value does not exist.
    pub fn resource_type_not_found(value: impl Into<String>) -> Self {
        Self::not_found(NotFoundKind::ResourceType, value)
    }

    pub fn user_not_found(selector: impl fmt::Display) -> Self {
        Self::not_found(NotFoundKind::User, selector.to_string())
    }

    pub fn domain_not_found(selector: impl fmt::Display) -> Self {
        Self::not_found(NotFoundKind::Domain, selector.to_string())
    }

    /// The parent named for a new resource does not exist.
    pub fn parent_not_found(parent_uuid: impl Into<String>) -> Self {
        let parent_uuid = parent_uuid.into();
        Self::new(
            ErrorCode::ParentNotFound,
            format!("parent resource not found: {}", parent_uuid),
        )
        .with_details(ErrorDetails::new().with_entity("resource", &parent_uuid))
    }

    /// A resource of `child_type` may not be placed under `parent_type`.
    pub fn invalid_hierarchy(child_type: &str, parent_type: Option<&str>) -> Self {
        let message = match parent_type {
            Some(parent) => format!("a {} cannot be parented to a {}", child_type, parent),
            None => format!("a {} requires a parent resource", child_type),
        };
        Self::new(ErrorCode::InvalidHierarchy, message)
            .with_context("child_type", child_type)
            .with_context("parent_type", parent_type)
    }

    /// A resource with this uuid is already registered.
    pub fn duplicate_resource(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self::new(
            ErrorCode::DuplicateResource,
            format!("resource already exists: {}", uuid),
        )
        .with_details(ErrorDetails::new().with_entity("resource", &uuid))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────

    /// A compound subject string failed to decode.
    pub fn invalid_subject(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        let subject = subject.into();
        Self::new(
            ErrorCode::InvalidSubjectFormat,
            format!("malformed compound subject '{}': {}", subject, reason.into()),
        )
        .with_context("subject", subject)
    }

    /// A role expression other than AND/OR was supplied.
    pub fn unknown_role_expression(expression: impl Into<String>) -> Self {
        let expression = expression.into();
        Self::new(
            ErrorCode::UnknownRoleExpression,
            format!("unknown role expression: {}", expression),
        )
        .with_context("expression", expression)
        .with_details(ErrorDetails::new().with_suggestion("use AND or OR"))
    }

    /// An action outside the closed action set was supplied.
    pub fn unknown_action(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(ErrorCode::UnknownAction, format!("unknown action: {}", action))
            .with_context("action", action)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Policy Store
    // ─────────────────────────────────────────────────────────────────────────

    /// The policy store rejected or could not service a request.
    pub fn policy_store(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PolicyStoreUnavailable,
            "The policy store is unavailable",
            message,
        )
    }

    /// Compensation could not undo every step of a failed saga.
    ///
    /// `residual` lists the grants or memberships still in place.
    pub fn compensation_failed(cause: &WardenError, residual: Vec<String>) -> Self {
        Self::with_internal(
            ErrorCode::CompensationFailed,
            "Access grants were left partially applied",
            cause.to_string(),
        )
        .with_context("residual", residual)
        .with_context("cause_code", cause.code())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::RoleNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::InvalidSubjectFormat.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Unauthorized.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::DuplicateResource.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::PolicyStoreUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::CompensationFailed.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_every_code_has_a_kind() {
        assert_eq!(ErrorCode::ParentNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ErrorCode::UnknownRoleExpression.kind(), ErrorKind::InvalidInput);
        assert_eq!(ErrorCode::InvalidHierarchy.kind(), ErrorKind::InvalidInput);
        assert_eq!(ErrorCode::DuplicateResource.kind(), ErrorKind::Conflict);
        assert_eq!(ErrorCode::DatabaseConnectionFailed.kind(), ErrorKind::Upstream);
        assert_eq!(ErrorCode::CompensationFailed.kind(), ErrorKind::CompensationFailed);
    }

    #[test]
    fn test_not_found_kind() {
        let error = WardenError::role_not_found("builder_admin");
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(error.not_found_kind(), Some(NotFoundKind::Role));
        assert_eq!(error.details().entity_id.as_deref(), Some("builder_admin"));

        let error = WardenError::parent_not_found("C1-does-not-exist");
        assert_eq!(error.code(), ErrorCode::ParentNotFound);
        assert_eq!(error.not_found_kind(), Some(NotFoundKind::Resource));

        assert_eq!(WardenError::forbidden("no").not_found_kind(), None);
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::PolicyStoreUnavailable.is_retryable());
        assert!(ErrorCode::DatabaseConnectionFailed.is_retryable());
        assert!(!ErrorCode::Forbidden.is_retryable());
        assert!(!ErrorCode::CompensationFailed.is_retryable());
    }

    #[test]
    fn test_error_context() {
        let error = WardenError::invalid_input("bad")
            .with_context("field", "email")
            .with_context("reason", "invalid format");

        assert!(error.details().context.contains_key("field"));
        assert!(error.details().context.contains_key("reason"));
    }

    #[test]
    fn test_compensation_failed_names_residual() {
        let cause = WardenError::policy_store("connection reset");
        let error = WardenError::compensation_failed(&cause, vec!["42|1|C1|read".to_string()]);

        assert_eq!(error.kind(), ErrorKind::CompensationFailed);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert_eq!(
            error.details().context.get("residual"),
            Some(&serde_json::json!(["42|1|C1|read"]))
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let error = WardenError::unknown_role_expression("XOR");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("UNKNOWN_ROLE_EXPRESSION"));
        assert!(json.contains("invalid_input"));
        assert!(json.contains("XOR"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InvalidInput),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::PolicyStoreUnavailable),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::DatabaseConnectionFailed),
            ErrorSeverity::High
        );
    }

    #[test]
    fn test_error_display() {
        let error = WardenError::with_internal(
            ErrorCode::DatabaseError,
            "A database error occurred",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("A database error occurred"));
        assert!(display.contains("Connection refused"));
    }
}
