//! Error types for the frame stack and collaboration layers.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Stable error codes surfaced to collaborators (CLI, MCP tools).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FrameNotFound,
    FrameInvalidState,
    FrameInvalidInput,
    FrameStackOverflow,
    FrameCycleDetected,
    FrameHierarchyCorrupt,
    PermissionDenied,
    StackNotFound,
    HandoffNotFound,
    HandoffInvalidState,
    MergeSessionNotFound,
    MergePolicyNotFound,
    MergeConflictNotFound,
    MergeNotReady,
    ValidationFailed,
    DbError,
    ConfigError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FrameNotFound => "FRAME_NOT_FOUND",
            ErrorCode::FrameInvalidState => "FRAME_INVALID_STATE",
            ErrorCode::FrameInvalidInput => "FRAME_INVALID_INPUT",
            ErrorCode::FrameStackOverflow => "FRAME_STACK_OVERFLOW",
            ErrorCode::FrameCycleDetected => "FRAME_CYCLE_DETECTED",
            ErrorCode::FrameHierarchyCorrupt => "FRAME_HIERARCHY_CORRUPT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::StackNotFound => "STACK_NOT_FOUND",
            ErrorCode::HandoffNotFound => "HANDOFF_NOT_FOUND",
            ErrorCode::HandoffInvalidState => "HANDOFF_INVALID_STATE",
            ErrorCode::MergeSessionNotFound => "MERGE_SESSION_NOT_FOUND",
            ErrorCode::MergePolicyNotFound => "MERGE_POLICY_NOT_FOUND",
            ErrorCode::MergeConflictNotFound => "MERGE_CONFLICT_NOT_FOUND",
            ErrorCode::MergeNotReady => "MERGE_NOT_READY",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::DbError => "DB_ERROR",
            ErrorCode::ConfigError => "CONFIG_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the frame manager and the collaboration layer
#[derive(Debug, Error)]
pub enum StackError {
    #[error("Frame not found: {0}")]
    FrameNotFound(String),

    #[error("Invalid frame state for {frame_id:?}: {reason}")]
    InvalidState {
        frame_id: Option<String>,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Stack overflow: {reason} (current {current}, limit {limit})")]
    StackOverflow {
        reason: String,
        current: usize,
        limit: usize,
    },

    #[error("Cycle detected: making {parent_id} the parent of {frame_id} closes the loop {path:?}")]
    CycleDetected {
        frame_id: String,
        parent_id: String,
        path: Vec<String>,
    },

    #[error("Frame hierarchy corrupt near {frame_id}: walked more than {limit} ancestors")]
    HierarchyCorrupt { frame_id: String, limit: usize },

    #[error("Permission denied: {actor} cannot {action} on {resource}")]
    PermissionDenied {
        actor: String,
        action: String,
        resource: String,
    },

    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Handoff request not found: {0}")]
    HandoffNotFound(String),

    #[error("Handoff {request_id} cannot proceed: {reason}")]
    HandoffInvalidState { request_id: String, reason: String },

    #[error("Merge session not found: {0}")]
    MergeSessionNotFound(String),

    #[error("Merge policy not found: {0}")]
    MergePolicyNotFound(String),

    #[error("No unresolved conflict for frame {frame_id} in session {session_id}")]
    MergeConflictNotFound { session_id: String, frame_id: String },

    #[error("Merge session {0} is not ready for execution")]
    MergeNotReady(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StackError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StackError::FrameNotFound(_) => ErrorCode::FrameNotFound,
            StackError::InvalidState { .. } => ErrorCode::FrameInvalidState,
            StackError::InvalidInput(_) => ErrorCode::FrameInvalidInput,
            StackError::StackOverflow { .. } => ErrorCode::FrameStackOverflow,
            StackError::CycleDetected { .. } => ErrorCode::FrameCycleDetected,
            StackError::HierarchyCorrupt { .. } => ErrorCode::FrameHierarchyCorrupt,
            StackError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            StackError::StackNotFound(_) => ErrorCode::StackNotFound,
            StackError::HandoffNotFound(_) => ErrorCode::HandoffNotFound,
            StackError::HandoffInvalidState { .. } => ErrorCode::HandoffInvalidState,
            StackError::MergeSessionNotFound(_) => ErrorCode::MergeSessionNotFound,
            StackError::MergePolicyNotFound(_) => ErrorCode::MergePolicyNotFound,
            StackError::MergeConflictNotFound { .. } => ErrorCode::MergeConflictNotFound,
            StackError::MergeNotReady(_) => ErrorCode::MergeNotReady,
            StackError::Validation(_) => ErrorCode::ValidationFailed,
            StackError::ConfigError(_) => ErrorCode::ConfigError,
            StackError::Storage(_) => ErrorCode::DbError,
        }
    }

    pub(crate) fn invalid_state(frame_id: Option<&str>, reason: impl Into<String>) -> Self {
        StackError::InvalidState {
            frame_id: frame_id.map(str::to_string),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for StackError {
    fn from(err: config::ConfigError) -> Self {
        StackError::ConfigError(err.to_string())
    }
}

impl From<sled::Error> for StackError {
    fn from(err: sled::Error) -> Self {
        StackError::Storage(StorageError::Database(err))
    }
}
