//! Configuration System
//!
//! Layered configuration for frame limits, recovery, handoff timing, storage
//! location and logging. Built-in defaults are overridden by the global file,
//! then workspace files, then `FRAMESTACK__*` environment variables.

use crate::error::StackError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use facade::ConfigLoader;

pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 60 * 60 * 1000;
pub const DEFAULT_REQUEST_TTL_MS: u64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_REMINDER_DELAY_MS: u64 = 4 * 60 * 60 * 1000;
pub const DEFAULT_BULK_TRANSFER_THRESHOLD: usize = 10;
pub const DEFAULT_CHECKPOINT_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FramestackConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub frames: FrameLimits,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub handoff: HandoffConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for per-stack databases and the registry; platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Database size above which `check_wal_status` reports a checkpoint as needed
    #[serde(default = "default_checkpoint_threshold")]
    pub checkpoint_threshold_bytes: u64,
}

fn default_checkpoint_threshold() -> u64 {
    DEFAULT_CHECKPOINT_THRESHOLD_BYTES
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            checkpoint_threshold_bytes: default_checkpoint_threshold(),
        }
    }
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> Result<PathBuf, StackError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        directories::ProjectDirs::from("dev", "framestack", "framestack")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                StackError::ConfigError("Could not determine a data directory".to_string())
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLimits {
    /// Live stack bound
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Persisted hierarchy bound
    #[serde(default = "default_max_frame_depth")]
    pub max_frame_depth: usize,
}

fn default_max_stack_depth() -> usize {
    crate::frame::manager::DEFAULT_MAX_STACK_DEPTH
}

fn default_max_frame_depth() -> usize {
    crate::frame::manager::DEFAULT_MAX_FRAME_DEPTH
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_stack_depth: default_max_stack_depth(),
            max_frame_depth: default_max_frame_depth(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Active frames of another run older than this are orphaned
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_ms: u64,

    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

fn default_stale_threshold() -> u64 {
    DEFAULT_STALE_THRESHOLD_MS
}

fn default_true() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_threshold_ms: default_stale_threshold(),
            run_on_startup: default_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_request_ttl")]
    pub request_ttl_ms: u64,

    #[serde(default = "default_request_ttl")]
    pub notification_ttl_ms: u64,

    /// Delay before a reminder for an unactioned critical/high request
    #[serde(default = "default_reminder_delay")]
    pub reminder_delay_ms: u64,

    /// Frame count above which a request is classified as a bulk transfer
    #[serde(default = "default_bulk_threshold")]
    pub bulk_transfer_threshold: usize,
}

fn default_request_ttl() -> u64 {
    DEFAULT_REQUEST_TTL_MS
}

fn default_reminder_delay() -> u64 {
    DEFAULT_REMINDER_DELAY_MS
}

fn default_bulk_threshold() -> usize {
    DEFAULT_BULK_TRANSFER_THRESHOLD
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            request_ttl_ms: default_request_ttl(),
            notification_ttl_ms: default_request_ttl(),
            reminder_delay_ms: default_reminder_delay(),
            bulk_transfer_threshold: default_bulk_threshold(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Frames(String),
    Recovery(String),
    Handoff(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Frames(msg) => write!(f, "Frames: {}", msg),
            ValidationError::Recovery(msg) => write!(f, "Recovery: {}", msg),
            ValidationError::Handoff(msg) => write!(f, "Handoff: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl FramestackConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.frames.max_stack_depth == 0 {
            errors.push(ValidationError::Frames(
                "max_stack_depth must be at least 1".to_string(),
            ));
        }
        if self.frames.max_frame_depth == 0 {
            errors.push(ValidationError::Frames(
                "max_frame_depth must be at least 1".to_string(),
            ));
        }
        if self.recovery.stale_threshold_ms == 0 {
            errors.push(ValidationError::Recovery(
                "stale_threshold_ms must be positive".to_string(),
            ));
        }
        if self.handoff.request_ttl_ms == 0 || self.handoff.notification_ttl_ms == 0 {
            errors.push(ValidationError::Handoff("TTLs must be positive".to_string()));
        }
        if self.handoff.bulk_transfer_threshold == 0 {
            errors.push(ValidationError::Handoff(
                "bulk_transfer_threshold must be at least 1".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one `CONFIG_ERROR`
    pub fn ensure_valid(&self) -> Result<(), StackError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            StackError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })
    }
}
