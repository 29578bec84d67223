//! Merge rules: defaults, override order, conflict handling.
//!
//! Defaults are registered on the builder first, so any later source (global
//! file, workspace files, environment) overrides them key by key. Tables merge,
//! they are not replaced wholesale.

use crate::config::{
    DEFAULT_BULK_TRANSFER_THRESHOLD, DEFAULT_CHECKPOINT_THRESHOLD_BYTES,
    DEFAULT_REMINDER_DELAY_MS, DEFAULT_REQUEST_TTL_MS, DEFAULT_STALE_THRESHOLD_MS,
};
use crate::frame::manager::{DEFAULT_MAX_FRAME_DEPTH, DEFAULT_MAX_STACK_DEPTH};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("frames.max_stack_depth", DEFAULT_MAX_STACK_DEPTH as u64)?
        .set_default("frames.max_frame_depth", DEFAULT_MAX_FRAME_DEPTH as u64)?
        .set_default("recovery.stale_threshold_ms", DEFAULT_STALE_THRESHOLD_MS)?
        .set_default("recovery.run_on_startup", true)?
        .set_default("handoff.request_ttl_ms", DEFAULT_REQUEST_TTL_MS)?
        .set_default("handoff.notification_ttl_ms", DEFAULT_REQUEST_TTL_MS)?
        .set_default("handoff.reminder_delay_ms", DEFAULT_REMINDER_DELAY_MS)?
        .set_default(
            "handoff.bulk_transfer_threshold",
            DEFAULT_BULK_TRANSFER_THRESHOLD as u64,
        )?
        .set_default(
            "storage.checkpoint_threshold_bytes",
            DEFAULT_CHECKPOINT_THRESHOLD_BYTES,
        )?
        .set_default("logging.level", "info")
}
