//! Startup recovery and integrity reporting.
//!
//! A process that crashed mid-run leaves active frames behind. On startup the
//! recovery service checks referential integrity, then force-closes active
//! frames that belong to another run and are older than the staleness
//! threshold.

use crate::config::{RecoveryConfig, DEFAULT_CHECKPOINT_THRESHOLD_BYTES};
use crate::error::StackError;
use crate::frame::digest::DigestGenerator;
use crate::frame::storage::{FrameStore, IntegrityViolation};
use crate::frame::{now_millis, Frame, FrameState};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub passed: bool,
    pub violations: Vec<IntegrityViolation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedFrames {
    pub detected: usize,
    pub closed: usize,
    pub frame_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub recovered: bool,
    pub integrity_check: IntegrityCheck,
    pub orphaned_frames: OrphanedFrames,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIntegrity {
    pub project_id: String,
    pub passed: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub active_frames: usize,
    pub closed_frames: usize,
    pub total_frames: usize,
    /// Active frames not owned by the current run
    pub foreign_active_frames: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalStatus {
    pub size_bytes: u64,
    pub pending_writes: u64,
    pub checkpoint_needed: bool,
}

pub struct RecoveryService {
    store: FrameStore,
    run_id: String,
    config: RecoveryConfig,
    checkpoint_threshold_bytes: u64,
}

impl RecoveryService {
    pub fn new(store: FrameStore, run_id: impl Into<String>, config: RecoveryConfig) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            config,
            checkpoint_threshold_bytes: DEFAULT_CHECKPOINT_THRESHOLD_BYTES,
        }
    }

    pub fn with_checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold_bytes = bytes;
        self
    }

    /// Run the integrity check and orphan reconciliation.
    ///
    /// Never fails: every problem lands in the report's `errors`, and
    /// `recovered` is true only when there were none.
    pub fn recover_on_startup(&self) -> RecoveryReport {
        self.recover_at(now_millis())
    }

    /// Recovery against an explicit clock
    pub fn recover_at(&self, now_ms: u64) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        match self.store.foreign_key_violations() {
            Ok(violations) => {
                report.integrity_check.passed = violations.is_empty();
                if !violations.is_empty() {
                    warn!(count = violations.len(), "Foreign key violations found");
                }
                report.integrity_check.violations = violations;
            }
            Err(err) => {
                report.integrity_check.passed = false;
                report.errors.push(format!("Integrity check failed: {}", err));
            }
        }

        match self.find_orphans(now_ms) {
            Ok(orphans) => {
                report.orphaned_frames.detected = orphans.len();
                for frame in orphans {
                    let frame_id = frame.frame_id.clone();
                    match self.force_close(frame, now_ms) {
                        Ok(()) => {
                            report.orphaned_frames.closed += 1;
                            report.orphaned_frames.frame_ids.push(frame_id);
                        }
                        Err(err) => {
                            warn!(
                                frame_id = %frame_id,
                                error = %err,
                                "Failed to close orphaned frame"
                            );
                            report.errors.push(format!(
                                "Failed to close orphaned frame {}: {}",
                                frame_id, err
                            ));
                        }
                    }
                }
            }
            Err(err) => report.errors.push(format!("Orphan scan failed: {}", err)),
        }

        report.recovered = report.errors.is_empty();
        info!(
            run_id = %self.run_id,
            recovered = report.recovered,
            integrity_passed = report.integrity_check.passed,
            orphans_detected = report.orphaned_frames.detected,
            orphans_closed = report.orphaned_frames.closed,
            "Startup recovery finished"
        );
        report
    }

    fn find_orphans(&self, now_ms: u64) -> Result<Vec<Frame>, StackError> {
        Ok(self
            .store
            .list_active_frames()?
            .into_iter()
            .filter(|f| f.run_id != self.run_id)
            .filter(|f| now_ms.saturating_sub(f.created_at) > self.config.stale_threshold_ms)
            .collect())
    }

    fn force_close(&self, mut frame: Frame, now_ms: u64) -> Result<(), StackError> {
        frame.closed_at = Some(now_ms);
        let digest = DigestGenerator::new(&self.store).generate_digest(&frame)?;
        frame.outputs.extend(digest.structured);
        frame.outputs.insert(
            "recovery".to_string(),
            json!({
                "reason": "orphaned",
                "abandoned_run_id": frame.run_id,
                "closed_by_run_id": self.run_id,
            }),
        );
        frame.digest_text = Some(digest.text);
        frame.digest_json = Some(digest.json);
        frame.state = FrameState::Closed;
        self.store.put_frame(&frame)?;
        Ok(())
    }

    /// Referential integrity plus `depth == parent.depth + 1` for one project
    pub fn validate_project_integrity(
        &self,
        project_id: &str,
    ) -> Result<ProjectIntegrity, StackError> {
        let frames = self.store.list_project_frames(project_id)?;
        let all: HashMap<String, Frame> = self
            .store
            .list_frames()?
            .into_iter()
            .map(|f| (f.frame_id.clone(), f))
            .collect();
        let mut errors = Vec::new();

        for frame in &frames {
            match frame.parent_frame_id.as_deref() {
                None if frame.depth != 0 => errors.push(format!(
                    "Root frame {} has depth {}",
                    frame.frame_id, frame.depth
                )),
                None => {}
                Some(parent_id) => match all.get(parent_id) {
                    None => errors.push(format!(
                        "Frame {} references missing parent {}",
                        frame.frame_id, parent_id
                    )),
                    Some(parent) if frame.depth != parent.depth + 1 => errors.push(format!(
                        "Frame {} has depth {} but parent {} has depth {}",
                        frame.frame_id, frame.depth, parent_id, parent.depth
                    )),
                    Some(_) => {}
                },
            }
        }

        // Dangling parent links were reported above.
        for violation in self.store.foreign_key_violations()? {
            if violation.table != "frame" {
                errors.push(format!(
                    "{} {} references missing frame {}",
                    violation.table, violation.record_id, violation.missing_frame_id
                ));
            }
        }

        Ok(ProjectIntegrity {
            project_id: project_id.to_string(),
            passed: errors.is_empty(),
            errors,
        })
    }

    pub fn get_recovery_stats(&self) -> Result<RecoveryStats, StackError> {
        let frames = self.store.list_frames()?;
        let active: Vec<&Frame> = frames
            .iter()
            .filter(|f| f.state == FrameState::Active)
            .collect();
        Ok(RecoveryStats {
            active_frames: active.len(),
            closed_frames: frames.len() - active.len(),
            total_frames: frames.len(),
            foreign_active_frames: active
                .iter()
                .filter(|f| f.run_id != self.run_id)
                .count(),
        })
    }

    pub fn check_wal_status(&self) -> Result<WalStatus, StackError> {
        let size_bytes = self.store.size_on_disk()?;
        Ok(WalStatus {
            size_bytes,
            pending_writes: self.store.pending_writes(),
            checkpoint_needed: size_bytes > self.checkpoint_threshold_bytes,
        })
    }

    /// Flush everything to disk and reset the pending-write counter
    pub fn checkpoint(&self) -> Result<WalStatus, StackError> {
        self.store.flush()?;
        info!("Checkpoint complete");
        self.check_wal_status()
    }
}
