//! Frame synchronization between two stacks.
//!
//! Copies frames (with their events and anchors) from a source store into a
//! target store. When the target already holds a frame with the same id, the
//! conflict policy decides: skip it, merge the source's events and anchors onto
//! it, or overwrite it with a deep copy.
//!
//! Parents are copied before children. A copied frame whose parent is absent
//! from the target becomes a root there; the original parent id is kept in its
//! inputs under `_original_parent_frame_id`.

use crate::error::StackError;
use crate::frame::manager::rewrite_subtree_depths;
use crate::frame::stack::HierarchyIndex;
use crate::frame::storage::FrameStore;
use crate::frame::{now_millis, Frame};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

pub const ORIGINAL_PARENT_KEY: &str = "_original_parent_frame_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Skip,
    Merge,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Frames to sync; every source frame when `None`
    pub frame_ids: Option<Vec<String>>,
    pub conflict_resolution: ConflictResolution,
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn new(conflict_resolution: ConflictResolution) -> Self {
        Self {
            frame_ids: None,
            conflict_resolution,
            dry_run: false,
        }
    }

    pub fn with_frames(mut self, frame_ids: Vec<String>) -> Self {
        self.frame_ids = Some(frame_ids);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub frame_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    /// Frames copied, merged or overwritten into the target
    pub merged_frames: Vec<String>,
    /// Frames present on both sides and left untouched
    pub conflict_frames: Vec<String>,
    pub errors: Vec<SyncFailure>,
}

pub struct StackSync<'a> {
    source: &'a FrameStore,
    target: &'a FrameStore,
    source_stack_id: &'a str,
}

impl<'a> StackSync<'a> {
    pub fn new(source: &'a FrameStore, target: &'a FrameStore, source_stack_id: &'a str) -> Self {
        Self {
            source,
            target,
            source_stack_id,
        }
    }

    /// Run the sync. Per-frame problems are collected, not returned as `Err`.
    pub fn run(&self, options: &SyncOptions) -> Result<SyncResult, StackError> {
        let mut result = SyncResult::default();
        let frames = self.select_frames(options, &mut result)?;

        for frame in frames {
            let frame_id = frame.frame_id.clone();
            match self.sync_one(frame, options) {
                Ok(Outcome::Written) => result.merged_frames.push(frame_id),
                Ok(Outcome::Conflict) => result.conflict_frames.push(frame_id),
                Err(err) => {
                    warn!(frame_id = %frame_id, error = %err, "Frame sync failed");
                    result.errors.push(SyncFailure {
                        frame_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        result.success = result.errors.is_empty();
        info!(
            source = %self.source_stack_id,
            merged = result.merged_frames.len(),
            conflicts = result.conflict_frames.len(),
            errors = result.errors.len(),
            dry_run = options.dry_run,
            "Stack sync finished"
        );
        Ok(result)
    }

    /// Requested frames ordered parents first
    fn select_frames(
        &self,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) -> Result<Vec<Frame>, StackError> {
        let mut frames = match &options.frame_ids {
            None => self.source.list_frames()?,
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut frames = Vec::with_capacity(ids.len());
                for id in ids.iter().filter(|id| seen.insert(id.as_str())) {
                    match self.source.get_frame(id)? {
                        Some(frame) => frames.push(frame),
                        None => result.errors.push(SyncFailure {
                            frame_id: id.clone(),
                            reason: format!(
                                "Frame not found in source stack {}",
                                self.source_stack_id
                            ),
                        }),
                    }
                }
                frames
            }
        };
        frames.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(frames)
    }

    fn sync_one(&self, frame: Frame, options: &SyncOptions) -> Result<Outcome, StackError> {
        let existing = self.target.get_frame(&frame.frame_id)?;
        match (existing, options.conflict_resolution) {
            (None, _) => {
                if !options.dry_run {
                    self.copy_frame(frame)?;
                }
                Ok(Outcome::Written)
            }
            (Some(_), ConflictResolution::Skip) => Ok(Outcome::Conflict),
            (Some(_), ConflictResolution::Merge) => {
                if !options.dry_run {
                    self.merge_into(&frame)?;
                }
                Ok(Outcome::Written)
            }
            (Some(_), ConflictResolution::Overwrite) => {
                if !options.dry_run {
                    self.target.delete_frame(&frame.frame_id)?;
                    self.copy_frame(frame)?;
                }
                Ok(Outcome::Written)
            }
        }
    }

    /// Deep copy of a frame and its events and anchors into the target
    fn copy_frame(&self, mut frame: Frame) -> Result<(), StackError> {
        let frame_id = frame.frame_id.clone();
        let events = self.source.list_events(&frame_id)?;
        let anchors = self.source.list_anchors(&frame_id)?;

        self.place_in_target(&mut frame)?;
        self.target.put_frame(&frame)?;
        // Children already in the target (overwrite case) follow the new depth.
        rewrite_subtree_depths(self.target, &frame_id, frame.depth)?;

        for event in events {
            self.target.append_event_at(
                &frame_id,
                &event.run_id,
                &event.event_type,
                event.payload,
                event.ts,
            )?;
        }
        for anchor in anchors {
            self.target.insert_anchor(&anchor)?;
        }
        debug!(frame_id = %frame_id, depth = frame.depth, "Frame copied");
        Ok(())
    }

    /// Re-link under the same parent when the target has it (and that cannot
    /// loop), otherwise make the frame a root.
    fn place_in_target(&self, frame: &mut Frame) -> Result<(), StackError> {
        let Some(parent_id) = frame.parent_frame_id.clone() else {
            frame.depth = 0;
            return Ok(());
        };

        if let Some(parent) = self.target.get_frame(&parent_id)? {
            let index = HierarchyIndex::from_frames(&self.target.list_frames()?);
            let loops = index
                .detect_cycle(&frame.frame_id, &parent_id, index.len())
                .is_err();
            if !loops {
                frame.depth = parent.depth + 1;
                return Ok(());
            }
        }

        frame
            .inputs
            .insert(ORIGINAL_PARENT_KEY.to_string(), Value::String(parent_id));
        frame.parent_frame_id = None;
        frame.depth = 0;
        Ok(())
    }

    /// Append the source's events and anchors onto the existing target frame,
    /// tagged as merged copies
    fn merge_into(&self, frame: &Frame) -> Result<(), StackError> {
        let merged_at = now_millis();
        for event in self.source.list_events(&frame.frame_id)? {
            let payload = json!({
                "_merged": {
                    "from_stack": self.source_stack_id,
                    "source_event_id": event.event_id,
                    "source_seq": event.seq,
                    "merged_at": merged_at,
                },
                "payload": event.payload,
            });
            self.target.append_event_at(
                &frame.frame_id,
                &event.run_id,
                &event.event_type,
                payload,
                event.ts,
            )?;
        }

        for mut anchor in self.source.list_anchors(&frame.frame_id)? {
            anchor.anchor_id = crate::frame::id::anchor_id(&frame.frame_id);
            anchor.metadata.insert("merged".to_string(), Value::Bool(true));
            anchor.metadata.insert(
                "merged_from".to_string(),
                Value::String(self.source_stack_id.to_string()),
            );
            self.target.insert_anchor(&anchor)?;
        }
        debug!(frame_id = %frame.frame_id, "Frame merged");
        Ok(())
    }
}

enum Outcome {
    Written,
    Conflict,
}
