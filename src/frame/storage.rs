//! Frame store: sled-backed persistence for frames, events and anchors
//!
//! One database per stack. Three trees:
//! - `frames`: `{frame_id}` -> Frame
//! - `events`: `{frame_id}:{seq:020}` -> Event
//! - `anchors`: `{frame_id}:{generated_id:020}` -> Anchor
//!
//! Events and anchors reference their frame; deleting a frame removes its events
//! and anchors in the same transaction. Closing a frame never touches them.

use crate::error::StorageError;
use crate::frame::{id, now_millis, Anchor, Event, Frame, FrameState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sled::transaction::{ConflictableTransactionResult, TransactionError, Transactional};
use sled::{Db, IVec, Tree};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const TREE_FRAMES: &str = "frames";
const TREE_EVENTS: &str = "events";
const TREE_ANCHORS: &str = "anchors";
const SEQ_KEY_PAD: usize = 20;

/// A record whose frame reference does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    /// `event`, `anchor` or `frame` (dangling parent link)
    pub table: String,
    pub record_id: String,
    pub missing_frame_id: String,
}

#[derive(Clone)]
pub struct FrameStore {
    db: Db,
    frames: Tree,
    events: Tree,
    anchors: Tree,
    path: Option<PathBuf>,
    pending_writes: Arc<AtomicU64>,
}

impl FrameStore {
    /// Open (or create) the store at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        let db = sled::open(&path)?;
        let mut store = Self::from_db(db)?;
        store.path = Some(path);
        Ok(store)
    }

    /// In-memory store removed when the last handle drops
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self, StorageError> {
        let frames = db.open_tree(TREE_FRAMES)?;
        let events = db.open_tree(TREE_EVENTS)?;
        let anchors = db.open_tree(TREE_ANCHORS)?;
        Ok(Self {
            db,
            frames,
            events,
            anchors,
            path: None,
            pending_writes: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert a new frame. Returns `false` when the id is already taken.
    pub fn insert_frame(&self, frame: &Frame) -> Result<bool, StorageError> {
        let value = serde_json::to_vec(frame)?;
        let swapped = self
            .frames
            .compare_and_swap(frame.frame_id.as_bytes(), None::<&[u8]>, Some(value))?;
        if swapped.is_ok() {
            self.record_write();
        }
        Ok(swapped.is_ok())
    }

    /// Insert or replace a frame
    pub fn put_frame(&self, frame: &Frame) -> Result<(), StorageError> {
        let value = serde_json::to_vec(frame)?;
        self.frames.insert(frame.frame_id.as_bytes(), value)?;
        self.record_write();
        Ok(())
    }

    pub fn get_frame(&self, frame_id: &str) -> Result<Option<Frame>, StorageError> {
        let Some(raw) = self.frames.get(frame_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn contains_frame(&self, frame_id: &str) -> Result<bool, StorageError> {
        Ok(self.frames.contains_key(frame_id.as_bytes())?)
    }

    /// All frames, oldest first
    pub fn list_frames(&self) -> Result<Vec<Frame>, StorageError> {
        let mut out = Vec::new();
        for item in self.frames.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice::<Frame>(&value)?);
        }
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.frame_id.cmp(&b.frame_id))
        });
        Ok(out)
    }

    pub fn list_project_frames(&self, project_id: &str) -> Result<Vec<Frame>, StorageError> {
        Ok(self
            .list_frames()?
            .into_iter()
            .filter(|f| f.project_id == project_id)
            .collect())
    }

    pub fn list_active_frames(&self) -> Result<Vec<Frame>, StorageError> {
        Ok(self
            .list_frames()?
            .into_iter()
            .filter(|f| f.state == FrameState::Active)
            .collect())
    }

    /// Active frames whose persisted parent is `parent_id`
    pub fn list_active_children(&self, parent_id: &str) -> Result<Vec<Frame>, StorageError> {
        Ok(self
            .list_active_frames()?
            .into_iter()
            .filter(|f| f.parent_frame_id.as_deref() == Some(parent_id))
            .collect())
    }

    pub fn list_children(&self, parent_id: &str) -> Result<Vec<Frame>, StorageError> {
        Ok(self
            .list_frames()?
            .into_iter()
            .filter(|f| f.parent_frame_id.as_deref() == Some(parent_id))
            .collect())
    }

    /// Append an event with the next per-frame sequence number
    pub fn append_event(
        &self,
        frame_id: &str,
        run_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<Event, StorageError> {
        self.append_event_at(frame_id, run_id, event_type, payload, now_millis())
    }

    /// Append with an explicit timestamp (used when copying events between stacks)
    pub fn append_event_at(
        &self,
        frame_id: &str,
        run_id: &str,
        event_type: &str,
        payload: Value,
        ts: u64,
    ) -> Result<Event, StorageError> {
        let seq = self.last_seq(frame_id)?.map_or(1, |last| last + 1);
        let event = Event {
            event_id: id::event_id(frame_id),
            frame_id: frame_id.to_string(),
            run_id: run_id.to_string(),
            seq,
            event_type: event_type.to_string(),
            payload,
            ts,
        };
        let key = encode_seq_key(frame_id, seq);
        self.events
            .insert(key.as_bytes(), serde_json::to_vec(&event)?)?;
        self.record_write();
        Ok(event)
    }

    fn last_seq(&self, frame_id: &str) -> Result<Option<u64>, StorageError> {
        let prefix = frame_prefix(frame_id);
        match self.events.scan_prefix(prefix.as_bytes()).next_back() {
            Some(item) => {
                let (_, value) = item?;
                let event: Event = serde_json::from_slice(&value)?;
                Ok(Some(event.seq))
            }
            None => Ok(None),
        }
    }

    /// Events of a frame ordered by seq
    pub fn list_events(&self, frame_id: &str) -> Result<Vec<Event>, StorageError> {
        let prefix = frame_prefix(frame_id);
        let mut out = Vec::new();
        for item in self.events.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(serde_json::from_slice::<Event>(&value)?);
        }
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    /// The `limit` most recent events of a frame, still ordered by seq
    pub fn recent_events(&self, frame_id: &str, limit: usize) -> Result<Vec<Event>, StorageError> {
        let prefix = frame_prefix(frame_id);
        let mut out = Vec::new();
        for item in self.events.scan_prefix(prefix.as_bytes()).rev().take(limit) {
            let (_, value) = item?;
            out.push(serde_json::from_slice::<Event>(&value)?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn insert_anchor(&self, anchor: &Anchor) -> Result<(), StorageError> {
        let key = encode_seq_key(&anchor.frame_id, self.db.generate_id()?);
        self.anchors
            .insert(key.as_bytes(), serde_json::to_vec(anchor)?)?;
        self.record_write();
        Ok(())
    }

    /// Anchors of a frame in insertion order
    pub fn list_anchors(&self, frame_id: &str) -> Result<Vec<Anchor>, StorageError> {
        let prefix = frame_prefix(frame_id);
        let mut out = Vec::new();
        for item in self.anchors.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(serde_json::from_slice::<Anchor>(&value)?);
        }
        Ok(out)
    }

    /// Delete a frame together with its events and anchors.
    ///
    /// Returns `false` if the frame did not exist.
    pub fn delete_frame(&self, frame_id: &str) -> Result<bool, StorageError> {
        if !self.contains_frame(frame_id)? {
            return Ok(false);
        }

        let prefix = frame_prefix(frame_id);
        let event_keys = collect_keys(&self.events, &prefix)?;
        let anchor_keys = collect_keys(&self.anchors, &prefix)?;

        (&self.frames, &self.events, &self.anchors)
            .transaction(
                |(frames, events, anchors)| -> ConflictableTransactionResult<(), ()> {
                    frames.remove(frame_id.as_bytes())?;
                    for key in &event_keys {
                        events.remove(key.clone())?;
                    }
                    for key in &anchor_keys {
                        anchors.remove(key.clone())?;
                    }
                    Ok(())
                },
            )
            .map_err(|err| match err {
                TransactionError::Storage(e) => StorageError::Database(e),
                TransactionError::Abort(()) => {
                    StorageError::Transaction(format!("delete of frame {} aborted", frame_id))
                }
            })?;

        self.record_write();
        Ok(true)
    }

    /// Referential integrity scan: events/anchors pointing at missing frames and
    /// frames whose parent link does not resolve.
    pub fn foreign_key_violations(&self) -> Result<Vec<IntegrityViolation>, StorageError> {
        let frames = self.list_frames()?;
        let known: HashSet<&str> = frames.iter().map(|f| f.frame_id.as_str()).collect();
        let mut violations = Vec::new();

        for frame in &frames {
            if let Some(parent) = frame.parent_frame_id.as_deref() {
                if !known.contains(parent) {
                    violations.push(IntegrityViolation {
                        table: "frame".to_string(),
                        record_id: frame.frame_id.clone(),
                        missing_frame_id: parent.to_string(),
                    });
                }
            }
        }

        for item in self.events.iter() {
            let (_, value) = item?;
            let event: Event = serde_json::from_slice(&value)?;
            if !known.contains(event.frame_id.as_str()) {
                violations.push(IntegrityViolation {
                    table: "event".to_string(),
                    record_id: event.event_id,
                    missing_frame_id: event.frame_id,
                });
            }
        }

        for item in self.anchors.iter() {
            let (_, value) = item?;
            let anchor: Anchor = serde_json::from_slice(&value)?;
            if !known.contains(anchor.frame_id.as_str()) {
                violations.push(IntegrityViolation {
                    table: "anchor".to_string(),
                    record_id: anchor.anchor_id,
                    missing_frame_id: anchor.frame_id,
                });
            }
        }

        Ok(violations)
    }

    pub fn size_on_disk(&self) -> Result<u64, StorageError> {
        Ok(self.db.size_on_disk()?)
    }

    /// Writes applied since the last flush
    pub fn pending_writes(&self) -> u64 {
        self.pending_writes.load(Ordering::Relaxed)
    }

    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        self.pending_writes.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn record_write(&self) {
        self.pending_writes.fetch_add(1, Ordering::Relaxed);
    }
}

fn frame_prefix(frame_id: &str) -> String {
    format!("{frame_id}:")
}

fn encode_seq_key(frame_id: &str, seq: u64) -> String {
    format!("{frame_id}:{seq:0SEQ_KEY_PAD$}")
}

fn collect_keys(tree: &Tree, prefix: &str) -> Result<Vec<IVec>, StorageError> {
    let mut keys = Vec::new();
    for item in tree.scan_prefix(prefix.as_bytes()) {
        let (key, _) = item?;
        keys.push(key);
    }
    Ok(keys)
}
