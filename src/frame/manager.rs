//! Frame Manager
//!
//! Public frame API for one stack. Composes the frame store (persistence), the
//! live [`FrameStack`], the hierarchy checks and the digest generator, and
//! dispatches lifecycle hooks.
//!
//! Invariants upheld here:
//! - `depth == parent.depth + 1` (or 0 for roots) for every persisted frame
//! - persisted parent links never form a cycle
//! - frames only move `Active -> Closed`, and closing twice is a no-op
//!
//! Every rejected call leaves storage untouched.

use crate::error::StackError;
use crate::frame::digest::DigestGenerator;
use crate::frame::hooks::{FrameLifecycleEvent, HookKind, LifecycleHooks};
use crate::frame::stack::{FrameStack, HierarchyIndex, HierarchyValidation};
use crate::frame::storage::FrameStore;
use crate::frame::{
    id, now_millis, Anchor, AnchorType, Event, Frame, FrameState, FrameType, ValueMap,
    MAX_ANCHOR_PRIORITY,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_STACK_DEPTH: usize = 50;
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 100;

/// Construction-time configuration for a [`FrameManager`]
#[derive(Debug, Clone)]
pub struct FrameManagerOptions {
    pub project_id: String,
    pub run_id: String,
    pub session_id: Option<String>,
    /// Bound on the live stack
    pub max_stack_depth: usize,
    /// Bound on persisted hierarchy depth, independent of the live stack
    pub max_frame_depth: usize,
}

impl FrameManagerOptions {
    pub fn new(project_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            run_id: run_id.into(),
            session_id: None,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_frame_depth: DEFAULT_MAX_FRAME_DEPTH,
        }
    }

    pub fn with_max_stack_depth(mut self, max_stack_depth: usize) -> Self {
        self.max_stack_depth = max_stack_depth;
        self
    }

    pub fn with_max_frame_depth(mut self, max_frame_depth: usize) -> Self {
        self.max_frame_depth = max_frame_depth;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreateFrameOptions {
    pub frame_type: FrameType,
    pub name: String,
    pub inputs: ValueMap,
    /// Defaults to the current top of the live stack
    pub parent_frame_id: Option<String>,
}

impl CreateFrameOptions {
    pub fn new(frame_type: FrameType, name: impl Into<String>) -> Self {
        Self {
            frame_type,
            name: name.into(),
            inputs: ValueMap::new(),
            parent_frame_id: None,
        }
    }

    pub fn with_parent(mut self, parent_frame_id: impl Into<String>) -> Self {
        self.parent_frame_id = Some(parent_frame_id.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct EventOptions {
    /// Defaults to the current frame
    pub frame_id: Option<String>,
    pub event_type: String,
    pub payload: Value,
}

impl EventOptions {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_id: None,
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn for_frame(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = Some(frame_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AnchorOptions {
    /// Defaults to the current frame
    pub frame_id: Option<String>,
    pub anchor_type: AnchorType,
    pub text: String,
    /// Clamped to 0..=10
    pub priority: u8,
    pub metadata: ValueMap,
}

impl AnchorOptions {
    pub fn new(anchor_type: AnchorType, text: impl Into<String>, priority: u8) -> Self {
        Self {
            frame_id: None,
            anchor_type,
            text: text.into(),
            priority,
            metadata: ValueMap::new(),
        }
    }

    pub fn for_frame(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = Some(frame_id.into());
        self
    }
}

/// Working context exposed for one open frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotFrameContext {
    pub frame: Frame,
    pub recent_events: Vec<Event>,
    pub anchors: Vec<Anchor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

pub struct FrameManager {
    store: FrameStore,
    stack: FrameStack,
    hooks: LifecycleHooks,
    options: FrameManagerOptions,
}

impl FrameManager {
    /// Open a manager over `store`.
    ///
    /// The live stack is rebuilt from this run's persisted active frames, so a
    /// manager reopened within the same run resumes where it left off.
    pub fn open(
        store: FrameStore,
        options: FrameManagerOptions,
        hooks: LifecycleHooks,
    ) -> Result<Self, StackError> {
        if options.project_id.trim().is_empty() || options.run_id.trim().is_empty() {
            return Err(StackError::InvalidInput(
                "project_id and run_id are required".to_string(),
            ));
        }

        let mut active: Vec<Frame> = store
            .list_active_frames()?
            .into_iter()
            .filter(|f| f.run_id == options.run_id && f.project_id == options.project_id)
            .collect();
        active.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        let stack = FrameStack::from_entries(active.into_iter().map(|f| f.frame_id).collect());

        debug!(
            project_id = %options.project_id,
            run_id = %options.run_id,
            resumed = stack.depth(),
            "Frame manager opened"
        );

        Ok(Self {
            store,
            stack,
            hooks,
            options,
        })
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn options(&self) -> &FrameManagerOptions {
        &self.options
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    pub fn create_frame(&mut self, options: CreateFrameOptions) -> Result<String, StackError> {
        if options.name.trim().is_empty() {
            return Err(StackError::InvalidInput("Frame name cannot be empty".to_string()));
        }

        if self.stack.depth() >= self.options.max_stack_depth {
            return Err(StackError::StackOverflow {
                reason: "live stack is full".to_string(),
                current: self.stack.depth(),
                limit: self.options.max_stack_depth,
            });
        }

        let parent_id = options
            .parent_frame_id
            .clone()
            .or_else(|| self.stack.top().map(str::to_string));

        let depth = match parent_id.as_deref() {
            Some(parent_id) => self.require_frame(parent_id)?.depth + 1,
            None => 0,
        };
        if depth > self.options.max_frame_depth {
            return Err(StackError::StackOverflow {
                reason: "frame hierarchy too deep".to_string(),
                current: depth,
                limit: self.options.max_frame_depth,
            });
        }

        let frame_id = id::frame_id(&self.options.project_id, &self.options.run_id, &options.name);
        if let Some(parent_id) = parent_id.as_deref() {
            let index = HierarchyIndex::from_frames(&self.store.list_frames()?);
            index.detect_cycle(&frame_id, parent_id, self.options.max_frame_depth)?;
        }

        let frame = Frame {
            frame_id: frame_id.clone(),
            run_id: self.options.run_id.clone(),
            project_id: self.options.project_id.clone(),
            parent_frame_id: parent_id,
            depth,
            frame_type: options.frame_type,
            name: options.name,
            state: FrameState::Active,
            inputs: options.inputs,
            outputs: ValueMap::new(),
            digest_text: None,
            digest_json: None,
            created_at: now_millis(),
            closed_at: None,
        };

        if !self.store.insert_frame(&frame)? {
            return Err(StackError::InvalidInput(format!(
                "Frame id collision: {}",
                frame_id
            )));
        }
        self.stack.push(frame_id.clone());

        info!(
            frame_id = %frame_id,
            name = %frame.name,
            frame_type = frame.frame_type.as_str(),
            depth,
            stack_depth = self.stack.depth(),
            "Frame created"
        );

        self.hooks.fire(vec![FrameLifecycleEvent {
            kind: HookKind::FrameCreated,
            frame,
        }]);

        Ok(frame_id)
    }

    /// Close `frame_id`, or the current frame when `None`.
    ///
    /// The target and everything stacked above it are unwound from the live
    /// stack and closed, including frames above it that are not its
    /// descendants. Other active frames whose persisted parent is the target
    /// are then closed best-effort; failures there are logged, not returned.
    /// Close hooks fire once the live stack is consistent again.
    pub fn close_frame(&mut self, frame_id: Option<&str>) -> Result<(), StackError> {
        let target = match frame_id {
            Some(id) => id.to_string(),
            None => self
                .stack
                .top()
                .map(str::to_string)
                .ok_or_else(|| StackError::invalid_state(None, "No active frame to close"))?,
        };

        let frame = self.require_frame(&target)?;
        if frame.state == FrameState::Closed {
            debug!(frame_id = %target, "Frame already closed");
            return Ok(());
        }

        let mut closed = vec![self.close_persisted(frame)?];

        let unwound = self.stack.unwind_to(&target);
        for above in unwound.iter().filter(|id| **id != target) {
            match self.close_by_id(above) {
                Ok(Some(frame)) => closed.push(frame),
                Ok(None) => {}
                Err(err) => {
                    warn!(frame_id = %above, error = %err, "Failed to close unwound frame");
                }
            }
        }

        self.cascade_close(&target, &mut closed);

        info!(
            frame_id = %target,
            unwound = unwound.len(),
            stack_depth = self.stack.depth(),
            "Frame closed"
        );

        self.hooks.fire(
            closed
                .into_iter()
                .map(|frame| FrameLifecycleEvent {
                    kind: HookKind::FrameClosed,
                    frame,
                })
                .collect(),
        );
        Ok(())
    }

    fn close_by_id(&mut self, frame_id: &str) -> Result<Option<Frame>, StackError> {
        let frame = self.require_frame(frame_id)?;
        if frame.state != FrameState::Active {
            return Ok(None);
        }
        self.close_persisted(frame).map(Some)
    }

    /// Best-effort close of active descendants reachable through parent links
    fn cascade_close(&mut self, frame_id: &str, closed: &mut Vec<Frame>) {
        let mut queue = VecDeque::from([frame_id.to_string()]);
        while let Some(parent) = queue.pop_front() {
            let children = match self.store.list_active_children(&parent) {
                Ok(children) => children,
                Err(err) => {
                    warn!(frame_id = %parent, error = %err, "Cascade close lookup failed");
                    continue;
                }
            };
            for child in children {
                let child_id = child.frame_id.clone();
                match self.close_persisted(child) {
                    Ok(frame) => {
                        closed.push(frame);
                        self.stack.remove(&child_id);
                        debug!(frame_id = %child_id, parent = %parent, "Cascade closed frame");
                        queue.push_back(child_id);
                    }
                    Err(err) => {
                        warn!(frame_id = %child_id, error = %err, "Cascade close failed");
                    }
                }
            }
        }
    }

    /// Digest and persist as closed; returns the stored record
    fn close_persisted(&mut self, mut frame: Frame) -> Result<Frame, StackError> {
        let closed_at = now_millis();
        frame.closed_at = Some(closed_at);
        let digest = DigestGenerator::new(&self.store).generate_digest(&frame)?;

        frame.outputs.extend(digest.structured);
        frame.digest_text = Some(digest.text);
        frame.digest_json = Some(digest.json);
        frame.state = FrameState::Closed;
        self.store.put_frame(&frame)?;
        Ok(frame)
    }

    /// Re-link `frame_id` under `new_parent_id`, or make it a root with `None`.
    ///
    /// Depths of the frame and its whole subtree are recomputed.
    pub fn update_parent_frame(
        &mut self,
        frame_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), StackError> {
        let mut frame = self.require_frame(frame_id)?;
        let index = HierarchyIndex::from_frames(&self.store.list_frames()?);

        let new_depth = match new_parent_id {
            Some(parent_id) => {
                let parent = self.require_frame(parent_id)?;
                index.detect_cycle(frame_id, parent_id, self.options.max_frame_depth)?;
                parent.depth + 1
            }
            None => 0,
        };

        let descendants = index.descendants(frame_id);
        let deepest_relative = descendants
            .iter()
            .filter_map(|id| index.depth_of(id))
            .map(|d| d.saturating_sub(frame.depth))
            .max()
            .unwrap_or(0);
        if new_depth + deepest_relative > self.options.max_frame_depth {
            return Err(StackError::StackOverflow {
                reason: "re-parenting would exceed the hierarchy depth limit".to_string(),
                current: new_depth + deepest_relative,
                limit: self.options.max_frame_depth,
            });
        }

        let old_parent = frame.parent_frame_id.clone();
        frame.parent_frame_id = new_parent_id.map(str::to_string);
        frame.depth = new_depth;
        self.store.put_frame(&frame)?;
        rewrite_subtree_depths(&self.store, frame_id, new_depth)?;

        info!(
            frame_id = %frame_id,
            old_parent = ?old_parent,
            new_parent = ?new_parent_id,
            depth = new_depth,
            "Frame re-parented"
        );
        Ok(())
    }

    pub fn validate_frame_hierarchy(&self) -> Result<HierarchyValidation, StackError> {
        let index = HierarchyIndex::from_frames(&self.store.list_frames()?);
        let report = index.validate(self.options.max_frame_depth);
        if !report.is_valid {
            warn!(errors = report.errors.len(), "Frame hierarchy validation failed");
        }
        Ok(report)
    }

    /// Check that every live entry exists, is active, and sits directly on its parent
    pub fn validate_stack(&self) -> Result<StackValidation, StackError> {
        let mut errors = Vec::new();
        let mut previous: Option<&str> = None;

        for frame_id in self.stack.entries() {
            match self.store.get_frame(frame_id)? {
                None => errors.push(format!("Stack frame {} is missing from storage", frame_id)),
                Some(frame) => {
                    if frame.state != FrameState::Active {
                        errors.push(format!("Stack frame {} is not active", frame_id));
                    }
                    if let (Some(prev), Some(parent)) =
                        (previous, frame.parent_frame_id.as_deref())
                    {
                        if parent != prev && !self.stack.contains(parent) {
                            errors.push(format!(
                                "Stack frame {} has parent {} which is not on the stack",
                                frame_id, parent
                            ));
                        }
                    }
                }
            }
            previous = Some(frame_id);
        }

        if self.stack.depth() > self.options.max_stack_depth {
            errors.push(format!(
                "Stack depth {} exceeds maximum {}",
                self.stack.depth(),
                self.options.max_stack_depth
            ));
        }

        Ok(StackValidation {
            is_valid: errors.is_empty(),
            errors,
        })
    }

    pub fn add_event(&mut self, options: EventOptions) -> Result<Event, StackError> {
        if options.event_type.trim().is_empty() {
            return Err(StackError::InvalidInput("Event type cannot be empty".to_string()));
        }
        let frame = self.resolve_active_frame(options.frame_id.as_deref())?;
        let event = self.store.append_event(
            &frame.frame_id,
            &self.options.run_id,
            &options.event_type,
            options.payload,
        )?;
        debug!(
            frame_id = %frame.frame_id,
            seq = event.seq,
            event_type = %event.event_type,
            "Event added"
        );
        Ok(event)
    }

    pub fn add_anchor(&mut self, options: AnchorOptions) -> Result<Anchor, StackError> {
        if options.text.trim().is_empty() {
            return Err(StackError::InvalidInput("Anchor text cannot be empty".to_string()));
        }
        let frame = self.resolve_active_frame(options.frame_id.as_deref())?;
        let anchor = Anchor {
            anchor_id: id::anchor_id(&frame.frame_id),
            frame_id: frame.frame_id.clone(),
            anchor_type: options.anchor_type,
            text: options.text,
            priority: options.priority.min(MAX_ANCHOR_PRIORITY),
            metadata: options.metadata,
            created_at: now_millis(),
        };
        self.store.insert_anchor(&anchor)?;
        debug!(
            frame_id = %frame.frame_id,
            anchor_type = anchor.anchor_type.as_str(),
            "Anchor added"
        );
        Ok(anchor)
    }

    /// Record a key/value in the current frame's inputs and log it as an event
    pub fn add_context(&mut self, key: &str, value: Value) -> Result<(), StackError> {
        if key.trim().is_empty() {
            return Err(StackError::InvalidInput("Context key cannot be empty".to_string()));
        }
        let mut frame = self.resolve_active_frame(None)?;
        frame.inputs.insert(key.to_string(), value.clone());
        self.store.put_frame(&frame)?;
        self.store.append_event(
            &frame.frame_id,
            &self.options.run_id,
            "context",
            json!({ "key": key, "value": value }),
        )?;
        Ok(())
    }

    pub fn get_frame(&self, frame_id: &str) -> Result<Option<Frame>, StackError> {
        Ok(self.store.get_frame(frame_id)?)
    }

    /// Events ordered by seq; `limit` keeps only the most recent ones
    pub fn get_frame_events(
        &self,
        frame_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Event>, StackError> {
        self.require_frame(frame_id)?;
        Ok(match limit {
            Some(limit) => self.store.recent_events(frame_id, limit)?,
            None => self.store.list_events(frame_id)?,
        })
    }

    pub fn get_frame_anchors(&self, frame_id: &str) -> Result<Vec<Anchor>, StackError> {
        self.require_frame(frame_id)?;
        Ok(self.store.list_anchors(frame_id)?)
    }

    pub fn get_stack_depth(&self) -> usize {
        self.stack.depth()
    }

    pub fn get_current_frame_id(&self) -> Option<&str> {
        self.stack.top()
    }

    /// Root to current
    pub fn get_active_frame_path(&self) -> Result<Vec<Frame>, StackError> {
        let mut path = Vec::with_capacity(self.stack.depth());
        for frame_id in self.stack.entries() {
            if let Some(frame) = self.store.get_frame(frame_id)? {
                path.push(frame);
            }
        }
        Ok(path)
    }

    /// Per open frame: its `max_events` most recent events and all anchors
    pub fn get_hot_stack_context(
        &self,
        max_events: usize,
    ) -> Result<Vec<HotFrameContext>, StackError> {
        let mut out = Vec::with_capacity(self.stack.depth());
        for frame in self.get_active_frame_path()? {
            let recent_events = self.store.recent_events(&frame.frame_id, max_events)?;
            let mut anchors = self.store.list_anchors(&frame.frame_id)?;
            anchors.sort_by(|a, b| b.priority.cmp(&a.priority));
            out.push(HotFrameContext {
                frame,
                recent_events,
                anchors,
            });
        }
        Ok(out)
    }

    /// Newest first, this manager's project only
    pub fn get_recent_frames(&self, limit: usize) -> Result<Vec<Frame>, StackError> {
        let mut frames = self.store.list_project_frames(&self.options.project_id)?;
        frames.reverse();
        frames.truncate(limit);
        Ok(frames)
    }

    /// Physically remove a frame with its events and anchors.
    ///
    /// Used when relocating frames between stacks. Children of the deleted frame
    /// are adopted by its parent (or become roots) and their depths rewritten.
    pub fn delete_frame(&mut self, frame_id: &str) -> Result<(), StackError> {
        let frame = self.require_frame(frame_id)?;
        let adopted_depth = frame.depth;

        for mut child in self.store.list_children(frame_id)? {
            child.parent_frame_id = frame.parent_frame_id.clone();
            child.depth = adopted_depth;
            self.store.put_frame(&child)?;
            rewrite_subtree_depths(&self.store, &child.frame_id, adopted_depth)?;
        }

        self.store.delete_frame(frame_id)?;
        self.stack.remove(frame_id);
        info!(frame_id = %frame_id, "Frame deleted");
        Ok(())
    }

    fn require_frame(&self, frame_id: &str) -> Result<Frame, StackError> {
        self.store
            .get_frame(frame_id)?
            .ok_or_else(|| StackError::FrameNotFound(frame_id.to_string()))
    }

    fn resolve_active_frame(&self, frame_id: Option<&str>) -> Result<Frame, StackError> {
        let frame_id = match frame_id {
            Some(id) => id.to_string(),
            None => self
                .stack
                .top()
                .map(str::to_string)
                .ok_or_else(|| StackError::invalid_state(None, "No active frame"))?,
        };
        let frame = self.require_frame(&frame_id)?;
        if frame.state != FrameState::Active {
            return Err(StackError::invalid_state(
                Some(&frame_id),
                "Frame is closed",
            ));
        }
        Ok(frame)
    }
}

/// Recompute depths below `root_id` given the root's (already persisted) depth
pub(crate) fn rewrite_subtree_depths(
    store: &FrameStore,
    root_id: &str,
    root_depth: usize,
) -> Result<(), StackError> {
    let index = HierarchyIndex::from_frames(&store.list_frames()?);
    let mut depths: HashMap<String, usize> = HashMap::from([(root_id.to_string(), root_depth)]);

    for id in index.descendants(root_id) {
        let parent_depth = index
            .parent_of(&id)
            .and_then(|p| depths.get(p).copied())
            .unwrap_or(root_depth);
        let depth = parent_depth + 1;
        depths.insert(id.clone(), depth);

        if let Some(mut frame) = store.get_frame(&id)? {
            if frame.depth != depth {
                frame.depth = depth;
                store.put_frame(&frame)?;
            }
        }
    }
    Ok(())
}
