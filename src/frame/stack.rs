//! Live frame stack and persisted hierarchy checks
//!
//! Two distinct structures live here:
//! - [`FrameStack`]: the in-memory push/pop ordering of open frames for one
//!   manager instance. Its depth is bounded by `max_stack_depth`.
//! - [`HierarchyIndex`]: an arena over the persisted parent links, used for cycle
//!   detection and hierarchy validation. Depth in the hierarchy is bounded by
//!   `max_frame_depth`, independently of the live stack.

use crate::error::StackError;
use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Fraction of `max_frame_depth` above which validation emits a warning
const DEPTH_WARNING_RATIO: f64 = 0.8;

/// In-memory ordering of open frames, bottom first
#[derive(Debug, Clone, Default)]
pub struct FrameStack {
    entries: Vec<String>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn top(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn push(&mut self, frame_id: String) {
        self.entries.push(frame_id);
    }

    pub fn position(&self, frame_id: &str) -> Option<usize> {
        self.entries.iter().position(|id| id == frame_id)
    }

    pub fn contains(&self, frame_id: &str) -> bool {
        self.position(frame_id).is_some()
    }

    /// Pop `frame_id` and everything stacked above it, top first.
    ///
    /// Returns an empty vec if the frame is not on the stack.
    pub fn unwind_to(&mut self, frame_id: &str) -> Vec<String> {
        match self.position(frame_id) {
            Some(index) => {
                let mut removed = self.entries.split_off(index);
                removed.reverse();
                removed
            }
            None => Vec::new(),
        }
    }

    /// Remove a single entry, leaving frames above it in place
    pub fn remove(&mut self, frame_id: &str) -> bool {
        match self.position(frame_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Bottom to top
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Result of validating the persisted hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Arena of persisted parent links: `ids[i]` has parent `parents[i]`.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    ids: Vec<String>,
    parents: Vec<Option<String>>,
    depths: Vec<usize>,
    index: HashMap<String, usize>,
}

impl HierarchyIndex {
    pub fn from_frames(frames: &[Frame]) -> Self {
        let mut hierarchy = Self::default();
        for frame in frames {
            hierarchy.insert(&frame.frame_id, frame.parent_frame_id.clone(), frame.depth);
        }
        hierarchy
    }

    pub fn insert(&mut self, frame_id: &str, parent: Option<String>, depth: usize) {
        if let Some(&slot) = self.index.get(frame_id) {
            self.parents[slot] = parent;
            self.depths[slot] = depth;
            return;
        }
        self.index.insert(frame_id.to_string(), self.ids.len());
        self.ids.push(frame_id.to_string());
        self.parents.push(parent);
        self.depths.push(depth);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, frame_id: &str) -> bool {
        self.index.contains_key(frame_id)
    }

    pub fn parent_of(&self, frame_id: &str) -> Option<&str> {
        self.index
            .get(frame_id)
            .and_then(|&slot| self.parents[slot].as_deref())
    }

    pub fn depth_of(&self, frame_id: &str) -> Option<usize> {
        self.index.get(frame_id).map(|&slot| self.depths[slot])
    }

    /// Check whether linking `child_id` under `candidate_parent` would close a loop.
    ///
    /// Walks upward from the candidate parent along persisted links. The walk
    /// starts with the child on the path, so reaching the child again (or any
    /// node twice) yields the offending cycle as the path slice from the repeat.
    /// Walking more than `max_steps` ancestors means the stored hierarchy is
    /// corrupt and is reported as [`StackError::HierarchyCorrupt`].
    pub fn detect_cycle(
        &self,
        child_id: &str,
        candidate_parent: &str,
        max_steps: usize,
    ) -> Result<(), StackError> {
        let mut path: Vec<&str> = vec![child_id];
        let mut visited: HashSet<&str> = HashSet::from([child_id]);
        let mut current = Some(candidate_parent);
        let mut steps = 0usize;

        while let Some(node) = current {
            if visited.contains(node) {
                let start = path.iter().position(|p| *p == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
                cycle.push(node.to_string());
                return Err(StackError::CycleDetected {
                    frame_id: child_id.to_string(),
                    parent_id: candidate_parent.to_string(),
                    path: cycle,
                });
            }

            steps += 1;
            if steps > max_steps.saturating_add(1) {
                return Err(StackError::HierarchyCorrupt {
                    frame_id: candidate_parent.to_string(),
                    limit: max_steps,
                });
            }

            visited.insert(node);
            path.push(node);
            current = self.parent_of(node);
        }

        Ok(())
    }

    /// All descendants of `frame_id` in breadth-first order (excluding itself)
    pub fn descendants(&self, frame_id: &str) -> Vec<String> {
        let children = self.children_slots();
        let Some(&root) = self.index.get(frame_id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut seen = HashSet::from([root]);
        let mut queue = std::collections::VecDeque::from([root]);
        while let Some(slot) = queue.pop_front() {
            for &child in &children[slot] {
                if seen.insert(child) {
                    out.push(self.ids[child].clone());
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Check recorded depths against `max_depth` and look for cycles.
    ///
    /// Depths above the limit are errors; depths above 80% of it are warnings.
    /// Cycles are found by an iterative DFS from every root with a
    /// visiting/visited pair of sets. Frames never reached from a root hang off
    /// a parent-link loop and are reported as well.
    pub fn validate(&self, max_depth: usize) -> HierarchyValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let warn_at = (max_depth as f64 * DEPTH_WARNING_RATIO) as usize;

        for (slot, id) in self.ids.iter().enumerate() {
            let depth = self.depths[slot];
            if depth > max_depth {
                errors.push(format!(
                    "Frame {} depth {} exceeds maximum {}",
                    id, depth, max_depth
                ));
            } else if depth > warn_at {
                warnings.push(format!(
                    "Frame {} depth {} is approaching maximum {}",
                    id, depth, max_depth
                ));
            }
        }

        let children = self.children_slots();
        let roots: Vec<usize> = (0..self.ids.len())
            .filter(|&slot| {
                self.parents[slot]
                    .as_deref()
                    .map_or(true, |parent| !self.index.contains_key(parent))
            })
            .collect();

        let mut visiting: HashSet<usize> = HashSet::new();
        let mut visited: HashSet<usize> = HashSet::new();

        for root in roots {
            if visited.contains(&root) {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            visiting.insert(root);

            while let Some(&(node, next)) = stack.last() {
                if let Some(&child) = children[node].get(next) {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    if visiting.contains(&child) {
                        errors.push(format!(
                            "Cycle detected: {} -> {}",
                            self.ids[node], self.ids[child]
                        ));
                    } else if !visited.contains(&child) {
                        visiting.insert(child);
                        stack.push((child, 0));
                    }
                } else {
                    stack.pop();
                    visiting.remove(&node);
                    visited.insert(node);
                }
            }
        }

        for (slot, id) in self.ids.iter().enumerate() {
            if !visited.contains(&slot) {
                errors.push(format!(
                    "Cycle detected: frame {} is not reachable from any root",
                    id
                ));
            }
        }

        HierarchyValidation {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    fn children_slots(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.ids.len()];
        for (slot, parent) in self.parents.iter().enumerate() {
            if let Some(&parent_slot) = parent.as_deref().and_then(|p| self.index.get(p)) {
                children[parent_slot].push(slot);
            }
        }
        children
    }
}
