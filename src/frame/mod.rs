//! Context Frames
//!
//! Persisted hierarchical units of agent working memory. A frame owns an
//! append-only, sequenced event log and a set of prioritized anchors. Frames are
//! created, mutated and closed through the [`FrameManager`]; deletion exists only
//! for relocating frames between stacks.

pub mod digest;
pub mod hooks;
pub mod id;
pub mod manager;
pub mod recovery;
pub mod stack;
pub mod storage;

pub use digest::{Digest, DigestGenerator};
pub use hooks::{FrameLifecycleEvent, HookKind, HookRegistration, LifecycleHooks};
pub use manager::{
    AnchorOptions, CreateFrameOptions, EventOptions, FrameManager, FrameManagerOptions,
    HotFrameContext, StackValidation,
};
pub use recovery::{
    IntegrityCheck, OrphanedFrames, ProjectIntegrity, RecoveryReport, RecoveryService,
    RecoveryStats, WalStatus,
};
pub use stack::{FrameStack, HierarchyIndex, HierarchyValidation};
pub use storage::FrameStore;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// String-keyed map used for frame inputs/outputs and anchor metadata
pub type ValueMap = BTreeMap<String, Value>;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Task,
    Subtask,
    ToolScope,
    Review,
    Write,
    Debug,
}

impl FrameType {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Task => "task",
            FrameType::Subtask => "subtask",
            FrameType::ToolScope => "tool_scope",
            FrameType::Review => "review",
            FrameType::Write => "write",
            FrameType::Debug => "debug",
        }
    }
}

/// Frames only ever move `Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameState {
    Active,
    Closed,
}

impl FrameState {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameState::Active => "active",
            FrameState::Closed => "closed",
        }
    }
}

/// Context frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: String,
    pub run_id: String,
    pub project_id: String,
    pub parent_frame_id: Option<String>,
    /// `parent.depth + 1`, or 0 for roots
    pub depth: usize,
    pub frame_type: FrameType,
    pub name: String,
    pub state: FrameState,
    #[serde(default)]
    pub inputs: ValueMap,
    #[serde(default)]
    pub outputs: ValueMap,
    pub digest_text: Option<String>,
    pub digest_json: Option<Value>,
    pub created_at: u64,
    pub closed_at: Option<u64>,
}

impl Frame {
    pub fn is_active(&self) -> bool {
        self.state == FrameState::Active
    }
}

/// Append-only record of something that happened inside a frame.
///
/// `seq` increases monotonically per `frame_id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub frame_id: String,
    pub run_id: String,
    pub seq: u64,
    pub event_type: String,
    pub payload: Value,
    pub ts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnchorType {
    Fact,
    Decision,
    Constraint,
    InterfaceContract,
    Todo,
    Risk,
}

impl AnchorType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnchorType::Fact => "FACT",
            AnchorType::Decision => "DECISION",
            AnchorType::Constraint => "CONSTRAINT",
            AnchorType::InterfaceContract => "INTERFACE_CONTRACT",
            AnchorType::Todo => "TODO",
            AnchorType::Risk => "RISK",
        }
    }
}

pub const MAX_ANCHOR_PRIORITY: u8 = 10;

/// Prioritized fact, decision or constraint attached to a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_id: String,
    pub frame_id: String,
    pub anchor_type: AnchorType,
    pub text: String,
    /// 0..=10
    pub priority: u8,
    #[serde(default)]
    pub metadata: ValueMap,
    pub created_at: u64,
}
