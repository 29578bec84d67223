//! Stack Merge Resolver
//!
//! A merge session compares the frames two stacks share, records a conflict per
//! frame whose name or state differs, lets a [`MergePolicy`] settle what it can
//! and leaves the rest for manual resolution. Only a session with every
//! conflict settled may be executed; execution runs the underlying stack sync.

pub mod policy;

pub use policy::{ConditionExpr, ConflictSeverity, MergePolicy, PolicyAction, PolicyRule};

use crate::collab::dual::SharedDualStack;
use crate::collab::permissions::Action;
use crate::collab::sync::{ConflictResolution, SyncOptions, SyncResult};
use crate::error::StackError;
use crate::frame::{id, now_millis, Frame, FrameState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Content,
    Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub field: String,
    pub source_value: Value,
    pub target_value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    SourceWins,
    TargetWins,
    MergeBoth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedResolution {
    pub strategy: ResolutionStrategy,
    /// `policy:{name}` for automatic resolutions
    pub resolved_by: String,
    pub notes: Option<String>,
    pub automatic: bool,
    pub resolved_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub frame_id: String,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub conflict_details: Vec<ConflictDetail>,
    pub auto_resolvable: bool,
    pub resolution: Option<AppliedResolution>,
}

impl MergeConflict {
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Which side is closed, when the sides disagree on state
    fn terminal_side(&self) -> Option<ResolutionStrategy> {
        let detail = self.conflict_details.iter().find(|d| d.field == "state")?;
        let closed = json!(FrameState::Closed.as_str());
        if detail.source_value == closed {
            Some(ResolutionStrategy::SourceWins)
        } else if detail.target_value == closed {
            Some(ResolutionStrategy::TargetWins)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Analyzing,
    Resolving,
    ManualReview,
    Completed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMetadata {
    pub total_frames: usize,
    pub conflict_frames: usize,
    pub auto_resolved_conflicts: usize,
    pub manual_resolved_conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSession {
    pub session_id: String,
    pub source_stack_id: String,
    pub target_stack_id: String,
    pub frame_ids: Vec<String>,
    /// Policy name
    pub policy: String,
    pub conflicts: Vec<MergeConflict>,
    pub status: MergeStatus,
    pub metadata: MergeMetadata,
    /// Requested frames absent from the source; never merged
    pub skipped_frames: Vec<String>,
    pub created_at: u64,
    pub executed: bool,
}

impl MergeSession {
    pub fn unresolved(&self) -> impl Iterator<Item = &MergeConflict> + '_ {
        self.conflicts.iter().filter(|c| !c.is_resolved())
    }

    fn settle_status(&mut self) {
        self.status = if self.unresolved().next().is_none() {
            MergeStatus::Completed
        } else if self.metadata.manual_resolved_conflicts > 0 {
            MergeStatus::Resolving
        } else {
            MergeStatus::ManualReview
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConflictOptions {
    pub strategy: ResolutionStrategy,
    pub resolved_by: String,
    pub notes: Option<String>,
}

impl ResolveConflictOptions {
    pub fn new(strategy: ResolutionStrategy, resolved_by: impl Into<String>) -> Self {
        Self {
            strategy,
            resolved_by: resolved_by.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMergeOutcome {
    pub frame_id: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeExecution {
    pub session_id: String,
    pub success: bool,
    pub results: Vec<FrameMergeOutcome>,
}

pub struct StackMergeResolver {
    dual: SharedDualStack,
    policies: HashMap<String, MergePolicy>,
    sessions: HashMap<String, MergeSession>,
}

impl StackMergeResolver {
    pub fn new(dual: SharedDualStack) -> Self {
        let policies = MergePolicy::builtins()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            dual,
            policies,
            sessions: HashMap::new(),
        }
    }

    /// Compare `frame_ids` across the two stacks and open a session.
    ///
    /// The acting user needs read on the source and merge on the target.
    pub fn start_merge_session(
        &mut self,
        source_stack_id: &str,
        target_stack_id: &str,
        frame_ids: &[String],
        policy_name: Option<&str>,
    ) -> Result<MergeSession, StackError> {
        let policy_name = policy_name.unwrap_or(policy::DEFAULT_POLICY);
        let policy = self
            .policies
            .get(policy_name)
            .cloned()
            .ok_or_else(|| StackError::MergePolicyNotFound(policy_name.to_string()))?;
        if source_stack_id == target_stack_id {
            return Err(StackError::Validation(
                "source and target stacks must differ".to_string(),
            ));
        }
        if frame_ids.is_empty() {
            return Err(StackError::Validation(
                "a merge session needs at least one frame".to_string(),
            ));
        }

        let (source, target) = {
            let mut dual = self.dual.write();
            let user = dual.user_id().to_string();
            dual.permissions().check(&user, Action::Read, source_stack_id)?;
            dual.permissions().check(&user, Action::Merge, target_stack_id)?;
            (
                dual.stack_store(source_stack_id)?,
                dual.stack_store(target_stack_id)?,
            )
        };

        let mut session = MergeSession {
            session_id: id::merge_session_id(source_stack_id, target_stack_id),
            source_stack_id: source_stack_id.to_string(),
            target_stack_id: target_stack_id.to_string(),
            frame_ids: frame_ids.to_vec(),
            policy: policy.name.clone(),
            conflicts: Vec::new(),
            status: MergeStatus::Analyzing,
            metadata: MergeMetadata {
                total_frames: frame_ids.len(),
                ..MergeMetadata::default()
            },
            skipped_frames: Vec::new(),
            created_at: now_millis(),
            executed: false,
        };

        for frame_id in frame_ids {
            let Some(theirs) = source.get_frame(frame_id)? else {
                session.skipped_frames.push(frame_id.clone());
                continue;
            };
            let Some(ours) = target.get_frame(frame_id)? else {
                continue;
            };
            if let Some(conflict) = detect_conflict(&theirs, &ours) {
                session.conflicts.push(conflict);
            }
        }
        session.metadata.conflict_frames = session.conflicts.len();

        for conflict in &mut session.conflicts {
            if let Some(strategy) = auto_resolution(&policy, conflict) {
                conflict.resolution = Some(AppliedResolution {
                    strategy,
                    resolved_by: format!("policy:{}", policy.name),
                    notes: None,
                    automatic: true,
                    resolved_at: now_millis(),
                });
                session.metadata.auto_resolved_conflicts += 1;
            }
        }
        session.settle_status();

        info!(
            session_id = %session.session_id,
            source = source_stack_id,
            target = target_stack_id,
            policy = %session.policy,
            conflicts = session.metadata.conflict_frames,
            auto_resolved = session.metadata.auto_resolved_conflicts,
            status = ?session.status,
            "Merge session started"
        );
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    pub fn resolve_conflict(
        &mut self,
        session_id: &str,
        frame_id: &str,
        options: ResolveConflictOptions,
    ) -> Result<MergeSession, StackError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StackError::MergeSessionNotFound(session_id.to_string()))?;
        let conflict = session
            .conflicts
            .iter_mut()
            .find(|c| c.frame_id == frame_id && !c.is_resolved())
            .ok_or_else(|| StackError::MergeConflictNotFound {
                session_id: session_id.to_string(),
                frame_id: frame_id.to_string(),
            })?;

        conflict.resolution = Some(AppliedResolution {
            strategy: options.strategy,
            resolved_by: options.resolved_by.clone(),
            notes: options.notes,
            automatic: false,
            resolved_at: now_millis(),
        });
        session.metadata.manual_resolved_conflicts += 1;
        session.settle_status();

        debug!(
            session_id,
            frame_id,
            strategy = ?options.strategy,
            resolved_by = %options.resolved_by,
            status = ?session.status,
            "Merge conflict resolved"
        );
        Ok(session.clone())
    }

    /// Apply a completed session.
    ///
    /// Source-wins frames overwrite the target, target-wins frames are left
    /// alone, everything else is merged (or copied when the target lacks it).
    pub fn execute_merge(&mut self, session_id: &str) -> Result<MergeExecution, StackError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| StackError::MergeSessionNotFound(session_id.to_string()))?;
        if session.status != MergeStatus::Completed || session.executed {
            return Err(StackError::MergeNotReady(session_id.to_string()));
        }

        let mut overwrite = Vec::new();
        let mut merge = Vec::new();
        let mut kept = Vec::new();
        for frame_id in &session.frame_ids {
            if session.skipped_frames.contains(frame_id) {
                continue;
            }
            let strategy = session
                .conflicts
                .iter()
                .find(|c| &c.frame_id == frame_id)
                .and_then(|c| c.resolution.as_ref())
                .map(|r| r.strategy);
            match strategy {
                Some(ResolutionStrategy::SourceWins) => overwrite.push(frame_id.clone()),
                Some(ResolutionStrategy::TargetWins) => kept.push(frame_id.clone()),
                Some(ResolutionStrategy::MergeBoth) | None => merge.push(frame_id.clone()),
            }
        }

        let source_id = session.source_stack_id.clone();
        let target_id = session.target_stack_id.clone();
        let mut results: Vec<FrameMergeOutcome> = kept
            .into_iter()
            .map(|frame_id| FrameMergeOutcome {
                frame_id,
                success: true,
                error: None,
            })
            .collect();

        {
            let mut dual = self.dual.write();
            for (frames, resolution) in [
                (overwrite, ConflictResolution::Overwrite),
                (merge, ConflictResolution::Merge),
            ] {
                if frames.is_empty() {
                    continue;
                }
                let sync = dual.sync_stacks(
                    &source_id,
                    &target_id,
                    SyncOptions::new(resolution).with_frames(frames),
                )?;
                collect_outcomes(&sync, &mut results);
            }
        }

        let success = results.iter().all(|r| r.success);
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.executed = true;
        }
        info!(
            session_id,
            success,
            frames = results.len(),
            "Merge executed"
        );
        Ok(MergeExecution {
            session_id: session_id.to_string(),
            success,
            results,
        })
    }

    /// Register a custom policy. Built-in names are reserved.
    pub fn create_merge_policy(&mut self, policy: MergePolicy) -> Result<(), StackError> {
        if policy.name.trim().is_empty() {
            return Err(StackError::Validation(
                "policy name cannot be empty".to_string(),
            ));
        }
        if MergePolicy::is_builtin(&policy.name) {
            return Err(StackError::Validation(format!(
                "policy {} is built in",
                policy.name
            )));
        }
        info!(policy = %policy.name, rules = policy.rules.len(), "Merge policy registered");
        self.policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    pub fn get_merge_session(&self, session_id: &str) -> Result<&MergeSession, StackError> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| StackError::MergeSessionNotFound(session_id.to_string()))
    }

    /// All policies, by name
    pub fn list_policies(&self) -> Vec<&MergePolicy> {
        let mut policies: Vec<&MergePolicy> = self.policies.values().collect();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        policies
    }
}

/// Name differences are content conflicts; a state-only difference is a
/// metadata conflict that can be settled by preferring the closed side.
fn detect_conflict(source: &Frame, target: &Frame) -> Option<MergeConflict> {
    let mut details = Vec::new();
    if source.name != target.name {
        details.push(ConflictDetail {
            field: "name".to_string(),
            source_value: json!(source.name),
            target_value: json!(target.name),
        });
    }
    if source.state != target.state {
        details.push(ConflictDetail {
            field: "state".to_string(),
            source_value: json!(source.state.as_str()),
            target_value: json!(target.state.as_str()),
        });
    }
    if details.is_empty() {
        return None;
    }

    let content = details.iter().any(|d| d.field == "name");
    Some(MergeConflict {
        frame_id: source.frame_id.clone(),
        conflict_type: if content {
            ConflictType::Content
        } else {
            ConflictType::Metadata
        },
        severity: if content {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        },
        conflict_details: details,
        auto_resolvable: !content,
        resolution: None,
    })
}

fn auto_resolution(policy: &MergePolicy, conflict: &MergeConflict) -> Option<ResolutionStrategy> {
    match policy.decide(conflict)? {
        PolicyAction::SourceWins => Some(ResolutionStrategy::SourceWins),
        PolicyAction::TargetWins => Some(ResolutionStrategy::TargetWins),
        PolicyAction::MergeBoth => Some(ResolutionStrategy::MergeBoth),
        PolicyAction::PreferTerminalState => conflict.terminal_side(),
        PolicyAction::RequireManualReview => None,
    }
}

fn collect_outcomes(sync: &SyncResult, results: &mut Vec<FrameMergeOutcome>) {
    for frame_id in sync.merged_frames.iter().chain(&sync.conflict_frames) {
        results.push(FrameMergeOutcome {
            frame_id: frame_id.clone(),
            success: true,
            error: None,
        });
    }
    for failure in &sync.errors {
        results.push(FrameMergeOutcome {
            frame_id: failure.frame_id.clone(),
            success: false,
            error: Some(failure.reason.clone()),
        });
    }
}
