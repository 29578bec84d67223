//! Merge policies: ordered rules that auto-resolve conflicts.
//!
//! A rule pairs a [`ConditionExpr`] over conflict attributes with an action.
//! Rules are tried from the highest priority down and the first match wins.

use crate::collab::merge::{ConflictType, MergeConflict};
use serde::{Deserialize, Serialize};

pub const DEFAULT_POLICY: &str = "default";
pub const CONSERVATIVE_POLICY: &str = "conservative";
pub const AGGRESSIVE_POLICY: &str = "aggressive";

pub const BUILTIN_POLICIES: [&str; 3] = [DEFAULT_POLICY, CONSERVATIVE_POLICY, AGGRESSIVE_POLICY];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Predicate over a single conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "arg")]
pub enum ConditionExpr {
    All(Vec<ConditionExpr>),
    Any(Vec<ConditionExpr>),
    Not(Box<ConditionExpr>),
    /// Severity is at most the given level
    Severity(ConflictSeverity),
    ConflictType(ConflictType),
    AutoResolvable(bool),
    Always,
}

impl ConditionExpr {
    pub fn matches(&self, conflict: &MergeConflict) -> bool {
        match self {
            ConditionExpr::All(exprs) => exprs.iter().all(|e| e.matches(conflict)),
            ConditionExpr::Any(exprs) => exprs.iter().any(|e| e.matches(conflict)),
            ConditionExpr::Not(expr) => !expr.matches(conflict),
            ConditionExpr::Severity(max) => conflict.severity <= *max,
            ConditionExpr::ConflictType(kind) => conflict.conflict_type == *kind,
            ConditionExpr::AutoResolvable(flag) => conflict.auto_resolvable == *flag,
            ConditionExpr::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    SourceWins,
    TargetWins,
    MergeBoth,
    /// Keep whichever side has reached the closed state
    PreferTerminalState,
    /// Stop evaluating and leave the conflict to a person
    RequireManualReview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub condition: ConditionExpr,
    pub action: PolicyAction,
    pub priority: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<PolicyRule>,
    /// Conflicts above this severity are never auto-applied
    pub auto_apply_threshold: ConflictSeverity,
}

impl MergePolicy {
    pub fn new(name: impl Into<String>, auto_apply_threshold: ConflictSeverity) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
            auto_apply_threshold,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_rule(
        mut self,
        condition: ConditionExpr,
        action: PolicyAction,
        priority: i32,
    ) -> Self {
        self.rules.push(PolicyRule {
            condition,
            action,
            priority,
        });
        self
    }

    /// Action of the highest-priority matching rule, if the conflict may be
    /// auto-applied at all. Ties keep declaration order.
    pub fn decide(&self, conflict: &MergeConflict) -> Option<PolicyAction> {
        if conflict.severity > self.auto_apply_threshold {
            return None;
        }
        let mut rules: Vec<&PolicyRule> = self.rules.iter().collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
            .into_iter()
            .find(|rule| rule.condition.matches(conflict))
            .map(|rule| rule.action)
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_POLICIES.contains(&name)
    }

    pub fn builtins() -> Vec<MergePolicy> {
        let default = MergePolicy::new(DEFAULT_POLICY, ConflictSeverity::Low)
            .with_description("Resolve state-only conflicts toward the closed side")
            .with_rule(
                ConditionExpr::AutoResolvable(true),
                PolicyAction::PreferTerminalState,
                100,
            );

        let conservative = MergePolicy::new(CONSERVATIVE_POLICY, ConflictSeverity::Low)
            .with_description("Only state-only conflicts resolve on their own")
            .with_rule(
                ConditionExpr::All(vec![
                    ConditionExpr::ConflictType(ConflictType::Metadata),
                    ConditionExpr::AutoResolvable(true),
                ]),
                PolicyAction::PreferTerminalState,
                100,
            )
            .with_rule(ConditionExpr::Always, PolicyAction::RequireManualReview, 0);

        let aggressive = MergePolicy::new(AGGRESSIVE_POLICY, ConflictSeverity::High)
            .with_description("Source wins content conflicts up to high severity")
            .with_rule(
                ConditionExpr::AutoResolvable(true),
                PolicyAction::PreferTerminalState,
                100,
            )
            .with_rule(
                ConditionExpr::ConflictType(ConflictType::Content),
                PolicyAction::SourceWins,
                50,
            );

        vec![default, conservative, aggressive]
    }
}
