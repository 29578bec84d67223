//! Dual Stack Manager
//!
//! Pairs a user's individual stack with any number of shared (team) stacks of
//! the same project. The individual stack is always open with full permissions;
//! shared stacks are opened lazily on first use and cached. Every stack has its
//! own database under `{data_dir}/stacks/{stack_id}`, or an in-memory database
//! when no data dir is configured. With `recovery.run_on_startup` set, each
//! store is reconciled by the recovery service when it is first opened.

use crate::collab::context::{individual_stack_id, shared_stack_id, StackContext, StackKind};
use crate::collab::permissions::{team_resource, Action, PermissionChecker, StackPermissions};
use crate::collab::sync::{ConflictResolution, StackSync, SyncOptions, SyncResult};
use crate::config::{FrameLimits, RecoveryConfig};
use crate::error::StackError;
use crate::frame::hooks::LifecycleHooks;
use crate::frame::manager::{FrameManager, FrameManagerOptions};
use crate::frame::recovery::RecoveryService;
use crate::frame::storage::FrameStore;
use crate::frame::{now_millis, ValueMap};
use crate::store::StackRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handle shared by the handoff manager and merge resolver
pub type SharedDualStack = Arc<RwLock<DualStackManager>>;

#[derive(Debug, Clone)]
pub struct DualStackOptions {
    pub user_id: String,
    pub project_id: String,
    pub run_id: String,
    /// In-memory stacks when `None`
    pub data_dir: Option<PathBuf>,
    pub limits: FrameLimits,
    pub recovery: RecoveryConfig,
}

impl DualStackOptions {
    pub fn new(
        user_id: impl Into<String>,
        project_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            run_id: run_id.into(),
            data_dir: None,
            limits: FrameLimits::default(),
            recovery: RecoveryConfig::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_limits(mut self, limits: FrameLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }
}

pub struct DualStackManager {
    options: DualStackOptions,
    registry: Arc<dyn StackRegistry>,
    permissions: Arc<dyn PermissionChecker>,
    hooks: LifecycleHooks,
    individual_stack_id: String,
    active_stack_id: String,
    /// Open stacks keyed by stack id, the individual stack included
    managers: HashMap<String, FrameManager>,
}

impl DualStackManager {
    pub fn open(
        options: DualStackOptions,
        registry: Arc<dyn StackRegistry>,
        permissions: Arc<dyn PermissionChecker>,
        hooks: LifecycleHooks,
    ) -> Result<Self, StackError> {
        if options.user_id.trim().is_empty() || options.project_id.trim().is_empty() {
            return Err(StackError::Validation(
                "user_id and project_id are required".to_string(),
            ));
        }

        let now = now_millis();
        let individual_id = individual_stack_id(&options.user_id);
        let context = match registry.get_stack(&individual_id)? {
            Some(mut existing) => {
                existing.last_active = now;
                existing
            }
            None => StackContext::individual(&options.user_id, &options.project_id, now),
        };
        registry.put_stack(&context)?;

        let mut manager = Self {
            options,
            registry,
            permissions,
            hooks,
            individual_stack_id: individual_id.clone(),
            active_stack_id: individual_id.clone(),
            managers: HashMap::new(),
        };
        let individual = manager.open_frame_manager(&individual_id)?;
        manager.managers.insert(individual_id.clone(), individual);

        info!(
            user_id = %manager.options.user_id,
            project_id = %manager.options.project_id,
            stack_id = %individual_id,
            "Dual stack manager opened"
        );
        Ok(manager)
    }

    pub fn into_shared(self) -> SharedDualStack {
        Arc::new(RwLock::new(self))
    }

    pub fn user_id(&self) -> &str {
        &self.options.user_id
    }

    pub fn project_id(&self) -> &str {
        &self.options.project_id
    }

    pub fn individual_stack_id(&self) -> &str {
        &self.individual_stack_id
    }

    pub fn active_stack_id(&self) -> &str {
        &self.active_stack_id
    }

    pub fn registry(&self) -> &Arc<dyn StackRegistry> {
        &self.registry
    }

    pub fn permissions(&self) -> &Arc<dyn PermissionChecker> {
        &self.permissions
    }

    /// Make `stack_id` the active stack.
    ///
    /// Fails without side effects for unknown stacks or when the caller may not
    /// read the stack.
    pub fn switch_to_stack(&mut self, stack_id: &str) -> Result<(), StackError> {
        if stack_id == self.individual_stack_id {
            self.active_stack_id = stack_id.to_string();
            debug!(stack_id, "Switched to individual stack");
            return Ok(());
        }

        let mut context = self.require_context(stack_id)?;
        self.permissions
            .check(&self.options.user_id, Action::Read, stack_id)?;
        self.ensure_manager(stack_id)?;

        context.last_active = now_millis();
        if let Err(err) = self.registry.put_stack(&context) {
            warn!(stack_id, error = %err, "Failed to update last-active timestamp");
        }

        self.active_stack_id = stack_id.to_string();
        info!(stack_id, user_id = %self.options.user_id, "Switched stack");
        Ok(())
    }

    /// Create a team stack and make `owner_id` its administrator.
    ///
    /// `permissions` are the baseline for team members without a grant;
    /// read-only when omitted.
    pub fn create_shared_stack(
        &mut self,
        team_id: &str,
        name: &str,
        owner_id: &str,
        permissions: Option<StackPermissions>,
    ) -> Result<String, StackError> {
        if team_id.trim().is_empty() {
            return Err(StackError::Validation("team_id cannot be empty".to_string()));
        }
        if name.trim().is_empty() {
            return Err(StackError::Validation("name cannot be empty".to_string()));
        }
        if owner_id.trim().is_empty() {
            return Err(StackError::Validation("owner_id cannot be empty".to_string()));
        }

        let team = team_resource(team_id);
        self.permissions
            .check(&self.options.user_id, Action::Administer, &team)?;

        let mut created_at = now_millis();
        let mut stack_id = shared_stack_id(team_id, created_at);
        while self.registry.get_stack(&stack_id)?.is_some() {
            created_at += 1;
            stack_id = shared_stack_id(team_id, created_at);
        }

        let context = StackContext {
            stack_id: stack_id.clone(),
            kind: StackKind::Shared,
            project_id: self.options.project_id.clone(),
            name: name.to_string(),
            owner_id: Some(owner_id.to_string()),
            team_id: Some(team_id.to_string()),
            permissions: permissions.unwrap_or_else(StackPermissions::read_only),
            metadata: ValueMap::new(),
            created_at,
            last_active: created_at,
        };
        self.registry.put_stack(&context)?;
        self.ensure_manager(&stack_id)?;

        self.registry
            .put_grant(&stack_id, owner_id, &StackPermissions::full())?;
        if self.registry.get_grant(&team, owner_id)?.is_none() {
            self.registry
                .put_grant(&team, owner_id, &StackPermissions::full())?;
        }

        info!(stack_id = %stack_id, team_id, owner_id, "Shared stack created");
        Ok(stack_id)
    }

    /// Record an explicit grant. Requires administer rights on the stack.
    pub fn grant_permission(
        &self,
        stack_id: &str,
        user_id: &str,
        permissions: StackPermissions,
    ) -> Result<(), StackError> {
        if user_id.trim().is_empty() {
            return Err(StackError::Validation("user_id cannot be empty".to_string()));
        }
        self.require_context(stack_id)?;
        self.permissions
            .check(&self.options.user_id, Action::Administer, stack_id)?;
        self.registry.put_grant(stack_id, user_id, &permissions)?;
        info!(stack_id, user_id, ?permissions, "Permission granted");
        Ok(())
    }

    /// Copy frames from `source_id` into `target_id`.
    ///
    /// Requires read on the source and write on the target.
    pub fn sync_stacks(
        &mut self,
        source_id: &str,
        target_id: &str,
        options: SyncOptions,
    ) -> Result<SyncResult, StackError> {
        let user = self.options.user_id.clone();
        self.sync_as(&user, &user, source_id, target_id, &options)
    }

    fn sync_as(
        &mut self,
        source_actor: &str,
        target_actor: &str,
        source_id: &str,
        target_id: &str,
        options: &SyncOptions,
    ) -> Result<SyncResult, StackError> {
        if source_id == target_id {
            return Err(StackError::Validation(
                "source and target stacks must differ".to_string(),
            ));
        }
        self.permissions.check(source_actor, Action::Read, source_id)?;
        self.permissions.check(target_actor, Action::Write, target_id)?;

        let source = self.stack_store(source_id)?;
        let target = self.stack_store(target_id)?;
        StackSync::new(&source, &target, source_id).run(options)
    }

    /// Move frames: sync with forced merge, then delete them from the source.
    ///
    /// Nothing is removed from the source unless the sync reported no errors.
    pub fn move_frames_between_stacks(
        &mut self,
        source_id: &str,
        target_id: &str,
        frame_ids: &[String],
    ) -> Result<SyncResult, StackError> {
        let user = self.options.user_id.clone();
        self.relocate_frames(&user, &user, source_id, target_id, frame_ids)
    }

    /// Move on behalf of two parties: `source_actor` releases the frames,
    /// `target_actor` accepts them
    pub(crate) fn relocate_frames(
        &mut self,
        source_actor: &str,
        target_actor: &str,
        source_id: &str,
        target_id: &str,
        frame_ids: &[String],
    ) -> Result<SyncResult, StackError> {
        self.permissions.check(source_actor, Action::Write, source_id)?;

        let options = SyncOptions::new(ConflictResolution::Merge).with_frames(frame_ids.to_vec());
        let result = self.sync_as(source_actor, target_actor, source_id, target_id, &options)?;
        if !result.success {
            warn!(
                source = source_id,
                target = target_id,
                errors = result.errors.len(),
                "Sync reported errors; source frames left in place"
            );
            return Ok(result);
        }

        let source = self.ensure_manager(source_id)?;
        let mut doomed: Vec<(usize, String)> = Vec::with_capacity(frame_ids.len());
        for frame_id in frame_ids {
            if let Some(frame) = source.get_frame(frame_id)? {
                doomed.push((frame.depth, frame.frame_id));
            }
        }
        doomed.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, frame_id) in doomed {
            source.delete_frame(&frame_id)?;
        }

        info!(
            source = source_id,
            target = target_id,
            moved = result.merged_frames.len(),
            "Frames moved between stacks"
        );
        Ok(result)
    }

    /// The current context plus every readable shared stack of the project
    pub fn get_available_stacks(&self) -> Result<Vec<StackContext>, StackError> {
        let current = self.get_current_context()?;
        let mut stacks = vec![current];
        for context in self.registry.list_stacks(&self.options.project_id)? {
            if context.kind != StackKind::Shared || context.stack_id == stacks[0].stack_id {
                continue;
            }
            if self
                .permissions
                .allows(&self.options.user_id, Action::Read, &context.stack_id)
            {
                stacks.push(context);
            }
        }
        Ok(stacks)
    }

    pub fn get_current_context(&self) -> Result<StackContext, StackError> {
        self.require_context(&self.active_stack_id)
    }

    pub fn get_stack_context(&self, stack_id: &str) -> Result<StackContext, StackError> {
        self.require_context(stack_id)
    }

    pub fn get_active_frame_manager(&mut self) -> Result<&mut FrameManager, StackError> {
        let stack_id = self.active_stack_id.clone();
        self.ensure_manager(&stack_id)
    }

    /// Frame manager for a readable stack
    pub fn frame_manager(&mut self, stack_id: &str) -> Result<&mut FrameManager, StackError> {
        if stack_id != self.individual_stack_id {
            self.require_context(stack_id)?;
            self.permissions
                .check(&self.options.user_id, Action::Read, stack_id)?;
        }
        self.ensure_manager(stack_id)
    }

    /// Store handle for a known stack; the caller is responsible for permission checks
    pub(crate) fn stack_store(&mut self, stack_id: &str) -> Result<FrameStore, StackError> {
        self.require_context(stack_id)?;
        Ok(self.ensure_manager(stack_id)?.store().clone())
    }

    fn require_context(&self, stack_id: &str) -> Result<StackContext, StackError> {
        self.registry
            .get_stack(stack_id)?
            .ok_or_else(|| StackError::StackNotFound(stack_id.to_string()))
    }

    fn ensure_manager(&mut self, stack_id: &str) -> Result<&mut FrameManager, StackError> {
        if !self.managers.contains_key(stack_id) {
            let manager = self.open_frame_manager(stack_id)?;
            self.managers.insert(stack_id.to_string(), manager);
            debug!(stack_id, "Opened frame manager");
        }
        self.managers
            .get_mut(stack_id)
            .ok_or_else(|| StackError::StackNotFound(stack_id.to_string()))
    }

    fn open_frame_manager(&self, stack_id: &str) -> Result<FrameManager, StackError> {
        let store = match &self.options.data_dir {
            Some(dir) => FrameStore::open(dir.join("stacks").join(stack_id))?,
            None => FrameStore::temporary()?,
        };
        if self.options.recovery.run_on_startup {
            let report =
                RecoveryService::new(store.clone(), &self.options.run_id, self.options.recovery)
                    .recover_on_startup();
            if report.recovered {
                debug!(
                    stack_id,
                    orphans_closed = report.orphaned_frames.closed,
                    "Startup recovery finished"
                );
            } else {
                warn!(stack_id, errors = ?report.errors, "Startup recovery reported problems");
            }
        }
        let options = FrameManagerOptions::new(&self.options.project_id, &self.options.run_id)
            .with_max_stack_depth(self.options.limits.max_stack_depth)
            .with_max_frame_depth(self.options.limits.max_frame_depth);
        FrameManager::open(store, options, self.hooks.clone())
    }
}
