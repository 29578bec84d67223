//! Shared setup for integration tests

use framestack::collab::{
    DualStackManager, DualStackOptions, GrantPermissionChecker, SharedDualStack,
};
use framestack::frame::{FrameManager, FrameManagerOptions, FrameStore, LifecycleHooks};
use framestack::store::SledStackRegistry;
use std::sync::Arc;

/// Frame manager over an in-memory store
pub fn memory_manager(options: FrameManagerOptions) -> FrameManager {
    let store = FrameStore::temporary().unwrap();
    FrameManager::open(store, options, LifecycleHooks::new()).unwrap()
}

pub fn memory_registry() -> Arc<SledStackRegistry> {
    Arc::new(SledStackRegistry::temporary().unwrap())
}

/// Dual stack for `user` in project "proj", sharing `registry` with other users
pub fn dual_for(user: &str, registry: Arc<SledStackRegistry>) -> DualStackManager {
    DualStackManager::open(
        DualStackOptions::new(user, "proj", "run-1"),
        registry.clone(),
        Arc::new(GrantPermissionChecker::new(registry)),
        LifecycleHooks::new(),
    )
    .unwrap()
}

pub fn shared_dual(user: &str) -> SharedDualStack {
    dual_for(user, memory_registry()).into_shared()
}
