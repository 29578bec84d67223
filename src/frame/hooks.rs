//! Frame lifecycle hooks
//!
//! A hook table is constructed explicitly and handed to every frame manager that
//! should share it; there is no process-wide registry. Handlers run in
//! descending priority order, fire-and-forget, never on the caller's thread: on
//! a Tokio runtime they run on the blocking pool, otherwise on a detached
//! thread. Handler errors and panics are logged and never reach the caller.

use crate::frame::Frame;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, warn};

pub type HookHandler = Arc<dyn Fn(&FrameLifecycleEvent) -> anyhow::Result<()> + Send + Sync>;

/// Priority, hook name and handler, snapshotted for one dispatch
type BoundHandler = (i32, String, HookHandler);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    FrameCreated,
    FrameClosed,
}

#[derive(Debug, Clone)]
pub struct FrameLifecycleEvent {
    pub kind: HookKind,
    pub frame: Frame,
}

struct HookEntry {
    id: u64,
    name: String,
    priority: i32,
    kind: HookKind,
    handler: HookHandler,
}

#[derive(Default)]
struct HookTable {
    entries: Vec<HookEntry>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct LifecycleHooks {
    table: Arc<RwLock<HookTable>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame_created<F>(&self, name: &str, handler: F, priority: i32) -> HookRegistration
    where
        F: Fn(&FrameLifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(HookKind::FrameCreated, name, Arc::new(handler), priority)
    }

    pub fn on_frame_closed<F>(&self, name: &str, handler: F, priority: i32) -> HookRegistration
    where
        F: Fn(&FrameLifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(HookKind::FrameClosed, name, Arc::new(handler), priority)
    }

    fn register(
        &self,
        kind: HookKind,
        name: &str,
        handler: HookHandler,
        priority: i32,
    ) -> HookRegistration {
        let mut table = self.table.write();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(HookEntry {
            id,
            name: name.to_string(),
            priority,
            kind,
            handler,
        });
        debug!(hook = name, ?kind, priority, "Registered lifecycle hook");
        HookRegistration {
            table: Arc::downgrade(&self.table),
            id,
        }
    }

    pub fn handler_count(&self, kind: HookKind) -> usize {
        self.table
            .read()
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Dispatch a batch of events, in order, off the caller's thread
    pub(crate) fn fire(&self, events: Vec<FrameLifecycleEvent>) {
        let batch: Vec<(FrameLifecycleEvent, Vec<BoundHandler>)> = {
            let table = self.table.read();
            events
                .into_iter()
                .filter_map(|event| {
                    let mut handlers: Vec<BoundHandler> = table
                        .entries
                        .iter()
                        .filter(|e| e.kind == event.kind)
                        .map(|e| (e.priority, e.name.clone(), Arc::clone(&e.handler)))
                        .collect();
                    if handlers.is_empty() {
                        return None;
                    }
                    handlers.sort_by(|a, b| b.0.cmp(&a.0));
                    Some((event, handlers))
                })
                .collect()
        };
        if batch.is_empty() {
            return;
        }

        let job = move || {
            for (event, handlers) in &batch {
                run_handlers(handlers, event);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(job);
            }
            Err(_) => {
                if let Err(err) = thread::Builder::new()
                    .name("framestack-hooks".to_string())
                    .spawn(job)
                {
                    warn!(error = %err, "Failed to spawn lifecycle hook thread");
                }
            }
        }
    }
}

fn run_handlers(handlers: &[BoundHandler], event: &FrameLifecycleEvent) {
    for (_, name, handler) in handlers {
        match panic::catch_unwind(AssertUnwindSafe(|| (**handler)(event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    hook = %name,
                    frame_id = %event.frame.frame_id,
                    error = %err,
                    "Lifecycle hook failed"
                );
            }
            Err(payload) => {
                warn!(
                    hook = %name,
                    frame_id = %event.frame.frame_id,
                    panic = panic_message(payload.as_ref()),
                    "Lifecycle hook panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by hook registration; `unregister` removes the handler.
pub struct HookRegistration {
    table: Weak<RwLock<HookTable>>,
    id: u64,
}

impl HookRegistration {
    /// Returns `false` if the handler was already gone
    pub fn unregister(self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.write();
        let before = table.entries.len();
        table.entries.retain(|e| e.id != self.id);
        table.entries.len() != before
    }
}
