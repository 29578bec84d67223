//! Opaque identifier generation
//!
//! Ids are hex-encoded blake3 digests over a kind tag, caller-supplied parts,
//! the wall clock and a process-local counter. They carry no meaning beyond
//! uniqueness; callers must not parse them.

use blake3::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const ID_BYTES: usize = 16;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a fresh opaque id
///
/// id = hex(blake3(kind || parts || nanos || pid || counter)[..16])
pub fn generate_id(kind: &str, parts: &[&str]) -> String {
    let mut hasher = Hasher::new();

    hasher.update(b"kind:");
    hasher.update(kind.as_bytes());

    for part in parts {
        hasher.update(b"part:");
        hasher.update(part.as_bytes());
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());

    hex::encode(&hasher.finalize().as_bytes()[..ID_BYTES])
}

pub fn frame_id(project_id: &str, run_id: &str, name: &str) -> String {
    generate_id("frame", &[project_id, run_id, name])
}

pub fn event_id(frame_id: &str) -> String {
    generate_id("event", &[frame_id])
}

pub fn anchor_id(frame_id: &str) -> String {
    generate_id("anchor", &[frame_id])
}

pub fn handoff_request_id(source_stack_id: &str, target_stack_id: &str) -> String {
    format!(
        "handoff-{}",
        generate_id("handoff", &[source_stack_id, target_stack_id])
    )
}

pub fn merge_session_id(source_stack_id: &str, target_stack_id: &str) -> String {
    format!(
        "merge-{}",
        generate_id("merge", &[source_stack_id, target_stack_id])
    )
}

pub fn notification_id(user_id: &str) -> String {
    format!("notif-{}", generate_id("notification", &[user_id]))
}
