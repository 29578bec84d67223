//! Frame digests
//!
//! A digest summarizes a frame's events and anchors. It is produced once, when
//! the frame closes, and stored on the frame as `digest_text` + `digest_json`.
//! The structured part is also merged into the frame's outputs.

use crate::error::StorageError;
use crate::frame::storage::FrameStore;
use crate::frame::{now_millis, Anchor, AnchorType, Event, Frame, ValueMap};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Event type whose payload names produced files
pub const ARTIFACT_EVENT: &str = "artifact";

#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub text: String,
    pub json: Value,
    /// Keys merged into the frame's outputs on close
    pub structured: ValueMap,
}

pub struct DigestGenerator<'a> {
    store: &'a FrameStore,
}

impl<'a> DigestGenerator<'a> {
    pub fn new(store: &'a FrameStore) -> Self {
        Self { store }
    }

    /// Build the digest for a frame from everything persisted for it
    pub fn generate_digest(&self, frame: &Frame) -> Result<Digest, StorageError> {
        let events = self.store.list_events(&frame.frame_id)?;
        let anchors = self.store.list_anchors(&frame.frame_id)?;
        Ok(build_digest(frame, &events, &anchors, now_millis()))
    }
}

pub fn build_digest(frame: &Frame, events: &[Event], anchors: &[Anchor], now_ms: u64) -> Digest {
    let mut sorted: Vec<&Anchor> = anchors.iter().collect();
    sorted.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let mut event_counts: BTreeMap<String, u64> = BTreeMap::new();
    for event in events {
        *event_counts.entry(event.event_type.clone()).or_default() += 1;
    }

    let artifacts = extract_artifacts(events);
    let duration_ms = frame
        .closed_at
        .unwrap_or(now_ms)
        .saturating_sub(frame.created_at);

    let texts_of = |kind: AnchorType| -> Vec<Value> {
        sorted
            .iter()
            .filter(|a| a.anchor_type == kind)
            .map(|a| Value::String(a.text.clone()))
            .collect()
    };

    let mut structured = ValueMap::new();
    structured.insert("artifacts".to_string(), json!(artifacts));
    structured.insert("decisions".to_string(), Value::Array(texts_of(AnchorType::Decision)));
    structured.insert("constraints".to_string(), Value::Array(texts_of(AnchorType::Constraint)));
    structured.insert("risks".to_string(), Value::Array(texts_of(AnchorType::Risk)));
    structured.insert("open_todos".to_string(), Value::Array(texts_of(AnchorType::Todo)));

    let anchor_json: Vec<Value> = sorted
        .iter()
        .map(|a| {
            json!({
                "type": a.anchor_type.as_str(),
                "text": a.text,
                "priority": a.priority,
            })
        })
        .collect();

    let digest_json = json!({
        "frame_id": frame.frame_id,
        "name": frame.name,
        "type": frame.frame_type.as_str(),
        "duration_ms": duration_ms,
        "event_total": events.len(),
        "event_counts": event_counts,
        "anchors": anchor_json,
        "artifacts": artifacts,
    });

    let text = render_text(frame, duration_ms, events.len(), &event_counts, &sorted, &artifacts);

    Digest {
        text,
        json: digest_json,
        structured,
    }
}

/// Paths named by `artifact` events, first occurrence order, deduplicated.
///
/// Accepts `{"path": "..."}` and `{"paths": ["...", ...]}` payloads.
fn extract_artifacts(events: &[Event]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |path: &str| {
        if !path.is_empty() && !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
    };

    for event in events.iter().filter(|e| e.event_type == ARTIFACT_EVENT) {
        if let Some(path) = event.payload.get("path").and_then(Value::as_str) {
            push(path);
        }
        if let Some(paths) = event.payload.get("paths").and_then(Value::as_array) {
            for path in paths.iter().filter_map(Value::as_str) {
                push(path);
            }
        }
    }
    out
}

fn render_text(
    frame: &Frame,
    duration_ms: u64,
    event_total: usize,
    event_counts: &BTreeMap<String, u64>,
    anchors: &[&Anchor],
    artifacts: &[String],
) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Frame: {} ({})", frame.name, frame.frame_type.as_str());
    let started = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(frame.created_at as i64);
    if let Some(started) = started {
        let _ = writeln!(text, "Started: {}", started.to_rfc3339());
    }
    let _ = writeln!(text, "Duration: {:.1}s", duration_ms as f64 / 1000.0);

    let counts: Vec<String> = event_counts
        .iter()
        .map(|(kind, n)| format!("{}: {}", kind, n))
        .collect();
    if counts.is_empty() {
        let _ = writeln!(text, "Events: {}", event_total);
    } else {
        let _ = writeln!(text, "Events: {} ({})", event_total, counts.join(", "));
    }

    if !anchors.is_empty() {
        let _ = writeln!(text, "Anchors:");
        for anchor in anchors {
            let _ = writeln!(
                text,
                "  [{} p{}] {}",
                anchor.anchor_type.as_str(),
                anchor.priority,
                anchor.text
            );
        }
    }

    if !artifacts.is_empty() {
        let _ = writeln!(text, "Artifacts:");
        for path in artifacts {
            let _ = writeln!(text, "  - {}", path);
        }
    }

    text.trim_end().to_string()
}
