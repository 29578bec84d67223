//! Aggregate handoff statistics.

use crate::collab::handoff::types::{HandoffRequest, HandoffStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PATTERN_BULK_TRANSFER: &str = "bulk_transfer";
pub const PATTERN_SINGLE_FRAME: &str = "single_frame";
pub const PATTERN_MULTI_FRAME: &str = "multi_frame";
pub const PATTERN_COMPLETE_TRANSFER: &str = "complete_transfer";
pub const PATTERN_PARTIAL_TRANSFER: &str = "partial_transfer";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandoffMetrics {
    pub total_requests: usize,
    pub pending_requests: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    /// Mean of `completed_at - created_at` over completed requests
    pub average_processing_time_ms: Option<f64>,
    pub frames_transferred: usize,
    /// Pattern name -> number of requests showing it
    pub patterns: BTreeMap<String, usize>,
}

pub fn compute_metrics(requests: &[HandoffRequest], bulk_threshold: usize) -> HandoffMetrics {
    let mut metrics = HandoffMetrics {
        total_requests: requests.len(),
        ..HandoffMetrics::default()
    };
    let mut durations: Vec<u64> = Vec::new();

    for request in requests {
        match request.status {
            HandoffStatus::Completed => {
                metrics.completed_requests += 1;
                if let Some(done) = request.completed_at {
                    durations.push(done.saturating_sub(request.created_at));
                }
            }
            HandoffStatus::Failed => metrics.failed_requests += 1,
            _ => metrics.pending_requests += 1,
        }
        metrics.frames_transferred += request.transferred_frames;

        for pattern in classify(request, bulk_threshold) {
            *metrics.patterns.entry(pattern.to_string()).or_default() += 1;
        }
    }

    if !durations.is_empty() {
        let total: u64 = durations.iter().sum();
        metrics.average_processing_time_ms = Some(total as f64 / durations.len() as f64);
    }
    metrics
}

fn classify(request: &HandoffRequest, bulk_threshold: usize) -> Vec<&'static str> {
    let total = request.frame_ids.len();
    let mut patterns = vec![match total {
        n if n > bulk_threshold => PATTERN_BULK_TRANSFER,
        1 => PATTERN_SINGLE_FRAME,
        _ => PATTERN_MULTI_FRAME,
    }];
    if request.status == HandoffStatus::Completed {
        patterns.push(if request.transferred_frames == total {
            PATTERN_COMPLETE_TRANSFER
        } else {
            PATTERN_PARTIAL_TRANSFER
        });
    }
    patterns
}
