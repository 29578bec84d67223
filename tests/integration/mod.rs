//! Integration tests for frame stacks and the collaboration layer

mod config;
mod dual_stack;
mod frame_manager;
mod handoff;
mod merge;
mod recovery;
mod test_utils;
