//! Framestack: Persisted Context Stacks
//!
//! Hierarchical working memory for coding agents. Task frames nest into a tree
//! that stays acyclic and depth-bounded, carry append-only events and
//! prioritized anchors, and survive crashes. Users keep an individual stack and
//! share frames with their team through permissioned shared stacks, handoff
//! requests and merge sessions.

pub mod collab;
pub mod config;
pub mod error;
pub mod frame;
pub mod logging;
pub mod store;

pub use error::{ErrorCode, StackError, StorageError};
