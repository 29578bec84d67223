//! Acyclicity and depth invariants under arbitrary trees and operation sequences

use framestack::frame::{
    CreateFrameOptions, FrameManager, FrameManagerOptions, FrameStore, FrameType,
    HierarchyIndex, LifecycleHooks,
};
use framestack::ErrorCode;
use proptest::prelude::*;
use std::collections::HashMap;

/// Parent of node `i` is drawn from `0..i`, so the input is always a forest
fn forest() -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec((any::<bool>(), any::<usize>()), 1..40).prop_map(|picks| {
        picks
            .into_iter()
            .enumerate()
            .map(|(i, (linked, n))| if linked && i > 0 { Some(n % i) } else { None })
            .collect()
    })
}

fn index_of(parents: &[Option<usize>]) -> HierarchyIndex {
    let mut depths = vec![0usize; parents.len()];
    let mut index = HierarchyIndex::default();
    for (i, parent) in parents.iter().enumerate() {
        if let Some(p) = parent {
            depths[i] = depths[*p] + 1;
        }
        index.insert(&format!("f{i}"), parent.map(|p| format!("f{p}")), depths[i]);
    }
    index
}

fn is_ancestor_or_self(parents: &[Option<usize>], ancestor: usize, mut node: usize) -> bool {
    loop {
        if node == ancestor {
            return true;
        }
        match parents[node] {
            Some(p) => node = p,
            None => return false,
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Create,
    CloseTop,
    Close(usize),
    Reparent(usize, Option<usize>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        1 => Just(Op::CloseTop),
        1 => any::<usize>().prop_map(Op::Close),
        1 => (any::<usize>(), any::<Option<usize>>()).prop_map(|(f, p)| Op::Reparent(f, p)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn cycle_detected_exactly_when_parent_is_in_subtree(
        parents in forest(),
        child in any::<usize>(),
        candidate in any::<usize>(),
    ) {
        let n = parents.len();
        let (child, candidate) = (child % n, candidate % n);
        let index = index_of(&parents);

        let result = index.detect_cycle(&format!("f{child}"), &format!("f{candidate}"), n);
        if is_ancestor_or_self(&parents, child, candidate) {
            let err = result.unwrap_err();
            prop_assert_eq!(err.code(), ErrorCode::FrameCycleDetected);
        } else {
            prop_assert!(result.is_ok());
        }
    }

    #[test]
    fn forest_validates_and_descendants_are_deeper(parents in forest(), root in any::<usize>()) {
        let index = index_of(&parents);
        prop_assert!(index.validate(parents.len()).is_valid);

        let root = root % parents.len();
        let root_depth = index.depth_of(&format!("f{root}")).unwrap();
        for id in index.descendants(&format!("f{root}")) {
            prop_assert!(index.depth_of(&id).unwrap() > root_depth);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn manager_keeps_hierarchy_consistent(ops in prop::collection::vec(op(), 1..30)) {
        let store = FrameStore::temporary().unwrap();
        let options = FrameManagerOptions::new("proj", "run-1")
            .with_max_stack_depth(6)
            .with_max_frame_depth(4);
        let mut manager =
            FrameManager::open(store.clone(), options, LifecycleHooks::new()).unwrap();
        let mut created: Vec<String> = Vec::new();

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Create => {
                    let options = CreateFrameOptions::new(FrameType::Task, format!("f{step}"));
                    match manager.create_frame(options) {
                        Ok(id) => created.push(id),
                        Err(err) => prop_assert_eq!(err.code(), ErrorCode::FrameStackOverflow),
                    }
                }
                Op::CloseTop => {
                    if manager.get_stack_depth() > 0 {
                        manager.close_frame(None).unwrap();
                    }
                }
                Op::Close(i) if !created.is_empty() => {
                    let id = created[i % created.len()].clone();
                    manager.close_frame(Some(&id)).unwrap();
                }
                Op::Reparent(i, parent) if !created.is_empty() => {
                    let id = created[i % created.len()].clone();
                    let parent = parent.map(|p| created[p % created.len()].clone());
                    if let Err(err) = manager.update_parent_frame(&id, parent.as_deref()) {
                        prop_assert!(matches!(
                            err.code(),
                            ErrorCode::FrameCycleDetected | ErrorCode::FrameStackOverflow
                        ));
                    }
                }
                _ => {}
            }
            prop_assert!(manager.get_stack_depth() <= 6);
        }

        prop_assert!(manager.validate_frame_hierarchy().unwrap().is_valid);
        let frames: HashMap<String, _> = store
            .list_frames()
            .unwrap()
            .into_iter()
            .map(|f| (f.frame_id.clone(), f))
            .collect();
        for frame in frames.values() {
            prop_assert!(frame.depth <= 4);
            match &frame.parent_frame_id {
                Some(parent) => prop_assert_eq!(frame.depth, frames[parent].depth + 1),
                None => prop_assert_eq!(frame.depth, 0),
            }
        }
    }
}
