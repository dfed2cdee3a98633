#![forbid(unsafe_code)]

//! Property tests for history invariants driven through the [`Executor`].
//!
//! Validates:
//! - N executes then N undos leave the undo stack empty and the redo stack
//!   holding all N in reverse execution order.
//! - Execute after undo clears the redo stack.
//! - Random execute/undo/redo sequences match a two-stack model.
//! - Memory budget eviction keeps usage within budget unless one entry remains.

use proptest::prelude::*;

use redraft_core::{
    CommandCategory, EffectCmd, EffectData, EngineConfig, Executor, HistoryConfig, StackKind,
};

// ============================================================================
// Strategy helpers
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Execute(usize),
    Undo,
    Redo,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..4096).prop_map(Op::Execute),
        2 => Just(Op::Undo),
        2 => Just(Op::Redo),
    ]
}

fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..=max_len)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Command whose undo data carries `blob_len` bytes.
fn blob_cmd(name: String, blob_len: usize) -> EffectCmd {
    EffectCmd::new(
        name,
        CommandCategory::Drawing,
        move |mut data: EffectData| async move {
            data.undo_data
                .insert("blob".into(), "x".repeat(blob_len).into());
            Ok(data)
        },
        |_| async { Ok(()) },
    )
}

fn executor_with(history: HistoryConfig) -> Executor {
    Executor::new(EngineConfig {
        history,
        ..EngineConfig::default()
    })
}

fn stack(executor: &Executor, kind: StackKind) -> Vec<String> {
    executor
        .history()
        .into_iter()
        .filter(|entry| entry.stack == kind)
        .map(|entry| entry.info.description)
        .collect()
}

// ============================================================================
// Invariant 1: undo everything moves everything to redo, reversed
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn undo_all_fills_redo_in_reverse(n in 1usize..30) {
        let rt = runtime();
        let executor = executor_with(HistoryConfig::unlimited());

        rt.block_on(async {
            for i in 0..n {
                assert!(executor.execute(blob_cmd(format!("c{i}"), 0)).await);
            }
            for _ in 0..n {
                assert!(executor.undo().await);
            }
        });

        prop_assert!(!executor.can_undo());
        // history() lists redo most recent first: the first command undone last.
        let expected: Vec<String> = (0..n).map(|i| format!("c{i}")).collect();
        prop_assert_eq!(stack(&executor, StackKind::Redo), expected);
        prop_assert!(!rt.block_on(executor.undo()));
    }
}

// ============================================================================
// Invariant 2: execute after undo clears redo
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn execute_after_undo_clears_redo(n in 1usize..20, undos in 1usize..20) {
        let rt = runtime();
        let executor = executor_with(HistoryConfig::unlimited());
        let undos = undos.min(n);

        rt.block_on(async {
            for i in 0..n {
                assert!(executor.execute(blob_cmd(format!("c{i}"), 0)).await);
            }
            for _ in 0..undos {
                assert!(executor.undo().await);
            }
            assert!(executor.execute(blob_cmd("fresh".into(), 0)).await);
        });

        prop_assert!(!executor.can_redo());
        prop_assert!(!rt.block_on(executor.redo()));
        prop_assert_eq!(executor.undo_description(), Some("fresh".to_string()));
        prop_assert_eq!(executor.statistics().undo_stack_size, n - undos + 1);
    }
}

// ============================================================================
// Invariant 3: random sequences match a two-stack model
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn random_ops_match_model(ops in ops_strategy(60)) {
        let rt = runtime();
        let executor = executor_with(HistoryConfig::unlimited());
        let mut undo_model: Vec<String> = Vec::new();
        let mut redo_model: Vec<String> = Vec::new();

        for (step, op) in ops.iter().enumerate() {
            match op {
                Op::Execute(len) => {
                    let name = format!("s{step}");
                    prop_assert!(rt.block_on(executor.execute(blob_cmd(name.clone(), *len))));
                    undo_model.push(name);
                    redo_model.clear();
                }
                Op::Undo => {
                    let ok = rt.block_on(executor.undo());
                    prop_assert_eq!(ok, !undo_model.is_empty());
                    if let Some(name) = undo_model.pop() {
                        redo_model.push(name);
                    }
                }
                Op::Redo => {
                    let ok = rt.block_on(executor.redo());
                    prop_assert_eq!(ok, !redo_model.is_empty());
                    if let Some(name) = redo_model.pop() {
                        undo_model.push(name);
                    }
                }
            }

            let mut expected_undo = undo_model.clone();
            expected_undo.reverse();
            let mut expected_redo = redo_model.clone();
            expected_redo.reverse();
            prop_assert_eq!(stack(&executor, StackKind::Undo), expected_undo);
            prop_assert_eq!(stack(&executor, StackKind::Redo), expected_redo);
        }
    }
}

// ============================================================================
// Invariant 4: memory budget
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn memory_stays_within_budget(
        sizes in prop::collection::vec(0usize..8192, 1..40),
        budget in 1024usize..32_768,
    ) {
        let rt = runtime();
        let executor = executor_with(HistoryConfig::new(usize::MAX, budget));

        for (i, len) in sizes.iter().enumerate() {
            let name = format!("c{i}");
            prop_assert!(rt.block_on(executor.execute(blob_cmd(name, *len))));
            let stats = executor.statistics();
            prop_assert!(stats.undo_stack_size >= 1);
            prop_assert!(
                stats.estimated_memory_bytes <= budget || stats.undo_stack_size == 1,
                "usage {} over budget {} with {} entries",
                stats.estimated_memory_bytes,
                budget,
                stats.undo_stack_size
            );
            // The newest command always survives.
            prop_assert_eq!(executor.undo_description(), Some(format!("c{i}")));
        }

        let stats = executor.statistics();
        prop_assert_eq!(
            stats.evicted_total as usize + stats.undo_stack_size,
            sizes.len()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn max_history_is_never_exceeded(n in 1usize..50, max in 1usize..10) {
        let rt = runtime();
        let executor = executor_with(HistoryConfig::new(max, 0));

        for i in 0..n {
            let name = format!("c{i}");
            prop_assert!(rt.block_on(executor.execute(blob_cmd(name, 16))));
            prop_assert!(executor.statistics().undo_stack_size <= max);
        }
        prop_assert_eq!(executor.statistics().undo_stack_size, n.min(max));
    }
}
