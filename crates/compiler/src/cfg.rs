//! CFG construction
//!
//! Cuts the lowerer's flat instruction buffer into basic blocks and drops
//! blocks unreachable from `entry`. Straight-line instructions that follow
//! a terminator without an intervening label can never execute and are
//! discarded during partitioning, which also keeps the
//! no-instruction-after-terminator invariant structural.

use crate::lir::{BasicBlock, Inst, Terminator};
use std::collections::{BTreeMap, HashSet};

/// One entry of the flat lowering buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatItem {
    Label(String),
    Inst(Inst),
    Term(Terminator),
}

/// Partition a flat buffer into labeled blocks and prune unreachable ones.
///
/// The buffer must start with a `Label("entry")` and every labeled region
/// must be closed by a terminator before the next label or end of buffer.
pub fn build(items: Vec<FlatItem>) -> Result<BTreeMap<String, BasicBlock>, String> {
    let mut blocks: BTreeMap<String, BasicBlock> = BTreeMap::new();
    let mut current: Option<(String, Vec<Inst>)> = None;

    for item in items {
        match item {
            FlatItem::Label(label) => {
                if let Some((open, _)) = &current {
                    return Err(format!("block {} is not terminated", open));
                }
                if blocks.contains_key(&label) {
                    return Err(format!("duplicate label {}", label));
                }
                current = Some((label, Vec::new()));
            }
            FlatItem::Inst(inst) => {
                // No open block means this instruction trails a terminator
                // with no label: dead code, dropped.
                if let Some((_, insts)) = &mut current {
                    insts.push(inst);
                }
            }
            FlatItem::Term(term) => {
                if let Some((label, insts)) = current.take() {
                    blocks.insert(label, BasicBlock { insts, term });
                }
            }
        }
    }
    if let Some((open, _)) = current {
        return Err(format!("block {} is not terminated", open));
    }

    if !blocks.contains_key("entry") {
        return Err("function has no entry block".to_string());
    }

    // Worklist reachability from entry.
    let mut reachable: HashSet<String> = HashSet::new();
    let mut worklist = vec!["entry".to_string()];
    while let Some(label) = worklist.pop() {
        if !reachable.insert(label.clone()) {
            continue;
        }
        let block = blocks
            .get(&label)
            .ok_or_else(|| format!("terminator references unknown label {}", label))?;
        for succ in block.term.successors() {
            if !reachable.contains(succ) {
                worklist.push(succ.to_string());
            }
        }
    }
    blocks.retain(|label, _| reachable.contains(label));

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Operand;

    fn label(l: &str) -> FlatItem {
        FlatItem::Label(l.to_string())
    }

    fn jump(l: &str) -> FlatItem {
        FlatItem::Term(Terminator::Jump(l.to_string()))
    }

    fn ret() -> FlatItem {
        FlatItem::Term(Terminator::Ret(None))
    }

    fn copy(lhs: &str, n: i64) -> FlatItem {
        FlatItem::Inst(Inst::Copy {
            lhs: lhs.to_string(),
            op: Operand::Const(n),
        })
    }

    #[test]
    fn test_build_partitions_on_labels_and_terminators() {
        let blocks = build(vec![
            label("entry"),
            copy("x", 1),
            jump("lbl1"),
            label("lbl1"),
            copy("x", 2),
            ret(),
        ])
        .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks["entry"].insts.len(), 1);
        assert_eq!(blocks["entry"].term, Terminator::Jump("lbl1".into()));
        assert_eq!(blocks["lbl1"].insts.len(), 1);
    }

    #[test]
    fn test_unreachable_blocks_are_dropped() {
        let blocks = build(vec![
            label("entry"),
            ret(),
            label("lbl1"),
            copy("x", 1),
            jump("lbl1"),
        ])
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks.contains_key("entry"));
    }

    #[test]
    fn test_loop_back_edges_stay_reachable() {
        let blocks = build(vec![
            label("entry"),
            jump("lbl1"),
            label("lbl1"),
            FlatItem::Term(Terminator::Branch {
                cond: Operand::var("g"),
                tt: "lbl2".into(),
                ff: "lbl3".into(),
            }),
            label("lbl2"),
            jump("lbl1"),
            label("lbl3"),
            ret(),
        ])
        .unwrap();
        assert_eq!(blocks.len(), 4);
    }

    #[test]
    fn test_dead_instructions_after_terminator_are_dropped() {
        let blocks = build(vec![
            label("entry"),
            FlatItem::Term(Terminator::Ret(Some(Operand::Const(3)))),
            copy("x", 9),
            ret(),
        ])
        .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks["entry"].insts.is_empty());
        assert_eq!(
            blocks["entry"].term,
            Terminator::Ret(Some(Operand::Const(3)))
        );
    }

    #[test]
    fn test_missing_entry_is_an_error() {
        let err = build(vec![label("lbl1"), ret()]).unwrap_err();
        assert_eq!(err, "function has no entry block");
    }

    #[test]
    fn test_unterminated_block_is_an_error() {
        let err = build(vec![label("entry"), copy("x", 1), label("lbl1"), ret()]).unwrap_err();
        assert_eq!(err, "block entry is not terminated");
    }

    #[test]
    fn test_branch_to_unknown_label_is_an_error() {
        let err = build(vec![label("entry"), jump("nowhere")]).unwrap_err();
        assert_eq!(err, "terminator references unknown label nowhere");
    }
}
