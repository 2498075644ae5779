//! Intraprocedural constant propagation
//!
//! Worklist dataflow over the flat lattice Bottom < Const(k) < Top,
//! followed by a rewrite pass that substitutes operands known constant,
//! folds fully-constant `Arith`/`Cmp` into `Copy`, and applies the
//! algebraic identities `x+0`, `x-0`, `x*1`, `x/1`, `x*0`, `0/y`.
//! Division with a zero (or possibly-zero) divisor is never folded; the
//! generated `idivq` keeps its fault semantics.
//!
//! The entry store maps parameters to Top and locals to Const(0) - the
//! code generator zero-initializes every slot. Values produced from
//! memory or calls (`Load`, `Alloc`, `Gep`, `Gfp`, call results) go to
//! Top. The pass never edits the CFG, which makes a second run a fixpoint
//! of the first: the stage is idempotent.

use crate::lir::{ArithOp, BasicBlock, CmpOp, Inst, LirFunction, LirProgram, Operand, Terminator};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Abstract value of one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    /// Unvisited / no information.
    Bottom,
    Const(i64),
    /// More than one runtime value possible.
    Top,
}

impl Value {
    fn join(self, other: Value) -> Value {
        match (self, other) {
            (Value::Bottom, v) | (v, Value::Bottom) => v,
            (Value::Top, _) | (_, Value::Top) => Value::Top,
            (Value::Const(a), Value::Const(b)) if a == b => Value::Const(a),
            _ => Value::Top,
        }
    }
}

type Store = BTreeMap<String, Value>;

fn join_stores(a: &Store, b: &Store) -> Store {
    let mut joined = Store::new();
    for (name, value) in a {
        let other = b.get(name).copied().unwrap_or(Value::Bottom);
        joined.insert(name.clone(), value.join(other));
    }
    joined
}

/// Run the pass over the conventional single analysis target, the
/// function named `test`.
pub fn optimize(program: &LirProgram) -> Result<LirProgram, String> {
    let mut optimized = program.clone();
    let func = optimized
        .functions
        .get_mut("test")
        .ok_or_else(|| "no function named 'test' to optimize".to_string())?;
    *func = constant_propagation(func);
    Ok(optimized)
}

/// Constant propagation over one function.
pub fn constant_propagation(func: &LirFunction) -> LirFunction {
    let mut entry_store = Store::new();
    let mut bottom_store = Store::new();
    for param in &func.params {
        entry_store.insert(param.name.clone(), Value::Top);
        bottom_store.insert(param.name.clone(), Value::Bottom);
    }
    for local in &func.locals {
        entry_store.insert(local.name.clone(), Value::Const(0));
        bottom_store.insert(local.name.clone(), Value::Bottom);
    }

    // Predecessor map, computed once from the terminators.
    let mut preds: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (label, block) in &func.body {
        for succ in block.term.successors() {
            preds.entry(succ).or_default().push(label);
        }
    }

    let mut ins: HashMap<String, Store> = HashMap::new();
    let mut outs: HashMap<String, Store> = HashMap::new();
    for label in func.body.keys() {
        outs.insert(label.clone(), bottom_store.clone());
    }

    let mut worklist: VecDeque<String> = VecDeque::new();
    worklist.push_back("entry".to_string());
    while let Some(label) = worklist.pop_front() {
        let Some(block) = func.body.get(&label) else {
            continue;
        };
        let mut in_store = if label == "entry" {
            entry_store.clone()
        } else {
            bottom_store.clone()
        };
        for pred in preds.get(label.as_str()).into_iter().flatten() {
            in_store = join_stores(&in_store, &outs[*pred]);
        }
        ins.insert(label.clone(), in_store.clone());

        let mut store = in_store;
        for inst in &block.insts {
            transfer(&mut store, inst);
        }
        transfer_term(&mut store, &block.term);

        if outs[&label] != store {
            outs.insert(label.clone(), store);
            for succ in block.term.successors() {
                worklist.push_back(succ.to_string());
            }
        }
    }

    // Rewrite each block against the fixpoint IN store.
    let mut body = BTreeMap::new();
    for (label, block) in &func.body {
        let mut store = ins
            .get(label)
            .cloned()
            .unwrap_or_else(|| bottom_store.clone());
        let mut insts = Vec::with_capacity(block.insts.len());
        for inst in &block.insts {
            insts.push(rewrite(inst, &store));
            transfer(&mut store, inst);
        }
        let term = rewrite_term(&block.term, &store);
        body.insert(label.clone(), BasicBlock { insts, term });
    }

    LirFunction {
        name: func.name.clone(),
        params: func.params.clone(),
        rettyp: func.rettyp.clone(),
        locals: func.locals.clone(),
        body,
    }
}

fn eval(store: &Store, op: &Operand) -> Value {
    match op {
        Operand::Const(n) => Value::Const(*n),
        Operand::Var(name) => store.get(name).copied().unwrap_or(Value::Bottom),
    }
}

fn arith_abstract(aop: ArithOp, a: Value, b: Value) -> Value {
    use Value::{Bottom, Const, Top};
    if a == Bottom || b == Bottom {
        return Bottom;
    }
    match aop {
        ArithOp::Mul if a == Const(0) || b == Const(0) => Const(0),
        ArithOp::Div if b == Const(0) => Bottom,
        ArithOp::Div if a == Const(0) => Const(0),
        _ => match (a, b) {
            (Const(x), Const(y)) => Const(match aop {
                ArithOp::Add => x.wrapping_add(y),
                ArithOp::Sub => x.wrapping_sub(y),
                ArithOp::Mul => x.wrapping_mul(y),
                ArithOp::Div => x.wrapping_div(y),
            }),
            _ => Top,
        },
    }
}

fn cmp_fold(rop: CmpOp, x: i64, y: i64) -> i64 {
    let result = match rop {
        CmpOp::Eq => x == y,
        CmpOp::Neq => x != y,
        CmpOp::Lt => x < y,
        CmpOp::Lte => x <= y,
        CmpOp::Gt => x > y,
        CmpOp::Gte => x >= y,
    };
    result as i64
}

fn transfer(store: &mut Store, inst: &Inst) {
    match inst {
        Inst::Copy { lhs, op } => {
            let value = eval(store, op);
            store.insert(lhs.clone(), value);
        }
        Inst::Arith { lhs, aop, op1, op2 } => {
            let value = arith_abstract(*aop, eval(store, op1), eval(store, op2));
            store.insert(lhs.clone(), value);
        }
        Inst::Cmp { lhs, rop, op1, op2 } => {
            let value = match (eval(store, op1), eval(store, op2)) {
                (Value::Bottom, _) | (_, Value::Bottom) => Value::Bottom,
                (Value::Const(x), Value::Const(y)) => Value::Const(cmp_fold(*rop, x, y)),
                _ => Value::Top,
            };
            store.insert(lhs.clone(), value);
        }
        // Values materialized from memory or the allocator are unknown.
        Inst::Alloc { lhs, .. } | Inst::Load { lhs, .. } | Inst::Gep { lhs, .. }
        | Inst::Gfp { lhs, .. } => {
            store.insert(lhs.clone(), Value::Top);
        }
        Inst::CallExt { lhs, .. } => {
            if let Some(lhs) = lhs {
                store.insert(lhs.clone(), Value::Top);
            }
        }
        Inst::Store { .. } => {}
    }
}

fn transfer_term(store: &mut Store, term: &Terminator) {
    match term {
        Terminator::CallDirect { lhs: Some(lhs), .. }
        | Terminator::CallIndirect { lhs: Some(lhs), .. } => {
            store.insert(lhs.clone(), Value::Top);
        }
        _ => {}
    }
}

/// Substitute an operand by its constant value when one is known.
fn subst(store: &Store, op: &Operand) -> Operand {
    match eval(store, op) {
        Value::Const(n) => Operand::Const(n),
        _ => op.clone(),
    }
}

fn rewrite(inst: &Inst, store: &Store) -> Inst {
    match inst {
        Inst::Copy { lhs, op } => Inst::Copy {
            lhs: lhs.clone(),
            op: subst(store, op),
        },
        Inst::Arith { lhs, aop, op1, op2 } => {
            let op1 = subst(store, op1);
            let op2 = subst(store, op2);
            rewrite_arith(lhs, *aop, op1, op2)
        }
        Inst::Cmp { lhs, rop, op1, op2 } => {
            let op1 = subst(store, op1);
            let op2 = subst(store, op2);
            if let (Operand::Const(x), Operand::Const(y)) = (&op1, &op2) {
                Inst::Copy {
                    lhs: lhs.clone(),
                    op: Operand::Const(cmp_fold(*rop, *x, *y)),
                }
            } else {
                Inst::Cmp {
                    lhs: lhs.clone(),
                    rop: *rop,
                    op1,
                    op2,
                }
            }
        }
        Inst::Alloc { lhs, num } => Inst::Alloc {
            lhs: lhs.clone(),
            num: subst(store, num),
        },
        Inst::Store { dst, op } => Inst::Store {
            dst: dst.clone(),
            op: subst(store, op),
        },
        Inst::Gep { lhs, src, idx } => Inst::Gep {
            lhs: lhs.clone(),
            src: src.clone(),
            idx: subst(store, idx),
        },
        Inst::CallExt { lhs, callee, args } => Inst::CallExt {
            lhs: lhs.clone(),
            callee: callee.clone(),
            args: args.iter().map(|arg| subst(store, arg)).collect(),
        },
        other @ (Inst::Load { .. } | Inst::Gfp { .. }) => other.clone(),
    }
}

fn rewrite_arith(lhs: &str, aop: ArithOp, op1: Operand, op2: Operand) -> Inst {
    let copy = |op: Operand| Inst::Copy {
        lhs: lhs.to_string(),
        op,
    };
    let keep = |op1: Operand, op2: Operand| Inst::Arith {
        lhs: lhs.to_string(),
        aop,
        op1,
        op2,
    };
    match aop {
        ArithOp::Add => match (&op1, &op2) {
            (Operand::Const(0), _) => copy(op2),
            (_, Operand::Const(0)) => copy(op1),
            (Operand::Const(x), Operand::Const(y)) => copy(Operand::Const(x.wrapping_add(*y))),
            _ => keep(op1, op2),
        },
        ArithOp::Sub => match (&op1, &op2) {
            (_, Operand::Const(0)) => copy(op1),
            (Operand::Const(x), Operand::Const(y)) => copy(Operand::Const(x.wrapping_sub(*y))),
            _ => keep(op1, op2),
        },
        ArithOp::Mul => match (&op1, &op2) {
            (Operand::Const(0), _) | (_, Operand::Const(0)) => copy(Operand::Const(0)),
            (Operand::Const(1), _) => copy(op2),
            (_, Operand::Const(1)) => copy(op1),
            (Operand::Const(x), Operand::Const(y)) => copy(Operand::Const(x.wrapping_mul(*y))),
            _ => keep(op1, op2),
        },
        ArithOp::Div => match (&op1, &op2) {
            // a division that can fault at runtime is left alone
            (_, Operand::Const(0)) => keep(op1, op2),
            (_, Operand::Const(1)) => copy(op1),
            (Operand::Const(0), Operand::Const(_)) => copy(Operand::Const(0)),
            (Operand::Const(x), Operand::Const(y)) => copy(Operand::Const(x.wrapping_div(*y))),
            _ => keep(op1, op2),
        },
    }
}

fn rewrite_term(term: &Terminator, store: &Store) -> Terminator {
    match term {
        Terminator::Jump(target) => Terminator::Jump(target.clone()),
        Terminator::Branch { cond, tt, ff } => Terminator::Branch {
            cond: subst(store, cond),
            tt: tt.clone(),
            ff: ff.clone(),
        },
        Terminator::Ret(op) => Terminator::Ret(op.as_ref().map(|op| subst(store, op))),
        Terminator::CallDirect {
            lhs,
            callee,
            args,
            next,
        } => Terminator::CallDirect {
            lhs: lhs.clone(),
            callee: callee.clone(),
            args: args.iter().map(|arg| subst(store, arg)).collect(),
            next: next.clone(),
        },
        Terminator::CallIndirect {
            lhs,
            callee,
            args,
            next,
        } => Terminator::CallIndirect {
            lhs: lhs.clone(),
            callee: callee.clone(),
            args: args.iter().map(|arg| subst(store, arg)).collect(),
            next: next.clone(),
        },
    }
}
