//! Low-level IR
//!
//! Three-address instructions with explicit memory operations, grouped
//! into basic blocks keyed by label. Calls to internal functions are
//! terminators (they end their block and name a continuation label);
//! external calls are plain instructions.
//!
//! Block and function maps are `BTreeMap`s so every traversal, the pretty
//! printer, and the JSON encoder are deterministic. The CFG stores no
//! predecessor links; adjacency is computed from terminators on demand via
//! [`Terminator::successors`].

use crate::ast::{Decl, StructDef};
use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Var(String),
    Const(i64),
}

impl Operand {
    pub fn var(name: impl Into<String>) -> Operand {
        Operand::Var(name.into())
    }

    pub fn as_var(&self) -> Option<&str> {
        match self {
            Operand::Var(name) => Some(name),
            Operand::Const(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(name) => write!(f, "{}", name),
            Operand::Const(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CmpOp::Eq => "eq",
            CmpOp::Neq => "neq",
            CmpOp::Lt => "lt",
            CmpOp::Lte => "lte",
            CmpOp::Gt => "gt",
            CmpOp::Gte => "gte",
        };
        write!(f, "{}", name)
    }
}

/// A non-terminator instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Inst {
    Copy {
        lhs: String,
        op: Operand,
    },
    Arith {
        lhs: String,
        aop: ArithOp,
        op1: Operand,
        op2: Operand,
    },
    Cmp {
        lhs: String,
        rop: CmpOp,
        op1: Operand,
        op2: Operand,
    },
    Alloc {
        lhs: String,
        num: Operand,
    },
    Load {
        lhs: String,
        src: String,
    },
    Store {
        dst: String,
        op: Operand,
    },
    Gep {
        lhs: String,
        src: String,
        idx: Operand,
    },
    Gfp {
        lhs: String,
        src: String,
        field: String,
    },
    CallExt {
        lhs: Option<String>,
        callee: String,
        args: Vec<Operand>,
    },
}

/// The single closing instruction of each basic block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Jump(String),
    Branch {
        cond: Operand,
        tt: String,
        ff: String,
    },
    Ret(Option<Operand>),
    CallDirect {
        lhs: Option<String>,
        callee: String,
        args: Vec<Operand>,
        next: String,
    },
    CallIndirect {
        lhs: Option<String>,
        callee: String,
        args: Vec<Operand>,
        next: String,
    },
}

impl Terminator {
    /// Labels this terminator can transfer control to.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Jump(target) => vec![target],
            Terminator::Branch { tt, ff, .. } => vec![tt, ff],
            Terminator::Ret(_) => vec![],
            Terminator::CallDirect { next, .. } | Terminator::CallIndirect { next, .. } => {
                vec![next]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub insts: Vec<Inst>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirFunction {
    pub name: String,
    pub params: Vec<Decl>,
    pub rettyp: Option<Type>,
    /// Declared locals in declaration order, then lowering temporaries in
    /// creation order. Codegen assigns stack slots from this order.
    pub locals: Vec<Decl>,
    pub body: BTreeMap<String, BasicBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirProgram {
    /// Data globals plus one pointer cell per non-main function (those
    /// carry `Ptr(Fn)` type and are emitted under a `_`-suffixed symbol).
    pub globals: Vec<Decl>,
    pub externs: Vec<Decl>,
    pub structs: Vec<StructDef>,
    pub functions: BTreeMap<String, LirFunction>,
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Operand]) -> fmt::Result {
    write!(f, "[")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    write!(f, "]")
}

struct OptVar<'a>(&'a Option<String>);

impl fmt::Display for OptVar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "_"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Copy { lhs, op } => write!(f, "Copy({}, {})", lhs, op),
            Inst::Arith { lhs, aop, op1, op2 } => {
                write!(f, "Arith({}, {}, {}, {})", lhs, aop, op1, op2)
            }
            Inst::Cmp { lhs, rop, op1, op2 } => {
                write!(f, "Cmp({}, {}, {}, {})", lhs, rop, op1, op2)
            }
            Inst::Alloc { lhs, num } => write!(f, "Alloc({}, {})", lhs, num),
            Inst::Load { lhs, src } => write!(f, "Load({}, {})", lhs, src),
            Inst::Store { dst, op } => write!(f, "Store({}, {})", dst, op),
            Inst::Gep { lhs, src, idx } => write!(f, "Gep({}, {}, {})", lhs, src, idx),
            Inst::Gfp { lhs, src, field } => write!(f, "Gfp({}, {}, {})", lhs, src, field),
            Inst::CallExt { lhs, callee, args } => {
                write!(f, "CallExt({}, {}, ", OptVar(lhs), callee)?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "Jump({})", target),
            Terminator::Branch { cond, tt, ff } => write!(f, "Branch({}, {}, {})", cond, tt, ff),
            Terminator::Ret(None) => write!(f, "Ret(_)"),
            Terminator::Ret(Some(op)) => write!(f, "Ret({})", op),
            Terminator::CallDirect {
                lhs,
                callee,
                args,
                next,
            } => {
                write!(f, "CallDirect({}, {}, ", OptVar(lhs), callee)?;
                write_args(f, args)?;
                write!(f, ", {})", next)
            }
            Terminator::CallIndirect {
                lhs,
                callee,
                args,
                next,
            } => {
                write!(f, "CallIndirect({}, {}, ", OptVar(lhs), callee)?;
                write_args(f, args)?;
                write!(f, ", {})", next)
            }
        }
    }
}

impl LirFunction {
    /// Pretty-print one function in the stage output format: header,
    /// locals sorted by name, blocks sorted by label.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Function {}(", self.name));
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("{} : {}", param.name, param.typ.tagged()));
        }
        match &self.rettyp {
            Some(t) => out.push_str(&format!(") -> {} {{\n", t.tagged())),
            None => out.push_str(") -> _ {\n"),
        }
        out.push_str("  Locals\n");
        let mut locals: Vec<&Decl> = self.locals.iter().collect();
        locals.sort_by(|a, b| a.name.cmp(&b.name));
        for decl in locals {
            out.push_str(&format!("    {} : {}\n", decl.name, decl.typ.tagged()));
        }
        for (label, block) in &self.body {
            out.push('\n');
            out.push_str(&format!("  {}:\n", label));
            for inst in &block.insts {
                out.push_str(&format!("    {}\n", inst));
            }
            out.push_str(&format!("    {}\n", block.term));
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for LirProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut structs: Vec<&StructDef> = self.structs.iter().collect();
        structs.sort_by(|a, b| a.name.cmp(&b.name));
        for s in structs {
            writeln!(f, "Struct {}", s.name)?;
            for field in &s.fields {
                writeln!(f, "  {} : {}", field.name, field.typ.tagged())?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Externs")?;
        let mut externs: Vec<&Decl> = self.externs.iter().collect();
        externs.sort_by(|a, b| a.name.cmp(&b.name));
        for ext in externs {
            writeln!(f, "  {} : {}", ext.name, ext.typ.tagged())?;
        }
        writeln!(f)?;

        writeln!(f, "Globals")?;
        let mut globals: Vec<&Decl> = self.globals.iter().collect();
        globals.sort_by(|a, b| a.name.cmp(&b.name));
        for global in globals {
            writeln!(f, "  {} : {}", global.name, global.typ.tagged())?;
        }
        writeln!(f)?;

        for (i, func) in self.functions.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func.render())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inst_display() {
        let inst = Inst::Arith {
            lhs: "_t1".into(),
            aop: ArithOp::Add,
            op1: Operand::var("x"),
            op2: Operand::Const(3),
        };
        assert_eq!(inst.to_string(), "Arith(_t1, add, x, 3)");
        let cmp = Inst::Cmp {
            lhs: "_t2".into(),
            rop: CmpOp::Lte,
            op1: Operand::Const(0),
            op2: Operand::var("n"),
        };
        assert_eq!(cmp.to_string(), "Cmp(_t2, lte, 0, n)");
        let call = Inst::CallExt {
            lhs: None,
            callee: "ext".into(),
            args: vec![Operand::Const(1), Operand::var("x")],
        };
        assert_eq!(call.to_string(), "CallExt(_, ext, [1, x])");
    }

    #[test]
    fn test_terminator_display_and_successors() {
        let term = Terminator::Branch {
            cond: Operand::var("_t1"),
            tt: "lbl1".into(),
            ff: "lbl2".into(),
        };
        assert_eq!(term.to_string(), "Branch(_t1, lbl1, lbl2)");
        assert_eq!(term.successors(), vec!["lbl1", "lbl2"]);
        assert_eq!(Terminator::Ret(None).to_string(), "Ret(_)");
        assert!(Terminator::Ret(Some(Operand::Const(3)))
            .successors()
            .is_empty());
        let call = Terminator::CallDirect {
            lhs: Some("_t3".into()),
            callee: "f".into(),
            args: vec![],
            next: "lbl4".into(),
        };
        assert_eq!(call.to_string(), "CallDirect(_t3, f, [], lbl4)");
        assert_eq!(call.successors(), vec!["lbl4"]);
    }

    #[test]
    fn test_json_shapes() {
        let inst = Inst::Arith {
            lhs: "_t1".into(),
            aop: ArithOp::Mul,
            op1: Operand::var("y"),
            op2: Operand::Const(0),
        };
        assert_eq!(
            serde_json::to_string(&inst).unwrap(),
            r#"{"Arith":{"lhs":"_t1","aop":"mul","op1":{"Var":"y"},"op2":{"Const":0}}}"#
        );
        let term = Terminator::Ret(Some(Operand::Const(3)));
        assert_eq!(
            serde_json::to_string(&term).unwrap(),
            r#"{"Ret":{"Const":3}}"#
        );
    }

    #[test]
    fn test_function_render_sorts_locals_and_labels() {
        let mut body = BTreeMap::new();
        body.insert(
            "lbl1".to_string(),
            BasicBlock {
                insts: vec![],
                term: Terminator::Ret(Some(Operand::var("x"))),
            },
        );
        body.insert(
            "entry".to_string(),
            BasicBlock {
                insts: vec![Inst::Copy {
                    lhs: "x".into(),
                    op: Operand::Const(1),
                }],
                term: Terminator::Jump("lbl1".into()),
            },
        );
        let func = LirFunction {
            name: "f".into(),
            params: vec![Decl::new("p", Type::Int)],
            rettyp: Some(Type::Int),
            locals: vec![Decl::new("x", Type::Int), Decl::new("_t1", Type::Int)],
            body,
        };
        let rendered = func.render();
        let expected = "Function f(p : Int) -> Int {\n  Locals\n    _t1 : Int\n    x : Int\n\n  entry:\n    Copy(x, 1)\n    Jump(lbl1)\n\n  lbl1:\n    Ret(x)\n}\n";
        assert_eq!(rendered, expected);
    }
}
