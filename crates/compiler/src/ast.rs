//! Abstract syntax tree for Cflat
//!
//! Plain owned tree types: every node is owned by its parent, there is no
//! sharing and no back-edges. The serde derives define the AST half of the
//! JSON interchange format consumed by the `lower` stage; the `Display`
//! impls produce the pretty-printed form the `parse` stage emits.

use crate::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `name : type` declaration (global, extern, parameter, local, field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decl {
    pub name: String,
    pub typ: Type,
}

impl Decl {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Decl {
            name: name.into(),
            typ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Decl>,
    /// `None` renders as `_`: the function returns no value.
    pub rettyp: Option<Type>,
    /// Declared locals with optional initializer expressions, in
    /// declaration order.
    pub locals: Vec<(Decl, Option<Exp>)>,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub globals: Vec<Decl>,
    pub structs: Vec<StructDef>,
    pub externs: Vec<Decl>,
    pub functions: Vec<Function>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Deref,
    Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Equal,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Exp {
    Num(i64),
    Id(String),
    Nil,
    UnOp {
        op: UnaryOp,
        operand: Box<Exp>,
    },
    BinOp {
        op: BinaryOp,
        left: Box<Exp>,
        right: Box<Exp>,
    },
    Call {
        callee: Box<Exp>,
        args: Vec<Exp>,
    },
    ArrayAccess {
        ptr: Box<Exp>,
        index: Box<Exp>,
    },
    FieldAccess {
        ptr: Box<Exp>,
        field: String,
    },
    New {
        typ: Type,
        amount: Box<Exp>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lval {
    Id(String),
    Deref(Box<Lval>),
    ArrayAccess { ptr: Box<Lval>, index: Box<Exp> },
    FieldAccess { ptr: Box<Lval>, field: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rhs {
    Exp(Exp),
    New { typ: Type, amount: Exp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Assign {
        lhs: Lval,
        rhs: Rhs,
    },
    If {
        guard: Exp,
        tt: Vec<Stmt>,
        ff: Vec<Stmt>,
    },
    While {
        guard: Exp,
        body: Vec<Stmt>,
    },
    Call {
        callee: Lval,
        args: Vec<Exp>,
    },
    Return(Option<Exp>),
    Break,
    Continue,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::Div => "Div",
            BinaryOp::Equal => "Equal",
            BinaryOp::NotEq => "NotEq",
            BinaryOp::Lt => "Lt",
            BinaryOp::Lte => "Lte",
            BinaryOp::Gt => "Gt",
            BinaryOp::Gte => "Gte",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Decl({}, {})", self.name, self.typ.tagged())
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::Num(n) => write!(f, "Num({})", n),
            Exp::Id(name) => write!(f, "Id({})", name),
            Exp::Nil => write!(f, "Nil"),
            Exp::UnOp { op, operand } => {
                let tag = match op {
                    UnaryOp::Neg => "Neg",
                    UnaryOp::Deref => "Deref",
                    UnaryOp::Addr => "Addr",
                };
                write!(f, "{}({})", tag, operand)
            }
            Exp::BinOp { op, left, right } => {
                writeln!(f, "BinOp(")?;
                writeln!(f, "  op = {},", op)?;
                writeln!(f, "  left = {},", left)?;
                writeln!(f, "  right = {}", right)?;
                write!(f, ")")
            }
            Exp::ArrayAccess { ptr, index } => {
                writeln!(f, "ArrayAccess(")?;
                writeln!(f, "  ptr = {},", ptr)?;
                writeln!(f, "  index = {}", index)?;
                write!(f, ")")
            }
            Exp::FieldAccess { ptr, field } => {
                writeln!(f, "FieldAccess(")?;
                writeln!(f, "  ptr = {},", ptr)?;
                writeln!(f, "  field = {}", field)?;
                write!(f, ")")
            }
            Exp::Call { callee, args } => {
                writeln!(f, "Call(")?;
                writeln!(f, "  callee = {},", callee)?;
                write!(f, "  args = [")?;
                write_list(f, args)?;
                writeln!(f, "]")?;
                write!(f, ")")
            }
            Exp::New { typ, amount } => write!(f, "New({}, {})", typ.tagged(), amount),
        }
    }
}

impl fmt::Display for Lval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lval::Id(name) => write!(f, "Id({})", name),
            Lval::Deref(inner) => write!(f, "Deref({})", inner),
            Lval::ArrayAccess { ptr, index } => {
                writeln!(f, "ArrayAccess(")?;
                writeln!(f, "  ptr = {},", ptr)?;
                writeln!(f, "  index = {}", index)?;
                write!(f, ")")
            }
            Lval::FieldAccess { ptr, field } => {
                writeln!(f, "FieldAccess(")?;
                writeln!(f, "  ptr = {},", ptr)?;
                writeln!(f, "  field = {}", field)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rhs::Exp(exp) => write!(f, "{}", exp),
            Rhs::New { typ, amount } => write!(f, "New({}, {})", typ.tagged(), amount),
        }
    }
}

fn write_stmt_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt]) -> fmt::Result {
    for (i, stmt) in stmts.iter().enumerate() {
        write!(f, "    {}", stmt)?;
        if i + 1 < stmts.len() {
            writeln!(f, ",")?;
        }
    }
    Ok(())
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Break => write!(f, "Break"),
            Stmt::Continue => write!(f, "Continue"),
            Stmt::Return(None) => write!(f, "Return(_)"),
            Stmt::Return(Some(exp)) => {
                writeln!(f, "Return(")?;
                writeln!(f, "  {}", exp)?;
                write!(f, ")")
            }
            Stmt::Assign { lhs, rhs } => {
                writeln!(f, "Assign(")?;
                writeln!(f, "  lhs = {},", lhs)?;
                writeln!(f, "  rhs = {}", rhs)?;
                write!(f, ")")
            }
            Stmt::Call { callee, args } => {
                writeln!(f, "Call(")?;
                writeln!(f, "  callee = {},", callee)?;
                write!(f, "  args = [")?;
                write_list(f, args)?;
                writeln!(f, "]")?;
                write!(f, ")")
            }
            Stmt::If { guard, tt, ff } => {
                writeln!(f, "If(")?;
                writeln!(f, "  guard = {},", guard)?;
                writeln!(f, "  tt = [")?;
                write_stmt_block(f, tt)?;
                writeln!(f)?;
                writeln!(f, "  ],")?;
                writeln!(f, "  ff = [")?;
                write_stmt_block(f, ff)?;
                writeln!(f)?;
                writeln!(f, "  ]")?;
                write!(f, ")")
            }
            Stmt::While { guard, body } => {
                writeln!(f, "While(")?;
                writeln!(f, "  guard = {},", guard)?;
                writeln!(f, "  body = [")?;
                write_stmt_block(f, body)?;
                writeln!(f)?;
                writeln!(f, "  ]")?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for StructDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Struct(")?;
        writeln!(f, "  name = {},", self.name)?;
        write!(f, "  fields = [")?;
        write_list(f, &self.fields)?;
        writeln!(f, "]")?;
        write!(f, ")")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Function(")?;
        writeln!(f, "  name = {},", self.name)?;
        write!(f, "  params = [")?;
        write_list(f, &self.params)?;
        writeln!(f, "],")?;
        match &self.rettyp {
            Some(t) => writeln!(f, "  rettyp = {},", t.tagged())?,
            None => writeln!(f, "  rettyp = _,")?,
        }
        writeln!(f, "  locals = [")?;
        for (i, (decl, init)) in self.locals.iter().enumerate() {
            write!(f, "    ({}, ", decl)?;
            match init {
                Some(exp) => write!(f, "{})", exp)?,
                None => write!(f, "_)")?,
            }
            if i + 1 < self.locals.len() {
                writeln!(f, ",")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "  ],")?;
        writeln!(f, "  stmts = [")?;
        write_stmt_block(f, &self.stmts)?;
        writeln!(f)?;
        writeln!(f, "  ]")?;
        write!(f, ")")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Program(")?;
        write!(f, "  globals = [")?;
        write_list(f, &self.globals)?;
        writeln!(f, "],")?;
        write!(f, "  structs = [")?;
        write_list(f, &self.structs)?;
        writeln!(f, "],")?;
        write!(f, "  externs = [")?;
        write_list(f, &self.externs)?;
        writeln!(f, "],")?;
        write!(f, "  functions = [")?;
        write_list(f, &self.functions)?;
        writeln!(f, "]")?;
        writeln!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp_json_shapes() {
        let exp = Exp::BinOp {
            op: BinaryOp::Add,
            left: Box::new(Exp::Num(1)),
            right: Box::new(Exp::Id("x".into())),
        };
        assert_eq!(
            serde_json::to_string(&exp).unwrap(),
            r#"{"BinOp":{"op":"Add","left":{"Num":1},"right":{"Id":"x"}}}"#
        );
        assert_eq!(serde_json::to_string(&Exp::Nil).unwrap(), "\"Nil\"");
    }

    #[test]
    fn test_stmt_json_shapes() {
        assert_eq!(serde_json::to_string(&Stmt::Break).unwrap(), "\"Break\"");
        assert_eq!(
            serde_json::to_string(&Stmt::Return(None)).unwrap(),
            r#"{"Return":null}"#
        );
        let assign = Stmt::Assign {
            lhs: Lval::Id("x".into()),
            rhs: Rhs::New {
                typ: Type::Int,
                amount: Exp::Num(3),
            },
        };
        assert_eq!(
            serde_json::to_string(&assign).unwrap(),
            r#"{"Assign":{"lhs":{"Id":"x"},"rhs":{"New":{"typ":"Int","amount":{"Num":3}}}}}"#
        );
    }

    #[test]
    fn test_program_json_round_trip() {
        let program = Program {
            globals: vec![Decl::new("g", Type::Int)],
            structs: vec![StructDef {
                name: "S".into(),
                fields: vec![Decl::new("x", Type::Int)],
            }],
            externs: vec![],
            functions: vec![Function {
                name: "main".into(),
                params: vec![],
                rettyp: Some(Type::Int),
                locals: vec![(Decl::new("p", Type::ptr(Type::Struct("S".into()))), None)],
                stmts: vec![Stmt::Return(Some(Exp::Num(0)))],
            }],
        };
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }

    #[test]
    fn test_display_simple_exp() {
        let exp = Exp::UnOp {
            op: UnaryOp::Deref,
            operand: Box::new(Exp::Id("p".into())),
        };
        assert_eq!(exp.to_string(), "Deref(Id(p))");
        assert_eq!(Exp::Num(-4).to_string(), "Num(-4)");
    }

    #[test]
    fn test_display_return_stmt() {
        assert_eq!(Stmt::Return(None).to_string(), "Return(_)");
        let ret = Stmt::Return(Some(Exp::Num(3)));
        assert_eq!(ret.to_string(), "Return(\n  Num(3)\n)");
    }
}
