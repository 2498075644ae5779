//! AST -> LIR lowering
//!
//! Destructures nested expressions into three-address instructions over
//! fresh temporaries (`_t1`, `_t2`, ...) and fresh labels (`lbl1`, ...),
//! inserting explicit `Load`/`Store`/`Gep`/`Gfp` for every memory access.
//! Both counters reset per function. Every temporary's type is recorded in
//! the function's local table; the code generator depends on it for
//! function-pointer routing and struct-field resolution.
//!
//! Lowering runs on well-typed programs only. Shapes the type checker
//! rejects (dereferencing a non-pointer, calling a non-function) surface
//! here as internal errors rather than panics.

use crate::ast::{BinaryOp, Decl, Exp, Function, Lval, Program, Rhs, Stmt, UnaryOp};
use crate::cfg::{self, FlatItem};
use crate::lir::{ArithOp, CmpOp, Inst, LirFunction, LirProgram, Operand, Terminator};
use crate::types::Type;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct Lowerer<'a> {
    program: &'a Program,
    /// Struct name -> field name -> type.
    delta: HashMap<String, HashMap<String, Type>>,
    /// Non-main internal functions (direct-call targets).
    func_names: HashSet<String>,
    extern_names: HashSet<String>,
    /// LIR globals: data globals plus one `Ptr(Fn)` cell per function.
    globals: Vec<Decl>,
    // Per-function state, reset by `lower_function`.
    var_types: HashMap<String, Type>,
    local_names: HashSet<String>,
    temps: Vec<Decl>,
    temp_counter: usize,
    label_counter: usize,
    items: Vec<FlatItem>,
}

/// Lower a type-checked program to LIR with a CFG per function.
pub fn lower_program(program: &Program) -> Result<LirProgram, String> {
    let mut lowerer = Lowerer::new(program);
    let mut functions = BTreeMap::new();
    for func in &program.functions {
        let lowered = lowerer.lower_function(func)?;
        if functions.insert(func.name.clone(), lowered).is_some() {
            return Err(format!("duplicate function {}", func.name));
        }
    }
    Ok(LirProgram {
        globals: lowerer.globals,
        externs: program.externs.clone(),
        structs: program.structs.clone(),
        functions,
    })
}

impl<'a> Lowerer<'a> {
    fn new(program: &'a Program) -> Self {
        let delta = program
            .structs
            .iter()
            .map(|s| {
                let fields = s
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), f.typ.clone()))
                    .collect();
                (s.name.clone(), fields)
            })
            .collect();

        let mut globals = program.globals.clone();
        let mut func_names = HashSet::new();
        for func in &program.functions {
            if func.name == "main" {
                continue;
            }
            func_names.insert(func.name.clone());
            // Function names become pointer cells so that reads of them
            // (first-class function values) have a data symbol to load.
            globals.push(Decl::new(
                func.name.clone(),
                Type::ptr(Type::Fn {
                    params: func.params.iter().map(|p| p.typ.clone()).collect(),
                    ret: func.rettyp.clone().map(Box::new),
                }),
            ));
        }

        Lowerer {
            program,
            delta,
            func_names,
            extern_names: program.externs.iter().map(|e| e.name.clone()).collect(),
            globals,
            var_types: HashMap::new(),
            local_names: HashSet::new(),
            temps: Vec::new(),
            temp_counter: 0,
            label_counter: 0,
            items: Vec::new(),
        }
    }

    fn lower_function(&mut self, func: &Function) -> Result<LirFunction, String> {
        self.var_types.clear();
        self.local_names.clear();
        self.temps.clear();
        self.temp_counter = 0;
        self.label_counter = 0;
        self.items.clear();

        for global in &self.globals {
            self.var_types
                .insert(global.name.clone(), global.typ.clone());
        }
        for ext in &self.program.externs {
            self.var_types.insert(ext.name.clone(), ext.typ.clone());
        }
        for param in &func.params {
            self.var_types.insert(param.name.clone(), param.typ.clone());
            self.local_names.insert(param.name.clone());
        }
        for (decl, _) in &func.locals {
            self.var_types.insert(decl.name.clone(), decl.typ.clone());
            self.local_names.insert(decl.name.clone());
        }

        self.items.push(FlatItem::Label("entry".to_string()));

        // Local initializers run before the statement list, in
        // declaration order.
        for (decl, init) in &func.locals {
            if let Some(init) = init {
                let op = self.exp(init)?;
                self.emit(Inst::Copy {
                    lhs: decl.name.clone(),
                    op,
                });
            }
        }
        for stmt in &func.stmts {
            self.stmt(stmt, None)?;
        }
        // Functions that fall off the end return nothing.
        if !matches!(self.items.last(), Some(FlatItem::Term(_))) {
            self.items.push(FlatItem::Term(Terminator::Ret(None)));
        }

        let body = cfg::build(std::mem::take(&mut self.items))?;

        let mut locals: Vec<Decl> = func.locals.iter().map(|(decl, _)| decl.clone()).collect();
        locals.append(&mut self.temps);

        Ok(LirFunction {
            name: func.name.clone(),
            params: func.params.clone(),
            rettyp: func.rettyp.clone(),
            locals,
            body,
        })
    }

    fn fresh_temp(&mut self, typ: Type) -> String {
        self.temp_counter += 1;
        let name = format!("_t{}", self.temp_counter);
        self.var_types.insert(name.clone(), typ.clone());
        self.temps.push(Decl::new(name.clone(), typ));
        name
    }

    fn fresh_label(&mut self) -> String {
        self.label_counter += 1;
        format!("lbl{}", self.label_counter)
    }

    fn emit(&mut self, inst: Inst) {
        self.items.push(FlatItem::Inst(inst));
    }

    fn emit_term(&mut self, term: Terminator) {
        self.items.push(FlatItem::Term(term));
    }

    fn emit_label(&mut self, label: String) {
        self.items.push(FlatItem::Label(label));
    }

    fn operand_type(&self, op: &Operand) -> Result<Type, String> {
        match op {
            Operand::Const(_) => Ok(Type::Int),
            Operand::Var(name) => self
                .var_types
                .get(name)
                .cloned()
                .ok_or_else(|| format!("no type recorded for {}", name)),
        }
    }

    /// The operand's pointee type, for `Load`/`Gep` result typing.
    fn pointee_type(&self, op: &Operand) -> Result<Type, String> {
        let typ = self.operand_type(op)?;
        match typ {
            Type::Ptr(inner) => Ok(*inner),
            other => Err(format!("expected pointer operand, found {}", other)),
        }
    }

    fn expect_var(&self, op: Operand) -> Result<String, String> {
        op.as_var()
            .map(str::to_string)
            .ok_or_else(|| "expected a variable operand, found a constant".to_string())
    }

    fn field_type(&self, ptr: &Operand, field: &str) -> Result<Type, String> {
        let struct_name = match self.operand_type(ptr)? {
            Type::Ptr(inner) => match *inner {
                Type::Struct(name) => name,
                other => return Err(format!("field access through non-struct pointer &{}", other)),
            },
            other => return Err(format!("field access through non-pointer {}", other)),
        };
        self.delta
            .get(&struct_name)
            .and_then(|fields| fields.get(field))
            .cloned()
            .ok_or_else(|| format!("unknown field {} of struct {}", field, struct_name))
    }

    fn stmt(&mut self, stmt: &Stmt, loop_ctx: Option<(&str, &str)>) -> Result<(), String> {
        match stmt {
            Stmt::Assign {
                lhs: Lval::Id(name),
                rhs: Rhs::Exp(exp),
            } => {
                let op = self.exp(exp)?;
                self.emit(Inst::Copy {
                    lhs: name.clone(),
                    op,
                });
            }
            Stmt::Assign {
                lhs: Lval::Id(name),
                rhs: Rhs::New { amount, .. },
            } => {
                let num = self.exp(amount)?;
                self.emit(Inst::Alloc {
                    lhs: name.clone(),
                    num,
                });
            }
            Stmt::Assign {
                lhs,
                rhs: Rhs::Exp(exp),
            } => {
                let addr = self.lval_addr(lhs)?;
                let dst = self.expect_var(addr)?;
                let op = self.exp(exp)?;
                self.emit(Inst::Store { dst, op });
            }
            Stmt::Assign {
                lhs,
                rhs: Rhs::New { typ, amount },
            } => {
                let addr = self.lval_addr(lhs)?;
                let dst = self.expect_var(addr)?;
                let num = self.exp(amount)?;
                let block = self.fresh_temp(Type::ptr(typ.clone()));
                self.emit(Inst::Alloc {
                    lhs: block.clone(),
                    num,
                });
                self.emit(Inst::Store {
                    dst,
                    op: Operand::Var(block),
                });
            }
            Stmt::If { guard, tt, ff } => {
                let label_true = self.fresh_label();
                let label_false = self.fresh_label();
                let label_end = self.fresh_label();
                let cond = self.exp(guard)?;
                self.emit_term(Terminator::Branch {
                    cond,
                    tt: label_true.clone(),
                    ff: label_false.clone(),
                });
                self.emit_label(label_true);
                for stmt in tt {
                    self.stmt(stmt, loop_ctx)?;
                }
                self.emit_term(Terminator::Jump(label_end.clone()));
                self.emit_label(label_false);
                for stmt in ff {
                    self.stmt(stmt, loop_ctx)?;
                }
                self.emit_term(Terminator::Jump(label_end.clone()));
                self.emit_label(label_end);
            }
            Stmt::While { guard, body } => {
                let label_header = self.fresh_label();
                let label_body = self.fresh_label();
                let label_end = self.fresh_label();
                self.emit_term(Terminator::Jump(label_header.clone()));
                self.emit_label(label_header.clone());
                let cond = self.exp(guard)?;
                self.emit_term(Terminator::Branch {
                    cond,
                    tt: label_body.clone(),
                    ff: label_end.clone(),
                });
                self.emit_label(label_body);
                for stmt in body {
                    self.stmt(stmt, Some((label_header.as_str(), label_end.as_str())))?;
                }
                self.emit_term(Terminator::Jump(label_header.clone()));
                self.emit_label(label_end);
            }
            Stmt::Break => {
                let (_, end) = loop_ctx.ok_or("break outside of loop reached lowering")?;
                self.emit_term(Terminator::Jump(end.to_string()));
            }
            Stmt::Continue => {
                let (start, _) = loop_ctx.ok_or("continue outside of loop reached lowering")?;
                self.emit_term(Terminator::Jump(start.to_string()));
            }
            Stmt::Return(exp) => {
                let op = match exp {
                    Some(exp) => Some(self.exp(exp)?),
                    None => None,
                };
                self.emit_term(Terminator::Ret(op));
            }
            Stmt::Call { callee, args } => match callee {
                Lval::Id(name) if !self.local_names.contains(name) => {
                    let args = self.lower_args(args)?;
                    if self.extern_names.contains(name) {
                        self.emit(Inst::CallExt {
                            lhs: None,
                            callee: name.clone(),
                            args,
                        });
                    } else if self.func_names.contains(name) {
                        let next = self.fresh_label();
                        self.emit_term(Terminator::CallDirect {
                            lhs: None,
                            callee: name.clone(),
                            args,
                            next: next.clone(),
                        });
                        self.emit_label(next);
                    } else {
                        self.call_indirect(None, name.clone(), args);
                    }
                }
                other => {
                    let callee = self.lval_value(other)?;
                    let args = self.lower_args(args)?;
                    let callee = self.expect_var(callee)?;
                    self.call_indirect(None, callee, args);
                }
            },
        }
        Ok(())
    }

    fn call_indirect(&mut self, lhs: Option<String>, callee: String, args: Vec<Operand>) {
        let next = self.fresh_label();
        self.emit_term(Terminator::CallIndirect {
            lhs,
            callee,
            args,
            next: next.clone(),
        });
        self.emit_label(next);
    }

    fn lower_args(&mut self, args: &[Exp]) -> Result<Vec<Operand>, String> {
        args.iter().map(|arg| self.exp(arg)).collect()
    }

    /// The return type of a callable, for typing the result temporary.
    fn callee_ret(&self, typ: &Type) -> Result<Type, String> {
        let fn_type = match typ {
            Type::Ptr(inner) => inner.as_ref(),
            other => other,
        };
        match fn_type {
            Type::Fn { ret: Some(ret), .. } => Ok((**ret).clone()),
            Type::Fn { ret: None, .. } => {
                Err("expression call to a function with no return value".to_string())
            }
            other => Err(format!("call through non-function type {}", other)),
        }
    }

    fn exp(&mut self, exp: &Exp) -> Result<Operand, String> {
        match exp {
            Exp::Num(n) => Ok(Operand::Const(*n)),
            Exp::Nil => Ok(Operand::Const(0)),
            Exp::Id(name) => Ok(Operand::var(name.clone())),
            Exp::UnOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                let op = self.exp(operand)?;
                let lhs = self.fresh_temp(Type::Int);
                self.emit(Inst::Arith {
                    lhs: lhs.clone(),
                    aop: ArithOp::Sub,
                    op1: Operand::Const(0),
                    op2: op,
                });
                Ok(Operand::Var(lhs))
            }
            Exp::UnOp {
                op: UnaryOp::Deref,
                operand,
            } => {
                let ptr = self.exp(operand)?;
                let pointee = self.pointee_type(&ptr)?;
                let src = self.expect_var(ptr)?;
                let lhs = self.fresh_temp(pointee);
                self.emit(Inst::Load {
                    lhs: lhs.clone(),
                    src,
                });
                Ok(Operand::Var(lhs))
            }
            Exp::UnOp {
                op: UnaryOp::Addr,
                operand,
            } => self.addr_of(operand),
            Exp::BinOp { op, left, right } => {
                let op1 = self.exp(left)?;
                let op2 = self.exp(right)?;
                let lhs = self.fresh_temp(Type::Int);
                match binop_kind(*op) {
                    BinopKind::Arith(aop) => self.emit(Inst::Arith {
                        lhs: lhs.clone(),
                        aop,
                        op1,
                        op2,
                    }),
                    BinopKind::Cmp(rop) => self.emit(Inst::Cmp {
                        lhs: lhs.clone(),
                        rop,
                        op1,
                        op2,
                    }),
                }
                Ok(Operand::Var(lhs))
            }
            Exp::ArrayAccess { ptr, index } => {
                let base = self.exp(ptr)?;
                let elem = self.pointee_type(&base)?;
                let idx = self.exp(index)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(elem.clone()));
                self.emit(Inst::Gep {
                    lhs: addr.clone(),
                    src,
                    idx,
                });
                let value = self.fresh_temp(elem);
                self.emit(Inst::Load {
                    lhs: value.clone(),
                    src: addr,
                });
                Ok(Operand::Var(value))
            }
            Exp::FieldAccess { ptr, field } => {
                let base = self.exp(ptr)?;
                let field_typ = self.field_type(&base, field)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(field_typ.clone()));
                self.emit(Inst::Gfp {
                    lhs: addr.clone(),
                    src,
                    field: field.clone(),
                });
                let value = self.fresh_temp(field_typ);
                self.emit(Inst::Load {
                    lhs: value.clone(),
                    src: addr,
                });
                Ok(Operand::Var(value))
            }
            Exp::Call { callee, args } => match callee.as_ref() {
                Exp::Id(name) if !self.local_names.contains(name) => {
                    let callee_typ = self
                        .var_types
                        .get(name)
                        .cloned()
                        .ok_or_else(|| format!("call to undefined name {}", name))?;
                    let args = self.lower_args(args)?;
                    let ret = self.callee_ret(&callee_typ)?;
                    let lhs = self.fresh_temp(ret);
                    if self.extern_names.contains(name) {
                        self.emit(Inst::CallExt {
                            lhs: Some(lhs.clone()),
                            callee: name.clone(),
                            args,
                        });
                    } else if self.func_names.contains(name) {
                        let next = self.fresh_label();
                        self.emit_term(Terminator::CallDirect {
                            lhs: Some(lhs.clone()),
                            callee: name.clone(),
                            args,
                            next: next.clone(),
                        });
                        self.emit_label(next);
                    } else {
                        self.call_indirect(Some(lhs.clone()), name.clone(), args);
                    }
                    Ok(Operand::Var(lhs))
                }
                other => {
                    let callee_op = self.exp(other)?;
                    let args = self.lower_args(args)?;
                    let ret = self.callee_ret(&self.operand_type(&callee_op)?)?;
                    let callee = self.expect_var(callee_op)?;
                    let lhs = self.fresh_temp(ret);
                    self.call_indirect(Some(lhs.clone()), callee, args);
                    Ok(Operand::Var(lhs))
                }
            },
            Exp::New { typ, amount } => {
                let num = self.exp(amount)?;
                let lhs = self.fresh_temp(Type::ptr(typ.clone()));
                self.emit(Inst::Alloc {
                    lhs: lhs.clone(),
                    num,
                });
                Ok(Operand::Var(lhs))
            }
        }
    }

    /// `&e`: the address computation of `e` without the trailing load.
    fn addr_of(&mut self, operand: &Exp) -> Result<Operand, String> {
        match operand {
            Exp::Id(name) if self.extern_names.contains(name) => Ok(Operand::var(name.clone())),
            Exp::UnOp {
                op: UnaryOp::Deref,
                operand,
            } => self.exp(operand),
            Exp::ArrayAccess { ptr, index } => {
                let base = self.exp(ptr)?;
                let elem = self.pointee_type(&base)?;
                let idx = self.exp(index)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(elem));
                self.emit(Inst::Gep {
                    lhs: addr.clone(),
                    src,
                    idx,
                });
                Ok(Operand::Var(addr))
            }
            Exp::FieldAccess { ptr, field } => {
                let base = self.exp(ptr)?;
                let field_typ = self.field_type(&base, field)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(field_typ));
                self.emit(Inst::Gfp {
                    lhs: addr.clone(),
                    src,
                    field: field.clone(),
                });
                Ok(Operand::Var(addr))
            }
            other => Err(format!("cannot take the address of {}", other)),
        }
    }

    fn lval_addr(&mut self, lval: &Lval) -> Result<Operand, String> {
        match lval {
            Lval::Id(name) => Err(format!("no address computation for variable {}", name)),
            Lval::Deref(inner) => self.lval_value(inner),
            Lval::ArrayAccess { ptr, index } => {
                let base = self.lval_value(ptr)?;
                let elem = self.pointee_type(&base)?;
                let idx = self.exp(index)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(elem));
                self.emit(Inst::Gep {
                    lhs: addr.clone(),
                    src,
                    idx,
                });
                Ok(Operand::Var(addr))
            }
            Lval::FieldAccess { ptr, field } => {
                let base = self.lval_value(ptr)?;
                let field_typ = self.field_type(&base, field)?;
                let src = self.expect_var(base)?;
                let addr = self.fresh_temp(Type::ptr(field_typ));
                self.emit(Inst::Gfp {
                    lhs: addr.clone(),
                    src,
                    field: field.clone(),
                });
                Ok(Operand::Var(addr))
            }
        }
    }

    fn lval_value(&mut self, lval: &Lval) -> Result<Operand, String> {
        match lval {
            Lval::Id(name) => Ok(Operand::var(name.clone())),
            Lval::Deref(inner) => {
                let ptr = self.lval_value(inner)?;
                let pointee = self.pointee_type(&ptr)?;
                let src = self.expect_var(ptr)?;
                let lhs = self.fresh_temp(pointee);
                self.emit(Inst::Load {
                    lhs: lhs.clone(),
                    src,
                });
                Ok(Operand::Var(lhs))
            }
            Lval::ArrayAccess { .. } | Lval::FieldAccess { .. } => {
                let addr = self.lval_addr(lval)?;
                let pointee = self.pointee_type(&addr)?;
                let src = self.expect_var(addr)?;
                let lhs = self.fresh_temp(pointee);
                self.emit(Inst::Load {
                    lhs: lhs.clone(),
                    src,
                });
                Ok(Operand::Var(lhs))
            }
        }
    }
}

enum BinopKind {
    Arith(ArithOp),
    Cmp(CmpOp),
}

fn binop_kind(op: BinaryOp) -> BinopKind {
    match op {
        BinaryOp::Add => BinopKind::Arith(ArithOp::Add),
        BinaryOp::Sub => BinopKind::Arith(ArithOp::Sub),
        BinaryOp::Mul => BinopKind::Arith(ArithOp::Mul),
        BinaryOp::Div => BinopKind::Arith(ArithOp::Div),
        BinaryOp::Equal => BinopKind::Cmp(CmpOp::Eq),
        BinaryOp::NotEq => BinopKind::Cmp(CmpOp::Neq),
        BinaryOp::Lt => BinopKind::Cmp(CmpOp::Lt),
        BinaryOp::Lte => BinopKind::Cmp(CmpOp::Lte),
        BinaryOp::Gt => BinopKind::Cmp(CmpOp::Gt),
        BinaryOp::Gte => BinopKind::Cmp(CmpOp::Gte),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::Parser;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> LirProgram {
        let program = Parser::new(lex(source).unwrap()).parse().unwrap();
        let errors = TypeChecker::check_program(&program);
        assert!(errors.is_empty(), "program has type errors: {:?}", errors);
        lower_program(&program).unwrap()
    }

    #[test]
    fn test_trivial_return() {
        let lir = lower("fn main() -> int { return 3; }");
        let main = &lir.functions["main"];
        assert_eq!(main.body.len(), 1);
        let entry = &main.body["entry"];
        assert!(entry.insts.is_empty());
        assert_eq!(entry.term, Terminator::Ret(Some(Operand::Const(3))));
    }

    #[test]
    fn test_neg_lowers_to_subtraction_from_zero() {
        let lir = lower("fn main() -> int { let x: int; x = -x; return x; }");
        let entry = &lir.functions["main"].body["entry"];
        assert_eq!(
            entry.insts[0],
            Inst::Arith {
                lhs: "_t1".into(),
                aop: ArithOp::Sub,
                op1: Operand::Const(0),
                op2: Operand::var("x"),
            }
        );
        assert_eq!(
            entry.insts[1],
            Inst::Copy {
                lhs: "x".into(),
                op: Operand::var("_t1"),
            }
        );
    }

    #[test]
    fn test_if_shape() {
        let lir = lower(
            "fn main() -> int {
               let x: int;
               if x < 1 { x = 1; } else { x = 2; }
               return x;
             }",
        );
        let main = &lir.functions["main"];
        // entry, lbl1 (then), lbl2 (else), lbl3 (join)
        assert_eq!(main.body.len(), 4);
        let entry = &main.body["entry"];
        assert_eq!(
            entry.insts[0],
            Inst::Cmp {
                lhs: "_t1".into(),
                rop: CmpOp::Lt,
                op1: Operand::var("x"),
                op2: Operand::Const(1),
            }
        );
        assert_eq!(
            entry.term,
            Terminator::Branch {
                cond: Operand::var("_t1"),
                tt: "lbl1".into(),
                ff: "lbl2".into(),
            }
        );
        assert_eq!(main.body["lbl1"].term, Terminator::Jump("lbl3".into()));
        assert_eq!(main.body["lbl2"].term, Terminator::Jump("lbl3".into()));
        assert_eq!(
            main.body["lbl3"].term,
            Terminator::Ret(Some(Operand::var("x")))
        );
    }

    #[test]
    fn test_while_shape_with_break_and_continue() {
        let lir = lower(
            "fn main() -> int {
               let x: int;
               while x < 10 {
                 x = x + 1;
                 if x == 5 { continue; }
                 if x == 7 { break; }
               }
               return x;
             }",
        );
        let main = &lir.functions["main"];
        let entry = &main.body["entry"];
        // lbl1 = header, lbl2 = body, lbl3 = exit
        assert_eq!(entry.term, Terminator::Jump("lbl1".into()));
        let header = &main.body["lbl1"];
        assert_eq!(
            header.term,
            Terminator::Branch {
                cond: Operand::var("_t1"),
                tt: "lbl2".into(),
                ff: "lbl3".into(),
            }
        );
        // continue jumps back to the header, break jumps to the exit
        let continue_block = &main.body["lbl4"];
        assert_eq!(continue_block.term, Terminator::Jump("lbl1".into()));
        let break_block = &main.body["lbl7"];
        assert_eq!(break_block.term, Terminator::Jump("lbl3".into()));
    }

    #[test]
    fn test_array_access_emits_gep_then_load() {
        let lir = lower(
            "fn main() -> int {
               let a: &int, x: int;
               a = new int 3;
               x = a[2];
               return x;
             }",
        );
        let main = &lir.functions["main"];
        let entry = &main.body["entry"];
        assert_eq!(
            entry.insts[0],
            Inst::Alloc {
                lhs: "a".into(),
                num: Operand::Const(3),
            }
        );
        assert_eq!(
            entry.insts[1],
            Inst::Gep {
                lhs: "_t1".into(),
                src: "a".into(),
                idx: Operand::Const(2),
            }
        );
        assert_eq!(
            entry.insts[2],
            Inst::Load {
                lhs: "_t2".into(),
                src: "_t1".into(),
            }
        );
        // temporary types are recorded for codegen
        let t1 = main.locals.iter().find(|d| d.name == "_t1").unwrap();
        assert_eq!(t1.typ, Type::ptr(Type::Int));
        let t2 = main.locals.iter().find(|d| d.name == "_t2").unwrap();
        assert_eq!(t2.typ, Type::Int);
    }

    #[test]
    fn test_field_write_emits_gfp_then_store() {
        let lir = lower(
            "struct S { x: int, y: int }
             fn main() -> int {
               let p: &S;
               p = new S;
               p.y = 7;
               return 0;
             }",
        );
        let entry = &lir.functions["main"].body["entry"];
        assert_eq!(
            entry.insts[1],
            Inst::Gfp {
                lhs: "_t1".into(),
                src: "p".into(),
                field: "y".into(),
            }
        );
        assert_eq!(
            entry.insts[2],
            Inst::Store {
                dst: "_t1".into(),
                op: Operand::Const(7),
            }
        );
    }

    #[test]
    fn test_direct_call_splits_block() {
        let lir = lower(
            "fn f(a: int) -> int { return a; }
             fn main() -> int {
               let x: int;
               x = f(3);
               return x;
             }",
        );
        let main = &lir.functions["main"];
        assert_eq!(
            main.body["entry"].term,
            Terminator::CallDirect {
                lhs: Some("_t1".into()),
                callee: "f".into(),
                args: vec![Operand::Const(3)],
                next: "lbl1".into(),
            }
        );
        assert_eq!(
            main.body["lbl1"].insts[0],
            Inst::Copy {
                lhs: "x".into(),
                op: Operand::var("_t1"),
            }
        );
    }

    #[test]
    fn test_extern_call_is_inline() {
        let lir = lower(
            "extern put: (int) -> int;
             fn main() -> int {
               put(5);
               return 0;
             }",
        );
        let entry = &lir.functions["main"].body["entry"];
        assert_eq!(
            entry.insts[0],
            Inst::CallExt {
                lhs: None,
                callee: "put".into(),
                args: vec![Operand::Const(5)],
            }
        );
        assert_eq!(entry.term, Terminator::Ret(Some(Operand::Const(0))));
    }

    #[test]
    fn test_indirect_call_through_function_pointer() {
        let lir = lower(
            "fn f(a: int) -> int { return a; }
             fn main() -> int {
               let g: &(int) -> int, x: int;
               g = f;
               x = g(1);
               return x;
             }",
        );
        let main = &lir.functions["main"];
        assert_eq!(
            main.body["entry"].insts[0],
            Inst::Copy {
                lhs: "g".into(),
                op: Operand::var("f"),
            }
        );
        assert_eq!(
            main.body["entry"].term,
            Terminator::CallIndirect {
                lhs: Some("_t1".into()),
                callee: "g".into(),
                args: vec![Operand::Const(1)],
                next: "lbl1".into(),
            }
        );
    }

    #[test]
    fn test_function_names_become_pointer_globals() {
        let lir = lower(
            "fn f(a: int) -> int { return a; }
             fn main() -> int { return 0; }",
        );
        let cell = lir.globals.iter().find(|g| g.name == "f").unwrap();
        assert_eq!(
            cell.typ,
            Type::ptr(Type::Fn {
                params: vec![Type::Int],
                ret: Some(Box::new(Type::Int)),
            })
        );
        // main gets no pointer cell
        assert!(!lir.globals.iter().any(|g| g.name == "main"));
    }

    #[test]
    fn test_addr_of_extern_and_indirect_call() {
        let lir = lower(
            "extern put: (int) -> int;
             fn main() -> int {
               let f: &(int) -> int;
               f = &put;
               f(1);
               return 0;
             }",
        );
        let main = &lir.functions["main"];
        assert_eq!(
            main.body["entry"].insts[0],
            Inst::Copy {
                lhs: "f".into(),
                op: Operand::var("put"),
            }
        );
        assert!(matches!(
            main.body["entry"].term,
            Terminator::CallIndirect { ref callee, .. } if callee == "f"
        ));
    }

    #[test]
    fn test_code_after_return_is_unreachable() {
        let lir = lower(
            "fn main() -> int {
               let x: int;
               return 1;
               x = 2;
             }",
        );
        let main = &lir.functions["main"];
        assert_eq!(main.body.len(), 1);
        assert_eq!(
            main.body["entry"].term,
            Terminator::Ret(Some(Operand::Const(1)))
        );
    }

    #[test]
    fn test_local_initializers_run_first_in_order() {
        let lir = lower(
            "fn main() -> int {
               let x: int = 1, y: int = 2;
               return x + y;
             }",
        );
        let entry = &lir.functions["main"].body["entry"];
        assert_eq!(
            entry.insts[0],
            Inst::Copy {
                lhs: "x".into(),
                op: Operand::Const(1),
            }
        );
        assert_eq!(
            entry.insts[1],
            Inst::Copy {
                lhs: "y".into(),
                op: Operand::Const(2),
            }
        );
    }

    #[test]
    fn test_void_function_gets_implicit_return() {
        let lir = lower("fn f() -> _ { let x: int; x = 1; } fn main() -> int { return 0; }");
        let f = &lir.functions["f"];
        assert_eq!(f.body["entry"].term, Terminator::Ret(None));
    }

    #[test]
    fn test_store_through_pointer_lval() {
        let lir = lower(
            "fn main() -> int {
               let p: &int;
               p = new int;
               *p = 9;
               return *p;
             }",
        );
        let entry = &lir.functions["main"].body["entry"];
        assert_eq!(
            entry.insts[1],
            Inst::Store {
                dst: "p".into(),
                op: Operand::Const(9),
            }
        );
    }

    #[test]
    fn test_counters_reset_per_function() {
        let lir = lower(
            "fn f() -> int { let x: int; x = 1 + 2; return x; }
             fn main() -> int { let y: int; y = 3 + 4; return y; }",
        );
        assert!(lir.functions["f"].locals.iter().any(|d| d.name == "_t1"));
        assert!(lir.functions["main"].locals.iter().any(|d| d.name == "_t1"));
    }
}
