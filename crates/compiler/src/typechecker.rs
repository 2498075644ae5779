//! Type checker for Cflat
//!
//! Walks the AST accumulating diagnostics; it never stops at the first
//! error. Subexpressions that fail to type land on `Any`, which compares
//! equal to everything, so one broken leaf doesn't flood its ancestors
//! with follow-on noise. All diagnostics are sorted lexicographically
//! before being returned, which makes the output order-independent of the
//! traversal.
//!
//! Environments:
//! - Γ₀ maps globals, externs, and non-`main` functions (at pointer-to-
//!   function type) to their types. `main` is kept out of Γ₀ so calling it
//!   is always an error; its declared return type is recorded on the side
//!   so merely naming it doesn't produce a spurious undefined-variable
//!   diagnostic.
//! - Δ maps struct names to their field environments.
//! - Per function, Γ″ = Γ₀ ⊔ params ⊔ locals with later entries shadowing.

use crate::ast::{BinaryOp, Exp, Function, Lval, Program, Rhs, Stmt, UnaryOp};
use crate::types::Type;
use std::collections::{HashMap, HashSet};

pub struct TypeChecker {
    /// Γ₀: globals, externs, non-main functions.
    gamma: HashMap<String, Type>,
    /// Δ: struct name -> field name -> type.
    delta: HashMap<String, HashMap<String, Type>>,
    /// Names declared `extern` (their Γ entries hold bare `Fn` types).
    extern_names: HashSet<String>,
    /// Declared return type of `main`, consulted by identifier lookup only.
    main_ret: Option<Type>,
    errors: Vec<String>,
}

impl TypeChecker {
    /// Type-check a whole program, returning its diagnostics sorted
    /// lexicographically. An empty result means the program is well-typed.
    pub fn check_program(program: &Program) -> Vec<String> {
        let mut checker = TypeChecker::new(program);
        checker.check_globals_and_structs(program);
        for func in &program.functions {
            checker.check_function(func);
        }
        checker.errors.sort();
        checker.errors
    }

    fn new(program: &Program) -> Self {
        let mut gamma = HashMap::new();
        let mut delta = HashMap::new();
        let mut extern_names = HashSet::new();
        let mut main_ret = None;

        for decl in &program.globals {
            gamma.insert(decl.name.clone(), decl.typ.clone());
        }
        for ext in &program.externs {
            extern_names.insert(ext.name.clone());
            gamma.insert(ext.name.clone(), ext.typ.clone());
        }
        for s in &program.structs {
            let fields = s
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.typ.clone()))
                .collect();
            delta.insert(s.name.clone(), fields);
        }
        for func in &program.functions {
            if func.name == "main" {
                main_ret = func.rettyp.clone();
            } else {
                let fn_type = Type::Fn {
                    params: func.params.iter().map(|p| p.typ.clone()).collect(),
                    ret: func.rettyp.clone().map(Box::new),
                };
                gamma.insert(func.name.clone(), Type::ptr(fn_type));
            }
        }

        TypeChecker {
            gamma,
            delta,
            extern_names,
            main_ret,
            errors: Vec::new(),
        }
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn check_globals_and_structs(&mut self, program: &Program) {
        for decl in &program.globals {
            if decl.typ.is_struct() || decl.typ.is_fn() {
                self.error(format!(
                    "[GLOBAL] global {} has a struct or function type",
                    decl.name
                ));
            }
        }
        for s in &program.structs {
            for field in &s.fields {
                if field.typ.is_struct() || field.typ.is_fn() {
                    self.error(format!(
                        "[STRUCT] struct {} field {} has a struct or function type",
                        s.name, field.name
                    ));
                }
            }
        }
    }

    fn check_function(&mut self, func: &Function) {
        // Γ′ = params ⊔ locals, locals shadowing params.
        let mut gamma_prime: HashMap<String, Type> = HashMap::new();
        for param in &func.params {
            gamma_prime.insert(param.name.clone(), param.typ.clone());
        }
        for (decl, _) in &func.locals {
            gamma_prime.insert(decl.name.clone(), decl.typ.clone());
        }

        for (name, typ) in &gamma_prime {
            if typ.is_struct() || typ.is_fn() {
                self.errors.push(format!(
                    "[FUNCTION] in function {}: variable {} has a struct or function type",
                    func.name, name
                ));
            }
        }

        // Γ″ = Γ₀ ⊔ Γ′.
        let mut env = self.gamma.clone();
        env.extend(gamma_prime);

        for (decl, init) in &func.locals {
            if let Some(init) = init {
                let init_type = self.exp_type(&func.name, &env, init);
                if decl.typ != init_type {
                    self.error(format!(
                        "[FUNCTION] in function {}: variable {} with type {} has initializer of type {}",
                        func.name, decl.name, decl.typ, init_type
                    ));
                }
            }
        }

        for stmt in &func.stmts {
            self.check_stmt(&func.name, false, &func.rettyp, &env, stmt);
        }
    }

    /// Γ″ lookup with the `main` side record as fallback. Returns `Any`
    /// (after reporting) for genuinely undefined names.
    fn lookup(&mut self, f: &str, env: &HashMap<String, Type>, name: &str) -> Type {
        if let Some(typ) = env.get(name) {
            return typ.clone();
        }
        if name == "main" {
            if let Some(ret) = &self.main_ret {
                return ret.clone();
            }
        }
        self.error(format!(
            "[ID] in function {}: variable {} undefined",
            f, name
        ));
        Type::Any
    }

    fn exp_type(&mut self, f: &str, env: &HashMap<String, Type>, exp: &Exp) -> Type {
        match exp {
            Exp::Num(_) => Type::Int,
            Exp::Nil => Type::nil_ptr(),
            Exp::Id(name) => self.lookup(f, env, name),
            Exp::UnOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                let t = self.exp_type(f, env, operand);
                if !t.is_int() && !t.is_any() {
                    self.error(format!(
                        "[NEG] in function {}: negating type {} instead of int",
                        f, t
                    ));
                }
                Type::Int
            }
            Exp::UnOp {
                op: UnaryOp::Deref,
                operand,
            } => {
                let t = self.exp_type(f, env, operand);
                match t {
                    Type::Ptr(inner) => *inner,
                    Type::Any => Type::Any,
                    other => {
                        self.error(format!(
                            "[DEREF] in function {}: dereferencing type {} instead of pointer",
                            f, other
                        ));
                        Type::Any
                    }
                }
            }
            Exp::UnOp {
                op: UnaryOp::Addr,
                operand,
            } => {
                let t = self.exp_type(f, env, operand);
                match operand.as_ref() {
                    Exp::Id(name) if self.extern_names.contains(name) && t.is_fn() => Type::ptr(t),
                    Exp::UnOp {
                        op: UnaryOp::Deref, ..
                    }
                    | Exp::ArrayAccess { .. }
                    | Exp::FieldAccess { .. } => {
                        if t.is_any() {
                            Type::Any
                        } else {
                            Type::ptr(t)
                        }
                    }
                    _ => Type::Any,
                }
            }
            Exp::BinOp { op, left, right } => {
                let lt = self.exp_type(f, env, left);
                let rt = self.exp_type(f, env, right);
                match op {
                    BinaryOp::Equal | BinaryOp::NotEq => {
                        if lt != rt {
                            self.error(format!(
                                "[BINOP-EQ] in function {}: operands with different types: {} vs {}",
                                f, lt, rt
                            ));
                        }
                        if !lt.is_int() && !lt.is_ptr() && !lt.is_any() {
                            self.error(format!(
                                "[BINOP-EQ] in function {}: operand has non-primitive type {}",
                                f, lt
                            ));
                        }
                        if !rt.is_int() && !rt.is_ptr() && !rt.is_any() {
                            self.error(format!(
                                "[BINOP-EQ] in function {}: operand has non-primitive type {}",
                                f, rt
                            ));
                        }
                    }
                    _ => {
                        if !lt.is_int() && !lt.is_any() {
                            self.error(format!(
                                "[BINOP-REST] in function {}: operand has type {} instead of int",
                                f, lt
                            ));
                        }
                        if !rt.is_int() && !rt.is_any() {
                            self.error(format!(
                                "[BINOP-REST] in function {}: operand has type {} instead of int",
                                f, rt
                            ));
                        }
                    }
                }
                Type::Int
            }
            Exp::ArrayAccess { ptr, index } => {
                let pt = self.exp_type(f, env, ptr);
                let it = self.exp_type(f, env, index);
                if !it.is_int() && !it.is_any() {
                    self.error(format!(
                        "[ARRAY] in function {}: array index is type {} instead of int",
                        f, it
                    ));
                }
                match pt {
                    Type::Ptr(inner) => *inner,
                    Type::Any => Type::Any,
                    other => {
                        self.error(format!(
                            "[ARRAY] in function {}: dereferencing non-pointer type {}",
                            f, other
                        ));
                        Type::Any
                    }
                }
            }
            Exp::FieldAccess { ptr, field } => {
                let pt = self.exp_type(f, env, ptr);
                self.field_type(f, &pt, field)
            }
            Exp::Call { callee, args } => {
                let ct = self.exp_type(f, env, callee);
                let is_main = matches!(callee.as_ref(), Exp::Id(name) if name == "main");
                if is_main {
                    self.error(format!("[ECALL-INTERNAL] in function {}: calling main", f));
                }
                match ct {
                    Type::Ptr(inner) => match *inner {
                        Type::Fn { params, ret } => {
                            if ret.is_none() {
                                self.error(format!(
                                    "[ECALL-INTERNAL] in function {}: calling a function with no return value",
                                    f
                                ));
                            }
                            self.check_call_args(f, env, "ECALL-INTERNAL", &params, args);
                            ret.map(|r| *r).unwrap_or(Type::Any)
                        }
                        other => {
                            self.error(format!(
                                "[ECALL-*] in function {}: calling non-function type {}",
                                f,
                                Type::ptr(other)
                            ));
                            Type::Any
                        }
                    },
                    Type::Fn { params, ret } => {
                        if ret.is_none() {
                            self.error(format!(
                                "[ECALL-EXTERN] in function {}: calling a function with no return value",
                                f
                            ));
                        }
                        self.check_call_args(f, env, "ECALL-EXTERN", &params, args);
                        ret.map(|r| *r).unwrap_or(Type::Any)
                    }
                    Type::Any => Type::Any,
                    other => {
                        if !is_main {
                            self.error(format!(
                                "[ECALL-*] in function {}: calling non-function type {}",
                                f, other
                            ));
                        }
                        Type::Any
                    }
                }
            }
            Exp::New { typ, amount } => {
                // Only reachable through interchange input; the surface
                // grammar confines `new` to assignment right-hand sides.
                self.exp_type(f, env, amount);
                Type::ptr(typ.clone())
            }
        }
    }

    /// Argument checking shared by expression and statement calls.
    /// Arguments beyond the declared parameter count are not descended
    /// into; the count mismatch is the only diagnostic they produce.
    fn check_call_args(
        &mut self,
        f: &str,
        env: &HashMap<String, Type>,
        tag: &str,
        params: &[Type],
        args: &[Exp],
    ) {
        if params.len() != args.len() {
            self.error(format!(
                "[{}] in function {}: call number of arguments ({}) and parameters ({}) don't match",
                tag,
                f,
                args.len(),
                params.len()
            ));
        }
        for (arg, param) in args.iter().zip(params) {
            let at = self.exp_type(f, env, arg);
            if *param != at {
                self.error(format!(
                    "[{}] in function {}: call argument has type {} but parameter has type {}",
                    tag, f, at, param
                ));
            }
        }
    }

    fn field_type(&mut self, f: &str, pt: &Type, field: &str) -> Type {
        match pt {
            Type::Any => Type::Any,
            Type::Ptr(inner) => match inner.as_ref() {
                Type::Struct(sname) => match self.delta.get(sname) {
                    Some(fields) => match fields.get(field) {
                        Some(ft) => ft.clone(),
                        None => {
                            self.error(format!(
                                "[FIELD] in function {}: accessing non-existent field {} of struct type {}",
                                f, field, sname
                            ));
                            Type::Any
                        }
                    },
                    None => {
                        self.error(format!(
                            "[FIELD] in function {}: accessing field of non-existent struct type {}",
                            f, sname
                        ));
                        Type::Any
                    }
                },
                _ => {
                    self.error(format!(
                        "[FIELD] in function {}: accessing field of incorrect type {}",
                        f, pt
                    ));
                    Type::Any
                }
            },
            other => {
                self.error(format!(
                    "[FIELD] in function {}: accessing field of incorrect type {}",
                    f, other
                ));
                Type::Any
            }
        }
    }

    fn lval_type(&mut self, f: &str, env: &HashMap<String, Type>, lval: &Lval) -> Type {
        match lval {
            Lval::Id(name) => self.lookup(f, env, name),
            Lval::Deref(inner) => {
                let t = self.lval_type(f, env, inner);
                match t {
                    Type::Ptr(inner) => *inner,
                    Type::Any => Type::Any,
                    other => {
                        self.error(format!(
                            "[DEREF] in function {}: dereferencing type {} instead of pointer",
                            f, other
                        ));
                        Type::Any
                    }
                }
            }
            Lval::ArrayAccess { ptr, index } => {
                let pt = self.lval_type(f, env, ptr);
                let it = self.exp_type(f, env, index);
                if !it.is_int() && !it.is_any() {
                    self.error(format!(
                        "[ARRAY] in function {}: array index is type {} instead of int",
                        f, it
                    ));
                }
                match pt {
                    Type::Ptr(inner) => *inner,
                    Type::Any => Type::Any,
                    other => {
                        self.error(format!(
                            "[ARRAY] in function {}: dereferencing non-pointer type {}",
                            f, other
                        ));
                        Type::Any
                    }
                }
            }
            Lval::FieldAccess { ptr, field } => {
                let pt = self.lval_type(f, env, ptr);
                self.field_type(f, &pt, field)
            }
        }
    }

    fn check_stmt(
        &mut self,
        f: &str,
        in_loop: bool,
        rettyp: &Option<Type>,
        env: &HashMap<String, Type>,
        stmt: &Stmt,
    ) {
        match stmt {
            Stmt::Break => {
                if !in_loop {
                    self.error(format!("[BREAK] in function {}: break outside of loop", f));
                }
            }
            Stmt::Continue => {
                if !in_loop {
                    self.error(format!(
                        "[CONTINUE] in function {}: continue outside of loop",
                        f
                    ));
                }
            }
            Stmt::If { guard, tt, ff } => {
                let gt = self.exp_type(f, env, guard);
                if !gt.is_int() && !gt.is_any() {
                    self.error(format!(
                        "[IF] in function {}: if guard has type {} instead of int",
                        f, gt
                    ));
                }
                for stmt in tt {
                    self.check_stmt(f, in_loop, rettyp, env, stmt);
                }
                for stmt in ff {
                    self.check_stmt(f, in_loop, rettyp, env, stmt);
                }
            }
            Stmt::While { guard, body } => {
                let gt = self.exp_type(f, env, guard);
                if !gt.is_int() && !gt.is_any() {
                    self.error(format!(
                        "[WHILE] in function {}: while guard has type {} instead of int",
                        f, gt
                    ));
                }
                for stmt in body {
                    self.check_stmt(f, true, rettyp, env, stmt);
                }
            }
            Stmt::Return(exp) => match (rettyp, exp) {
                (Some(rt), Some(exp)) => {
                    let et = self.exp_type(f, env, exp);
                    if *rt != et {
                        self.error(format!(
                            "[RETURN-2] in function {}: should return {} but returning {}",
                            f, rt, et
                        ));
                    }
                }
                (Some(rt), None) => {
                    self.error(format!(
                        "[RETURN-2] in function {}: should return {} but returning nothing",
                        f, rt
                    ));
                }
                (None, Some(exp)) => {
                    let et = self.exp_type(f, env, exp);
                    self.error(format!(
                        "[RETURN-1] in function {}: should return nothing but returning {}",
                        f, et
                    ));
                }
                (None, None) => {}
            },
            Stmt::Assign { lhs, rhs } => {
                let lt = self.lval_type(f, env, lhs);
                match rhs {
                    Rhs::Exp(exp) => {
                        let rt = self.exp_type(f, env, exp);
                        if lt != rt {
                            // `&_` on the left absorbs any right-hand side;
                            // this is how nil-initialized pointers work out.
                            let suppressed =
                                matches!(&lt, Type::Ptr(inner) if inner.is_any());
                            if !suppressed {
                                self.error(format!(
                                    "[ASSIGN-EXP] in function {}: assignment lhs has type {} but rhs has type {}",
                                    f, lt, rt
                                ));
                            }
                        }
                        if lt.is_struct() || lt.is_fn() {
                            self.error(format!(
                                "[ASSIGN-EXP] in function {}: assignment to struct or function",
                                f
                            ));
                        }
                    }
                    Rhs::New { typ, amount } => {
                        let at = self.exp_type(f, env, amount);
                        match &lt {
                            Type::Ptr(inner) => {
                                if **inner != *typ {
                                    self.error(format!(
                                        "[ASSIGN-NEW] in function {}: assignment lhs has type {} but we're allocating type {}",
                                        f, lt, typ
                                    ));
                                }
                                if typ.is_fn() || inner.is_fn() {
                                    self.error(format!(
                                        "[ASSIGN-NEW] in function {}: allocating function type {}",
                                        f, typ
                                    ));
                                }
                            }
                            other => {
                                if !other.is_any() {
                                    self.error(format!(
                                        "[ASSIGN-NEW] in function {}: assignment lhs has type {} but we're allocating type {}",
                                        f, other, typ
                                    ));
                                }
                                if typ.is_fn() {
                                    self.error(format!(
                                        "[ASSIGN-NEW] in function {}: allocating function type {}",
                                        f, typ
                                    ));
                                }
                            }
                        }
                        if !at.is_int() && !at.is_any() {
                            self.error(format!(
                                "[ASSIGN-NEW] in function {}: allocation amount is type {} instead of int",
                                f, at
                            ));
                        }
                    }
                }
            }
            Stmt::Call { callee, args } => {
                let ct = self.lval_type(f, env, callee);
                let is_main = matches!(callee, Lval::Id(name) if name == "main");
                if is_main {
                    self.error(format!("[SCALL-INTERNAL] in function {}: calling main", f));
                    if !args.is_empty() {
                        self.error(format!(
                            "[SCALL-INTERNAL] in function {}: call number of arguments ({}) and parameters (0) don't match",
                            f,
                            args.len()
                        ));
                    }
                }
                match ct {
                    Type::Ptr(inner) => match *inner {
                        Type::Fn { params, .. } => {
                            self.check_call_args(f, env, "SCALL-INTERNAL", &params, args);
                        }
                        other => {
                            self.error(format!(
                                "[SCALL-*] in function {}: calling non-function type {}",
                                f,
                                Type::ptr(other)
                            ));
                        }
                    },
                    Type::Fn { params, .. } => {
                        self.check_call_args(f, env, "SCALL-EXTERN", &params, args);
                    }
                    Type::Any => {}
                    other => {
                        if !is_main {
                            self.error(format!(
                                "[SCALL-*] in function {}: calling non-function type {}",
                                f, other
                            ));
                        }
                    }
                }
            }
        }
    }
}
