//! LIR -> x86_64 code generation (System V AMD64, AT&T syntax)
//!
//! No register allocation: every local and temporary lives in a stack
//! slot, and `%r8`/`%r9`/`%r10` are scratch. Two calling conventions
//! coexist and stay in separate emission routines:
//!
//! - internal direct/indirect calls push *all* arguments on the stack,
//!   right to left, padding by 8 when the count is odd so `%rsp` is
//!   16-byte aligned at the `call`;
//! - external calls follow System V proper: first six arguments in
//!   registers, the rest pushed right to left behind the same padding.
//!
//! Array blocks carry a hidden length word at offset -8 of the user
//! pointer; every `Gep` emits a nonnegative check and an upper-bound
//! check against it before forming the address. `Alloc` requests
//! `(n + 1) * 8` bytes from `_cflat_alloc` and bumps past the header.
//!
//! Internal function names and externs are readable as first-class
//! function pointers through `_`-suffixed data cells (`f_: .quad f`);
//! plain data globals are addressed by their own symbol. Both runtime
//! fault handlers are emitted once per module and shared by all
//! functions.

mod error;
mod frame;

pub use error::CodeGenError;

use crate::lir::{Inst, LirFunction, LirProgram, Operand, Terminator};
use crate::types::Type;
use frame::{Frame, field_offsets};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

const ARG_REGISTERS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

pub struct CodeGen<'a> {
    program: &'a LirProgram,
    output: String,
    /// struct name -> field name -> byte offset.
    fields: HashMap<String, HashMap<String, i64>>,
    /// Names read through their `_`-suffixed pointer cell: internal
    /// functions and externs.
    underscore_symbols: HashSet<String>,
}

impl<'a> CodeGen<'a> {
    pub fn new(program: &'a LirProgram) -> Self {
        let mut underscore_symbols: HashSet<String> = program
            .functions
            .keys()
            .filter(|name| name.as_str() != "main")
            .cloned()
            .collect();
        underscore_symbols.extend(program.externs.iter().map(|e| e.name.clone()));
        CodeGen {
            program,
            output: String::new(),
            fields: field_offsets(&program.structs),
            underscore_symbols,
        }
    }

    pub fn generate(mut self) -> Result<String, CodeGenError> {
        self.data_section()?;
        self.text_section()?;
        Ok(self.output)
    }

    fn data_section(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.output, ".data")?;
        writeln!(self.output)?;
        for global in &self.program.globals {
            if self.underscore_symbols.contains(&global.name) {
                writeln!(self.output, ".globl {}_", global.name)?;
                writeln!(self.output, "{}_: .quad {}", global.name, global.name)?;
            } else {
                writeln!(self.output, ".globl {}", global.name)?;
                writeln!(self.output, "{}: .zero 8", global.name)?;
            }
            writeln!(self.output)?;
        }
        for ext in &self.program.externs {
            writeln!(self.output, ".globl {}_", ext.name)?;
            writeln!(self.output, "{}_: .quad {}", ext.name, ext.name)?;
            writeln!(self.output)?;
        }
        writeln!(
            self.output,
            "out_of_bounds_msg: .string \"out-of-bounds array access\""
        )?;
        writeln!(
            self.output,
            "invalid_alloc_msg: .string \"invalid allocation amount\""
        )?;
        writeln!(self.output)?;
        Ok(())
    }

    fn text_section(&mut self) -> Result<(), CodeGenError> {
        writeln!(self.output, ".text")?;
        writeln!(self.output)?;
        let program = self.program;
        for func in program.functions.values() {
            self.function(func)?;
        }
        writeln!(self.output, ".out_of_bounds:")?;
        writeln!(self.output, "  lea out_of_bounds_msg(%rip), %rdi")?;
        writeln!(self.output, "  call _cflat_panic")?;
        writeln!(self.output)?;
        writeln!(self.output, ".invalid_alloc_length:")?;
        writeln!(self.output, "  lea invalid_alloc_msg(%rip), %rdi")?;
        writeln!(self.output, "  call _cflat_panic")?;
        Ok(())
    }

    fn function(&mut self, func: &LirFunction) -> Result<(), CodeGenError> {
        let frame = Frame::new(func);
        let types = self.var_types(func);

        writeln!(self.output, ".globl {}", func.name)?;
        writeln!(self.output, "{}:", func.name)?;
        writeln!(self.output, "  pushq %rbp")?;
        writeln!(self.output, "  movq %rsp, %rbp")?;
        writeln!(self.output, "  subq ${}, %rsp", frame.size())?;
        for i in 0..func.locals.len() as i64 {
            writeln!(self.output, "  movq $0, {}(%rbp)", -8 * (i + 1))?;
        }
        writeln!(self.output, "  jmp {}_entry", func.name)?;
        writeln!(self.output)?;

        for (label, block) in &func.body {
            writeln!(self.output, "{}_{}:", func.name, label)?;
            for inst in &block.insts {
                self.inst(&frame, &types, inst)?;
            }
            self.terminator(&frame, &func.name, &block.term)?;
            writeln!(self.output)?;
        }

        writeln!(self.output, "{}_epilogue:", func.name)?;
        writeln!(self.output, "  movq %rbp, %rsp")?;
        writeln!(self.output, "  popq %rbp")?;
        writeln!(self.output, "  ret")?;
        writeln!(self.output)?;
        Ok(())
    }

    /// Name -> type for the current function: globals and externs shadowed
    /// by parameters and locals.
    fn var_types(&self, func: &'a LirFunction) -> HashMap<&'a str, &'a Type> {
        let program = self.program;
        let mut types: HashMap<&str, &Type> = HashMap::new();
        for global in &program.globals {
            types.insert(&global.name, &global.typ);
        }
        for ext in &program.externs {
            types.insert(&ext.name, &ext.typ);
        }
        for param in &func.params {
            types.insert(&param.name, &param.typ);
        }
        for local in &func.locals {
            types.insert(&local.name, &local.typ);
        }
        types
    }

    /// Addressing form for a name: a `%rbp` slot for params/locals, a
    /// `%rip`-relative symbol for globals (through the `_` cell for
    /// function pointers).
    fn access(&self, frame: &Frame, name: &str) -> String {
        if let Some(offset) = frame.offset(name) {
            format!("{}(%rbp)", offset)
        } else if self.underscore_symbols.contains(name) {
            format!("{}_(%rip)", name)
        } else {
            format!("{}(%rip)", name)
        }
    }

    /// Operand form usable as a `movq`/`pushq` source.
    fn operand(&self, frame: &Frame, op: &Operand) -> String {
        match op {
            Operand::Const(n) => format!("${}", n),
            Operand::Var(name) => self.access(frame, name),
        }
    }

    fn inst(
        &mut self,
        frame: &Frame,
        types: &HashMap<&str, &Type>,
        inst: &Inst,
    ) -> Result<(), CodeGenError> {
        match inst {
            Inst::Copy { lhs, op } => {
                let dst = self.access(frame, lhs);
                match op {
                    Operand::Const(n) => writeln!(self.output, "  movq ${}, {}", n, dst)?,
                    Operand::Var(src) => {
                        writeln!(self.output, "  movq {}, %r8", self.access(frame, src))?;
                        writeln!(self.output, "  movq %r8, {}", dst)?;
                    }
                }
            }
            Inst::Arith { lhs, aop, op1, op2 } => {
                use crate::lir::ArithOp;
                let dst = self.access(frame, lhs);
                let src1 = self.operand(frame, op1);
                let src2 = self.operand(frame, op2);
                match aop {
                    ArithOp::Add | ArithOp::Sub | ArithOp::Mul => {
                        let mnemonic = match aop {
                            ArithOp::Add => "addq",
                            ArithOp::Sub => "subq",
                            _ => "imulq",
                        };
                        writeln!(self.output, "  movq {}, %r8", src1)?;
                        writeln!(self.output, "  {} {}, %r8", mnemonic, src2)?;
                        writeln!(self.output, "  movq %r8, {}", dst)?;
                    }
                    ArithOp::Div => {
                        writeln!(self.output, "  movq {}, %rax", src1)?;
                        writeln!(self.output, "  cqo")?;
                        // idivq takes no immediate operand
                        if matches!(op2, Operand::Const(_)) {
                            writeln!(self.output, "  movq {}, %r8", src2)?;
                            writeln!(self.output, "  idivq %r8")?;
                        } else {
                            writeln!(self.output, "  idivq {}", src2)?;
                        }
                        writeln!(self.output, "  movq %rax, {}", dst)?;
                    }
                }
            }
            Inst::Cmp { lhs, rop, op1, op2 } => {
                use crate::lir::CmpOp;
                let dst = self.access(frame, lhs);
                let src1 = self.operand(frame, op1);
                let src2 = self.operand(frame, op2);
                // AT&T cmpq computes dst - src, and the immediate can only
                // be the src; keep op1 on the dst side throughout.
                if matches!(op1, Operand::Const(_)) {
                    writeln!(self.output, "  movq {}, %r8", src1)?;
                    writeln!(self.output, "  cmpq {}, %r8", src2)?;
                } else if matches!(op2, Operand::Const(_)) {
                    writeln!(self.output, "  cmpq {}, {}", src2, src1)?;
                } else {
                    writeln!(self.output, "  movq {}, %r8", src1)?;
                    writeln!(self.output, "  cmpq {}, %r8", src2)?;
                }
                let set = match rop {
                    CmpOp::Eq => "sete",
                    CmpOp::Neq => "setne",
                    CmpOp::Lt => "setl",
                    CmpOp::Lte => "setle",
                    CmpOp::Gt => "setg",
                    CmpOp::Gte => "setge",
                };
                writeln!(self.output, "  movq $0, %r8")?;
                writeln!(self.output, "  {} %r8b", set)?;
                writeln!(self.output, "  movq %r8, {}", dst)?;
            }
            Inst::Alloc { lhs, num } => {
                let dst = self.access(frame, lhs);
                let count = self.operand(frame, num);
                match num {
                    Operand::Const(n) => {
                        writeln!(self.output, "  movq ${}, %r8", n)?;
                        writeln!(self.output, "  cmpq $0, %r8")?;
                    }
                    Operand::Var(_) => {
                        writeln!(self.output, "  cmpq $0, {}", count)?;
                    }
                }
                writeln!(self.output, "  jle .invalid_alloc_length")?;
                // byte count = (n + 1) * 8: one hidden length word plus
                // the elements
                writeln!(self.output, "  movq {}, %rdi", count)?;
                writeln!(self.output, "  incq %rdi")?;
                writeln!(self.output, "  imulq $8, %rdi")?;
                writeln!(self.output, "  call _cflat_alloc")?;
                writeln!(self.output, "  movq {}, %r8", count)?;
                writeln!(self.output, "  movq %r8, 0(%rax)")?;
                writeln!(self.output, "  addq $8, %rax")?;
                writeln!(self.output, "  movq %rax, {}", dst)?;
            }
            Inst::Load { lhs, src } => {
                writeln!(self.output, "  movq {}, %r8", self.access(frame, src))?;
                writeln!(self.output, "  movq 0(%r8), %r9")?;
                writeln!(self.output, "  movq %r9, {}", self.access(frame, lhs))?;
            }
            Inst::Store { dst, op } => {
                writeln!(self.output, "  movq {}, %r8", self.operand(frame, op))?;
                writeln!(self.output, "  movq {}, %r9", self.access(frame, dst))?;
                writeln!(self.output, "  movq %r8, 0(%r9)")?;
            }
            Inst::Gep { lhs, src, idx } => {
                writeln!(self.output, "  movq {}, %r8", self.operand(frame, idx))?;
                writeln!(self.output, "  cmpq $0, %r8")?;
                writeln!(self.output, "  jl .out_of_bounds")?;
                writeln!(self.output, "  movq {}, %r9", self.access(frame, src))?;
                writeln!(self.output, "  movq -8(%r9), %r10")?;
                writeln!(self.output, "  cmpq %r10, %r8")?;
                writeln!(self.output, "  jge .out_of_bounds")?;
                writeln!(self.output, "  imulq $8, %r8")?;
                writeln!(self.output, "  addq %r9, %r8")?;
                writeln!(self.output, "  movq %r8, {}", self.access(frame, lhs))?;
            }
            Inst::Gfp { lhs, src, field } => {
                let offset = self.field_offset(types, src, field)?;
                writeln!(self.output, "  movq {}, %r8", self.access(frame, src))?;
                writeln!(self.output, "  leaq {}(%r8), %r9", offset)?;
                writeln!(self.output, "  movq %r9, {}", self.access(frame, lhs))?;
            }
            Inst::CallExt { lhs, callee, args } => {
                for (arg, register) in args.iter().zip(ARG_REGISTERS) {
                    writeln!(
                        self.output,
                        "  movq {}, {}",
                        self.operand(frame, arg),
                        register
                    )?;
                }
                let stack_args = args.len().saturating_sub(ARG_REGISTERS.len());
                let pad = if stack_args % 2 != 0 { 8 } else { 0 };
                if pad != 0 {
                    writeln!(self.output, "  subq $8, %rsp")?;
                }
                for arg in args.iter().skip(ARG_REGISTERS.len()).rev() {
                    writeln!(self.output, "  pushq {}", self.operand(frame, arg))?;
                }
                writeln!(self.output, "  call {}", callee)?;
                if let Some(lhs) = lhs {
                    writeln!(self.output, "  movq %rax, {}", self.access(frame, lhs))?;
                }
                if stack_args > 0 {
                    writeln!(
                        self.output,
                        "  addq ${}, %rsp",
                        stack_args as i64 * 8 + pad
                    )?;
                }
            }
        }
        Ok(())
    }

    fn field_offset(
        &self,
        types: &HashMap<&str, &Type>,
        src: &str,
        field: &str,
    ) -> Result<i64, CodeGenError> {
        let struct_name = match types.get(src) {
            Some(Type::Ptr(inner)) => match inner.as_ref() {
                Type::Struct(name) => name,
                other => {
                    return Err(CodeGenError::Logic(format!(
                        "Gfp through pointer to non-struct type {}",
                        other
                    )));
                }
            },
            Some(other) => {
                return Err(CodeGenError::Logic(format!(
                    "Gfp through non-pointer {} of type {}",
                    src, other
                )));
            }
            None => {
                return Err(CodeGenError::Logic(format!(
                    "Gfp through unknown variable {}",
                    src
                )));
            }
        };
        self.fields
            .get(struct_name)
            .and_then(|fields| fields.get(field))
            .copied()
            .ok_or_else(|| {
                CodeGenError::Logic(format!(
                    "unknown field {} of struct {}",
                    field, struct_name
                ))
            })
    }

    /// Internal-convention call: all arguments pushed right to left, with
    /// an 8-byte pad first when the count is odd so the `call` site stays
    /// 16-byte aligned.
    fn internal_call(
        &mut self,
        frame: &Frame,
        fname: &str,
        target: &str,
        lhs: &Option<String>,
        args: &[Operand],
        next: &str,
    ) -> Result<(), CodeGenError> {
        let pad = if args.len() % 2 != 0 { 8 } else { 0 };
        if pad != 0 {
            writeln!(self.output, "  subq $8, %rsp")?;
        }
        for arg in args.iter().rev() {
            writeln!(self.output, "  pushq {}", self.operand(frame, arg))?;
        }
        writeln!(self.output, "  call {}", target)?;
        if let Some(lhs) = lhs {
            writeln!(self.output, "  movq %rax, {}", self.access(frame, lhs))?;
        }
        if !args.is_empty() || pad != 0 {
            writeln!(self.output, "  addq ${}, %rsp", args.len() as i64 * 8 + pad)?;
        }
        writeln!(self.output, "  jmp {}_{}", fname, next)?;
        Ok(())
    }

    fn terminator(
        &mut self,
        frame: &Frame,
        fname: &str,
        term: &Terminator,
    ) -> Result<(), CodeGenError> {
        match term {
            Terminator::Jump(target) => {
                writeln!(self.output, "  jmp {}_{}", fname, target)?;
            }
            Terminator::Branch { cond, tt, ff } => {
                match cond {
                    Operand::Const(n) => {
                        writeln!(self.output, "  movq ${}, %r8", n)?;
                        writeln!(self.output, "  cmpq $0, %r8")?;
                    }
                    Operand::Var(name) => {
                        writeln!(self.output, "  cmpq $0, {}", self.access(frame, name))?;
                    }
                }
                writeln!(self.output, "  jne {}_{}", fname, tt)?;
                writeln!(self.output, "  jmp {}_{}", fname, ff)?;
            }
            Terminator::Ret(op) => {
                if let Some(op) = op {
                    writeln!(self.output, "  movq {}, %rax", self.operand(frame, op))?;
                }
                writeln!(self.output, "  jmp {}_epilogue", fname)?;
            }
            Terminator::CallDirect {
                lhs,
                callee,
                args,
                next,
            } => {
                let target = callee.clone();
                self.internal_call(frame, fname, &target, lhs, args, next)?;
            }
            Terminator::CallIndirect {
                lhs,
                callee,
                args,
                next,
            } => {
                let target = format!("*{}", self.access(frame, callee));
                self.internal_call(frame, fname, &target, lhs, args, next)?;
            }
        }
        Ok(())
    }
}
