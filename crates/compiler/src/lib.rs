//! Cflat Compiler Library
//!
//! An ahead-of-time compiler for Cflat, a statically typed C-like
//! language with integers, pointers, heap arrays, structs, and
//! first-class function pointers. The pipeline is a chain of pure
//! transformations:
//!
//! ```text
//! source text -> tokens -> AST -> LIR CFG -> [optimized LIR] -> x86-64
//! ```
//!
//! Each stage is also exposed as its own executable (`lex`, `parse`,
//! `lower`, `codegen`, `opt`); the stages exchange ASTs and LIR as JSON.
//! Generated programs link against `cflat-runtime` for `_cflat_alloc`
//! and `_cflat_panic`.

pub mod ast;
pub mod cfg;
pub mod codegen;
pub mod lexer;
pub mod lir;
pub mod lower;
pub mod opt;
pub mod parser;
pub mod typechecker;
pub mod types;

pub use ast::Program;
pub use codegen::{CodeGen, CodeGenError};
pub use lexer::{Token, lex, parse_token_stream};
pub use lir::LirProgram;
pub use lower::lower_program;
pub use opt::{constant_propagation, optimize};
pub use parser::Parser;
pub use typechecker::TypeChecker;
pub use types::Type;

/// Parse and type-check source text. Returns the AST together with its
/// sorted diagnostics (empty when well-typed). A syntax error is the
/// `Err` case; type errors are not.
pub fn compile_to_ast(source: &str) -> Result<(Program, Vec<String>), String> {
    let tokens = lex(source)?;
    let program = Parser::new(tokens).parse()?;
    let diagnostics = TypeChecker::check_program(&program);
    Ok((program, diagnostics))
}

/// Compile source text to LIR. Fails on syntax errors and on the first
/// type diagnostic: lowering requires a well-typed AST.
pub fn compile_to_lir(source: &str) -> Result<LirProgram, String> {
    let (program, diagnostics) = compile_to_ast(source)?;
    if let Some(first) = diagnostics.into_iter().next() {
        return Err(first);
    }
    lower_program(&program)
}

/// Compile source text all the way to x86-64 assembly text.
pub fn compile_to_asm(source: &str) -> Result<String, String> {
    let lir = compile_to_lir(source)?;
    CodeGen::new(&lir).generate().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_to_ast_reports_diagnostics() {
        let (_, diagnostics) = compile_to_ast("fn main() -> int { return x; }").unwrap();
        assert_eq!(
            diagnostics,
            vec!["[ID] in function main: variable x undefined"]
        );
    }

    #[test]
    fn test_compile_to_lir_rejects_ill_typed_programs() {
        let err = compile_to_lir("fn main() -> int { return x; }").unwrap_err();
        assert!(err.starts_with("[ID]"));
    }

    #[test]
    fn test_compile_to_asm_end_to_end() {
        let asm = compile_to_asm("fn main() -> int { return 3; }").unwrap();
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("movq $3, %rax"));
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let err = compile_to_ast("fn main() -> int { return 3 }").unwrap_err();
        assert_eq!(err, "parse error at token 9");
    }
}
