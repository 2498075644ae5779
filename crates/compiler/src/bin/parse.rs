//! `parse` stage: token stream in, AST plus sorted type diagnostics out.
//!
//! On a syntax error the only output is `parse error at token <n>`. With
//! `--json` the AST is emitted in the interchange format instead of the
//! pretty-printed form; diagnostics follow either way, so no output after
//! the AST means the program is well-typed.

use cflatc::{Parser, TypeChecker};
use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "parse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parse and type-check a Cflat token stream", long_about = None)]
struct Cli {
    /// Input token file (the `lex` stage's output)
    input: PathBuf,

    /// Emit the AST as JSON instead of the pretty-printed form
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let input = match fs::read_to_string(&cli.input) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.input.display(), e);
            process::exit(1);
        }
    };
    let tokens = match cflatc::parse_token_stream(&input) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let program = match Parser::new(tokens).parse() {
        Ok(program) => program,
        Err(message) => {
            println!("{}", message);
            return;
        }
    };
    if cli.json {
        match serde_json::to_string_pretty(&program) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing AST: {}", e);
                process::exit(1);
            }
        }
    } else {
        print!("{}", program);
    }
    for diagnostic in TypeChecker::check_program(&program) {
        println!("{}", diagnostic);
    }
}
