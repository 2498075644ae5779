//! `codegen` stage: LIR JSON in, x86-64 AT&T assembly out.

use cflatc::CodeGen;
use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "codegen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate x86-64 assembly from Cflat LIR", long_about = None)]
struct Cli {
    /// Input LIR file (JSON interchange format)
    input: PathBuf,
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
    let lir: cflatc::LirProgram = match serde_json::from_str(&input) {
        Ok(lir) => lir,
        Err(e) => {
            eprintln!("Error parsing LIR JSON: {}", e);
            process::exit(1);
        }
    };
    match CodeGen::new(&lir).generate() {
        Ok(assembly) => print!("{}", assembly),
        Err(e) => {
            eprintln!("Error generating assembly: {}", e);
            process::exit(1);
        }
    }
}
