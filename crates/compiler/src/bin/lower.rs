//! `lower` stage: AST JSON in, LIR out (pretty-printed or JSON).

use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "lower")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lower a type-checked Cflat AST to LIR", long_about = None)]
struct Cli {
    /// Input AST file (JSON interchange format)
    input: PathBuf,

    /// Emit the LIR as JSON instead of the pretty-printed form
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
    let program: cflatc::Program = match serde_json::from_str(&input) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error parsing AST JSON: {}", e);
            process::exit(1);
        }
    };
    let lir = match cflatc::lower_program(&program) {
        Ok(lir) => lir,
        Err(e) => {
            eprintln!("Error lowering program: {}", e);
            process::exit(1);
        }
    };
    if cli.json {
        match serde_json::to_string_pretty(&lir) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing LIR: {}", e);
                process::exit(1);
            }
        }
    } else {
        print!("{}", lir);
    }
}
