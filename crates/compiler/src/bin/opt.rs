//! `opt` stage: constant propagation over the function named `test`.
//!
//! Prints the optimized function in the `lower` pretty format, or the
//! whole optimized program as JSON with `--json`.

use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "opt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Constant-propagate Cflat LIR", long_about = None)]
struct Cli {
    /// Input LIR file (JSON interchange format)
    input: PathBuf,

    /// Emit the optimized program as JSON instead of the pretty form
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
    let lir: cflatc::LirProgram = match serde_json::from_str(&input) {
        Ok(lir) => lir,
        Err(e) => {
            eprintln!("Error parsing LIR JSON: {}", e);
            process::exit(1);
        }
    };
    let optimized = match cflatc::optimize(&lir) {
        Ok(optimized) => optimized,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if cli.json {
        match serde_json::to_string_pretty(&optimized) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing LIR: {}", e);
                process::exit(1);
            }
        }
    } else {
        // optimize() guarantees the function exists
        print!("{}", optimized.functions["test"].render());
    }
}
