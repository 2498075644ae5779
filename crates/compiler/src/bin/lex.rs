//! `lex` stage: Cflat source in, one token per line out.

use clap::Parser as ClapParser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "lex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tokenize a Cflat source file", long_about = None)]
struct Cli {
    /// Input .cf source file
    input: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", cli.input.display(), e);
            process::exit(1);
        }
    };
    match cflatc::lex(&source) {
        Ok(tokens) => {
            for token in tokens {
                println!("{}", token);
            }
        }
        // A lexical error is the stage's output, not a crash.
        Err(message) => println!("{}", message),
    }
}
