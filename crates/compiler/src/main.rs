//! mcc CLI.
//!
//! Command-line interface for compiling C source files to x86-64
//! assembly text.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use mcc::CompilerConfig;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "mcc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a C subset to x86-64 assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a C source file to assembly
    Build {
        /// Input file, or `-` for stdin
        input: PathBuf,

        /// Output assembly path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Dump the IR to stderr before register allocation
        #[arg(long)]
        dump_ir1: bool,

        /// Dump the IR to stderr after register allocation
        #[arg(long)]
        dump_ir2: bool,

        /// Directory to search for `#include "..."` files
        #[arg(short = 'I', long = "include", value_name = "DIR")]
        include: Vec<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            dump_ir1,
            dump_ir2,
            include,
        } => {
            run_build(&input, output.as_deref(), dump_ir1, dump_ir2, include);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "mcc", &mut io::stdout());
        }
    }
}

fn run_build(
    input: &Path,
    output: Option<&Path>,
    dump_ir1: bool,
    dump_ir2: bool,
    include: Vec<PathBuf>,
) {
    let mut config = CompilerConfig::new();
    config.include_dirs = include;
    config.dump_ir1 = dump_ir1;
    config.dump_ir2 = dump_ir2;

    let result = if input == Path::new("-") {
        let mut src = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut src) {
            eprintln!("error: cannot read stdin: {}", e);
            process::exit(1);
        }
        mcc::compile_source(&src, "-", &config)
    } else {
        mcc::compile_file(input, &config)
    };

    let asm = match result {
        Ok(asm) => asm,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, asm) {
                eprintln!("error: cannot write {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => print!("{}", asm),
    }
}
