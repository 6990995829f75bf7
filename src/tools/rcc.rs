use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use rcc::errors::Session;

/// Compile a C source file to 32-bit x86 assembly
#[derive(Debug, Parser)]
struct Args {
    /// input filename, or `-' for stdin
    input: PathBuf,
}

/// Output goes to the current directory: the input's last extension
/// replaced by `.S`, directory component stripped.
fn output_filename(input: &Path) -> PathBuf {
    let mut name = PathBuf::from(
        input
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "out".into()),
    );
    name.set_extension("S");
    name
}

fn run(args: &Args) -> Result<()> {
    let from_stdin = args.input.as_os_str() == "-";

    let (filename, source) = if from_stdin {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("cannot read stdin")?;
        ("<stdin>".to_owned(), source)
    } else {
        let source = std::fs::read_to_string(&args.input).with_context(
            || format!("cannot open `{}'", args.input.display()),
        )?;
        (args.input.display().to_string(), source)
    };

    let sess = Session::new(filename);
    let sections = rcc::compile(&source, &sess)?;

    let output = if from_stdin {
        PathBuf::from("stdin.S")
    } else {
        output_filename(&args.input)
    };
    sections.flush_to_file(output)
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let failed = err.use_stderr();
            let _ = err.print();
            return if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
