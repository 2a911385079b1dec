//! CLI entry point for the `m3-asm` binary.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use m3_assembler::t8::assemble_t8;
use m3_assembler::AsmError;
use m3_emulator_core::T8Machine;
#[cfg(test)]
use tempfile as _;

const USAGE_TEXT: &str = "\
Usage: m3-asm <command> [options]

Commands:
  t8     <input> [-o <output>]             Assemble T8 source to a program image
  run-t8 <input> --max <n> [inputs...]     Assemble T8 source and run it

Options:
  -o, --output <file>  Output file path (default: input stem + .bin)
  -m, --max <n>        Number of outputs to collect (run-t8 only)
  -h, --help           Show this help message

Examples:
  m3-asm t8 adder.t8
  m3-asm t8 adder.t8 -o adder.bin
  m3-asm run-t8 adder.t8 --max 2 7 13 17 19
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Build(BuildArgs),
    Run(RunArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct BuildArgs {
    input: PathBuf,
    output: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
struct RunArgs {
    input: PathBuf,
    max_outputs: usize,
    inputs: Vec<u8>,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "t8" => parse_build_args(args)
            .map(Command::Build)
            .map(ParseResult::Command),
        "run-t8" => parse_run_args(args)
            .map(Command::Run)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_build_args(mut args: impl Iterator<Item = OsString>) -> Result<BuildArgs, String> {
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "-o" || arg == "--output" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for -o".to_string())?;
            output = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if input.is_some() {
            return Err("multiple input paths provided".to_string());
        }
        input = Some(PathBuf::from(arg));
    }

    let input = input.ok_or_else(|| "missing input path".to_string())?;
    Ok(BuildArgs { input, output })
}

fn parse_run_args(mut args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let mut input: Option<PathBuf> = None;
    let mut max_outputs: Option<usize> = None;
    let mut inputs = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--max" || arg == "-m" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --max".to_string())?;
            let value = value.to_string_lossy();
            max_outputs = Some(
                value
                    .parse()
                    .map_err(|_| format!("invalid output count: {value}"))?,
            );
            continue;
        }

        let text = arg.to_string_lossy();
        if text.starts_with('-') {
            return Err(format!("unknown option: {text}"));
        }

        if input.is_none() {
            input = Some(PathBuf::from(arg));
            continue;
        }
        inputs.push(
            text.parse::<u8>()
                .map_err(|_| format!("input is not a byte: {text}"))?,
        );
    }

    let input = input.ok_or_else(|| "missing input path".to_string())?;
    let max_outputs = max_outputs.ok_or_else(|| "missing --max".to_string())?;
    Ok(RunArgs {
        input,
        max_outputs,
        inputs,
    })
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");

    let parent = input.parent().unwrap_or_else(|| Path::new(""));

    parent.join(format!("{stem}.bin"))
}

fn assemble_file(input: &Path) -> Result<Vec<u8>, i32> {
    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", input.display());
            return Err(1);
        }
    };
    assemble_t8(&source).map_err(|e| {
        report_assemble_error(input, &e);
        1
    })
}

fn report_assemble_error(input: &Path, e: &AsmError) {
    match e.line {
        Some(line) => eprintln!("{}:{line}: error: {}", input.display(), e.kind),
        None => eprintln!("{}: error: {}", input.display(), e.kind),
    }
}

fn run_build(args: BuildArgs) -> Result<(), i32> {
    let program = assemble_file(&args.input)?;

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input));

    if let Err(e) = fs::write(&output_path, &program) {
        eprintln!("error: failed to write output: {e}");
        return Err(1);
    }

    println!(
        "Assembled {} ({} bytes) -> {}",
        args.input.display(),
        program.len(),
        output_path.display()
    );

    Ok(())
}

fn run_program(args: &RunArgs) -> Result<(), i32> {
    let program = assemble_file(&args.input)?;
    let mut machine = T8Machine::new();
    let outputs = machine.emulate(&program, &args.inputs, args.max_outputs);
    let line: Vec<String> = outputs.iter().map(u8::to_string).collect();
    println!("{}", line.join(" "));
    Ok(())
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(Command::Build(args))) => match run_build(args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Ok(ParseResult::Command(Command::Run(args))) => match run_program(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}
