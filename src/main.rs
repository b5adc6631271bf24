use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use log::{LevelFilter, info};
use snafu::ResultExt;

use plc::config::{DEFAULT_LIBRARY_DIR, DEFAULT_OUTPUT, load_library_dir};
use plc::error::WriteOutputSnafu;
use plc::{CompileResult, CompilerConfig, compile_file};

#[derive(Parser)]
#[command(name = "plc")]
#[command(about = "Compile contract source into Blockasm", long_about = None)]
struct Cli {
  /// Source file to compile
  input: PathBuf,

  /// Output file
  #[arg(short = 'o', long = "out", default_value = DEFAULT_OUTPUT)]
  output: PathBuf,

  /// Directory of *.blockasm libraries
  #[arg(short = 'L', long)]
  lib_dir: Option<PathBuf>,

  /// Seed for function ids
  #[arg(long)]
  seed: Option<u64>,

  /// First scratch slot, in hex
  #[arg(long, value_parser = parse_hex, default_value = "0x1000")]
  first_slot: u32,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

fn parse_hex(text: &str) -> Result<u32, String> {
  let digits = text.strip_prefix("0x").unwrap_or(text);
  u32::from_str_radix(digits, 16).map_err(|err| format!("invalid slot {text}: {err}"))
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => LevelFilter::Warn,
    1 => LevelFilter::Info,
    2 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  };
  env_logger::Builder::from_default_env()
    .filter_level(level)
    .init();
}

fn run(cli: &Cli) -> CompileResult<()> {
  let libraries = match &cli.lib_dir {
    Some(dir) => load_library_dir(dir)?,
    None if Path::new(DEFAULT_LIBRARY_DIR).is_dir() => {
      load_library_dir(Path::new(DEFAULT_LIBRARY_DIR))?
    }
    None => Vec::new(),
  };
  let config = CompilerConfig {
    first_slot: cli.first_slot,
    seed: cli.seed,
  };

  let asm = compile_file(&cli.input, &libraries, &config)?;
  for func in &asm.functions {
    info!("function {} id {:#x}", func.name, func.id);
  }
  fs::write(&cli.output, asm.text).context(WriteOutputSnafu { path: &cli.output })?;
  info!("wrote {}", cli.output.display());
  Ok(())
}

fn main() {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  if let Err(err) = run(&cli) {
    eprintln!("{err}");
    process::exit(1);
  }
}
