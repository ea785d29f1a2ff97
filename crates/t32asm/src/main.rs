//! t32asm - T32 assembler command line
//!
//! Usage: t32asm [OPTIONS] <input>

use anyhow::Context;
use clap::{Parser as ClapParser, ValueEnum};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::process;

use t32_asm::{AsmConfig, Assembler, DiagnosticReporter, FeatureSet};

/// Instruction-set profile
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Default)]
enum Profile {
    /// Narrow encodings only
    Baseline,
    /// Narrow and wide encodings
    #[default]
    Dual,
    /// Everything, including vector predication
    Full,
}

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Default)]
enum Format {
    /// Raw binary
    #[default]
    Bin,
    /// Hex listing, one halfword per line
    Hex,
}

#[derive(ClapParser, Debug)]
#[command(name = "t32asm")]
#[command(version = "0.1.0")]
#[command(about = "Assembler for the T32 dual-width instruction set", long_about = None)]
struct Args {
    /// Input assembly file (.s)
    #[arg(required = true)]
    input: PathBuf,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Instruction-set profile
    #[arg(short, long, value_enum, default_value = "dual")]
    profile: Profile,

    /// Output format
    #[arg(short, long, value_enum, default_value = "bin")]
    format: Format,

    /// Synthesize conditional blocks for bare conditional instructions
    #[arg(long)]
    implicit_it: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {:#}", error);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let source = fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let mut reporter = DiagnosticReporter::new();
    let file_id = reporter.add_file(args.input.display().to_string(), source.clone());

    let config = AsmConfig {
        features: match args.profile {
            Profile::Baseline => FeatureSet::baseline(),
            Profile::Dual => FeatureSet::dual_width(),
            Profile::Full => FeatureSet::full(),
        },
        implicit_blocks: args.implicit_it,
    };

    let output = Assembler::new(config).assemble(&source);
    for diag in &output.diagnostics {
        reporter.report(file_id, diag);
    }
    if output.has_errors() {
        anyhow::bail!("assembly failed");
    }

    if args.verbose {
        eprintln!("=== Symbols ===");
        for (name, addr) in &output.symbols {
            eprintln!("  {} = {:#06x}", name, addr);
        }
        if !output.relocations.is_empty() {
            eprintln!("=== Relocations ===");
            for reloc in &output.relocations {
                eprintln!(
                    "  {:#06x} {:?} {}{:+} {}",
                    reloc.offset,
                    reloc.kind,
                    reloc.symbol,
                    reloc.addend,
                    if reloc.pc_rel { "(pc-rel)" } else { "" }
                );
            }
        }
    }

    let extension = match args.format {
        Format::Bin => "bin",
        Format::Hex => "hex",
    };
    let out_path = args
        .output
        .unwrap_or_else(|| args.input.with_extension(extension));

    match args.format {
        Format::Bin => {
            fs::write(&out_path, &output.data)
                .with_context(|| format!("writing {}", out_path.display()))?;
        }
        Format::Hex => {
            let mut text = String::new();
            for chunk in output.data.chunks(2) {
                let halfword = match chunk {
                    [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                    [lo] => u16::from(*lo),
                    _ => unreachable!(),
                };
                writeln!(text, "{:04X}", halfword).expect("writing to a string");
            }
            fs::write(&out_path, text)
                .with_context(|| format!("writing {}", out_path.display()))?;
        }
    }

    if args.verbose {
        eprintln!(
            "Assembled {} bytes to {}",
            output.data.len(),
            out_path.display()
        );
    }

    Ok(())
}
