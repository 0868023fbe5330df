//! `elfdasm` -- the CLI collaborator around the x86-64 codec and ELF64
//! reader. One positional path argument, no flags that affect decoding
//! semantics (`--verbose` only raises the `tracing` filter level).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use elf64::Elf64;
use x86dasm::cursor::Cursor;
use x86dasm::decoder::decode_one;
use x86dasm::intel_syntax::to_intel_syntax;

/// Disassemble the executable sections of an ELF64/x86-64 binary.
#[derive(Parser, Debug)]
#[command(name = "elfdasm", version, about)]
struct Args {
    /// Path to the ELF64 executable to disassemble.
    path: PathBuf,

    /// Raise logging verbosity. Does not affect decoder/encoder semantics.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Renders `bytes` as the space-separated lowercase hex dump used in
/// decode-failure reports.
fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;

    let elf = Elf64::parse(&bytes)
        .with_context(|| format!("parsing ELF64 header of {}", args.path.display()))?;

    tracing::info!(
        path = %args.path.display(),
        entry = format!("{:#x}", elf.header.entry),
        "parsed ELF64 file"
    );

    let mut had_error = false;

    for section in elf.executable_sections() {
        let code = elf.section_bytes(section);
        tracing::debug!(
            section = %section.name,
            addr = format!("{:#x}", section.addr),
            size = code.len(),
            "disassembling section"
        );

        let mut cursor = Cursor::new(code);
        while !cursor.is_empty() {
            let start = cursor.position();
            match decode_one(&mut cursor) {
                Ok(instr) => {
                    let vaddr = section.addr + start as u64;
                    println!("{vaddr:#010x}: {}", to_intel_syntax(&instr, 8, true));
                }
                Err(e) => {
                    let vaddr = section.addr + e.offset() as u64;
                    let consumed = cursor.consumed_since(start);
                    eprintln!(
                        "error: {} ({}): section {}, offset {vaddr:#x}: {e}",
                        args.path.display(),
                        hex_dump(consumed),
                        section.name,
                    );
                    had_error = true;
                    break;
                }
            }
        }
    }

    if had_error {
        std::process::exit(1);
    }

    Ok(())
}
