// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::core::error::{AsmError, AsmErrorKind, AsmRunError};

pub const VERSION: &str = "1.0";

const LONG_ABOUT: &str = "MOS 6502 assembler and disassembler for Commodore 64 .prg images.

The assembler reads 6502 source and writes a .prg file: a $0801 load
address followed by a tokenized BASIC SYS stub, so the program runs
automatically when loaded. Supported operand forms are implied/accumulator,
#immediate, and 16-bit absolute (a $hex or decimal literal, or a label).
Errors are reported per line and assembly continues; the image is written
best-effort.

With -d, the input is decoded back to a listing on stdout instead.";

#[derive(Parser, Debug)]
#[command(
    name = "prgForge",
    version = VERSION,
    about = "MOS 6502 assembler and disassembler for C64 .prg images",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "FILE",
        long_help = "Input file: 6502 assembly source, or a .prg image with -d."
    )]
    pub infile: PathBuf,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "FILE",
        long_help = "Output .prg filename. Defaults to the input filename with a .prg extension."
    )]
    pub outfile: Option<PathBuf>,
    #[arg(
        short = 'd',
        long = "disassemble",
        action = ArgAction::SetTrue,
        long_help = "Disassemble FILE as a .prg image and print the listing to stdout."
    )]
    pub disassemble: bool,
    #[arg(
        short = 'c',
        long = "cycles",
        action = ArgAction::SetTrue,
        long_help = "Append cycle counts to disassembly lines. Requires -d."
    )]
    pub show_cycles: bool,
    #[arg(
        short = 'L',
        long = "labels",
        action = ArgAction::SetTrue,
        long_help = "Append the label column to disassembly lines. Requires -d."
    )]
    pub show_labels: bool,
}

fn cli_error(msg: &str) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Cli, msg, None),
        Vec::new(),
        Vec::new(),
    )
}

/// Check flag combinations that clap cannot express.
pub fn validate_cli(cli: &Cli) -> Result<(), AsmRunError> {
    if cli.disassemble {
        if cli.outfile.is_some() {
            return Err(cli_error("-o/--outfile is only used when assembling"));
        }
    } else {
        if cli.show_cycles {
            return Err(cli_error("-c/--cycles requires -d/--disassemble"));
        }
        if cli.show_labels {
            return Err(cli_error("-L/--labels requires -d/--disassemble"));
        }
    }
    Ok(())
}

/// The `.prg` path to write: `-o` when given, else the input with a `.prg`
/// extension.
pub fn resolve_output_path(cli: &Cli) -> PathBuf {
    cli.outfile
        .clone()
        .unwrap_or_else(|| cli.infile.with_extension("prg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("args parse")
    }

    #[test]
    fn output_defaults_to_input_base() {
        let cli = parse(&["prgForge", "demo.asm"]);
        assert_eq!(resolve_output_path(&cli), PathBuf::from("demo.prg"));
    }

    #[test]
    fn explicit_outfile_wins() {
        let cli = parse(&["prgForge", "-o", "game.prg", "demo.asm"]);
        assert_eq!(resolve_output_path(&cli), PathBuf::from("game.prg"));
    }

    #[test]
    fn disasm_flags_require_disassemble_mode() {
        let cli = parse(&["prgForge", "-c", "demo.asm"]);
        assert!(validate_cli(&cli).is_err());
        let cli = parse(&["prgForge", "-L", "demo.asm"]);
        assert!(validate_cli(&cli).is_err());
        let cli = parse(&["prgForge", "-d", "-c", "-L", "demo.prg"]);
        assert!(validate_cli(&cli).is_ok());
    }

    #[test]
    fn outfile_is_rejected_when_disassembling() {
        let cli = parse(&["prgForge", "-d", "-o", "x.prg", "demo.prg"]);
        assert!(validate_cli(&cli).is_err());
    }
}
