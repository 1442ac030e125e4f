// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Two-pass MOS 6502 assembler producing C64 `.prg` images.
//!
//! Pass 0 collects label definitions while tracking the program counter;
//! pass 1 emits the final bytes, resolving label operands against the table
//! built by pass 0. Both passes must emit identical byte counts per source
//! line: that length stability is what makes forward references resolve to
//! the address they will actually have. Errors never abort a run; they
//! accumulate as diagnostics and a best-effort image is still produced.

pub mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use clap::Parser;

use crate::core::error::{
    AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, Severity,
};
use crate::core::label_table::{LabelTable, LabelTableResult};
use crate::core::text_utils::{parse_literal, parse_symbol, split_comment, Cursor};
use crate::disasm::{self, DisasmOptions};
use crate::mos6502::table::{lookup, OpcodeEntry};
use crate::mos6502::AddressMode;

use cli::{resolve_output_path, validate_cli, Cli};

pub use cli::VERSION;

/// Load address encoded in the `.prg` header; also the initial program
/// counter of each pass.
pub const LOAD_ADDRESS: u16 = 0x0801;

/// Address of the first instruction, right after the BASIC auto-run stub.
pub const CODE_START: u16 = 0x080d;

const PASS_COUNT: u8 = 2;

/// Mutable per-pass state, rebuilt from scratch by [`Assembler::start_pass`].
#[derive(Debug)]
pub struct PassContext {
    pub pass: u8,
    pub pc: u16,
    image: Vec<u8>,
}

impl PassContext {
    fn new(pass: u8) -> Self {
        Self {
            pass,
            pc: LOAD_ADDRESS,
            image: Vec::new(),
        }
    }

    fn emit(&mut self, byte: u8) {
        self.image.push(byte);
        self.pc = self.pc.wrapping_add(1);
    }

    fn emit_word(&mut self, word: u16) {
        self.emit((word & 0xff) as u8);
        self.emit((word >> 8) as u8);
    }
}

/// The two-pass assembler.
pub struct Assembler {
    labels: LabelTable,
    diagnostics: Vec<Diagnostic>,
    ctx: PassContext,
    current_line: u32,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            labels: LabelTable::new(),
            diagnostics: Vec::new(),
            ctx: PassContext::new(0),
            current_line: 0,
        }
    }

    /// Reset per-pass state. The label table and diagnostics carry across.
    pub fn start_pass(&mut self, pass: u8) {
        self.ctx = PassContext::new(pass);
    }

    /// Run both passes over the source and return the final image (stub
    /// plus code, without the `.prg` load-address header).
    pub fn assemble(&mut self, lines: &[String]) -> Vec<u8> {
        for pass in 0..PASS_COUNT {
            self.start_pass(pass);
            self.assemble_pass(lines);
        }
        self.ctx.image.clone()
    }

    /// Run the current pass over the source.
    pub fn assemble_pass(&mut self, lines: &[String]) {
        self.emit_basic_stub();
        for (idx, raw) in lines.iter().enumerate() {
            let (code, _comment) = split_comment(raw);
            let line = code.trim();
            if line.is_empty() {
                continue;
            }
            self.assemble_line(line, idx as u32 + 1);
        }
    }

    /// The bytes emitted by the current pass.
    pub fn image(&self) -> &[u8] {
        &self.ctx.image
    }

    /// The full `.prg` byte layout: little-endian load address, then the
    /// image.
    #[must_use]
    pub fn prg(&self) -> Vec<u8> {
        let mut out = LOAD_ADDRESS.to_le_bytes().to_vec();
        out.extend_from_slice(&self.ctx.image);
        out
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Consume the assembler into a run report.
    pub fn into_report(self, file: Option<&str>, source_lines: Vec<String>) -> AsmRunReport {
        let diagnostics = self
            .diagnostics
            .into_iter()
            .map(|diag| diag.with_file(file.map(str::to_string)))
            .collect();
        AsmRunReport::new(diagnostics, source_lines)
    }

    /// Emit the tokenized BASIC line `SYS 2061` that makes the program
    /// auto-run on load: link/line-number words, the SYS token, the target
    /// address as ASCII digits, and three terminator bytes.
    fn emit_basic_stub(&mut self) {
        for byte in [0x0c, 0x08, 0x00, 0x00, 0x9e] {
            self.ctx.emit(byte);
        }
        let addr = u32::from(CODE_START);
        for div in [10000, 1000, 100, 10, 1] {
            if addr >= div {
                self.ctx.emit(0x30 + ((addr / div) % 10) as u8);
            }
        }
        for _ in 0..3 {
            self.ctx.emit(0x00);
        }
    }

    fn error(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.diagnostics.push(Diagnostic::new(
            self.current_line,
            Severity::Error,
            AsmError::new(kind, msg, param),
        ));
    }

    fn assemble_line(&mut self, line: &str, line_no: u32) {
        self.current_line = line_no;

        let text = match split_label(line) {
            Some((name, rest)) => {
                // Definitions happen on the collecting pass only; pass 1
                // sees the same table read-only.
                if self.ctx.pass == 0 {
                    if let LabelTableResult::Duplicate { original_line } =
                        self.labels.add(name, self.ctx.pc, line_no)
                    {
                        self.error(
                            AsmErrorKind::DuplicateLabel,
                            &format!("Label '{name}' already defined on line {original_line}"),
                            None,
                        );
                        return;
                    }
                }
                rest
            }
            None => line,
        };

        // Label-only line.
        if text.is_empty() {
            return;
        }

        let mut cursor = Cursor::new(text);
        let Some(word) = cursor.take_word() else {
            self.error(AsmErrorKind::Syntax, "Syntax error", Some(line));
            return;
        };
        let mnemonic = word.to_ascii_uppercase();

        let operand = if cursor.peek().is_none() {
            None
        } else if cursor.skip_ws() > 0 {
            Some(cursor.rest())
        } else {
            // Something other than whitespace follows the mnemonic.
            self.error(AsmErrorKind::Syntax, "Syntax error", Some(line));
            return;
        };

        let Some(row) = lookup(&mnemonic) else {
            self.error(
                AsmErrorKind::UnknownMnemonic,
                "Unknown instruction",
                Some(&mnemonic),
            );
            return;
        };

        // Fixed encoding priority. Branch and the indexed/indirect modes
        // have no check here, so those table slots are never emitted.
        if self.check_single(row.modes[AddressMode::Single.slot()]) {
            return;
        }
        if self.check_immediate(operand, row.modes[AddressMode::Immediate.slot()]) {
            return;
        }
        if self.check_absolute(operand, row.modes[AddressMode::Absolute.slot()]) {
            return;
        }

        self.error(
            AsmErrorKind::UnencodableOperand,
            "Operand does not match any supported addressing mode",
            operand,
        );
    }

    /// Implied/accumulator form. Any operand text is irrelevant.
    fn check_single(&mut self, entry: Option<OpcodeEntry>) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        self.ctx.emit(entry.opcode);
        true
    }

    /// `#value` with an 8-bit literal.
    fn check_immediate(&mut self, operand: Option<&str>, entry: Option<OpcodeEntry>) -> bool {
        let (Some(operand), Some(entry)) = (operand, entry) else {
            return false;
        };
        let Some(imm) = operand.strip_prefix('#') else {
            return false;
        };
        let Some(val) = parse_literal(imm) else {
            return false;
        };
        if val > 0xff {
            return false;
        }
        self.ctx.emit(entry.opcode);
        self.ctx.emit(val as u8);
        true
    }

    /// A bare 16-bit literal, or a label reference.
    ///
    /// Always the 3-byte absolute form, even for values that would fit in
    /// zero page. Label operands emit a placeholder word on pass 0 (and on
    /// pass 1 when undefined) so the byte count never depends on whether
    /// the label resolves.
    fn check_absolute(&mut self, operand: Option<&str>, entry: Option<OpcodeEntry>) -> bool {
        let (Some(operand), Some(entry)) = (operand, entry) else {
            return false;
        };

        if let Some(val) = parse_literal(operand) {
            if val > 0xffff {
                return false;
            }
            self.ctx.emit(entry.opcode);
            self.ctx.emit_word(val as u16);
            return true;
        }

        let Some(symbol) = parse_symbol(operand) else {
            return false;
        };
        if self.ctx.pass == 1 {
            let resolved = self.labels.find(symbol).map(|label| label.addr);
            match resolved {
                Some(addr) => {
                    self.ctx.emit(entry.opcode);
                    self.ctx.emit_word(addr);
                }
                None => {
                    self.error(
                        AsmErrorKind::UndefinedLabel,
                        "Undefined label",
                        Some(symbol),
                    );
                    self.ctx.emit(entry.opcode);
                    self.ctx.emit_word(0);
                }
            }
        } else {
            self.ctx.emit(entry.opcode);
            self.ctx.emit_word(0);
        }
        true
    }
}

/// Split an optional `word:` label prefix off a line.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let mut cursor = Cursor::new(line);
    let word = cursor.take_word()?;
    if !cursor.eat(b':') {
        return None;
    }
    cursor.skip_ws();
    Some((word, cursor.rest()))
}

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = Cli::parse();
    validate_cli(&cli)?;
    if cli.disassemble {
        run_disassemble(&cli)
    } else {
        run_assemble(&cli)
    }
}

fn run_assemble(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let source = fs::read_to_string(&cli.infile)
        .map_err(|err| io_run_error("Cannot read input file", &cli.infile, &err))?;
    let lines: Vec<String> = source.lines().map(str::to_string).collect();

    let mut assembler = Assembler::new();
    assembler.assemble(&lines);

    let out_path = resolve_output_path(cli);
    fs::write(&out_path, assembler.prg())
        .map_err(|err| io_run_error("Cannot write output file", &out_path, &err))?;

    let file = cli.infile.display().to_string();
    Ok(assembler.into_report(Some(&file), lines))
}

fn run_disassemble(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let buf = fs::read(&cli.infile)
        .map_err(|err| io_run_error("Cannot read input file", &cli.infile, &err))?;
    let options = DisasmOptions {
        show_labels: cli.show_labels,
        show_cycles: cli.show_cycles,
        is_instruction: None,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in disasm::disassemble(&buf, &[], options) {
        writeln!(out, "{line}")
            .map_err(|err| io_run_error("Cannot write listing", &cli.infile, &err))?;
    }
    Ok(AsmRunReport::new(Vec::new(), Vec::new()))
}

fn io_run_error(msg: &str, path: &Path, err: &io::Error) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(
            AsmErrorKind::Io,
            msg,
            Some(&format!("{}: {err}", path.display())),
        ),
        Vec::new(),
        Vec::new(),
    )
}
