// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Disassembler for `.prg` machine-code images.
//!
//! The first two bytes of the buffer are the little-endian load address;
//! decoding starts there. Bytes with no instruction-table entry (or bytes
//! rejected by the [`DisasmOptions::is_instruction`] predicate) are never an
//! error: they accumulate into pending runs and are flushed as hex-dump
//! lines. Disassembly is total over any input.

use std::collections::HashMap;
use std::sync::Arc;

use crate::mos6502::table::{
    cycle_base, cycle_modifier, reverse_lookup, ReverseEntry, CYCLE_MOD_BRANCH, CYCLE_MOD_NONE,
};
use crate::mos6502::AddressMode;

/// Predicate deciding whether a position should be decoded as an opcode.
pub type InstructionPredicate = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// A label annotation attached to an address.
///
/// When several annotations share an address, the later one wins.
#[derive(Debug, Clone)]
pub struct LabelAnnotation {
    pub name: String,
    pub addr: u16,
}

/// Options controlling disassembly output.
#[derive(Clone, Default)]
pub struct DisasmOptions {
    /// Append the label bound to each instruction address.
    pub show_labels: bool,
    /// Append the cycle count of each instruction.
    pub show_cycles: bool,
    /// Positions rejected by this predicate are dumped as raw bytes.
    /// `None` means every position is eligible.
    pub is_instruction: Option<InstructionPredicate>,
}

/// A single decoded instruction.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    pub address: u16,
    pub bytes: Vec<u8>,
    pub mnemonic: &'static str,
    pub operand_text: String,
    pub cycle_string: Option<String>,
    pub label: Option<String>,
}

impl DecodedInstruction {
    /// The assembly text: mnemonic plus operand, if any.
    pub fn text(&self) -> String {
        if self.operand_text.is_empty() {
            self.mnemonic.to_string()
        } else {
            format!("{} {}", self.mnemonic, self.operand_text)
        }
    }
}

/// Format a packed cycle byte as a cycle-count string.
///
/// `crosses_page` is meaningful for branch instructions only: a taken
/// branch whose target sits on a different page costs one more cycle.
pub fn cycle_string(cycles: u8, crosses_page: bool) -> String {
    let base = cycle_base(cycles);
    match cycle_modifier(cycles) {
        CYCLE_MOD_NONE => format!("{base}"),
        CYCLE_MOD_BRANCH => {
            if crosses_page {
                format!("{}/{}", base + 1, base + 2)
            } else {
                format!("{}/{}", base, base + 1)
            }
        }
        _ => format!("{}/{}", base, base + 1),
    }
}

const PAD_PLAIN: &str = "     ";
const PAD_WIDE: &str = "                    ";

/// Disassembler over a `.prg` byte buffer.
pub struct Disassembler<'a> {
    buf: &'a [u8],
    cur_addr: u16,
    cur_offs: usize,
    labels_by_addr: HashMap<u16, String>,
    options: DisasmOptions,
    output: Vec<String>,
    pending: Vec<u8>,
    pending_start: u16,
    pad: &'static str,
    bytes_per_line: usize,
}

impl<'a> Disassembler<'a> {
    pub fn new(buf: &'a [u8], labels: &[LabelAnnotation], options: DisasmOptions) -> Self {
        let (cur_addr, cur_offs) = if buf.len() >= 2 {
            (u16::from_le_bytes([buf[0], buf[1]]), 2)
        } else {
            (0, buf.len())
        };

        let mut labels_by_addr = HashMap::new();
        for label in labels {
            labels_by_addr.insert(label.addr, label.name.clone());
        }

        let (pad, bytes_per_line) = if options.is_instruction.is_some() {
            (PAD_WIDE, 8)
        } else {
            (PAD_PLAIN, 1)
        };

        Self {
            buf,
            cur_addr,
            cur_offs,
            labels_by_addr,
            options,
            output: Vec::new(),
            pending: Vec::new(),
            pending_start: 0,
            pad,
            bytes_per_line,
        }
    }

    /// Run the decode loop and return the output lines.
    pub fn disassemble(mut self) -> Vec<String> {
        while self.cur_offs < self.buf.len() {
            let addr = self.cur_addr;
            let op = self.buf[self.cur_offs];

            let eligible = match &self.options.is_instruction {
                Some(pred) => pred(addr),
                None => true,
            };
            let entry = if eligible { reverse_lookup(op) } else { None };

            let Some(entry) = entry else {
                self.push_unknown(op);
                continue;
            };

            let size = entry.mode.operand_size();
            if self.cur_offs + 1 + size > self.buf.len() {
                // Truncated operand; dump the opcode byte instead.
                self.push_unknown(op);
                continue;
            }

            let operands = &self.buf[self.cur_offs + 1..self.cur_offs + 1 + size];
            let decoded = self.decode(addr, op, entry, operands);
            self.push_instruction(&decoded);
            self.cur_offs += 1 + size;
            self.cur_addr = self.cur_addr.wrapping_add(1 + size as u16);
        }
        self.flush_pending();
        self.output
    }

    fn decode(
        &self,
        addr: u16,
        op: u8,
        entry: &ReverseEntry,
        operands: &[u8],
    ) -> DecodedInstruction {
        let mut bytes = vec![op];
        bytes.extend_from_slice(operands);

        let word = |ops: &[u8]| u16::from(ops[0]) | (u16::from(ops[1]) << 8);
        let mut crosses_page = false;
        let operand_text = match entry.mode {
            AddressMode::Immediate => format!("#${:02X}", operands[0]),
            AddressMode::ZeroPage => format!("${:02X}", operands[0]),
            AddressMode::ZeroPageX => format!("${:02X},X", operands[0]),
            AddressMode::ZeroPageY => format!("${:02X},Y", operands[0]),
            AddressMode::Absolute => format!("${:04X}", word(operands)),
            AddressMode::AbsoluteX => format!("${:04X},X", word(operands)),
            AddressMode::AbsoluteY => format!("${:04X},Y", word(operands)),
            AddressMode::Indirect => format!("(${:04X})", word(operands)),
            AddressMode::IndirectX => format!("(${:02X},X)", operands[0]),
            AddressMode::IndirectY => format!("(${:02X}),Y", operands[0]),
            AddressMode::Single => String::new(),
            AddressMode::Branch => {
                let offset = if operands[0] >= 128 {
                    i32::from(operands[0]) - 256
                } else {
                    i32::from(operands[0])
                };
                let target = ((i32::from(addr) + offset + 2) & 0xffff) as u16;
                crosses_page =
                    (u32::from(addr).wrapping_add(2) & !0xff) != (u32::from(target) & !0xff);
                format!("${target:04X}")
            }
        };

        DecodedInstruction {
            address: addr,
            bytes,
            mnemonic: entry.mnemonic,
            operand_text,
            cycle_string: Some(cycle_string(entry.cycles, crosses_page)),
            label: self.labels_by_addr.get(&addr).cloned(),
        }
    }

    fn push_instruction(&mut self, decoded: &DecodedInstruction) {
        self.flush_pending();
        let b0 = format!("{:02X}", decoded.bytes[0]);
        let b1 = decoded
            .bytes
            .get(1)
            .map_or_else(|| "  ".to_string(), |b| format!("{b:02X}"));
        let b2 = decoded
            .bytes
            .get(2)
            .map_or_else(|| "  ".to_string(), |b| format!("{b:02X}"));
        let line = format!(
            "{:04X}: {} {} {}{}{}",
            decoded.address,
            b0,
            b1,
            b2,
            self.pad,
            decoded.text()
        );

        if self.options.show_cycles || self.options.show_labels {
            let mut elts: Vec<&str> = Vec::new();
            if self.options.show_cycles {
                elts.push(decoded.cycle_string.as_deref().unwrap_or(""));
            }
            if self.options.show_labels {
                elts.push(decoded.label.as_deref().unwrap_or(""));
            }
            self.output.push(format!("{line:<50}; {}", elts.join(" ")));
        } else {
            self.output.push(line);
        }
    }

    fn push_unknown(&mut self, op: u8) {
        if self.pending.is_empty() {
            self.pending_start = self.cur_addr;
        }
        self.pending.push(op);
        self.cur_offs += 1;
        self.cur_addr = self.cur_addr.wrapping_add(1);
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut pc = self.pending_start;
        for chunk in self.pending.chunks(self.bytes_per_line) {
            let text = chunk
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(" ");
            self.output.push(format!("{pc:04X}: {text}"));
            pc = pc.wrapping_add(self.bytes_per_line as u16);
        }
        self.pending.clear();
    }
}

/// Disassemble a `.prg` buffer into output lines.
pub fn disassemble(
    buf: &[u8],
    labels: &[LabelAnnotation],
    options: DisasmOptions,
) -> Vec<String> {
    Disassembler::new(buf, labels, options).disassemble()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mos6502::table::CYCLE_MOD_SHIFT;

    fn prg(bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x01, 0x08];
        buf.extend_from_slice(bytes);
        buf
    }

    #[test]
    fn cycle_string_fixed() {
        assert_eq!(cycle_string(7, false), "7");
        assert_eq!(cycle_string(2, false), "2");
    }

    #[test]
    fn cycle_string_page_cross() {
        let cycles = 4 | (1 << CYCLE_MOD_SHIFT);
        assert_eq!(cycle_string(cycles, false), "4/5");
    }

    #[test]
    fn cycle_string_branch() {
        let cycles = 4 | (CYCLE_MOD_BRANCH << CYCLE_MOD_SHIFT);
        assert_eq!(cycle_string(cycles, true), "5/6");
        assert_eq!(cycle_string(cycles, false), "4/5");
    }

    #[test]
    fn decodes_immediate() {
        let lines = disassemble(&prg(&[0xa9, 0x05]), &[], DisasmOptions::default());
        assert_eq!(lines, vec!["0801: A9 05        LDA #$05".to_string()]);
    }

    #[test]
    fn decodes_single_and_absolute() {
        let lines = disassemble(&prg(&[0xea, 0x4c, 0x0d, 0x08]), &[], DisasmOptions::default());
        assert_eq!(
            lines,
            vec![
                "0801: EA           NOP".to_string(),
                "0802: 4C 0D 08     JMP $080D".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_byte_dumps_as_hex() {
        let lines = disassemble(&prg(&[0xff]), &[], DisasmOptions::default());
        assert_eq!(lines, vec!["0801: FF".to_string()]);
    }

    #[test]
    fn unknown_run_is_one_byte_per_line_by_default() {
        let lines = disassemble(&prg(&[0xff, 0xff, 0xea]), &[], DisasmOptions::default());
        assert_eq!(
            lines,
            vec![
                "0801: FF".to_string(),
                "0802: FF".to_string(),
                "0803: EA           NOP".to_string(),
            ]
        );
    }

    #[test]
    fn predicate_rejection_dumps_eight_bytes_per_line() {
        let options = DisasmOptions {
            is_instruction: Some(Arc::new(|_| false)),
            ..DisasmOptions::default()
        };
        let bytes: Vec<u8> = (0..10).map(|i| 0xf0 + i).collect();
        let lines = disassemble(&prg(&bytes), &[], options);
        assert_eq!(
            lines,
            vec![
                "0801: F0 F1 F2 F3 F4 F5 F6 F7".to_string(),
                "0809: F8 F9".to_string(),
            ]
        );
    }

    #[test]
    fn branch_target_and_cycles() {
        // BNE with offset -2 branches back onto itself.
        let mut buf = vec![0x00, 0x10];
        buf.extend_from_slice(&[0xd0, 0xfe]);
        let options = DisasmOptions {
            show_cycles: true,
            ..DisasmOptions::default()
        };
        let lines = disassemble(&buf, &[], options);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("1000: D0 FE        BNE $1000"), "line: {line}");
        assert!(line.ends_with("; 2/3"), "line: {line}");
    }

    #[test]
    fn branch_crossing_a_page_costs_more() {
        // BNE at $10F0 with offset $20 lands at $1112, crossing a page.
        let buf = vec![0xf0, 0x10, 0xd0, 0x20];
        let options = DisasmOptions {
            show_cycles: true,
            ..DisasmOptions::default()
        };
        let lines = disassemble(&buf, &[], options);
        assert!(lines[0].contains("BNE $1112"), "line: {}", lines[0]);
        assert!(lines[0].ends_with("; 3/4"), "line: {}", lines[0]);
    }

    #[test]
    fn labels_annotate_matching_addresses() {
        let labels = vec![LabelAnnotation {
            name: "start".to_string(),
            addr: 0x0801,
        }];
        let options = DisasmOptions {
            show_labels: true,
            ..DisasmOptions::default()
        };
        let lines = disassemble(&prg(&[0xea, 0xea]), &labels, options);
        assert!(lines[0].ends_with("; start"), "line: {}", lines[0]);
        assert!(lines[1].ends_with("; "), "line: {}", lines[1]);
    }

    #[test]
    fn later_label_annotation_wins() {
        let labels = vec![
            LabelAnnotation {
                name: "old".to_string(),
                addr: 0x0801,
            },
            LabelAnnotation {
                name: "new".to_string(),
                addr: 0x0801,
            },
        ];
        let options = DisasmOptions {
            show_labels: true,
            ..DisasmOptions::default()
        };
        let lines = disassemble(&prg(&[0xea]), &labels, options);
        assert!(lines[0].ends_with("; new"), "line: {}", lines[0]);
    }

    #[test]
    fn truncated_operand_becomes_a_dump() {
        // LDA immediate opcode with no operand byte left.
        let lines = disassemble(&prg(&[0xa9]), &[], DisasmOptions::default());
        assert_eq!(lines, vec!["0801: A9".to_string()]);
    }

    #[test]
    fn tiny_buffers_produce_no_output() {
        assert!(disassemble(&[], &[], DisasmOptions::default()).is_empty());
        assert!(disassemble(&[0x01], &[], DisasmOptions::default()).is_empty());
        assert!(disassemble(&[0x01, 0x08], &[], DisasmOptions::default()).is_empty());
    }
}
