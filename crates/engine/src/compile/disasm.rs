// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! EVM bytecode disassembly.
//!
//! Legacy source maps have one entry per instruction, not per byte, so
//! turning them into a program-counter table needs the byte offset of every
//! instruction.

use revm::bytecode::opcode::{OpCode, PUSH0};

/// Immediate bytes following `byte`; only `PUSHn` carries any.
fn immediate_size(byte: u8) -> usize {
    match OpCode::new(byte) {
        Some(op) if op.is_push() => (byte - PUSH0) as usize,
        _ => 0,
    }
}

/// Byte offset of every instruction in `code`. A `PUSHn` cut short by the end
/// of the code still counts as one instruction.
pub fn instruction_offsets(code: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        offsets.push(pc);
        pc += 1 + immediate_size(code[pc]);
    }
    offsets
}

/// Decode solc's hex output, zeroing unlinked library placeholders
/// (`__$<hash>$__`).
pub fn decode_solc_hex(text: &str) -> Option<Vec<u8>> {
    let text = text.trim().trim_start_matches("0x");
    let mut cleaned = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("__") {
        cleaned.push_str(&rest[..start]);
        // placeholders are always 40 hex characters wide
        let width = 40.min(rest.len() - start);
        cleaned.push_str(&"0".repeat(width));
        rest = &rest[start + width..];
    }
    cleaned.push_str(rest);
    alloy_primitives::hex::decode(cleaned).ok()
}
