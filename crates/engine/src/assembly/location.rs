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

use walnut_common::{CodeLocation, CodePosition, SourceFile, SourceRange};

/// Zero-based line and byte column of `offset` in `source`. Offsets past the
/// end clamp to the end.
pub fn offset_to_position(source: &str, offset: usize) -> CodePosition {
    let bytes = &source.as_bytes()[..offset.min(source.len())];
    let line = bytes.iter().filter(|b| **b == b'\n').count();
    let col = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(newline) => bytes.len() - newline - 1,
        None => bytes.len(),
    };
    CodePosition { line, col }
}

/// The span `range` covers in `file`.
pub fn range_to_location(file: &SourceFile, range: SourceRange) -> CodeLocation {
    CodeLocation {
        start: offset_to_position(&file.content, range.start),
        end: offset_to_position(&file.content, range.start.saturating_add(range.length)),
        file_path: file.path.clone(),
    }
}
