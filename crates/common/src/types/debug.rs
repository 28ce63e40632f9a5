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

//! Debugger payload types.
//!
//! These are the structures handed to the step-through debugger UI. Field
//! names follow the UI's JSON contract (camelCase, plus the historical
//! `classesDebuggerData`/`sierraStatementsToCairoInfo` keys the UI reads).

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, Selector, U256};
use serde::{Deserialize, Serialize};

use crate::{CallKind, SourceFile, TxMetadata};

/// One entry of a compiler source map: `start:length:fileIndex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    /// Byte offset into the source file
    pub start: usize,
    /// Length in bytes
    pub length: usize,
    /// Compiler source index, `-1` when the instruction has no source
    pub file_index: i64,
}

impl SourceRange {
    /// Whether the range points into a real source file.
    pub fn has_source(&self) -> bool {
        self.file_index >= 0
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.length, self.file_index)
    }
}

/// Error returned for a malformed `start:length:fileIndex` triple.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid source range `{0}`")]
pub struct InvalidSourceRange(pub String);

impl FromStr for SourceRange {
    type Err = InvalidSourceRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let mut next = || parts.next().ok_or_else(|| InvalidSourceRange(s.to_string()));
        let start = next()?.parse().map_err(|_| InvalidSourceRange(s.to_string()))?;
        let length = next()?.parse().map_err(|_| InvalidSourceRange(s.to_string()))?;
        let file_index = next()?.parse().map_err(|_| InvalidSourceRange(s.to_string()))?;
        Ok(Self { start, length, file_index })
    }
}

/// Per-contract debug artifact built from the compiler's debug output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugCallContract {
    /// Contract address
    pub address: Address,
    /// Contract name
    pub name: Option<String>,
    /// Program counter -> `start:length:fileIndex`
    pub pc_to_source_mappings: BTreeMap<usize, String>,
    /// Compiler source index -> source file
    pub sources: BTreeMap<i64, SourceFile>,
    /// ABI
    pub abi: JsonAbi,
}

impl DebugCallContract {
    /// The decoded source range for `pc`, if the compiler mapped it to a file.
    pub fn source_range(&self, pc: usize) -> Option<SourceRange> {
        self.pc_to_source_mappings
            .get(&pc)
            .and_then(|m| m.parse::<SourceRange>().ok())
            .filter(SourceRange::has_source)
    }
}

/// Zero-based line/column position in a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodePosition {
    /// Line, zero-based
    pub line: usize,
    /// Column in bytes, zero-based
    pub col: usize,
}

/// A source span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    /// Start of the span
    pub start: CodePosition,
    /// End of the span (exclusive)
    pub end: CodePosition,
    /// Source file path
    pub file_path: String,
}

/// How an external frame was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    /// Call type
    pub call_type: CallKind,
    /// Function selector, when the calldata has one
    pub entry_point_selector: Option<Selector>,
    /// Full calldata
    pub calldata: Bytes,
    /// Caller
    pub caller_address: Address,
    /// Account whose storage the frame operates on
    pub storage_address: Option<Address>,
    /// Account whose code runs in the frame
    pub code_address: Option<Address>,
    /// Transferred value
    pub value: U256,
}

/// Execution result of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallResult {
    /// The frame returned normally
    Success {
        /// Return data
        #[serde(rename = "retData")]
        ret_data: Bytes,
    },
    /// The frame reverted or halted
    Failure {
        /// Error message
        error: String,
        /// Revert data
        #[serde(rename = "retData")]
        ret_data: Bytes,
    },
}

impl CallResult {
    /// Whether the frame succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A decoded ABI value, or a placeholder when decoding failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DecodedValue {
    /// Successfully decoded
    Decoded {
        /// JSON rendering of the value
        value: serde_json::Value,
        /// Human-readable rendering
        display: String,
    },
    /// Decoding failed for this field only
    Undecoded {
        /// Raw bytes that were attempted, if any could be located
        raw: Bytes,
        /// Why decoding failed
        reason: String,
    },
}

impl DecodedValue {
    /// Whether the value was decoded.
    pub fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded { .. })
    }
}

/// A named, typed, decoded parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedParam {
    /// Parameter name, may be empty
    pub name: String,
    /// Solidity type
    #[serde(rename = "type")]
    pub ty: String,
    /// Value
    pub value: DecodedValue,
}

/// An external call frame in the assembled debugger payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
    /// Sequential id
    pub call_id: usize,
    /// Parent external call
    pub parent_call_id: Option<usize>,
    /// Child external calls, in call order
    pub children_call_ids: Vec<usize>,
    /// Internal function calls made directly in this frame
    pub function_call_ids: Vec<usize>,
    /// Index of the frame in the flattened trace
    pub frame_index: usize,
    /// How the frame was entered
    pub entry_point: EntryPoint,
    /// Execution result
    pub result: CallResult,
    /// Resolved contract name
    pub contract_name: Option<String>,
    /// Resolved function name
    pub entry_point_name: Option<String>,
    /// Decoded arguments, empty when the function is unknown
    pub arguments_decoded: Vec<DecodedParam>,
    /// Decoded return values, empty when the function is unknown or failed
    pub result_decoded: Vec<DecodedParam>,
    /// Whether this frame's effects were rolled back
    pub is_reverted_frame: bool,
    /// Whether this is the innermost failing frame
    pub is_deepest_revert: bool,
    /// Error message of the frame
    pub error_message: Option<String>,
    /// Whether the code address has verified source
    pub is_verified: bool,
    /// Whether source-level debug data exists for this frame
    pub debugger_data_available: bool,
    /// Index of the first debugger trace entry of this frame
    pub debugger_trace_step_index: Option<usize>,
    /// Gas provided
    pub gas: U256,
    /// Gas consumed
    pub gas_used: U256,
}

/// An internal function call in the assembled debugger payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    /// Sequential id
    pub function_call_id: usize,
    /// External frame the function runs in
    pub contract_call_id: usize,
    /// Enclosing internal function call
    pub parent_function_call_id: Option<usize>,
    /// Nested internal function calls
    pub children_function_call_ids: Vec<usize>,
    /// Index of the frame in the flattened trace
    pub frame_index: usize,
    /// Stack frame pointer: internal nesting level within the external frame
    pub fp: usize,
    /// Function name, when the frame's input carries a known selector
    pub function_name: Option<String>,
    /// Execution result
    pub result: CallResult,
    /// Decoded arguments
    pub arguments_decoded: Vec<DecodedParam>,
    /// Decoded return values
    pub result_decoded: Vec<DecodedParam>,
    /// Whether this frame's effects were rolled back
    pub is_reverted_frame: bool,
    /// Whether this is the innermost failing frame
    pub is_deepest_revert: bool,
    /// Error message
    pub error_message: Option<String>,
    /// Index of the first debugger trace entry of this frame
    pub debugger_trace_step_index: Option<usize>,
}

/// One source-located execution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerTraceEntry {
    /// Index into the step log
    pub step_index: usize,
    /// Program counter
    pub pc: usize,
    /// Position of `location` in the `pcToSourceInfo` locations of `pc`
    pub location_index: usize,
    /// Owning external call
    pub contract_call_id: usize,
    /// Owning internal call
    pub function_call_id: Option<usize>,
    /// Decoded location
    pub location: CodeLocation,
}

/// Source locations of one program counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcSourceInfo {
    /// Locations, in the order the trace first reached them
    #[serde(rename = "cairoLocations")]
    pub locations: Vec<CodeLocation>,
}

/// Debug data for one contract address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDebuggerData {
    /// Program counter -> locations
    #[serde(rename = "sierraStatementsToCairoInfo")]
    pub pc_to_source_info: BTreeMap<usize, PcSourceInfo>,
    /// File path -> source text
    #[serde(rename = "sourceCode")]
    pub source_code: BTreeMap<String, String>,
}

/// Source-level debug data of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationDebuggerData {
    /// Per-address debug data
    pub classes_debugger_data: BTreeMap<Address, ContractDebuggerData>,
    /// Ordered, source-located steps
    pub debugger_trace: Vec<DebuggerTraceEntry>,
}

/// Category of a compilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompilationFailureKind {
    /// Pragma does not admit the available compiler
    VersionMismatch,
    /// An imported file is missing from the verified sources
    MissingSource,
    /// Parser or type checker rejected the source
    SyntaxError,
    /// No `pragma solidity` directive found in the main source
    PragmaNotFound,
    /// The compiler exited cleanly but produced no debug output
    EmptyDebugOutput,
    /// The compiler process failed for another reason
    Process,
    /// Scratch space could not be written or read
    Io,
}

impl fmt::Display for CompilationFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::VersionMismatch => "version mismatch",
            Self::MissingSource => "missing source",
            Self::SyntaxError => "syntax error",
            Self::PragmaNotFound => "pragma not found",
            Self::EmptyDebugOutput => "empty debug output",
            Self::Process => "compiler process failure",
            Self::Io => "i/o failure",
        };
        f.write_str(s)
    }
}

/// Compilation diagnostic surfaced next to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationDiagnostic {
    /// Contract address
    pub address: Address,
    /// Contract name
    pub contract_name: Option<String>,
    /// Failure category
    pub kind: CompilationFailureKind,
    /// Whether compilation still went ahead (advisory diagnostics)
    pub blocking: bool,
    /// Scrubbed message
    pub message: String,
}

/// Call maps without source-level data, as produced by the simulation path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTraceInfo {
    /// External calls by id
    pub contract_calls_map: BTreeMap<usize, ContractCall>,
    /// Internal calls by id
    pub function_calls_map: BTreeMap<usize, FunctionCall>,
    /// Transaction the trace belongs to
    pub tx: Option<TxMetadata>,
}

/// The complete debugger payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebuggerInfo {
    /// External calls by id
    pub contract_calls_map: BTreeMap<usize, ContractCall>,
    /// Internal calls by id
    pub function_calls_map: BTreeMap<usize, FunctionCall>,
    /// Source-level data
    pub simulation_debugger_data: SimulationDebuggerData,
    /// Compilation diagnostics
    pub diagnostics: Vec<CompilationDiagnostic>,
    /// Transaction the trace belongs to
    pub tx: Option<TxMetadata>,
}
