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

//! Reading the compiler's debug output into program-counter tables.
//!
//! Two layouts are understood:
//!
//! - ethdebug: `ethdebug.json` lists the compilation sources and
//!   `<Name>_ethdebug-runtime.json` is the runtime program whose instructions
//!   carry their byte offset and source range.
//! - legacy: `<Name>.srcmap-runtime` holds the compressed per-instruction
//!   source map and `<Name>.bin-runtime` the code it describes.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde_json::Value;
use tracing::debug;
use walnut_common::{CompilationFailureKind, DebugCallContract, SourceFile, SourceRange};

use super::{
    disasm::{decode_solc_hex, instruction_offsets},
    workspace::sanitize_path,
    CompilationError,
};

/// Expand a compressed `s:l:f:j:m;...` source map.
///
/// Empty fields repeat the previous entry's value. Only `s`, `l` and `f` are
/// kept.
pub fn decompress_source_map(map: &str) -> Vec<SourceRange> {
    let mut current = SourceRange { start: 0, length: 0, file_index: -1 };
    map.split(';')
        .map(|entry| {
            let mut fields = entry.split(':');
            if let Some(start) = fields.next().and_then(|s| s.parse().ok()) {
                current.start = start;
            }
            if let Some(length) = fields.next().and_then(|s| s.parse().ok()) {
                current.length = length;
            }
            if let Some(file_index) = fields.next().and_then(|s| s.parse().ok()) {
                current.file_index = file_index;
            }
            current
        })
        .collect()
}

/// Program-counter table from runtime code and its compressed source map.
pub fn legacy_mappings(code: &[u8], source_map: &str) -> BTreeMap<usize, String> {
    instruction_offsets(code)
        .into_iter()
        .zip(decompress_source_map(source_map))
        .map(|(pc, range)| (pc, range.to_string()))
        .collect()
}

/// First `{source: {id}, range: {offset, length}}` code context in an
/// ethdebug instruction context. Contexts nest through `gather`/`pick`.
fn code_context(context: &Value) -> Option<SourceRange> {
    if let Some(code) = context.get("code") {
        let file_index = code.pointer("/source/id").and_then(json_i64)?;
        let start = code.pointer("/range/offset").and_then(json_usize)?;
        let length = code.pointer("/range/length").and_then(json_usize).unwrap_or(0);
        return Some(SourceRange { start, length, file_index });
    }
    ["gather", "pick"]
        .iter()
        .filter_map(|key| context.get(*key).and_then(Value::as_array))
        .flatten()
        .find_map(code_context)
}

fn json_i64(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn json_usize(value: &Value) -> Option<usize> {
    value.as_u64().map(|n| n as usize).or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Program-counter table of an ethdebug program.
pub fn ethdebug_mappings(program: &Value) -> BTreeMap<usize, String> {
    program
        .get("instructions")
        .and_then(Value::as_array)
        .map(|instructions| {
            instructions
                .iter()
                .filter_map(|instruction| {
                    let pc = instruction.get("offset").and_then(json_usize)?;
                    let range = instruction
                        .get("context")
                        .and_then(code_context)
                        .unwrap_or(SourceRange { start: 0, length: 0, file_index: -1 });
                    Some((pc, range.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Compilation sources of an ethdebug document, by source id.
pub fn ethdebug_sources(document: &Value) -> BTreeMap<i64, SourceFile> {
    let sources =
        document.pointer("/compilation/sources").or_else(|| document.get("sources"));
    sources
        .and_then(Value::as_array)
        .map(|sources| {
            sources
                .iter()
                .filter_map(|source| {
                    let id = source.get("id").and_then(json_i64)?;
                    let path = source.get("path").and_then(Value::as_str)?;
                    let contents = source.get("contents").and_then(Value::as_str).unwrap_or("");
                    Some((id, SourceFile::new(path, contents)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Sources numbered the way the compiler numbers them on the command line:
/// sorted by path.
pub fn indexed_sources(sources: &[SourceFile]) -> BTreeMap<i64, SourceFile> {
    let mut sorted: Vec<SourceFile> = sources
        .iter()
        .map(|s| SourceFile::new(sanitize_path(&s.path).to_string_lossy(), s.content.clone()))
        .collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    sorted.into_iter().enumerate().map(|(i, s)| (i as i64, s)).collect()
}

async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, CompilationError> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(CompilationError::io)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(CompilationError::io)? {
        if entry.file_type().await.map_err(CompilationError::io)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

async fn read_json(path: &Path) -> Result<Value, CompilationError> {
    let text = tokio::fs::read_to_string(path).await.map_err(CompilationError::io)?;
    serde_json::from_str(&text).map_err(|e| {
        CompilationError::new(
            CompilationFailureKind::EmptyDebugOutput,
            format!("{} is not valid JSON: {e}", file_name(path)),
        )
    })
}

/// Whether `program` belongs to the contract named `name`.
fn program_is_for(program: &Value, path: &Path, name: &str) -> bool {
    match program.pointer("/contract/name").and_then(Value::as_str) {
        Some(declared) => declared == name,
        None => file_name(path).starts_with(&format!("{name}_")),
    }
}

/// Read the debug output for `contract_name` from `debug_dir`.
///
/// `written` is the source set handed to the compiler; it numbers the sources
/// when the debug output does not list them itself. The returned contract has
/// no address or ABI yet.
pub async fn parse_debug_output(
    debug_dir: &Path,
    contract_name: &str,
    written: &[SourceFile],
) -> Result<DebugCallContract, CompilationError> {
    let files = list_files(debug_dir).await?;
    let empty = || {
        CompilationError::new(
            CompilationFailureKind::EmptyDebugOutput,
            format!("no runtime debug information for {contract_name}"),
        )
    };

    let mut sources = BTreeMap::new();
    if let Some(path) = files.iter().find(|p| file_name(p) == "ethdebug.json") {
        sources = ethdebug_sources(&read_json(path).await?);
    }

    let mut mappings = BTreeMap::new();
    for path in files.iter().filter(|p| file_name(p).ends_with("ethdebug-runtime.json")) {
        let program = read_json(path).await?;
        if program_is_for(&program, path, contract_name) {
            debug!(contract = contract_name, file = file_name(path), "Using ethdebug program");
            mappings = ethdebug_mappings(&program);
            break;
        }
    }

    if mappings.is_empty() {
        let srcmap = debug_dir.join(format!("{contract_name}.srcmap-runtime"));
        let bin = debug_dir.join(format!("{contract_name}.bin-runtime"));
        if files.contains(&srcmap) && files.contains(&bin) {
            debug!(contract = contract_name, "Using legacy source map");
            let map = tokio::fs::read_to_string(&srcmap).await.map_err(CompilationError::io)?;
            let hex = tokio::fs::read_to_string(&bin).await.map_err(CompilationError::io)?;
            let code = decode_solc_hex(&hex).ok_or_else(|| {
                CompilationError::new(
                    CompilationFailureKind::EmptyDebugOutput,
                    format!("{contract_name}.bin-runtime is not hex"),
                )
            })?;
            mappings = legacy_mappings(&code, map.trim());
        }
    }

    if mappings.is_empty() {
        return Err(empty());
    }
    if sources.is_empty() {
        sources = indexed_sources(written);
    }

    Ok(DebugCallContract {
        name: Some(contract_name.to_string()),
        pc_to_source_mappings: mappings,
        sources,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decompress_source_map_inherits_fields() {
        let ranges = decompress_source_map("1:2:0:-;:3;;5::-1;:::i");
        let rendered: Vec<String> = ranges.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["1:2:0", "1:3:0", "1:3:0", "5:3:-1", "5:3:-1"]);
    }

    #[test]
    fn test_legacy_mappings_use_instruction_offsets() {
        // PUSH1 0x80 PUSH1 0x40 MSTORE
        let code = [0x60, 0x80, 0x60, 0x40, 0x52];
        let mappings = legacy_mappings(&code, "10:4:0;;20:1:0");
        assert_eq!(mappings.get(&0).map(String::as_str), Some("10:4:0"));
        assert_eq!(mappings.get(&2).map(String::as_str), Some("10:4:0"));
        assert_eq!(mappings.get(&4).map(String::as_str), Some("20:1:0"));
        assert!(!mappings.contains_key(&1));
    }

    #[test]
    fn test_ethdebug_program() {
        let program = json!({
            "contract": {"name": "Token"},
            "instructions": [
                {"offset": 0, "operation": {"mnemonic": "PUSH1"}, "context": {"code": {"source": {"id": 0}, "range": {"offset": 40, "length": 12}}}},
                {"offset": 2, "operation": {"mnemonic": "PUSH1"}},
                {"offset": 4, "context": {"gather": [{"frame": "x"}, {"code": {"source": {"id": "1"}, "range": {"offset": "7", "length": 3}}}]}}
            ]
        });
        let mappings = ethdebug_mappings(&program);
        assert_eq!(mappings[&0], "40:12:0");
        assert_eq!(mappings[&2], "0:0:-1");
        assert_eq!(mappings[&4], "7:3:1");
    }

    #[test]
    fn test_ethdebug_sources() {
        let doc = json!({"compilation": {"sources": [
            {"id": 0, "path": "src/Token.sol", "contents": "contract Token {}"},
            {"id": 1, "path": "lib/Base.sol", "contents": "contract Base {}"}
        ]}});
        let sources = ethdebug_sources(&doc);
        assert_eq!(sources[&1].path, "lib/Base.sol");
        assert_eq!(sources[&0].content, "contract Token {}");
    }

    #[tokio::test]
    async fn test_parse_debug_output_ethdebug() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ethdebug.json"),
            json!({"compilation": {"sources": [{"id": 0, "path": "A.sol", "contents": "contract A {}"}]}}).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("A_ethdebug-runtime.json"),
            json!({"instructions": [{"offset": 0, "context": {"code": {"source": {"id": 0}, "range": {"offset": 0, "length": 13}}}}]}).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("B_ethdebug-runtime.json"),
            json!({"instructions": [{"offset": 9}]}).to_string(),
        )
        .unwrap();

        let contract = parse_debug_output(dir.path(), "A", &[]).await.unwrap();
        assert_eq!(contract.name.as_deref(), Some("A"));
        assert_eq!(contract.pc_to_source_mappings.len(), 1);
        assert_eq!(contract.sources[&0].path, "A.sol");
    }

    #[tokio::test]
    async fn test_parse_debug_output_legacy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.bin-runtime"), "6080604052").unwrap();
        std::fs::write(dir.path().join("A.srcmap-runtime"), "0:13:0;;").unwrap();
        let written = vec![SourceFile::new("b/Z.sol", ""), SourceFile::new("a/A.sol", "contract A {}")];

        let contract = parse_debug_output(dir.path(), "A", &written).await.unwrap();
        assert_eq!(contract.pc_to_source_mappings.len(), 3);
        assert_eq!(contract.sources[&0].path, "a/A.sol");
    }

    #[tokio::test]
    async fn test_parse_debug_output_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.abi"), "[]").unwrap();
        let err = parse_debug_output(dir.path(), "A", &[]).await.unwrap_err();
        assert_eq!(err.kind, CompilationFailureKind::EmptyDebugOutput);
    }
}
