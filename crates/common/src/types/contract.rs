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

use std::{collections::BTreeMap, fmt};

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};

/// Registry a verified contract was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationSource {
    /// Sourcify-compatible metadata API
    Sourcify,
    /// Blockscout-compatible explorer API
    Blockscout,
}

impl fmt::Display for VerificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sourcify => f.write_str("sourcify"),
            Self::Blockscout => f.write_str("blockscout"),
        }
    }
}

/// A verified source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the compilation root
    pub path: String,
    /// File content
    pub content: String,
}

impl SourceFile {
    /// New source file.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self { path: path.into(), content: content.into() }
    }
}

/// Outcome of compiling a verified contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompilationStatus {
    /// Compiled and produced debug output
    Success,
    /// Compilation failed, see `compilation_error`
    Failed,
    /// Not attempted because the contract is not verified
    Skipped,
}

/// Compiler section of a Solidity metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCompiler {
    /// Full compiler version, e.g. `0.8.26+commit.8a97fa7a`
    pub version: String,
}

/// Optimizer settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Whether the optimizer was enabled
    #[serde(default)]
    pub enabled: bool,
    /// Optimizer runs
    #[serde(default)]
    pub runs: u64,
}

/// Settings section of a Solidity metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataSettings {
    /// Source path -> contract name of the contract that was verified
    #[serde(default)]
    pub compilation_target: BTreeMap<String, String>,
    /// Target EVM version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_version: Option<String>,
    /// Optimizer settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerSettings>,
}

/// The subset of the Solidity compiler metadata document Walnut relies on.
///
/// Registries that do not publish metadata get a synthesized document, so the
/// compilation stage always sees the same input shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerMetadata {
    /// Compiler info
    #[serde(default)]
    pub compiler: MetadataCompiler,
    /// Source language
    #[serde(default = "default_language")]
    pub language: String,
    /// Compilation settings
    #[serde(default)]
    pub settings: MetadataSettings,
    /// Source descriptors (hashes, urls); content is not needed here
    #[serde(default)]
    pub sources: BTreeMap<String, serde_json::Value>,
}

fn default_language() -> String {
    "Solidity".to_string()
}

impl CompilerMetadata {
    /// The `(path, contract name)` pair named in `compilationTarget`.
    pub fn compilation_target(&self) -> Option<(&str, &str)> {
        self.settings
            .compilation_target
            .iter()
            .next()
            .map(|(path, name)| (path.as_str(), name.as_str()))
    }

    /// Compiler version without the `v` prefix and build metadata.
    pub fn short_compiler_version(&self) -> &str {
        let version = self.compiler.version.trim_start_matches('v');
        version.split('+').next().unwrap_or(version)
    }

    /// Optimizer runs, if the optimizer was enabled.
    pub fn optimizer_runs(&self) -> Option<u64> {
        self.settings.optimizer.filter(|o| o.enabled).map(|o| o.runs)
    }
}

/// A contract resolved for one address seen in a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    /// Address the contract was resolved for
    pub address: Address,
    /// Deployed bytecode
    pub bytecode: Bytes,
    /// Contract name
    pub name: Option<String>,
    /// Verified sources, in registry order
    pub sources: Vec<SourceFile>,
    /// ABI (the implementation's ABI for proxies)
    pub abi: JsonAbi,
    /// Whether verified source was found
    pub verified: bool,
    /// Registry the source came from
    pub verification_source: Option<VerificationSource>,
    /// Compiler metadata, real or synthesized
    pub metadata: Option<CompilerMetadata>,
    /// Implementation behind an EIP-1967 proxy
    pub implementation: Option<Address>,
    /// Compilation outcome
    pub compilation_status: Option<CompilationStatus>,
    /// Compilation error, scrubbed
    pub compilation_error: Option<String>,
}

impl Contract {
    /// A contract without verified source.
    pub fn unverified(address: Address, bytecode: Bytes) -> Self {
        Self {
            address,
            bytecode,
            name: None,
            sources: Vec::new(),
            abi: JsonAbi::default(),
            verified: false,
            verification_source: None,
            metadata: None,
            implementation: None,
            compilation_status: None,
            compilation_error: None,
        }
    }

    /// Whether any code is deployed at the address.
    pub fn has_code(&self) -> bool {
        !self.bytecode.is_empty()
    }

    /// `(path, contract name)` that should be compiled.
    ///
    /// Prefers the metadata's `compilationTarget`, then the first source that
    /// declares a contract with the resolved name, then the first source.
    pub fn compilation_target(&self) -> Option<(String, String)> {
        if let Some((path, name)) =
            self.metadata.as_ref().and_then(CompilerMetadata::compilation_target)
        {
            return Some((path.to_string(), name.to_string()));
        }

        let name = self.name.clone()?;
        let declaring = self
            .sources
            .iter()
            .find(|s| declares_contract(&s.content, &name))
            .or_else(|| self.sources.first())?;
        Some((declaring.path.clone(), name))
    }

    /// Source text of the given path.
    pub fn source(&self, path: &str) -> Option<&SourceFile> {
        self.sources.iter().find(|s| s.path == path)
    }
}

/// Whether `source` declares `contract <name>` (or an abstract contract,
/// library or interface with that name).
pub fn declares_contract(source: &str, name: &str) -> bool {
    source.lines().any(|line| {
        let mut words = line.split_whitespace();
        while let Some(word) = words.next() {
            if matches!(word, "contract" | "library" | "interface") {
                if let Some(next) = words.next() {
                    let ident =
                        next.split(|c: char| !(c.is_alphanumeric() || c == '_')).next();
                    if ident == Some(name) {
                        return true;
                    }
                }
            }
        }
        false
    })
}
