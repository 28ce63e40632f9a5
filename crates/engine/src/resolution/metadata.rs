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

//! Synthesized compiler metadata for registries that publish none.

use std::collections::BTreeMap;

use walnut_common::{
    declares_contract, CompilerMetadata, MetadataCompiler, MetadataSettings, OptimizerSettings,
    SourceFile,
};

/// What a registry told us about the compilation.
#[derive(Debug, Clone, Default)]
pub struct MetadataHints<'a> {
    /// Contract name
    pub name: Option<&'a str>,
    /// Compiler version, with or without `v` prefix and build metadata
    pub compiler_version: Option<&'a str>,
    /// Optimizer settings
    pub optimizer: Option<OptimizerSettings>,
    /// Target EVM version
    pub evm_version: Option<&'a str>,
    /// Path the registry says holds the contract
    pub main_path: Option<&'a str>,
}

/// Best guess at the file holding the contract: the file declaring
/// `contract <name>`, else the declared path, else the first file.
pub fn main_source<'s>(
    name: Option<&str>,
    declared_path: Option<&str>,
    sources: &'s [SourceFile],
) -> Option<&'s SourceFile> {
    name.and_then(|name| sources.iter().find(|s| declares_contract(&s.content, name)))
        .or_else(|| declared_path.and_then(|path| sources.iter().find(|s| s.path == path)))
        .or_else(|| sources.first())
}

/// Build a minimal metadata document so compilation sees the same input shape
/// regardless of which registry answered.
pub fn synthesize_metadata(hints: &MetadataHints<'_>, sources: &[SourceFile]) -> CompilerMetadata {
    let mut compilation_target = BTreeMap::new();
    if let (Some(name), Some(main)) =
        (hints.name, main_source(hints.name, hints.main_path, sources))
    {
        compilation_target.insert(main.path.clone(), name.to_string());
    }

    CompilerMetadata {
        compiler: MetadataCompiler {
            version: hints.compiler_version.unwrap_or_default().trim_start_matches('v').to_string(),
        },
        language: "Solidity".to_string(),
        settings: MetadataSettings {
            compilation_target,
            evm_version: hints.evm_version.filter(|v| !v.is_empty() && *v != "default").map(Into::into),
            optimizer: hints.optimizer,
        },
        sources: sources
            .iter()
            .map(|s| (s.path.clone(), serde_json::Value::Object(Default::default())))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<SourceFile> {
        vec![
            SourceFile::new("lib/IERC20.sol", "interface IERC20 {}"),
            SourceFile::new("src/Token.sol", "import './IERC20.sol';\ncontract Token is IERC20 {}"),
        ]
    }

    #[test]
    fn test_main_source_prefers_declaration() {
        let sources = files();
        let main = main_source(Some("Token"), Some("lib/IERC20.sol"), &sources).unwrap();
        assert_eq!(main.path, "src/Token.sol");

        let main = main_source(Some("Missing"), Some("lib/IERC20.sol"), &sources).unwrap();
        assert_eq!(main.path, "lib/IERC20.sol");

        let main = main_source(None, None, &sources).unwrap();
        assert_eq!(main.path, "lib/IERC20.sol");
        assert!(main_source(None, None, &[]).is_none());
    }

    #[test]
    fn test_synthesize_metadata() {
        let sources = files();
        let hints = MetadataHints {
            name: Some("Token"),
            compiler_version: Some("v0.8.19+commit.7dd6d404"),
            optimizer: Some(OptimizerSettings { enabled: true, runs: 200 }),
            evm_version: Some("default"),
            main_path: None,
        };
        let metadata = synthesize_metadata(&hints, &sources);
        assert_eq!(metadata.compilation_target(), Some(("src/Token.sol", "Token")));
        assert_eq!(metadata.short_compiler_version(), "0.8.19");
        assert_eq!(metadata.optimizer_runs(), Some(200));
        assert_eq!(metadata.settings.evm_version, None);
        assert_eq!(metadata.sources.len(), 2);
    }
}
