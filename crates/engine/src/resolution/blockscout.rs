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

//! Blockscout API client.
//!
//! Blockscout deployments do not agree on where verified source lives in the
//! smart-contract response. Each known layout has its own [`SourceExtractor`];
//! they are tried in order and the first one that yields a file wins.

use std::time::Duration;

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use walnut_common::{redacted_endpoint, OptimizerSettings, SourceFile, VerificationSource};

use super::{synthesize_metadata, ContractRegistry, MetadataHints, RegistryError, VerifiedSource};

/// One way of finding source files in a smart-contract response.
pub trait SourceExtractor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Source files found in `body`; empty when this layout does not apply.
    fn extract(&self, body: &Value) -> Vec<SourceFile>;
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_str)).filter(|s| !s.is_empty())
}

fn main_file_name(body: &Value) -> String {
    str_field(body, &["file_path"])
        .map(ToString::to_string)
        .or_else(|| str_field(body, &["name"]).map(|name| format!("{name}.sol")))
        .unwrap_or_else(|| "Contract.sol".to_string())
}

fn additional_sources(body: &Value) -> Vec<SourceFile> {
    body.get("additional_sources")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| {
                    let path = str_field(f, &["file_path", "path", "name"])?;
                    let content = str_field(f, &["source_code", "content"])?;
                    Some(SourceFile::new(path, content))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses a `source_code` string holding standard-JSON input, optionally
/// wrapped in an extra pair of braces.
fn embedded_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let unwrapped = trimmed
        .strip_prefix("{{")
        .and_then(|t| t.strip_suffix("}}"))
        .map(|inner| format!("{{{inner}}}"));
    serde_json::from_str(unwrapped.as_deref().unwrap_or(trimmed)).ok()
}

/// `source_code` as a plain string, plus `additional_sources`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectSource;

impl SourceExtractor for DirectSource {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn extract(&self, body: &Value) -> Vec<SourceFile> {
        let Some(code) = str_field(body, &["source_code"]) else { return Vec::new() };
        if embedded_json(code).is_some() {
            return Vec::new();
        }
        let mut files = vec![SourceFile::new(main_file_name(body), code)];
        files.extend(additional_sources(body));
        files
    }
}

/// `source_code` as an object (or a JSON string) mapping paths to sources,
/// either directly or under `sources`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedSourceObject;

impl SourceExtractor for NestedSourceObject {
    fn name(&self) -> &'static str {
        "nested"
    }

    fn extract(&self, body: &Value) -> Vec<SourceFile> {
        let nested = match body.get("source_code") {
            Some(Value::Object(_)) => body.get("source_code").cloned(),
            Some(Value::String(text)) => embedded_json(text),
            _ => None,
        };
        let Some(nested) = nested else { return Vec::new() };
        let map = nested.get("sources").unwrap_or(&nested);
        let Some(map) = map.as_object() else { return Vec::new() };

        map.iter()
            .filter_map(|(path, entry)| {
                let content = match entry {
                    Value::String(content) => Some(content.as_str()),
                    other => str_field(other, &["content", "source_code"]),
                }?;
                Some(SourceFile::new(path.clone(), content))
            })
            .collect()
    }
}

/// A `files` array of `{path|name|file_path, content|source_code}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesArray;

impl SourceExtractor for FilesArray {
    fn name(&self) -> &'static str {
        "files"
    }

    fn extract(&self, body: &Value) -> Vec<SourceFile> {
        body.get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| {
                        let path = str_field(f, &["path", "name", "file_path"])?;
                        let content = str_field(f, &["content", "source_code"])?;
                        Some(SourceFile::new(path, content))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `additional_sources` alone, for responses without a main `source_code`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditionalSources;

impl SourceExtractor for AdditionalSources {
    fn name(&self) -> &'static str {
        "additional_sources"
    }

    fn extract(&self, body: &Value) -> Vec<SourceFile> {
        additional_sources(body)
    }
}

/// The extractors in the order they are tried.
pub fn default_extractors() -> Vec<Box<dyn SourceExtractor>> {
    vec![
        Box::new(DirectSource),
        Box::new(NestedSourceObject),
        Box::new(FilesArray),
        Box::new(AdditionalSources),
    ]
}

/// Run `extractors` in order and return the first non-empty result.
pub fn extract_sources(
    extractors: &[Box<dyn SourceExtractor>],
    body: &Value,
) -> Option<(&'static str, Vec<SourceFile>)> {
    extractors.iter().find_map(|extractor| {
        let files = extractor.extract(body);
        (!files.is_empty()).then(|| (extractor.name(), files))
    })
}

/// Client for a Blockscout-compatible explorer.
pub struct BlockscoutClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    extractors: Vec<Box<dyn SourceExtractor>>,
}

impl std::fmt::Debug for BlockscoutClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockscoutClient")
            .field("base_url", &redacted_endpoint(&self.base_url))
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish_non_exhaustive()
    }
}

impl BlockscoutClient {
    /// New client for the explorer at `base_url`.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let http =
            reqwest::Client::builder().timeout(timeout).build().map_err(RegistryError::http)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
            extractors: default_extractors(),
        })
    }

    async fn get_json(&self, path: &str) -> Result<Value, RegistryError> {
        let mut url = format!("{}{path}", self.base_url);
        if let Some(key) = &self.api_key {
            url.push_str("?apikey=");
            url.push_str(key);
        }

        let response = self.http.get(&url).send().await.map_err(RegistryError::http)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound);
        }
        if !status.is_success() {
            return Err(RegistryError::Http(format!("status {status}")));
        }
        response.json::<Value>().await.map_err(|e| RegistryError::Malformed(e.to_string()))
    }

    async fn fetch_contract(&self, address: Address) -> Result<VerifiedSource, RegistryError> {
        debug!(%address, registry = %redacted_endpoint(&self.base_url), "Querying Blockscout");
        let path = format!("/api/v2/smart-contracts/{address}");
        let body = self.get_json(&path).await?;

        let found = match extract_sources(&self.extractors, &body) {
            Some(found) => Some(found),
            None if is_unverified(&body) => return Err(RegistryError::NotFound),
            None => match self.get_json(&format!("{path}/source-code")).await {
                Ok(sub) => extract_sources(&self.extractors, &sub),
                Err(RegistryError::NotFound) => None,
                Err(e) => return Err(e),
            },
        };
        let Some((extractor, sources)) = found else { return Err(RegistryError::NotFound) };
        debug!(%address, extractor, files = sources.len(), "Extracted Blockscout sources");

        parse_contract(&body, sources)
    }
}

fn is_unverified(body: &Value) -> bool {
    body.get("is_verified").and_then(Value::as_bool) == Some(false)
}

fn parse_contract(body: &Value, sources: Vec<SourceFile>) -> Result<VerifiedSource, RegistryError> {
    let name = str_field(body, &["name", "contract_name"]).map(ToString::to_string);
    let abi = match body.get("abi") {
        Some(Value::Null) | None => JsonAbi::default(),
        Some(Value::String(text)) => serde_json::from_str::<JsonAbi>(text)
            .map_err(|e| RegistryError::Malformed(format!("abi: {e}")))?,
        Some(value) => serde_json::from_value::<JsonAbi>(value.clone())
            .map_err(|e| RegistryError::Malformed(format!("abi: {e}")))?,
    };

    let optimizer = body.get("optimization_enabled").and_then(Value::as_bool).map(|enabled| {
        OptimizerSettings {
            enabled,
            runs: body.get("optimization_runs").and_then(Value::as_u64).unwrap_or(200),
        }
    });
    let metadata = synthesize_metadata(
        &MetadataHints {
            name: name.as_deref(),
            compiler_version: str_field(body, &["compiler_version"]),
            optimizer,
            evm_version: str_field(body, &["evm_version"]),
            main_path: str_field(body, &["file_path"]),
        },
        &sources,
    );

    Ok(VerifiedSource {
        name,
        sources,
        abi,
        metadata: Some(metadata),
        source: VerificationSource::Blockscout,
    })
}

impl ContractRegistry for BlockscoutClient {
    fn kind(&self) -> VerificationSource {
        VerificationSource::Blockscout
    }

    fn fetch(
        &self,
        _chain_id: u64,
        address: Address,
    ) -> BoxFuture<'_, Result<VerifiedSource, RegistryError>> {
        Box::pin(self.fetch_contract(address))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_direct_source() {
        let body = json!({
            "name": "Token",
            "file_path": "contracts/Token.sol",
            "source_code": "contract Token {}",
            "additional_sources": [{"file_path": "contracts/Base.sol", "source_code": "contract Base {}"}]
        });
        let files = DirectSource.extract(&body);
        assert_eq!(paths(&files), vec!["contracts/Token.sol", "contracts/Base.sol"]);

        let unnamed = json!({"name": "Token", "source_code": "contract Token {}"});
        assert_eq!(paths(&DirectSource.extract(&unnamed)), vec!["Token.sol"]);
    }

    #[test]
    fn test_direct_source_ignores_embedded_json() {
        let body = json!({"source_code": "{\"sources\": {\"A.sol\": {\"content\": \"contract A {}\"}}}"});
        assert!(DirectSource.extract(&body).is_empty());
        assert_eq!(paths(&NestedSourceObject.extract(&body)), vec!["A.sol"]);
    }

    #[test]
    fn test_nested_source_object() {
        let body = json!({"source_code": {"sources": {
            "src/A.sol": {"content": "contract A {}"},
            "src/B.sol": {"content": "contract B {}"}
        }}});
        assert_eq!(paths(&NestedSourceObject.extract(&body)), vec!["src/A.sol", "src/B.sol"]);

        let flat = json!({"source_code": {"src/C.sol": "contract C {}"}});
        assert_eq!(paths(&NestedSourceObject.extract(&flat)), vec!["src/C.sol"]);

        let double_braced = json!({"source_code": "{{\"sources\": {\"D.sol\": {\"content\": \"contract D {}\"}}}}"});
        assert_eq!(paths(&NestedSourceObject.extract(&double_braced)), vec!["D.sol"]);
    }

    #[test]
    fn test_files_array() {
        let body = json!({"files": [
            {"name": "X.sol", "content": "contract X {}"},
            {"path": "Y.sol", "source_code": "contract Y {}"},
            {"path": "Empty.sol"}
        ]});
        assert_eq!(paths(&FilesArray.extract(&body)), vec!["X.sol", "Y.sol"]);
    }

    #[test]
    fn test_additional_sources_alone() {
        let body = json!({"additional_sources": [{"file_path": "Z.sol", "source_code": "contract Z {}"}]});
        assert!(DirectSource.extract(&body).is_empty());
        assert_eq!(paths(&AdditionalSources.extract(&body)), vec!["Z.sol"]);
    }

    #[test]
    fn test_chain_order() {
        let extractors = default_extractors();
        let body = json!({
            "source_code": "contract Main {}",
            "files": [{"path": "Other.sol", "content": "contract Other {}"}]
        });
        let (name, files) = extract_sources(&extractors, &body).unwrap();
        assert_eq!(name, "direct");
        assert_eq!(files.len(), 1);

        let files_only = json!({"files": [{"path": "Other.sol", "content": "contract Other {}"}]});
        assert_eq!(extract_sources(&extractors, &files_only).unwrap().0, "files");
        assert!(extract_sources(&extractors, &json!({"abi": []})).is_none());
    }

    #[test]
    fn test_parse_contract_synthesizes_metadata() {
        let body = json!({
            "name": "Token",
            "compiler_version": "v0.8.19+commit.7dd6d404",
            "optimization_enabled": true,
            "optimization_runs": 999,
            "evm_version": "paris",
            "abi": [{"type": "function", "name": "totalSupply", "inputs": [], "outputs": [{"name": "", "type": "uint256"}], "stateMutability": "view"}]
        });
        let sources = vec![
            SourceFile::new("Base.sol", "contract Base {}"),
            SourceFile::new("Token.sol", "contract Token is Base {}"),
        ];
        let found = parse_contract(&body, sources).unwrap();
        assert_eq!(found.source, VerificationSource::Blockscout);
        assert!(found.abi.function("totalSupply").is_some());
        let metadata = found.metadata.unwrap();
        assert_eq!(metadata.compilation_target(), Some(("Token.sol", "Token")));
        assert_eq!(metadata.optimizer_runs(), Some(999));
        assert_eq!(metadata.settings.evm_version.as_deref(), Some("paris"));
    }
}
