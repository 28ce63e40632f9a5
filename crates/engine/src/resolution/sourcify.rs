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

//! Sourcify v2 API client.

use std::{collections::BTreeMap, time::Duration};

use alloy_json_abi::JsonAbi;
use alloy_primitives::Address;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use walnut_common::{
    redacted_endpoint, CompilerMetadata, OptimizerSettings, SourceFile, VerificationSource,
};

use super::{synthesize_metadata, ContractRegistry, MetadataHints, RegistryError, VerifiedSource};

#[derive(Debug, Deserialize)]
struct SourcifySource {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourcifyCompilation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    fully_qualified_name: Option<String>,
    #[serde(default)]
    compiler_version: Option<String>,
    #[serde(default)]
    compiler_settings: Option<Value>,
}

/// `GET /v2/contract/{chainId}/{address}?fields=all`
#[derive(Debug, Deserialize)]
struct SourcifyContract {
    #[serde(default, rename = "match")]
    match_kind: Option<String>,
    #[serde(default)]
    abi: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    sources: BTreeMap<String, SourcifySource>,
    #[serde(default)]
    compilation: Option<SourcifyCompilation>,
}

/// Client for a Sourcify-compatible server.
#[derive(Debug, Clone)]
pub struct SourcifyClient {
    base_url: String,
    http: reqwest::Client,
}

impl SourcifyClient {
    /// New client for `base_url` (e.g. `https://sourcify.dev/server`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(RegistryError::http)?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), http })
    }

    async fn fetch_contract(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<VerifiedSource, RegistryError> {
        let url = format!("{}/v2/contract/{chain_id}/{address}?fields=all", self.base_url);
        debug!(%address, registry = %redacted_endpoint(&self.base_url), "Querying Sourcify");

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(e) if is_masked_not_found(&e.to_string()) => return Err(RegistryError::NotFound),
            Err(e) => return Err(RegistryError::http(e)),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound);
        }
        let body = response.text().await.map_err(RegistryError::http)?;
        if !status.is_success() {
            if is_masked_not_found(&body) {
                return Err(RegistryError::NotFound);
            }
            return Err(RegistryError::Http(format!("status {status}")));
        }

        let contract: SourcifyContract =
            serde_json::from_str(&body).map_err(|e| RegistryError::Malformed(e.to_string()))?;
        parse_contract(contract)
    }
}

/// Gateways in front of Sourcify answer unknown contracts with a generic
/// "fetch failed" instead of a 404.
fn is_masked_not_found(text: &str) -> bool {
    text.to_ascii_lowercase().contains("fetch failed")
}

fn parse_contract(contract: SourcifyContract) -> Result<VerifiedSource, RegistryError> {
    if contract.match_kind.is_none() && contract.sources.is_empty() {
        return Err(RegistryError::NotFound);
    }

    let sources: Vec<SourceFile> = contract
        .sources
        .into_iter()
        .map(|(path, source)| SourceFile::new(path, source.content))
        .collect();

    let metadata = contract
        .metadata
        .as_ref()
        .map(|m| serde_json::from_value::<CompilerMetadata>(m.clone()))
        .transpose()
        .map_err(|e| RegistryError::Malformed(format!("metadata: {e}")))?;

    let compilation = contract.compilation.unwrap_or_default();
    let name = compilation
        .name
        .clone()
        .or_else(|| metadata.as_ref().and_then(|m| m.compilation_target()).map(|(_, n)| n.to_string()));

    let abi_value = contract
        .abi
        .or_else(|| contract.metadata.as_ref().and_then(|m| m.pointer("/output/abi").cloned()));
    let abi = match abi_value {
        Some(value) => serde_json::from_value::<JsonAbi>(value)
            .map_err(|e| RegistryError::Malformed(format!("abi: {e}")))?,
        None => JsonAbi::default(),
    };

    let metadata = metadata.unwrap_or_else(|| {
        let settings = compilation.compiler_settings.as_ref();
        let optimizer = settings
            .and_then(|s| s.get("optimizer"))
            .and_then(|o| serde_json::from_value::<OptimizerSettings>(o.clone()).ok());
        let evm_version = settings.and_then(|s| s.get("evmVersion")).and_then(Value::as_str);
        let main_path =
            compilation.fully_qualified_name.as_deref().and_then(|fq| fq.rsplit_once(':')).map(|(p, _)| p);
        synthesize_metadata(
            &MetadataHints {
                name: name.as_deref(),
                compiler_version: compilation.compiler_version.as_deref(),
                optimizer,
                evm_version,
                main_path,
            },
            &sources,
        )
    });

    Ok(VerifiedSource {
        name,
        sources,
        abi,
        metadata: Some(metadata),
        source: VerificationSource::Sourcify,
    })
}

impl ContractRegistry for SourcifyClient {
    fn kind(&self) -> VerificationSource {
        VerificationSource::Sourcify
    }

    fn fetch(
        &self,
        chain_id: u64,
        address: Address,
    ) -> BoxFuture<'_, Result<VerifiedSource, RegistryError>> {
        Box::pin(self.fetch_contract(chain_id, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_response() {
        let body = serde_json::json!({
            "match": "exact_match",
            "chainId": "1",
            "address": "0x00000000000000000000000000000000000000bb",
            "abi": [{"type": "function", "name": "ping", "inputs": [], "outputs": [], "stateMutability": "view"}],
            "metadata": {
                "compiler": {"version": "0.8.26+commit.8a97fa7a"},
                "language": "Solidity",
                "settings": {
                    "compilationTarget": {"src/Ping.sol": "Ping"},
                    "evmVersion": "cancun",
                    "optimizer": {"enabled": false, "runs": 200}
                },
                "sources": {"src/Ping.sol": {"keccak256": "0x01"}}
            },
            "sources": {"src/Ping.sol": {"content": "contract Ping { function ping() external view {} }"}},
            "compilation": {"name": "Ping", "fullyQualifiedName": "src/Ping.sol:Ping"}
        });
        let contract: SourcifyContract = serde_json::from_value(body).unwrap();
        let found = parse_contract(contract).unwrap();
        assert_eq!(found.name.as_deref(), Some("Ping"));
        assert_eq!(found.sources.len(), 1);
        assert!(found.abi.function("ping").is_some());
        let metadata = found.metadata.unwrap();
        assert_eq!(metadata.short_compiler_version(), "0.8.26");
        assert_eq!(metadata.optimizer_runs(), None);
    }

    #[test]
    fn test_synthesizes_missing_metadata() {
        let body = serde_json::json!({
            "match": "match",
            "sources": {
                "lib/Base.sol": {"content": "contract Base {}"},
                "src/Vault.sol": {"content": "contract Vault is Base {}"}
            },
            "compilation": {
                "name": "Vault",
                "fullyQualifiedName": "src/Vault.sol:Vault",
                "compilerVersion": "0.8.20+commit.a1b79de6",
                "compilerSettings": {"optimizer": {"enabled": true, "runs": 1000}}
            }
        });
        let contract: SourcifyContract = serde_json::from_value(body).unwrap();
        let metadata = parse_contract(contract).unwrap().metadata.unwrap();
        assert_eq!(metadata.compilation_target(), Some(("src/Vault.sol", "Vault")));
        assert_eq!(metadata.optimizer_runs(), Some(1000));
    }

    #[test]
    fn test_unmatched_is_not_found() {
        let contract: SourcifyContract =
            serde_json::from_value(serde_json::json!({"match": null})).unwrap();
        assert_eq!(parse_contract(contract), Err(RegistryError::NotFound));
        assert!(is_masked_not_found("TypeError: fetch failed"));
    }
}
