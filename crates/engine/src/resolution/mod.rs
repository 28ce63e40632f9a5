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

//! Contract resolution.
//!
//! For every distinct callee of a trace we fetch the deployed bytecode and,
//! when there is code, look the address up in the configured verification
//! registries. Lookups run concurrently and never fail the batch: anything that
//! goes wrong for one address yields an unverified [`Contract`].

mod blockscout;
mod metadata;
mod sourcify;

pub use blockscout::{
    default_extractors, extract_sources, AdditionalSources, BlockscoutClient, DirectSource, FilesArray,
    NestedSourceObject, SourceExtractor,
};
pub use metadata::{main_source, synthesize_metadata, MetadataHints};
pub use sourcify::SourcifyClient;

use std::{fmt::Debug, sync::Arc, time::Duration};

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes};
use futures::future::{join_all, BoxFuture};
use tracing::{debug, warn};
use walnut_common::{
    scrub_sensitive, CompilerMetadata, Contract, SourceFile, VerificationSource,
};

use crate::{acquisition::NodeClient, config::RegistryConfig};

/// Registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry has no verified source for the address
    #[error("contract not found in registry")]
    NotFound,
    /// Transport or server failure
    #[error("registry request failed: {0}")]
    Http(String),
    /// The registry answered with something unusable
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

impl RegistryError {
    pub(crate) fn http(err: impl std::fmt::Display) -> Self {
        Self::Http(scrub_sensitive(&err.to_string()))
    }
}

/// Verified source as returned by a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSource {
    /// Contract name
    pub name: Option<String>,
    /// Source files, in registry order
    pub sources: Vec<SourceFile>,
    /// ABI
    pub abi: JsonAbi,
    /// Compiler metadata, real or synthesized
    pub metadata: Option<CompilerMetadata>,
    /// Which registry answered
    pub source: VerificationSource,
}

/// A verification registry.
pub trait ContractRegistry: Debug + Send + Sync {
    /// Which registry family this is.
    fn kind(&self) -> VerificationSource;

    /// Look up verified source for `address` on `chain_id`.
    fn fetch(
        &self,
        chain_id: u64,
        address: Address,
    ) -> BoxFuture<'_, Result<VerifiedSource, RegistryError>>;
}

/// Build a registry client from its configuration.
pub fn registry_from_config(
    config: &RegistryConfig,
    timeout: Duration,
) -> Result<Arc<dyn ContractRegistry>, RegistryError> {
    Ok(match config {
        RegistryConfig::Sourcify { url } => Arc::new(SourcifyClient::new(url, timeout)?),
        RegistryConfig::Blockscout { url, api_key } => {
            Arc::new(BlockscoutClient::new(url, api_key.clone(), timeout)?)
        }
    })
}

/// Query `primary`, then `secondary` only if the primary does not know the
/// contract. Any other primary failure is returned as is.
pub async fn fetch_with_fallback(
    primary: &dyn ContractRegistry,
    secondary: Option<&dyn ContractRegistry>,
    chain_id: u64,
    address: Address,
) -> Result<VerifiedSource, RegistryError> {
    match primary.fetch(chain_id, address).await {
        Err(RegistryError::NotFound) => match secondary {
            Some(secondary) => {
                debug!(%address, registry = %secondary.kind(), "Trying secondary registry");
                secondary.fetch(chain_id, address).await
            }
            None => Err(RegistryError::NotFound),
        },
        other => other,
    }
}

/// Resolves trace addresses into [`Contract`] records.
#[derive(Debug, Clone)]
pub struct ContractResolver {
    node: NodeClient,
    primary: Arc<dyn ContractRegistry>,
    secondary: Option<Arc<dyn ContractRegistry>>,
}

impl ContractResolver {
    /// New resolver.
    pub fn new(
        node: NodeClient,
        primary: Arc<dyn ContractRegistry>,
        secondary: Option<Arc<dyn ContractRegistry>>,
    ) -> Self {
        Self { node, primary, secondary }
    }

    async fn lookup(&self, chain_id: u64, address: Address) -> Result<VerifiedSource, RegistryError> {
        fetch_with_fallback(self.primary.as_ref(), self.secondary.as_deref(), chain_id, address)
            .await
    }

    /// Resolve one address. Never fails; problems yield an unverified record.
    pub async fn resolve(&self, chain_id: u64, address: Address) -> Contract {
        let bytecode = match self.node.code_at(address).await {
            Ok(code) => code,
            Err(e) => {
                warn!(%address, error = %e, "Failed to fetch bytecode");
                return Contract::unverified(address, Bytes::new());
            }
        };
        if bytecode.is_empty() {
            debug!(%address, "No code at address");
            return Contract::unverified(address, bytecode);
        }

        let mut contract = match self.lookup(chain_id, address).await {
            Ok(found) if !found.sources.is_empty() => Contract {
                name: found.name,
                sources: found.sources,
                abi: found.abi,
                verified: true,
                verification_source: Some(found.source),
                metadata: found.metadata,
                ..Contract::unverified(address, bytecode)
            },
            Ok(_) => {
                debug!(%address, "Registry returned no source files");
                Contract::unverified(address, bytecode)
            }
            Err(RegistryError::NotFound) => {
                debug!(%address, "Contract is not verified");
                Contract::unverified(address, bytecode)
            }
            Err(e) => {
                warn!(%address, error = %e, "Registry lookup failed; treating contract as unverified");
                Contract::unverified(address, bytecode)
            }
        };

        self.apply_proxy_abi(chain_id, &mut contract).await;
        contract
    }

    /// Replace the ABI of an EIP-1967 proxy with its implementation's.
    async fn apply_proxy_abi(&self, chain_id: u64, contract: &mut Contract) {
        let implementation = match self.node.implementation_of(contract.address).await {
            Ok(Some(implementation)) if implementation != contract.address => implementation,
            Ok(_) => return,
            Err(e) => {
                debug!(address = %contract.address, error = %e, "Proxy slot unavailable");
                return;
            }
        };

        match self.lookup(chain_id, implementation).await {
            Ok(found) => {
                debug!(proxy = %contract.address, %implementation, "Using implementation ABI");
                contract.abi = found.abi;
                contract.implementation = Some(implementation);
            }
            Err(e) => {
                debug!(proxy = %contract.address, %implementation, error = %e, "Implementation not resolved");
            }
        }
    }

    /// Resolve every address concurrently, preserving input order.
    pub async fn resolve_all(&self, chain_id: u64, addresses: &[Address]) -> Vec<Contract> {
        join_all(addresses.iter().map(|address| self.resolve(chain_id, *address))).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug)]
    struct StubRegistry {
        answer: Result<(), RegistryError>,
        calls: AtomicUsize,
    }

    impl StubRegistry {
        fn new(answer: Result<(), RegistryError>) -> Self {
            Self { answer, calls: AtomicUsize::new(0) }
        }
    }

    impl ContractRegistry for StubRegistry {
        fn kind(&self) -> VerificationSource {
            VerificationSource::Sourcify
        }

        fn fetch(
            &self,
            _chain_id: u64,
            _address: Address,
        ) -> BoxFuture<'_, Result<VerifiedSource, RegistryError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone().map(|()| VerifiedSource {
                name: Some("Stub".into()),
                sources: vec![SourceFile::new("Stub.sol", "contract Stub {}")],
                abi: JsonAbi::default(),
                metadata: None,
                source: VerificationSource::Sourcify,
            });
            Box::pin(async move { answer })
        }
    }

    #[tokio::test]
    async fn test_secondary_consulted_on_not_found() {
        let primary = StubRegistry::new(Err(RegistryError::NotFound));
        let secondary = StubRegistry::new(Ok(()));
        let found = fetch_with_fallback(&primary, Some(&secondary), 1, Address::ZERO).await;
        assert!(found.is_ok());
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_secondary_skipped_on_other_errors() {
        for error in [RegistryError::Http("503".into()), RegistryError::Malformed("x".into())] {
            let primary = StubRegistry::new(Err(error.clone()));
            let secondary = StubRegistry::new(Ok(()));
            let found = fetch_with_fallback(&primary, Some(&secondary), 1, Address::ZERO).await;
            assert_eq!(found, Err(error));
            assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_secondary_skipped_on_success() {
        let primary = StubRegistry::new(Ok(()));
        let secondary = StubRegistry::new(Ok(()));
        fetch_with_fallback(&primary, Some(&secondary), 1, Address::ZERO).await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_found_without_secondary() {
        let primary = StubRegistry::new(Err(RegistryError::NotFound));
        let found = fetch_with_fallback(&primary, None, 1, Address::ZERO).await;
        assert_eq!(found, Err(RegistryError::NotFound));
    }
}
