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

//! Engine configuration.
//!
//! Loaded from a TOML file, then adjusted by the caller through the `with_*`
//! builder setters (the service binary layers CLI flags and environment on
//! top). Every field has a default so an empty file is a valid config.

use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Public Sourcify server.
pub const DEFAULT_SOURCIFY_URL: &str = "https://sourcify.dev/server";

/// Default node endpoint for chains without an explicit entry.
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// A verification registry backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryConfig {
    /// Sourcify-compatible metadata API
    Sourcify {
        /// Base URL, e.g. `https://sourcify.dev/server`
        url: String,
    },
    /// Blockscout-compatible explorer API
    Blockscout {
        /// Base URL of the explorer, e.g. `https://eth.blockscout.com`
        url: String,
        /// Optional API key, sent as `apikey`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::Sourcify { url: DEFAULT_SOURCIFY_URL.to_string() }
    }
}

/// Per-chain settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain id
    pub chain_id: u64,
    /// Node endpoint with debug namespace enabled
    pub rpc_url: String,
    /// Registry consulted first
    #[serde(default)]
    pub primary: RegistryConfig,
    /// Registry consulted when the primary does not know the contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<RegistryConfig>,
}

/// Compiler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Path to a `solc` binary; takes precedence over `solc_version`
    pub solc_path: Option<PathBuf>,
    /// Version to install through svm when no path is given
    pub solc_version: Option<String>,
    /// Refuse to compile when the pragma does not admit the compiler version
    pub strict_version_check: bool,
    /// Extra arguments appended to every invocation
    pub extra_args: Vec<String>,
}

/// Scratch space settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Root under which each run gets its own directory
    pub root: PathBuf,
    /// How often the background sweep runs
    pub sweep_interval_secs: u64,
    /// Minimum age of a run directory before the sweep deletes it
    pub max_age_secs: u64,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: env::temp_dir().join("walnut-scratch"),
            sweep_interval_secs: 300,
            max_age_secs: 300,
        }
    }
}

impl ScratchConfig {
    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Age threshold.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Configuration for the trace engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound on every node call
    pub rpc_timeout_secs: u64,
    /// Bound on every registry call
    pub registry_timeout_secs: u64,
    /// Node used when a request names neither an RPC URL nor a configured chain
    pub default_rpc_url: String,
    /// Per-chain settings
    pub chains: Vec<ChainConfig>,
    /// Registry for chains without an entry
    pub default_registry: RegistryConfig,
    /// Compiler settings
    pub compiler: CompilerConfig,
    /// Scratch space settings
    pub scratch: ScratchConfig,
    /// Whether to acquire the opcode step log
    pub collect_steps: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 30,
            registry_timeout_secs: 15,
            default_rpc_url: DEFAULT_RPC_URL.to_string(),
            chains: Vec::new(),
            default_registry: RegistryConfig::default(),
            compiler: CompilerConfig::default(),
            scratch: ScratchConfig::default(),
            collect_steps: true,
        }
    }
}

impl EngineConfig {
    /// Load a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Set the node call timeout
    pub fn with_rpc_timeout(mut self, secs: u64) -> Self {
        self.rpc_timeout_secs = secs;
        self
    }

    /// Set the registry call timeout
    pub fn with_registry_timeout(mut self, secs: u64) -> Self {
        self.registry_timeout_secs = secs;
        self
    }

    /// Set the fallback node endpoint
    pub fn with_default_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.default_rpc_url = url.into();
        self
    }

    /// Add or replace a chain entry
    pub fn with_chain(mut self, chain: ChainConfig) -> Self {
        self.chains.retain(|c| c.chain_id != chain.chain_id);
        self.chains.push(chain);
        self
    }

    /// Set the registry used for unconfigured chains
    pub fn with_default_registry(mut self, registry: RegistryConfig) -> Self {
        self.default_registry = registry;
        self
    }

    /// Use a specific `solc` binary
    pub fn with_solc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.compiler.solc_path = Some(path.into());
        self
    }

    /// Enable or disable blocking on pragma mismatches
    pub fn with_strict_version_check(mut self, strict: bool) -> Self {
        self.compiler.strict_version_check = strict;
        self
    }

    /// Set the scratch root
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch.root = root.into();
        self
    }

    /// Enable or disable step log acquisition
    pub fn with_collect_steps(mut self, collect: bool) -> Self {
        self.collect_steps = collect;
        self
    }

    /// Node call timeout.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Registry call timeout.
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    /// Node endpoint for `chain_id`, falling back to the default endpoint.
    pub fn rpc_url_for(&self, chain_id: Option<u64>) -> &str {
        chain_id
            .and_then(|id| self.chain(id))
            .map(|chain| chain.rpc_url.as_str())
            .unwrap_or(&self.default_rpc_url)
    }

    /// Settings of `chain_id`, if configured.
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// `(primary, secondary)` registries for `chain_id`.
    pub fn registries_for(&self, chain_id: u64) -> (&RegistryConfig, Option<&RegistryConfig>) {
        match self.chain(chain_id) {
            Some(chain) => (&chain.primary, chain.secondary.as_ref()),
            None => (&self.default_registry, None),
        }
    }
}
