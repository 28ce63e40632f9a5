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

//! Pipeline orchestration.
//!
//! A debug run moves through the stages of [`PipelineStage`] strictly in
//! order:
//!
//! 1. **Acquiring**: call trace, step log and transaction metadata from the node
//! 2. **Normalizing**: typed call tree, flattened, steps attributed to frames
//! 3. **ResolvingContracts**: one concurrent lookup per unique target address
//! 4. **Compiling**: verified contracts compiled one by one with debug info
//! 5. **Assembling**: call maps, decoded values and source-located steps merged
//!
//! Only the first two stages can fail the run. Resolution and compilation
//! problems are absorbed per contract and show up as unverified contracts or
//! diagnostics in the payload.

use std::{collections::BTreeMap, fmt, sync::Arc};

use alloy_primitives::Address;
use rand::{distr::Alphanumeric, Rng};
use tracing::{debug, error, info, info_span, Instrument};
use walnut_common::{
    scrub_sensitive, CallTraceInfo, Contract, DebuggerInfo, FlatTraceCall, TraceRequest,
    TraceStep, TxMetadata,
};

use crate::{
    acquisition::{AcquisitionError, NodeClient},
    assembly::{assemble, build_call_maps, AssemblyInput},
    compile::{CompilationError, ContractCompiler, DebugCompiler, SolcCompiler},
    config::EngineConfig,
    normalize::{attribute_steps, flatten, normalize, unique_targets, NormalizeError},
    resolution::{registry_from_config, ContractResolver, RegistryError},
};

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Fetching the trace from the node
    Acquiring,
    /// Converting and flattening the trace
    Normalizing,
    /// Looking up verified source
    ResolvingContracts,
    /// Compiling verified contracts
    Compiling,
    /// Building the debugger payload
    Assembling,
    /// Finished
    Done,
    /// Aborted
    Failed,
}

impl PipelineStage {
    /// Upper snake case name, as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquiring => "ACQUIRING",
            Self::Normalizing => "NORMALIZING",
            Self::ResolvingContracts => "RESOLVING_CONTRACTS",
            Self::Compiling => "COMPILING",
            Self::Assembling => "ASSEMBLING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// Whether a run in this stage has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a failed run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineFault {
    /// The node could not produce a trace
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    /// The node produced a trace we cannot read
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// A configured registry cannot be set up
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The compiler cannot be set up
    #[error(transparent)]
    Compiler(#[from] CompilationError),
}

/// A run that ended in [`PipelineStage::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    /// Stage that was active when the run failed
    pub stage: PipelineStage,
    /// What went wrong
    #[source]
    pub source: PipelineFault,
}

impl PipelineError {
    fn new(stage: PipelineStage, source: impl Into<PipelineFault>) -> Self {
        Self { stage, source: source.into() }
    }

    /// Short machine-readable failure category.
    pub fn kind(&self) -> &'static str {
        match &self.source {
            PipelineFault::Acquisition(e) => e.kind(),
            PipelineFault::Normalize(_) => "malformedTrace",
            PipelineFault::Registry(_) => "registry",
            PipelineFault::Compiler(_) => "compiler",
        }
    }

    /// Message safe to hand to a client.
    pub fn public_message(&self) -> String {
        scrub_sensitive(&self.to_string())
    }
}

/// Stage bookkeeping of one run.
#[derive(Debug)]
struct RunProgress {
    stage: PipelineStage,
}

impl RunProgress {
    fn start() -> Self {
        let progress = Self { stage: PipelineStage::Acquiring };
        info!(stage = %progress.stage, "Pipeline stage");
        progress
    }

    fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
        info!(stage = %stage, "Pipeline stage");
    }

    fn fail(&mut self, source: impl Into<PipelineFault>) -> PipelineError {
        let err = PipelineError::new(self.stage, source);
        error!(stage = %self.stage, kind = err.kind(), error = %err.public_message(), "Pipeline failed");
        self.stage = PipelineStage::Failed;
        err
    }
}

/// What the first three stages produce.
#[derive(Debug)]
struct ResolvedTrace {
    flat: Vec<FlatTraceCall>,
    steps: Vec<TraceStep>,
    contracts: Vec<Contract>,
    tx: TxMetadata,
}

fn contract_map(contracts: Vec<Contract>) -> BTreeMap<Address, Contract> {
    contracts.into_iter().map(|contract| (contract.address, contract)).collect()
}

fn new_run_id() -> String {
    rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect()
}

/// Runs debug and simulation requests end to end.
#[derive(Debug, Clone)]
pub struct DebugPipeline {
    config: EngineConfig,
    compiler: Arc<dyn DebugCompiler>,
}

impl DebugPipeline {
    /// Pipeline with an explicit compiler.
    pub fn new(config: EngineConfig, compiler: Arc<dyn DebugCompiler>) -> Self {
        Self { config, compiler }
    }

    /// Pipeline using the `solc` selected by the configuration.
    pub async fn from_config(config: EngineConfig) -> Result<Self, PipelineError> {
        let solc = SolcCompiler::from_config(&config.compiler)
            .await
            .map_err(|e| PipelineError::new(PipelineStage::Compiling, e))?;
        info!(version = %solc.version(), "Using solc");
        Ok(Self::new(config, Arc::new(solc)))
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full debug run: the complete debugger payload for `request`.
    pub async fn debug(&self, request: &TraceRequest) -> Result<DebuggerInfo, PipelineError> {
        let run_id = new_run_id();
        let span = info_span!("debug", run_id = %run_id);
        self.run_debug(request).instrument(span).await
    }

    /// Simulation run: call maps only, no compilation.
    pub async fn simulate(&self, request: &TraceRequest) -> Result<CallTraceInfo, PipelineError> {
        let run_id = new_run_id();
        let span = info_span!("simulate", run_id = %run_id);
        self.run_simulate(request).instrument(span).await
    }

    async fn run_debug(&self, request: &TraceRequest) -> Result<DebuggerInfo, PipelineError> {
        let mut progress = RunProgress::start();
        let ResolvedTrace { flat, steps, mut contracts, tx } =
            self.resolve_trace(request, self.config.collect_steps, &mut progress).await?;

        progress.enter(PipelineStage::Compiling);
        let compiler = ContractCompiler::new(
            self.compiler.clone(),
            self.config.scratch.root.clone(),
            self.config.compiler.strict_version_check,
        );
        let outcome = compiler.compile_all(&mut contracts).await;
        info!(
            compiled = outcome.debug_contracts.len(),
            diagnostics = outcome.diagnostics.len(),
            scratch = %outcome.scratch_dir.display(),
            "Compilation finished"
        );

        progress.enter(PipelineStage::Assembling);
        let contracts = contract_map(contracts);
        let maps = build_call_maps(&flat, &contracts);
        let info = assemble(
            AssemblyInput { flat: &flat, steps: &steps, debug_contracts: &outcome.debug_contracts },
            maps,
            outcome.diagnostics,
            Some(tx),
        );

        progress.enter(PipelineStage::Done);
        debug!(
            contract_calls = info.contract_calls_map.len(),
            function_calls = info.function_calls_map.len(),
            trace_entries = info.simulation_debugger_data.debugger_trace.len(),
            "Debugger payload ready"
        );
        Ok(info)
    }

    async fn run_simulate(&self, request: &TraceRequest) -> Result<CallTraceInfo, PipelineError> {
        let mut progress = RunProgress::start();
        let ResolvedTrace { flat, contracts, tx, .. } =
            self.resolve_trace(request, false, &mut progress).await?;

        progress.enter(PipelineStage::Assembling);
        let maps = build_call_maps(&flat, &contract_map(contracts));

        progress.enter(PipelineStage::Done);
        Ok(maps.into_call_trace_info(Some(tx)))
    }

    /// Acquisition, normalization and resolution.
    async fn resolve_trace(
        &self,
        request: &TraceRequest,
        collect_steps: bool,
        progress: &mut RunProgress,
    ) -> Result<ResolvedTrace, PipelineError> {
        let rpc_url = request.rpc_url().unwrap_or_else(|| self.config.rpc_url_for(request.chain_id()));
        let node = NodeClient::new(rpc_url, self.config.rpc_timeout()).map_err(|e| progress.fail(e))?;
        let acquired = node.acquire(request, collect_steps).await.map_err(|e| progress.fail(e))?;

        progress.enter(PipelineStage::Normalizing);
        let root = normalize(&acquired.raw).map_err(|e| progress.fail(e))?;
        let flat = flatten(&root);
        let steps = attribute_steps(&flat, &acquired.steps);
        debug!(frames = flat.len(), steps = steps.len(), "Trace normalized");

        progress.enter(PipelineStage::ResolvingContracts);
        let resolver = self.resolver(node, acquired.chain_id).map_err(|e| progress.fail(e))?;
        let targets = unique_targets(&flat);
        let contracts = resolver.resolve_all(acquired.chain_id, &targets).await;
        info!(
            contracts = contracts.len(),
            verified = contracts.iter().filter(|c| c.verified).count(),
            "Contracts resolved"
        );

        Ok(ResolvedTrace { flat, steps, contracts, tx: acquired.tx })
    }

    fn resolver(&self, node: NodeClient, chain_id: u64) -> Result<ContractResolver, RegistryError> {
        let timeout = self.config.registry_timeout();
        let (primary, secondary) = self.config.registries_for(chain_id);
        let primary = registry_from_config(primary, timeout)?;
        let secondary = secondary.map(|config| registry_from_config(config, timeout)).transpose()?;
        Ok(ContractResolver::new(node, primary, secondary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::ResolvingContracts.to_string(), "RESOLVING_CONTRACTS");
        assert!(PipelineStage::Done.is_terminal());
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Compiling.is_terminal());
    }

    #[test]
    fn test_public_message_is_scrubbed() {
        let key = "Zq8dWm3Lr7Xy2Kp9Tn4Vb6Hs1Jc5Gf0A";
        let err = PipelineError::new(
            PipelineStage::Acquiring,
            AcquisitionError::Rpc(format!("https://rpc.example.com/v2/{key} said no")),
        );
        let message = err.public_message();
        assert!(message.starts_with("ACQUIRING failed"));
        assert!(!message.contains(key));
        assert!(!message.contains("rpc.example.com"));
        assert_eq!(err.kind(), "rpc");
    }

    #[test]
    fn test_kinds_follow_fault() {
        let err = PipelineError::new(
            PipelineStage::Normalizing,
            NormalizeError::InvalidBytes { field: "output" },
        );
        assert_eq!(err.kind(), "malformedTrace");

        let err = PipelineError::new(PipelineStage::Acquiring, AcquisitionError::Timeout("x".into()));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
