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

//! Compilation and source mapping.
//!
//! Verified contracts are compiled one at a time inside the run's scratch
//! directory. A contract that fails to compile is reported in the diagnostics
//! and left out of the debug set; it never fails the run.

pub mod disasm;
mod pragma;
mod solc;
mod sourcemap;
mod workspace;

pub use pragma::{check_pragma, find_pragma, version_satisfies, VersionCheck};
pub use solc::{classify_compiler_output, CompileJob, DebugCompiler, SolcCompiler, DEBUG_DIR};
pub use sourcemap::{
    decompress_source_map, ethdebug_mappings, ethdebug_sources, indexed_sources, legacy_mappings,
    parse_debug_output,
};
pub use workspace::{
    clean_source, sanitize_path, MaterializedSources, ScratchSpace, RUN_DIR_PREFIX,
};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Address;
use tracing::{debug, info, warn};
use walnut_common::{
    scrub_sensitive, CompilationDiagnostic, CompilationFailureKind, CompilationStatus, Contract,
    DebugCallContract,
};

/// A failed compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CompilationError {
    /// Failure category
    pub kind: CompilationFailureKind,
    /// Detail, scrubbed
    pub message: String,
}

impl CompilationError {
    /// New error; the message is scrubbed.
    pub fn new(kind: CompilationFailureKind, message: impl AsRef<str>) -> Self {
        Self { kind, message: scrub_sensitive(message.as_ref()) }
    }

    pub(crate) fn io(err: std::io::Error) -> Self {
        Self::new(CompilationFailureKind::Io, err.to_string())
    }
}

/// Result of compiling every contract of a run.
#[derive(Debug, Clone, Default)]
pub struct CompilationOutcome {
    /// Debug data of every contract that compiled
    pub debug_contracts: BTreeMap<Address, DebugCallContract>,
    /// Failures and advisory warnings
    pub diagnostics: Vec<CompilationDiagnostic>,
    /// The run's scratch directory
    pub scratch_dir: PathBuf,
}

fn diagnostic(contract: &Contract, error: &CompilationError, blocking: bool) -> CompilationDiagnostic {
    CompilationDiagnostic {
        address: contract.address,
        contract_name: contract.name.clone(),
        kind: error.kind,
        blocking,
        message: error.message.clone(),
    }
}

/// Compiles resolved contracts into [`DebugCallContract`]s.
#[derive(Debug, Clone)]
pub struct ContractCompiler {
    compiler: Arc<dyn DebugCompiler>,
    scratch_root: PathBuf,
    strict_version_check: bool,
}

impl ContractCompiler {
    /// New compiler writing runs under `scratch_root`.
    pub fn new(
        compiler: Arc<dyn DebugCompiler>,
        scratch_root: impl Into<PathBuf>,
        strict_version_check: bool,
    ) -> Self {
        Self { compiler, scratch_root: scratch_root.into(), strict_version_check }
    }

    /// Scratch root.
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Compile every verified contract, sequentially, and record the outcome on
    /// each contract.
    pub async fn compile_all(&self, contracts: &mut [Contract]) -> CompilationOutcome {
        let mut outcome = CompilationOutcome::default();

        let run = match ScratchSpace::create_run(&self.scratch_root).await {
            Ok(run) => run,
            Err(e) => {
                let error = CompilationError::io(e);
                warn!(error = %error, "Failed to create scratch run directory");
                outcome.scratch_dir = self.scratch_root.clone();
                for contract in contracts.iter_mut().filter(|c| c.verified) {
                    outcome.diagnostics.push(diagnostic(contract, &error, true));
                    contract.compilation_status = Some(CompilationStatus::Failed);
                    contract.compilation_error = Some(error.to_string());
                }
                return outcome;
            }
        };
        outcome.scratch_dir = run.run_dir().to_path_buf();

        for contract in contracts.iter_mut() {
            if !contract.verified {
                contract.compilation_status = Some(CompilationStatus::Skipped);
                continue;
            }

            match self.compile_one(&run, contract, &mut outcome.diagnostics).await {
                Ok(debug_contract) => {
                    debug!(address = %contract.address, pcs = debug_contract.pc_to_source_mappings.len(), "Compiled contract");
                    contract.compilation_status = Some(CompilationStatus::Success);
                    outcome.debug_contracts.insert(contract.address, debug_contract);
                }
                Err(error) => {
                    warn!(address = %contract.address, error = %error, "Compilation failed");
                    outcome.diagnostics.push(diagnostic(contract, &error, true));
                    contract.compilation_status = Some(CompilationStatus::Failed);
                    contract.compilation_error = Some(error.to_string());
                }
            }
        }

        info!(
            compiled = outcome.debug_contracts.len(),
            failed = outcome.diagnostics.iter().filter(|d| d.blocking).count(),
            "Compilation finished"
        );
        outcome
    }

    async fn compile_one(
        &self,
        run: &ScratchSpace,
        contract: &Contract,
        diagnostics: &mut Vec<CompilationDiagnostic>,
    ) -> Result<DebugCallContract, CompilationError> {
        let (target, name) = contract.compilation_target().ok_or_else(|| {
            CompilationError::new(CompilationFailureKind::MissingSource, "no compilation target")
        })?;
        let main = contract.source(&target).ok_or_else(|| {
            CompilationError::new(
                CompilationFailureKind::MissingSource,
                format!("compilation target {target} is not among the sources"),
            )
        })?;

        let advisory = match check_pragma(&main.content, self.compiler.version()) {
            VersionCheck::Compatible => None,
            VersionCheck::Mismatch { required } => Some(CompilationError::new(
                CompilationFailureKind::VersionMismatch,
                format!("pragma `{required}` does not admit solc {}", self.compiler.version()),
            )),
            VersionCheck::PragmaNotFound => Some(CompilationError::new(
                CompilationFailureKind::PragmaNotFound,
                format!("no pragma solidity directive in {target}"),
            )),
        };
        if let Some(error) = advisory {
            if self.strict_version_check {
                return Err(error);
            }
            warn!(address = %contract.address, error = %error, "Compiling despite version risk");
            diagnostics.push(diagnostic(contract, &error, false));
        }

        let written =
            run.materialize(contract.address, &contract.sources).await.map_err(CompilationError::io)?;
        let settings = contract.metadata.as_ref().map(|m| &m.settings);
        let job = CompileJob {
            work_dir: written.dir.clone(),
            target: sanitize_path(&target),
            contract_name: name.clone(),
            optimizer: settings.and_then(|s| s.optimizer),
            evm_version: settings.and_then(|s| s.evm_version.clone()),
        };

        let debug_dir = self.compiler.compile(&job).await?;
        let mut debug_contract = parse_debug_output(&debug_dir, &name, &written.sources).await?;
        debug_contract.address = contract.address;
        debug_contract.abi = contract.abi.clone();
        Ok(debug_contract)
    }
}
