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

//! Solidity compiler invocation.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    process::Stdio,
};

use foundry_compilers::solc::Solc;
use futures::future::BoxFuture;
use semver::Version;
use tokio::process::Command;
use tracing::{debug, trace};
use walnut_common::{CompilationFailureKind, OptimizerSettings};

use super::CompilationError;
use crate::config::CompilerConfig;

/// Name of the debug output directory inside a contract's scratch directory.
pub const DEBUG_DIR: &str = "debug";

/// One compiler invocation.
#[derive(Debug, Clone)]
pub struct CompileJob {
    /// Contract scratch directory; the compiler runs here
    pub work_dir: PathBuf,
    /// Compilation target, relative to `work_dir`
    pub target: PathBuf,
    /// Contract to compile
    pub contract_name: String,
    /// Optimizer settings from the metadata
    pub optimizer: Option<OptimizerSettings>,
    /// EVM version from the metadata
    pub evm_version: Option<String>,
}

impl CompileJob {
    /// Where the compiler writes its output.
    pub fn debug_dir(&self) -> PathBuf {
        self.work_dir.join(DEBUG_DIR)
    }
}

/// A compiler producing debug output for a [`CompileJob`].
pub trait DebugCompiler: Debug + Send + Sync {
    /// Version of the compiler.
    fn version(&self) -> &Version;

    /// Run the job and return the non-empty debug directory.
    fn compile<'a>(&'a self, job: &'a CompileJob) -> BoxFuture<'a, Result<PathBuf, CompilationError>>;
}

/// Map compiler stderr to a failure category.
pub fn classify_compiler_output(stderr: &str) -> CompilationFailureKind {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("requires different compiler version")
        || lower.contains("unrecognised option")
        || lower.contains("unrecognized option")
    {
        CompilationFailureKind::VersionMismatch
    } else if lower.contains("file not found")
        || (lower.contains("source \"") && lower.contains("not found"))
    {
        CompilationFailureKind::MissingSource
    } else if ["parsererror", "syntaxerror", "typeerror", "declarationerror"]
        .iter()
        .any(|marker| lower.contains(marker))
    {
        CompilationFailureKind::SyntaxError
    } else {
        CompilationFailureKind::Process
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None) | Err(_)),
        Err(_) => true,
    }
}

/// A `solc` binary.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    path: PathBuf,
    version: Version,
    extra_args: Vec<String>,
}

impl SolcCompiler {
    /// A compiler at a known path with a known version.
    pub fn new(path: impl Into<PathBuf>, version: Version, extra_args: Vec<String>) -> Self {
        Self { path: path.into(), version, extra_args }
    }

    /// Locate (or install) the configured compiler.
    ///
    /// An explicit path wins; otherwise the configured version is installed
    /// through svm; otherwise `solc` from `PATH` is used.
    pub async fn from_config(config: &CompilerConfig) -> Result<Self, CompilationError> {
        let path = config.solc_path.clone();
        let version = config
            .solc_version
            .as_deref()
            .map(|v| Version::parse(v.trim_start_matches('v')))
            .transpose()
            .map_err(|e| CompilationError::new(CompilationFailureKind::Process, e.to_string()))?;

        let solc = tokio::task::spawn_blocking(move || match (path, version) {
            (Some(path), _) => Solc::new(path),
            (None, Some(version)) => Solc::find_or_install(&version),
            (None, None) => Solc::new("solc"),
        })
        .await
        .map_err(|e| CompilationError::new(CompilationFailureKind::Process, e.to_string()))?
        .map_err(|e| CompilationError::new(CompilationFailureKind::Process, e.to_string()))?;

        debug!(path = %solc.solc.display(), version = %solc.version, "Using solc");
        Ok(Self::new(solc.solc, solc.version, config.extra_args.clone()))
    }

    /// Arguments for `job`.
    pub fn arguments(&self, job: &CompileJob) -> Vec<String> {
        let mut args: Vec<String> = [
            "--via-ir",
            "--debug-info",
            "ethdebug",
            "--ethdebug",
            "--ethdebug-runtime",
            "--bin",
            "--abi",
            "--overwrite",
            "--base-path",
            ".",
            "--allow-paths",
            ".",
            "-o",
            DEBUG_DIR,
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if let Some(optimizer) = job.optimizer.filter(|o| o.enabled) {
            args.extend(["--optimize".into(), "--optimize-runs".into(), optimizer.runs.to_string()]);
        }
        if let Some(evm_version) = &job.evm_version {
            args.extend(["--evm-version".into(), evm_version.clone()]);
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(job.target.to_string_lossy().into_owned());
        args
    }

    async fn run(&self, job: &CompileJob) -> Result<PathBuf, CompilationError> {
        let args = self.arguments(job);
        trace!(solc = %self.path.display(), ?args, "Invoking compiler");

        let output = Command::new(&self.path)
            .args(&args)
            .current_dir(&job.work_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CompilationError::new(CompilationFailureKind::Process, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompilationError::new(classify_compiler_output(&stderr), stderr.trim()));
        }

        let debug_dir = job.debug_dir();
        if is_empty_dir(&debug_dir).await {
            return Err(CompilationError::new(
                CompilationFailureKind::EmptyDebugOutput,
                "compiler exited successfully but wrote no debug output",
            ));
        }
        Ok(debug_dir)
    }
}

impl DebugCompiler for SolcCompiler {
    fn version(&self) -> &Version {
        &self.version
    }

    fn compile<'a>(&'a self, job: &'a CompileJob) -> BoxFuture<'a, Result<PathBuf, CompilationError>> {
        Box::pin(self.run(job))
    }
}
