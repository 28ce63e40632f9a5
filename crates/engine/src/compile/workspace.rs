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

//! Per-run scratch space.
//!
//! Every run gets `<root>/run-<unix millis>-<random>`; every contract inside it
//! gets a directory named after its checksummed address, holding the cleaned
//! sources at their original relative paths.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use alloy_primitives::Address;
use futures::future::try_join_all;
use rand::{distr::Alphanumeric, Rng};
use tracing::{debug, warn};
use walnut_common::SourceFile;

/// Prefix of every run directory.
pub const RUN_DIR_PREFIX: &str = "run-";

const ZERO_WIDTH: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

/// Strip byte-order marks and zero-width characters and normalize line endings.
pub fn clean_source(source: &str) -> String {
    source
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect()
}

/// Relative form of `path` with no root, prefix, `.` or `..` components.
pub fn sanitize_path(path: &str) -> PathBuf {
    let mut sanitized = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(name) => sanitized.push(name),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                warn!(path, "Dropping non-relative component from source path");
            }
        }
    }
    if sanitized.as_os_str().is_empty() {
        sanitized.push("unnamed_source.sol");
    }
    sanitized
}

fn run_dir_name() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String =
        rand::rng().sample_iter(&Alphanumeric).take(8).map(char::from).collect();
    format!("{RUN_DIR_PREFIX}{millis}-{suffix}")
}

/// Scratch directory of one pipeline run.
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    run_dir: PathBuf,
}

impl ScratchSpace {
    /// Create a fresh, uniquely named run directory under `root`.
    pub async fn create_run(root: &Path) -> io::Result<Self> {
        let run_dir = root.join(run_dir_name());
        tokio::fs::create_dir_all(&run_dir).await?;
        debug!(run_dir = %run_dir.display(), "Created scratch run directory");
        Ok(Self { run_dir })
    }

    /// The run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Directory of the contract at `address`.
    pub fn contract_dir(&self, address: Address) -> PathBuf {
        self.run_dir.join(address.to_checksum(None))
    }

    /// Write every source of `address` and wait for all writes to complete.
    pub async fn materialize(
        &self,
        address: Address,
        sources: &[SourceFile],
    ) -> io::Result<MaterializedSources> {
        let dir = self.contract_dir(address);
        tokio::fs::create_dir_all(&dir).await?;

        let written: Vec<SourceFile> = sources
            .iter()
            .map(|source| {
                SourceFile::new(
                    sanitize_path(&source.path).to_string_lossy(),
                    clean_source(&source.content),
                )
            })
            .collect();
        let writes = written.iter().map(|source| {
            let path = dir.join(&source.path);
            async move {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, source.content.as_bytes()).await
            }
        });
        try_join_all(writes).await?;

        debug!(%address, files = written.len(), "Materialized sources");
        Ok(MaterializedSources { dir, sources: written })
    }
}

/// Sources of one contract as they were written for the compiler.
#[derive(Debug, Clone)]
pub struct MaterializedSources {
    /// Contract directory
    pub dir: PathBuf,
    /// Sanitized paths and cleaned contents; compiler offsets refer to these
    pub sources: Vec<SourceFile>,
}
