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

//! Walnut Common - Shared functionality for Walnut components
//!
//! This crate provides the data model shared by the trace engine and the
//! service binary: raw and normalized call traces, resolved contracts, the
//! debugger payload handed to the step-through UI, plus logging setup and
//! scrubbing of sensitive data from error messages.

/// Common types used throughout Walnut including call traces, contracts and debugger payloads
pub mod types;

/// Logging setup and utilities for consistent logging across Walnut components
pub mod logging;
/// Scrubbing of URLs and API keys from messages that leave the process
pub mod sanitize;

pub use logging::*;
pub use sanitize::*;
pub use types::*;
