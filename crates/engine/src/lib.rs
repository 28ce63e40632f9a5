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

//! Walnut Engine - trace reconstruction and source correlation
//!
//! Turns a transaction hash or a hypothetical call into the payload a
//! step-through debugger consumes. See [`pipeline`] for the stages.

pub mod acquisition;
pub use acquisition::*;

pub mod assembly;
pub use assembly::*;

pub mod compile;
pub use compile::*;

pub mod config;
pub use config::*;

pub mod normalize;
pub use normalize::*;

pub mod pipeline;
pub use pipeline::*;

pub mod resolution;
pub use resolution::*;

pub mod sweep;
pub use sweep::*;
