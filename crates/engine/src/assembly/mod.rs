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

//! Debug payload assembly.
//!
//! [`build_call_maps`] turns the flattened trace into call nodes with decoded
//! arguments and results; it is all the simulation path needs. [`assemble`]
//! then merges those nodes with the attributed steps and per-contract debug
//! data into the full [`walnut_common::DebuggerInfo`].

mod calls;
mod debugger;
mod decode;
mod location;

pub use calls::{build_call_maps, propagate_reverts, CallMaps, FrameOwner, RevertFlags};
pub use debugger::{assemble, AssemblyInput};
pub use decode::{
    decode_input, decode_output, decode_params, decode_revert, display_value, dyn_sol_to_json,
    find_function, selector_of, ERROR_SELECTOR, PANIC_SELECTOR,
};
pub use location::{offset_to_position, range_to_location};
