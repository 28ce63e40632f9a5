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

//! Call maps: the external and internal call nodes of a flattened trace.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use walnut_common::{
    CallResult, CallTraceInfo, Contract, ContractCall, EntryPoint, FlatTraceCall, FunctionCall,
    TxMetadata,
};

use super::decode::{decode_input, decode_output, decode_revert, find_function, selector_of};

/// Call ids owning a flat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOwner {
    /// External call the frame runs in
    pub contract_call_id: usize,
    /// Internal call, for `INTERNALCALL` frames
    pub function_call_id: Option<usize>,
}

/// The decoded call maps of a trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallMaps {
    /// External calls by id
    pub contract_calls: BTreeMap<usize, ContractCall>,
    /// Internal calls by id
    pub function_calls: BTreeMap<usize, FunctionCall>,
    /// Flat frame index -> owning call ids
    pub frame_owner: BTreeMap<usize, FrameOwner>,
}

impl CallMaps {
    /// Package as the call-trace-only payload.
    pub fn into_call_trace_info(self, tx: Option<TxMetadata>) -> CallTraceInfo {
        CallTraceInfo {
            contract_calls_map: self.contract_calls,
            function_calls_map: self.function_calls,
            tx,
        }
    }
}

/// Revert state of every flat frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertFlags {
    /// The frame failed, directly or because a failure bubbled up into it
    pub failed: Vec<bool>,
    /// The frame's effects were rolled back
    pub reverted: Vec<bool>,
    /// The innermost failing frame
    pub deepest: Option<usize>,
}

/// Propagate failures through the flat trace.
///
/// A frame fails when the node says so. A failing internal call also fails
/// every enclosing internal call up to and including its external frame, since
/// a revert unwinds the whole EVM frame. Failure then rolls down: every
/// descendant of a failed frame is reverted.
pub fn propagate_reverts(flat: &[FlatTraceCall]) -> RevertFlags {
    let mut failed: Vec<bool> = flat.iter().map(|f| f.failed() || f.is_reverted_frame).collect();

    for frame in flat.iter().rev() {
        if !failed[frame.index] || frame.kind.is_external() {
            continue;
        }
        let mut current = frame.parent_index;
        while let Some(parent) = current {
            failed[parent] = true;
            if flat[parent].kind.is_external() {
                break;
            }
            current = flat[parent].parent_index;
        }
    }

    let mut reverted = failed.clone();
    for frame in flat {
        if let Some(parent) = frame.parent_index {
            reverted[frame.index] |= reverted[parent];
        }
    }

    let deepest = flat
        .iter()
        .filter(|f| failed[f.index] && !f.children.iter().any(|c| failed[*c]))
        .fold(None::<&FlatTraceCall>, |best, f| match best {
            Some(best) if best.depth >= f.depth => Some(best),
            _ => Some(f),
        })
        .map(|f| f.index);

    RevertFlags { failed, reverted, deepest }
}

fn error_message(frame: &FlatTraceCall, contract: Option<&Contract>) -> Option<String> {
    frame
        .revert_reason
        .clone()
        .or_else(|| decode_revert(&frame.output, contract.map(|c| &c.abi)))
        .or_else(|| frame.error.clone())
}

fn call_result(frame: &FlatTraceCall, failed: bool, message: Option<&str>) -> CallResult {
    if failed {
        CallResult::Failure {
            error: message.unwrap_or("execution reverted").to_string(),
            ret_data: frame.output.clone(),
        }
    } else {
        CallResult::Success { ret_data: frame.output.clone() }
    }
}

/// Build the call maps of a flattened trace.
///
/// External frames become [`ContractCall`]s and internal frames
/// [`FunctionCall`]s, with ids assigned in pre-order. Arguments and results
/// are decoded with the ABI of the frame's code address.
pub fn build_call_maps(flat: &[FlatTraceCall], contracts: &BTreeMap<Address, Contract>) -> CallMaps {
    let flags = propagate_reverts(flat);
    let mut maps = CallMaps::default();

    for frame in flat {
        let contract = frame.code_address().and_then(|a| contracts.get(&a));
        let failed = flags.failed[frame.index];
        let message = if failed { error_message(frame, contract) } else { None };
        let function = if frame.kind.is_create() {
            None
        } else {
            contract.and_then(|c| find_function(&c.abi, &frame.input))
        };
        let arguments_decoded =
            function.map(|f| decode_input(f, &frame.input)).unwrap_or_default();
        let result_decoded = match function {
            Some(f) if !failed => decode_output(f, &frame.output),
            _ => Vec::new(),
        };
        let parent_owner = frame.parent_index.and_then(|p| maps.frame_owner.get(&p).copied());

        if frame.kind.is_external() {
            let call_id = maps.contract_calls.len();
            let entry_point = EntryPoint {
                call_type: frame.kind,
                entry_point_selector: if frame.kind.is_create() {
                    None
                } else {
                    selector_of(&frame.input)
                },
                calldata: frame.input.clone(),
                caller_address: frame.from,
                storage_address: frame.storage_address(),
                code_address: frame.code_address(),
                value: frame.value,
            };

            maps.contract_calls.insert(
                call_id,
                ContractCall {
                    call_id,
                    parent_call_id: parent_owner.map(|o| o.contract_call_id),
                    children_call_ids: Vec::new(),
                    function_call_ids: Vec::new(),
                    frame_index: frame.index,
                    entry_point,
                    result: call_result(frame, failed, message.as_deref()),
                    contract_name: contract.and_then(|c| c.name.clone()),
                    entry_point_name: function.map(|f| f.name.clone()),
                    arguments_decoded,
                    result_decoded,
                    is_reverted_frame: flags.reverted[frame.index],
                    is_deepest_revert: flags.deepest == Some(frame.index),
                    error_message: message,
                    is_verified: contract.is_some_and(|c| c.verified),
                    debugger_data_available: false,
                    debugger_trace_step_index: None,
                    gas: frame.gas,
                    gas_used: frame.gas_used,
                },
            );
            if let Some(parent) = parent_owner.and_then(|o| maps.contract_calls.get_mut(&o.contract_call_id)) {
                parent.children_call_ids.push(call_id);
            }
            maps.frame_owner
                .insert(frame.index, FrameOwner { contract_call_id: call_id, function_call_id: None });
        } else {
            // an internal frame always has an external ancestor
            let Some(owner) = parent_owner else { continue };
            let function_call_id = maps.function_calls.len();
            let parent_function = owner.function_call_id.and_then(|id| maps.function_calls.get(&id));
            let fp = parent_function.map_or(0, |f| f.fp + 1);

            maps.function_calls.insert(
                function_call_id,
                FunctionCall {
                    function_call_id,
                    contract_call_id: owner.contract_call_id,
                    parent_function_call_id: owner.function_call_id,
                    children_function_call_ids: Vec::new(),
                    frame_index: frame.index,
                    fp,
                    function_name: function.map(|f| f.name.clone()),
                    result: call_result(frame, failed, message.as_deref()),
                    arguments_decoded,
                    result_decoded,
                    is_reverted_frame: flags.reverted[frame.index],
                    is_deepest_revert: flags.deepest == Some(frame.index),
                    error_message: message,
                    debugger_trace_step_index: None,
                },
            );
            match owner.function_call_id {
                Some(parent) => {
                    if let Some(parent) = maps.function_calls.get_mut(&parent) {
                        parent.children_function_call_ids.push(function_call_id);
                    }
                }
                None => {
                    if let Some(call) = maps.contract_calls.get_mut(&owner.contract_call_id) {
                        call.function_call_ids.push(function_call_id);
                    }
                }
            }
            maps.frame_owner.insert(
                frame.index,
                FrameOwner {
                    contract_call_id: owner.contract_call_id,
                    function_call_id: Some(function_call_id),
                },
            );
        }
    }

    maps
}
