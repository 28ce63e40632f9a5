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

//! Final merge into the debugger payload.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use walnut_common::{
    CompilationDiagnostic, ContractDebuggerData, DebugCallContract, DebuggerInfo,
    CodeLocation, DebuggerTraceEntry, FlatTraceCall, PcSourceInfo, SimulationDebuggerData,
    TraceStep, TxMetadata,
};

use super::{calls::CallMaps, location::range_to_location};

/// Everything [`assemble`] merges.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyInput<'a> {
    /// Flattened trace
    pub flat: &'a [FlatTraceCall],
    /// Opcode steps attributed to flat frames
    pub steps: &'a [TraceStep],
    /// Debug data of every compiled contract
    pub debug_contracts: &'a BTreeMap<Address, DebugCallContract>,
}

/// Code address of the frame, when that frame runs deployed code.
fn runtime_code_address(frame: &FlatTraceCall) -> Option<Address> {
    if frame.kind.is_create() {
        None
    } else {
        frame.code_address()
    }
}

/// Merge call maps, steps and per-contract debug data.
///
/// Every step whose program counter maps to a source file becomes a debugger
/// trace entry owned by the call that executed it. Consecutive steps of the
/// same call landing on the same span collapse into one entry. Call ownership
/// comes from `maps`; nothing is re-derived here.
pub fn assemble(
    input: AssemblyInput<'_>,
    mut maps: CallMaps,
    diagnostics: Vec<CompilationDiagnostic>,
    tx: Option<TxMetadata>,
) -> DebuggerInfo {
    let mut executed: BTreeMap<Address, BTreeMap<usize, Vec<CodeLocation>>> = BTreeMap::new();
    let mut debugger_trace: Vec<DebuggerTraceEntry> = Vec::new();

    for step in input.steps {
        let Some(frame) = input.flat.get(step.frame_index) else { continue };
        let Some(address) = runtime_code_address(frame) else { continue };
        let Some(owner) = maps.frame_owner.get(&step.frame_index).copied() else { continue };
        let Some(contract) = input.debug_contracts.get(&address) else { continue };
        let Some(range) = contract.source_range(step.pc) else { continue };
        let Some(file) = contract.sources.get(&range.file_index) else { continue };

        let location = range_to_location(file, range);
        let table = executed.entry(address).or_default().entry(step.pc).or_default();
        let location_index = match table.iter().position(|known| *known == location) {
            Some(index) => index,
            None => {
                table.push(location.clone());
                table.len() - 1
            }
        };

        let repeated = debugger_trace.last().is_some_and(|last| {
            last.contract_call_id == owner.contract_call_id
                && last.function_call_id == owner.function_call_id
                && last.location == location
        });
        if repeated {
            continue;
        }

        let entry_index = debugger_trace.len();
        if let Some(call) = maps.contract_calls.get_mut(&owner.contract_call_id) {
            call.debugger_trace_step_index.get_or_insert(entry_index);
        }
        if let Some(function) = owner.function_call_id.and_then(|id| maps.function_calls.get_mut(&id)) {
            function.debugger_trace_step_index.get_or_insert(entry_index);
        }
        debugger_trace.push(DebuggerTraceEntry {
            step_index: step.index,
            pc: step.pc,
            location_index,
            contract_call_id: owner.contract_call_id,
            function_call_id: owner.function_call_id,
            location,
        });
    }

    for call in maps.contract_calls.values_mut() {
        call.debugger_data_available = input
            .flat
            .get(call.frame_index)
            .and_then(runtime_code_address)
            .is_some_and(|address| input.debug_contracts.contains_key(&address));
    }

    let classes_debugger_data = input
        .debug_contracts
        .iter()
        .map(|(address, contract)| {
            let pc_to_source_info = executed
                .remove(address)
                .unwrap_or_default()
                .into_iter()
                .map(|(pc, locations)| (pc, PcSourceInfo { locations }))
                .collect();
            let source_code = contract
                .sources
                .values()
                .map(|file| (file.path.clone(), file.content.clone()))
                .collect();
            (*address, ContractDebuggerData { pc_to_source_info, source_code })
        })
        .collect();

    DebuggerInfo {
        contract_calls_map: maps.contract_calls,
        function_calls_map: maps.function_calls,
        simulation_debugger_data: SimulationDebuggerData { classes_debugger_data, debugger_trace },
        diagnostics,
        tx,
    }
}
