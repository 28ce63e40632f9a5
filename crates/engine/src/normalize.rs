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

//! Trace normalization and flattening.
//!
//! [`normalize`] turns the node's loosely typed frame into a [`TraceCall`],
//! [`flatten`] lays the tree out in pre-order, and [`attribute_steps`] ties the
//! opcode step log back to the flattened frames.

use std::{collections::HashMap, str::FromStr};

use alloy_primitives::{Address, Bytes, B256, U256};
use itertools::Itertools;
use walnut_common::{
    CallKind, FlatTraceCall, RawQuantity, RawTraceCall, RawTraceLog, StructStep, TraceCall,
    TraceLog, TraceStep, UnknownCallKind,
};

/// Errors raised while normalizing a raw frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// A numeric field is neither hex nor decimal
    #[error("invalid integer in `{field}`: {value}")]
    InvalidQuantity {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },
    /// An address field does not parse
    #[error("invalid address in `{field}`: {value}")]
    InvalidAddress {
        /// Field name
        field: &'static str,
        /// Offending value
        value: String,
    },
    /// A byte string field is not valid hex
    #[error("invalid hex bytes in `{field}`")]
    InvalidBytes {
        /// Field name
        field: &'static str,
    },
    /// The frame type is not recognised
    #[error(transparent)]
    UnknownCallKind(#[from] UnknownCallKind),
}

/// Prefix `0x` when missing; map absent or blank values to `0x`.
pub fn normalize_hex(value: Option<&str>) -> String {
    match value.map(str::trim) {
        None | Some("") => "0x".to_string(),
        Some(v) if v.starts_with("0x") || v.starts_with("0X") => format!("0x{}", &v[2..]),
        Some(v) => format!("0x{v}"),
    }
}

fn parse_quantity(field: &'static str, value: Option<&RawQuantity>) -> Result<U256, NormalizeError> {
    let invalid = |value: &str| NormalizeError::InvalidQuantity { field, value: value.to_string() };
    match value {
        None => Ok(U256::ZERO),
        Some(RawQuantity::Number(n)) => Ok(U256::from(*n)),
        Some(RawQuantity::Text(text)) => {
            let text = text.trim();
            if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                if hex.is_empty() {
                    return Ok(U256::ZERO);
                }
                U256::from_str_radix(hex, 16).map_err(|_| invalid(text))
            } else if text.is_empty() {
                Ok(U256::ZERO)
            } else {
                U256::from_str_radix(text, 10).map_err(|_| invalid(text))
            }
        }
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, NormalizeError> {
    Address::from_str(normalize_hex(Some(value)).as_str())
        .map_err(|_| NormalizeError::InvalidAddress { field, value: value.to_string() })
}

fn parse_optional_address(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<Address>, NormalizeError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => parse_address(field, v).map(Some),
    }
}

fn parse_bytes(field: &'static str, value: Option<&str>) -> Result<Bytes, NormalizeError> {
    Bytes::from_str(&normalize_hex(value)).map_err(|_| NormalizeError::InvalidBytes { field })
}

fn normalize_log(log: &RawTraceLog) -> Result<TraceLog, NormalizeError> {
    let topics = log
        .topics
        .iter()
        .map(|t| {
            B256::from_str(&normalize_hex(Some(t)))
                .map_err(|_| NormalizeError::InvalidBytes { field: "logs.topics" })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TraceLog {
        address: parse_address("logs.address", &log.address)?,
        topics,
        data: parse_bytes("logs.data", log.data.as_deref())?,
    })
}

/// Convert a raw frame, recursively, into a typed [`TraceCall`].
pub fn normalize(raw: &RawTraceCall) -> Result<TraceCall, NormalizeError> {
    let kind = raw.typ.parse::<CallKind>()?;
    let logs = raw
        .logs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(normalize_log)
        .collect::<Result<Vec<_>, _>>()?;
    let calls = raw
        .calls
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(normalize)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TraceCall {
        kind,
        from: parse_optional_address("from", raw.from.as_deref())?.unwrap_or_default(),
        to: parse_optional_address("to", raw.to.as_deref())?,
        value: parse_quantity("value", raw.value.as_ref())?,
        gas: parse_quantity("gas", raw.gas.as_ref())?,
        gas_used: parse_quantity("gasUsed", raw.gas_used.as_ref())?,
        input: parse_bytes("input", raw.input.as_deref())?,
        output: parse_bytes("output", raw.output.as_deref())?,
        error: raw.error.clone(),
        revert_reason: raw.revert_reason.clone(),
        is_reverted_frame: raw.is_reverted_frame.unwrap_or(false),
        logs,
        calls,
    })
}

/// Render a normalized frame back into the node's shape.
///
/// `normalize(&denormalize(&call)) == call` for every normalized `call`.
pub fn denormalize(call: &TraceCall) -> RawTraceCall {
    RawTraceCall {
        typ: call.kind.as_str().to_string(),
        from: Some(call.from.to_checksum(None)),
        to: call.to.map(|to| to.to_checksum(None)),
        value: Some(call.value.into()),
        gas: Some(call.gas.into()),
        gas_used: Some(call.gas_used.into()),
        input: Some(call.input.to_string()),
        output: Some(call.output.to_string()),
        error: call.error.clone(),
        revert_reason: call.revert_reason.clone(),
        is_reverted_frame: Some(call.is_reverted_frame),
        logs: Some(
            call.logs
                .iter()
                .map(|log| RawTraceLog {
                    address: log.address.to_checksum(None),
                    topics: log.topics.iter().map(ToString::to_string).collect(),
                    data: Some(log.data.to_string()),
                })
                .collect(),
        ),
        calls: Some(call.calls.iter().map(denormalize).collect()),
    }
}

/// Lay the tree out in depth-first pre-order.
///
/// Internal calls take `from`/`to` from their nearest external ancestor.
pub fn flatten(root: &TraceCall) -> Vec<FlatTraceCall> {
    let mut out = Vec::with_capacity(root.frame_count());
    flatten_into(root, 0, None, None, &mut out);
    out
}

fn flatten_into(
    call: &TraceCall,
    depth: usize,
    parent_index: Option<usize>,
    external: Option<(Address, Option<Address>)>,
    out: &mut Vec<FlatTraceCall>,
) {
    let index = out.len();
    let (from, to) = match (call.kind.is_external(), external) {
        (false, Some(inherited)) => inherited,
        _ => (call.from, call.to),
    };

    out.push(FlatTraceCall {
        index,
        depth,
        parent_index,
        children: Vec::new(),
        kind: call.kind,
        from,
        to,
        value: call.value,
        gas: call.gas,
        gas_used: call.gas_used,
        input: call.input.clone(),
        output: call.output.clone(),
        error: call.error.clone(),
        revert_reason: call.revert_reason.clone(),
        is_reverted_frame: call.is_reverted_frame,
        logs: call.logs.clone(),
    });
    if let Some(parent) = parent_index {
        out[parent].children.push(index);
    }

    for child in &call.calls {
        flatten_into(child, depth + 1, Some(index), Some((from, to)), out);
    }
}

/// Distinct callee addresses, in first-occurrence order.
pub fn unique_targets(flat: &[FlatTraceCall]) -> Vec<Address> {
    flat.iter().filter_map(|frame| frame.to).unique().collect()
}

/// Index of the nearest frame at or above `index` that crosses a contract
/// boundary.
pub fn external_owner(flat: &[FlatTraceCall], mut index: usize) -> usize {
    while !flat[index].kind.is_external() {
        match flat[index].parent_index {
            Some(parent) => index = parent,
            None => break,
        }
    }
    index
}

fn is_call_opcode(op: &str) -> bool {
    matches!(op, "CALL" | "CALLCODE" | "DELEGATECALL" | "STATICCALL" | "CREATE" | "CREATE2")
}

/// Tag every opcode step with the external frame that executed it.
///
/// The step log only carries depths, so frames are matched by entering them in
/// pre-order whenever the depth grows. A call opcode whose next step stays at
/// the same depth entered no code (precompile, account without code, or an
/// early failure), and the corresponding frame is skipped.
pub fn attribute_steps(flat: &[FlatTraceCall], steps: &[StructStep]) -> Vec<TraceStep> {
    if flat.is_empty() {
        return Vec::new();
    }

    // External frames that open an EVM frame, grouped under the external frame
    // that issues them.
    let mut entered: HashMap<usize, Vec<usize>> = HashMap::new();
    for frame in flat.iter().skip(1) {
        if frame.kind.is_external() && frame.kind.enters_frame() {
            if let Some(parent) = frame.parent_index {
                entered.entry(external_owner(flat, parent)).or_default().push(frame.index);
            }
        }
    }
    let mut cursor: HashMap<usize, usize> = HashMap::new();
    let mut next_child = |owner: usize| -> Option<usize> {
        let position = cursor.entry(owner).or_insert(0);
        let child = entered.get(&owner).and_then(|c| c.get(*position)).copied();
        if child.is_some() {
            *position += 1;
        }
        child
    };

    let root = external_owner(flat, 0);
    let mut stack = vec![root];
    let mut pending_call = false;
    let mut out = Vec::with_capacity(steps.len());

    for (index, step) in steps.iter().enumerate() {
        let depth = step.depth.max(1) as usize;

        if depth > stack.len() {
            while depth > stack.len() {
                let Some(&top) = stack.last() else { break };
                match next_child(top) {
                    Some(child) => stack.push(child),
                    None => break,
                }
            }
        } else {
            if depth == stack.len() && pending_call {
                if let Some(&top) = stack.last() {
                    next_child(top);
                }
            }
            while depth < stack.len() {
                stack.pop();
            }
        }
        pending_call = is_call_opcode(&step.op);

        if let Some(&frame_index) = stack.last() {
            out.push(TraceStep { index, pc: step.pc as usize, frame_index });
        }
    }

    out
}
