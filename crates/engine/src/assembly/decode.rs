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

//! ABI decoding of call arguments, return values and revert data.
//!
//! Decoding never fails as a whole. When the full parameter list does not
//! decode, each parameter is decoded on its own from its head slot so that one
//! bad field only turns that field into [`DecodedValue::Undecoded`].

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi, Param};
use alloy_primitives::{hex, Bytes, Selector, U256};
use serde_json::{json, Value};
use walnut_common::{DecodedParam, DecodedValue};

const WORD: usize = 32;

/// `Error(string)`
pub const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)`
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// JSON rendering of a decoded value. Integers become decimal strings so no
/// precision is lost.
pub fn dyn_sol_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => json!(b),
        DynSolValue::Int(n, _) => json!(n.to_string()),
        DynSolValue::Uint(n, _) => json!(n.to_string()),
        DynSolValue::FixedBytes(word, size) => json!(hex::encode_prefixed(&word[..*size])),
        DynSolValue::Address(address) => json!(address.to_checksum(None)),
        DynSolValue::Function(function) => json!(hex::encode_prefixed(function.as_slice())),
        DynSolValue::Bytes(bytes) => json!(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => json!(s),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(dyn_sol_to_json).collect())
        }
        DynSolValue::CustomStruct { prop_names, tuple, .. } => {
            if prop_names.len() == tuple.len() {
                Value::Object(
                    prop_names.iter().cloned().zip(tuple.iter().map(dyn_sol_to_json)).collect(),
                )
            } else {
                Value::Array(tuple.iter().map(dyn_sol_to_json).collect())
            }
        }
    }
}

/// Single-line human-readable rendering.
pub fn display_value(value: &DynSolValue) -> String {
    let join = |items: &[DynSolValue]| items.iter().map(display_value).collect::<Vec<_>>().join(", ");
    match value {
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Int(n, _) => n.to_string(),
        DynSolValue::Uint(n, _) => n.to_string(),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Function(function) => hex::encode_prefixed(function.as_slice()),
        DynSolValue::Bytes(bytes) => hex::encode_prefixed(bytes),
        DynSolValue::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => format!("[{}]", join(items)),
        DynSolValue::Tuple(items) => format!("({})", join(items)),
        DynSolValue::CustomStruct { name, prop_names, tuple } => {
            let fields = prop_names
                .iter()
                .zip(tuple)
                .map(|(k, v)| format!("{k}: {}", display_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{name} {{ {fields} }}")
        }
    }
}

fn decoded(value: &DynSolValue) -> DecodedValue {
    DecodedValue::Decoded { value: dyn_sol_to_json(value), display: display_value(value) }
}

fn undecoded(raw: &[u8], reason: impl Into<String>) -> DecodedValue {
    DecodedValue::Undecoded { raw: Bytes::copy_from_slice(raw), reason: reason.into() }
}

/// Number of head words a static type occupies, `None` when it overflows.
fn head_words(ty: &DynSolType) -> Option<usize> {
    if ty.is_dynamic() {
        return Some(1);
    }
    let sum = |types: &[DynSolType]| {
        types.iter().try_fold(0usize, |acc, t| acc.checked_add(head_words(t)?))
    };
    match ty {
        DynSolType::Tuple(types) => sum(types),
        DynSolType::FixedArray(inner, len) => head_words(inner)?.checked_mul(*len),
        DynSolType::CustomStruct { tuple, .. } => sum(tuple),
        _ => Some(1),
    }
}

/// Bytes of head a value of `ty` occupies.
fn head_width(ty: &DynSolType) -> Option<usize> {
    head_words(ty)?.checked_mul(WORD)
}

fn word_at(data: &[u8], offset: usize) -> Option<&[u8]> {
    data.get(offset..offset.checked_add(WORD)?)
}

/// Decode the value whose head slot starts at `head`.
fn decode_at(ty: &DynSolType, data: &[u8], head: usize) -> Result<DynSolValue, (Vec<u8>, String)> {
    let rest = || data.get(head..).unwrap_or_default().to_vec();
    let width = head_width(ty).ok_or_else(|| (rest(), format!("{ty} is too large")))?;
    let head_bytes = head
        .checked_add(width)
        .and_then(|end| data.get(head..end))
        .ok_or_else(|| (rest(), "calldata too short".to_string()))?;

    if !ty.is_dynamic() {
        return ty.abi_decode(head_bytes).map_err(|e| (head_bytes.to_vec(), e.to_string()));
    }

    // a lone dynamic value encodes as an offset word followed by its tail
    let offset = U256::from_be_slice(head_bytes);
    let tail = usize::try_from(offset)
        .ok()
        .and_then(|offset| data.get(offset..))
        .ok_or_else(|| (head_bytes.to_vec(), format!("offset {offset} out of bounds")))?;
    let mut standalone = U256::from(WORD).to_be_bytes::<WORD>().to_vec();
    standalone.extend_from_slice(tail);
    ty.abi_decode(&standalone).map_err(|e| (head_bytes.to_vec(), e.to_string()))
}

fn param_type_name(param: &Param) -> String {
    if param.ty.starts_with("tuple") {
        param.selector_type().into_owned()
    } else {
        param.ty.clone()
    }
}

/// Decode `data` (without selector) against `params`.
pub fn decode_params(params: &[Param], data: &[u8]) -> Vec<DecodedParam> {
    let types: Vec<Result<DynSolType, String>> =
        params.iter().map(|p| p.resolve().map_err(|e| e.to_string())).collect();

    let resolved = types.iter().cloned().collect::<Result<Vec<_>, _>>().ok();
    // types whose head cannot even fit in `data` go straight to the per-field walk
    let fits = |types: &[DynSolType]| {
        types
            .iter()
            .try_fold(0usize, |acc, t| acc.checked_add(head_width(t)?))
            .is_some_and(|total| total <= data.len())
    };
    if let Some(resolved) = resolved.filter(|r| fits(r)) {
        if let Ok(DynSolValue::Tuple(values)) = DynSolType::Tuple(resolved).abi_decode_params(data) {
            if values.len() == params.len() {
                return params
                    .iter()
                    .zip(&values)
                    .map(|(param, value)| DecodedParam {
                        name: param.name.clone(),
                        ty: param_type_name(param),
                        value: decoded(value),
                    })
                    .collect();
            }
        }
    }

    let mut head = 0;
    params
        .iter()
        .zip(types)
        .map(|(param, ty)| {
            let value = match ty {
                Ok(ty) => {
                    let value = match decode_at(&ty, data, head) {
                        Ok(value) => decoded(&value),
                        Err((raw, reason)) => undecoded(&raw, reason),
                    };
                    head = head.saturating_add(head_width(&ty).unwrap_or(usize::MAX));
                    value
                }
                Err(reason) => {
                    let raw = word_at(data, head).unwrap_or_default();
                    head = head.saturating_add(WORD);
                    undecoded(raw, reason)
                }
            };
            DecodedParam { name: param.name.clone(), ty: param_type_name(param), value }
        })
        .collect()
}

/// Selector of `input`, when it has one.
pub fn selector_of(input: &[u8]) -> Option<Selector> {
    input.get(..4).map(Selector::from_slice)
}

/// The ABI function `input` calls.
pub fn find_function<'a>(abi: &'a JsonAbi, input: &[u8]) -> Option<&'a Function> {
    let selector = selector_of(input)?;
    abi.functions().find(|f| f.selector() == selector)
}

/// Decode the arguments of a call to `function`.
pub fn decode_input(function: &Function, input: &[u8]) -> Vec<DecodedParam> {
    decode_params(&function.inputs, input.get(4..).unwrap_or_default())
}

/// Decode the return data of `function`.
pub fn decode_output(function: &Function, output: &[u8]) -> Vec<DecodedParam> {
    decode_params(&function.outputs, output)
}

/// Human-readable revert reason: `Error(string)`, `Panic(uint256)` or a
/// custom error declared in `abi`.
pub fn decode_revert(output: &[u8], abi: Option<&JsonAbi>) -> Option<String> {
    let selector = output.get(..4)?;
    let body = &output[4..];

    if selector == ERROR_SELECTOR {
        if let Ok(DynSolValue::String(reason)) = DynSolType::String.abi_decode(body) {
            return Some(reason);
        }
    }
    if selector == PANIC_SELECTOR {
        if let Ok(DynSolValue::Uint(code, _)) = DynSolType::Uint(256).abi_decode(body) {
            return Some(format!("panic: {}", panic_reason(code)));
        }
    }

    let error = abi?.errors().find(|e| e.selector().as_slice() == selector)?;
    let args = decode_params(&error.inputs, body)
        .into_iter()
        .map(|p| match p.value {
            DecodedValue::Decoded { display, .. } => display,
            DecodedValue::Undecoded { .. } => "?".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("{}({args})", error.name))
}

fn panic_reason(code: U256) -> String {
    let text = match u64::try_from(code).unwrap_or(u64::MAX) {
        0x01 => "assertion failed",
        0x11 => "arithmetic overflow or underflow",
        0x12 => "division or modulo by zero",
        0x21 => "invalid enum value",
        0x22 => "invalid storage byte array",
        0x31 => "pop on empty array",
        0x32 => "array index out of bounds",
        0x41 => "out of memory",
        0x51 => "call to uninitialized function",
        _ => return format!("{code:#x}"),
    };
    format!("{text} ({code:#x})")
}

#[cfg(test)]
mod tests {
    use alloy_dyn_abi::JsonAbiExt;
    use alloy_primitives::Address;

    use super::*;

    fn transfer_abi() -> JsonAbi {
        serde_json::from_value(json!([
            {"type": "function", "name": "transfer", "stateMutability": "nonpayable",
             "inputs": [{"name": "to", "type": "address"}, {"name": "amount", "type": "uint256"}],
             "outputs": [{"name": "", "type": "bool"}]},
            {"type": "error", "name": "InsufficientBalance",
             "inputs": [{"name": "needed", "type": "uint256"}]}
        ]))
        .unwrap()
    }

    #[test]
    fn test_decode_transfer() {
        let abi = transfer_abi();
        let function = abi.function("transfer").unwrap().first().unwrap();
        let recipient = Address::repeat_byte(0x11);
        let input = function
            .abi_encode_input(&[DynSolValue::Address(recipient), DynSolValue::Uint(U256::from(1000), 256)])
            .unwrap();

        assert_eq!(find_function(&abi, &input).map(|f| f.name.as_str()), Some("transfer"));
        let args = decode_input(function, &input);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].ty, "address");
        assert_eq!(args[1].name, "amount");
        assert_eq!(
            args[1].value,
            DecodedValue::Decoded { value: json!("1000"), display: "1000".into() }
        );
    }

    #[test]
    fn test_bad_field_does_not_poison_siblings() {
        let params: Vec<Param> = serde_json::from_value(json!([
            {"name": "memo", "type": "bytes"},
            {"name": "amount", "type": "uint256"}
        ]))
        .unwrap();
        // the offset of `memo` points past the end of the data
        let mut data = U256::from(0x400).to_be_bytes::<32>().to_vec();
        data.extend_from_slice(&U256::from(7).to_be_bytes::<32>());

        let decoded = decode_params(&params, &data);
        assert!(!decoded[0].value.is_decoded());
        assert_eq!(
            decoded[1].value,
            DecodedValue::Decoded { value: json!("7"), display: "7".into() }
        );
    }

    #[test]
    fn test_truncated_dynamic_field() {
        let params: Vec<Param> = serde_json::from_value(json!([
            {"name": "id", "type": "uint8"},
            {"name": "name", "type": "string"}
        ]))
        .unwrap();
        let mut data = U256::from(5).to_be_bytes::<32>().to_vec();
        data.extend_from_slice(&U256::from(0x1000).to_be_bytes::<32>());

        let decoded = decode_params(&params, &data);
        assert!(decoded[0].value.is_decoded());
        match &decoded[1].value {
            DecodedValue::Undecoded { raw, reason } => {
                assert_eq!(raw.len(), 32);
                assert!(reason.contains("out of bounds"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_oversized_fixed_array_is_undecoded() {
        let huge = DynSolType::FixedArray(
            Box::new(DynSolType::FixedArray(Box::new(DynSolType::Uint(256)), usize::MAX)),
            2,
        );
        assert_eq!(head_width(&huge), None);
        assert_eq!(head_width(&DynSolType::FixedArray(Box::new(DynSolType::Bool), 3)), Some(96));

        let data = U256::from(1).to_be_bytes::<32>();
        let (raw, reason) = decode_at(&huge, &data, 0).unwrap_err();
        assert_eq!(raw.len(), 32);
        assert!(reason.contains("too large"));
        assert!(decode_at(&DynSolType::Uint(256), &data, usize::MAX).is_err());
    }

    #[test]
    fn test_decode_revert() {
        let reason = DynSolValue::String("nope".into()).abi_encode();
        let mut output = ERROR_SELECTOR.to_vec();
        output.extend_from_slice(&reason);
        assert_eq!(decode_revert(&output, None).as_deref(), Some("nope"));

        let mut panic = PANIC_SELECTOR.to_vec();
        panic.extend_from_slice(&U256::from(0x11).to_be_bytes::<32>());
        assert_eq!(
            decode_revert(&panic, None).as_deref(),
            Some("panic: arithmetic overflow or underflow (0x11)")
        );

        let abi = transfer_abi();
        let error = abi.errors().next().unwrap();
        let mut custom = error.selector().to_vec();
        custom.extend_from_slice(&U256::from(5).to_be_bytes::<32>());
        assert_eq!(decode_revert(&custom, Some(&abi)).as_deref(), Some("InsufficientBalance(5)"));
        assert_eq!(decode_revert(&[0xde, 0xad], Some(&abi)), None);
    }

    #[test]
    fn test_tuple_json_and_display() {
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Bool(true),
            DynSolValue::Array(vec![DynSolValue::String("a".into())]),
        ]);
        assert_eq!(dyn_sol_to_json(&value), json!([true, ["a"]]));
        assert_eq!(display_value(&value), "(true, [\"a\"])");
    }
}
