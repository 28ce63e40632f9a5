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

//! Call trace representations.
//!
//! A trace moves through three shapes:
//!
//! - [`RawTraceCall`]: the frame exactly as the node's `callTracer` returns it,
//!   with every numeric field still a hex string and most fields optional.
//! - [`TraceCall`]: the normalized, strongly-typed tree.
//! - [`FlatTraceCall`]: a pre-order copy of every frame annotated with its
//!   index, depth and parent/children links.

use std::{fmt, str::FromStr};

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use serde::{Deserialize, Serialize};

/// Type of a trace frame.
///
/// `InternalCall` is not produced by the EVM itself. It marks an intra-contract
/// function invocation that the node surfaces next to the external calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// Regular message call
    #[serde(rename = "CALL")]
    Call,
    /// Legacy CALLCODE
    #[serde(rename = "CALLCODE")]
    CallCode,
    /// DELEGATECALL, executes the callee's code in the caller's storage
    #[serde(rename = "DELEGATECALL")]
    DelegateCall,
    /// Read-only call
    #[serde(rename = "STATICCALL")]
    StaticCall,
    /// Contract creation through CREATE
    #[serde(rename = "CREATE")]
    Create,
    /// Contract creation through CREATE2
    #[serde(rename = "CREATE2")]
    Create2,
    /// Self-destruct pseudo frame
    #[serde(rename = "SELFDESTRUCT")]
    SelfDestruct,
    /// Intra-contract function call
    #[serde(rename = "INTERNALCALL")]
    InternalCall,
}

impl CallKind {
    /// Returns true for frames that cross a contract boundary.
    pub fn is_external(&self) -> bool {
        match self {
            Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall
            | Self::Create
            | Self::Create2
            | Self::SelfDestruct => true,
            Self::InternalCall => false,
        }
    }

    /// Returns true for contract creations. The code that runs in these frames
    /// is init code, not the deployed runtime code.
    pub fn is_create(&self) -> bool {
        match self {
            Self::Create | Self::Create2 => true,
            Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall
            | Self::SelfDestruct
            | Self::InternalCall => false,
        }
    }

    /// Returns true if the EVM opens a new execution frame (and therefore a
    /// deeper struct-log depth) for this kind.
    pub fn enters_frame(&self) -> bool {
        match self {
            Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall
            | Self::Create
            | Self::Create2 => true,
            Self::SelfDestruct | Self::InternalCall => false,
        }
    }

    /// Account whose code runs in a frame of this kind.
    pub fn code_address(&self, from: Address, to: Option<Address>) -> Option<Address> {
        match self {
            Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall
            | Self::Create
            | Self::Create2
            | Self::InternalCall => to,
            Self::SelfDestruct => Some(from),
        }
    }

    /// Account whose storage a frame of this kind reads and writes.
    pub fn storage_address(&self, from: Address, to: Option<Address>) -> Option<Address> {
        match self {
            Self::CallCode | Self::DelegateCall | Self::SelfDestruct => Some(from),
            Self::Call | Self::StaticCall | Self::Create | Self::Create2 | Self::InternalCall => to,
        }
    }

    /// The canonical upper-case name as emitted by geth's `callTracer`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::DelegateCall => "DELEGATECALL",
            Self::StaticCall => "STATICCALL",
            Self::Create => "CREATE",
            Self::Create2 => "CREATE2",
            Self::SelfDestruct => "SELFDESTRUCT",
            Self::InternalCall => "INTERNALCALL",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a frame type string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown call type `{0}`")]
pub struct UnknownCallKind(pub String);

impl FromStr for CallKind {
    type Err = UnknownCallKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CALL" => Ok(Self::Call),
            "CALLCODE" => Ok(Self::CallCode),
            "DELEGATECALL" => Ok(Self::DelegateCall),
            "STATICCALL" => Ok(Self::StaticCall),
            "CREATE" => Ok(Self::Create),
            "CREATE2" => Ok(Self::Create2),
            "SELFDESTRUCT" | "SUICIDE" => Ok(Self::SelfDestruct),
            "INTERNALCALL" => Ok(Self::InternalCall),
            _ => Err(UnknownCallKind(s.to_string())),
        }
    }
}

/// A numeric field as found in node output: usually a hex string, sometimes a
/// plain JSON number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawQuantity {
    /// `"0x1a"` or `"26"`
    Text(String),
    /// `26`
    Number(u64),
}

impl From<U256> for RawQuantity {
    fn from(value: U256) -> Self {
        Self::Text(format!("{value:#x}"))
    }
}

/// Log entry attached to a raw frame (`withLog: true`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTraceLog {
    /// Emitting contract
    pub address: String,
    /// Indexed topics
    #[serde(default)]
    pub topics: Vec<String>,
    /// Unindexed data
    #[serde(default)]
    pub data: Option<String>,
}

/// The node's native call frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTraceCall {
    /// Frame type, e.g. `CALL` or `INTERNALCALL`
    #[serde(rename = "type")]
    pub typ: String,
    /// Caller
    #[serde(default)]
    pub from: Option<String>,
    /// Callee, absent for failed creations and for most internal calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Transferred value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RawQuantity>,
    /// Gas provided to the frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<RawQuantity>,
    /// Gas consumed by the frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<RawQuantity>,
    /// Calldata or init code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Return data. Some tracers omit the `0x` prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Error string reported by the EVM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Decoded revert reason, if the node provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
    /// Whether the frame's effects were rolled back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reverted_frame: Option<bool>,
    /// Logs emitted in the frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<RawTraceLog>>,
    /// Nested frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<Self>>,
}

/// A log entry with typed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLog {
    /// Emitting contract
    pub address: Address,
    /// Indexed topics
    pub topics: Vec<B256>,
    /// Unindexed data
    pub data: Bytes,
}

/// Normalized call frame.
///
/// All numeric fields are arbitrary-precision integers, addresses are typed
/// (and serialize checksummed), `output` is always a well-formed byte string
/// and the optional collections are always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceCall {
    /// Frame type
    #[serde(rename = "type")]
    pub kind: CallKind,
    /// Caller
    pub from: Address,
    /// Callee
    pub to: Option<Address>,
    /// Transferred value
    pub value: U256,
    /// Gas provided
    pub gas: U256,
    /// Gas consumed
    pub gas_used: U256,
    /// Calldata or init code
    pub input: Bytes,
    /// Return data
    pub output: Bytes,
    /// Error string
    pub error: Option<String>,
    /// Revert reason
    pub revert_reason: Option<String>,
    /// Whether the frame's effects were rolled back
    pub is_reverted_frame: bool,
    /// Logs
    pub logs: Vec<TraceLog>,
    /// Nested frames
    pub calls: Vec<Self>,
}

impl TraceCall {
    /// Whether the frame itself failed.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Total number of frames in this subtree, including `self`.
    pub fn frame_count(&self) -> usize {
        1 + self.calls.iter().map(Self::frame_count).sum::<usize>()
    }
}

/// A frame copied out of the tree during flattening.
///
/// The nested `calls` are replaced by index links into the flattened sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatTraceCall {
    /// Position in the pre-order sequence (root is 0)
    pub index: usize,
    /// Distance from the root
    pub depth: usize,
    /// Index of the parent frame
    pub parent_index: Option<usize>,
    /// Indices of the direct children, in call order
    pub children: Vec<usize>,
    /// Frame type
    #[serde(rename = "type")]
    pub kind: CallKind,
    /// Caller (inherited from the enclosing external frame for internal calls)
    pub from: Address,
    /// Callee (inherited from the enclosing external frame for internal calls)
    pub to: Option<Address>,
    /// Transferred value
    pub value: U256,
    /// Gas provided
    pub gas: U256,
    /// Gas consumed
    pub gas_used: U256,
    /// Calldata
    pub input: Bytes,
    /// Return data
    pub output: Bytes,
    /// Error string
    pub error: Option<String>,
    /// Revert reason
    pub revert_reason: Option<String>,
    /// Whether the frame's effects were rolled back
    pub is_reverted_frame: bool,
    /// Logs
    pub logs: Vec<TraceLog>,
}

impl FlatTraceCall {
    /// Whether the frame itself failed.
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Account whose code runs in this frame.
    pub fn code_address(&self) -> Option<Address> {
        self.kind.code_address(self.from, self.to)
    }

    /// Account whose storage this frame operates on.
    pub fn storage_address(&self) -> Option<Address> {
        self.kind.storage_address(self.from, self.to)
    }
}

/// One entry of the node's struct logger output (`structLogs`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructStep {
    /// Program counter
    pub pc: u64,
    /// Opcode mnemonic
    pub op: String,
    /// Call depth, 1 for the outermost frame
    pub depth: u64,
}

/// A struct-log step attributed to the flat frame that executed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    /// Position in the step log
    pub index: usize,
    /// Program counter
    pub pc: usize,
    /// Index of the owning [`FlatTraceCall`]
    pub frame_index: usize,
}

/// Metadata of the transaction (or simulated call) a trace belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMetadata {
    /// Hash, absent for simulated calls
    pub tx_hash: Option<TxHash>,
    /// Block the transaction was mined in, or the block simulated against
    pub block_number: u64,
    /// Sender nonce, if known
    pub nonce: Option<u64>,
    /// Sender
    pub from: Address,
    /// Recipient, absent for contract creation
    pub to: Option<Address>,
    /// Timestamp of the block, when the node reported it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_timestamp: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_kind_parsing() {
        assert_eq!("call".parse::<CallKind>().unwrap(), CallKind::Call);
        assert_eq!(" DelegateCall ".parse::<CallKind>().unwrap(), CallKind::DelegateCall);
        assert_eq!("SUICIDE".parse::<CallKind>().unwrap(), CallKind::SelfDestruct);
        assert_eq!("INTERNALCALL".parse::<CallKind>().unwrap(), CallKind::InternalCall);
        assert!("JUMP".parse::<CallKind>().is_err());
    }

    #[test]
    fn test_delegatecall_addresses() {
        let proxy = Address::repeat_byte(0x11);
        let logic = Address::repeat_byte(0x22);
        let kind = CallKind::DelegateCall;
        assert_eq!(kind.code_address(proxy, Some(logic)), Some(logic));
        assert_eq!(kind.storage_address(proxy, Some(logic)), Some(proxy));
        assert_eq!(CallKind::Call.storage_address(proxy, Some(logic)), Some(logic));
    }

    #[test]
    fn test_raw_frame_wire_names() {
        let json = r#"{"type":"CALL","from":"0x1","gasUsed":"0x10","isRevertedFrame":true}"#;
        let raw: RawTraceCall = serde_json::from_str(json).unwrap();
        assert_eq!(raw.typ, "CALL");
        assert_eq!(raw.gas_used, Some(RawQuantity::Text("0x10".into())));
        assert_eq!(raw.is_reverted_frame, Some(true));
        assert!(raw.calls.is_none());
    }
}
