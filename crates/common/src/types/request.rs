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

use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};

/// A request to trace either a mined transaction or a hypothetical call.
///
/// Parsed untagged: a body carrying `txHash` is always a replay, whatever else
/// it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceRequest {
    /// Replay a mined transaction
    #[serde(rename_all = "camelCase")]
    Replay {
        /// Transaction hash
        tx_hash: TxHash,
        /// Node override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rpc_url: Option<String>,
        /// Chain override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain_id: Option<u64>,
    },
    /// Trace a call against a block without mining it
    #[serde(rename_all = "camelCase")]
    Simulate {
        /// Sender
        from: Address,
        /// Recipient
        to: Address,
        /// Calldata
        #[serde(alias = "data", default)]
        calldata: Bytes,
        /// Transferred value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<U256>,
        /// Block to simulate against, latest when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        block_number: Option<u64>,
        /// Node override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rpc_url: Option<String>,
        /// Chain override
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain_id: Option<u64>,
    },
}

impl TraceRequest {
    /// Node override carried by the request.
    pub fn rpc_url(&self) -> Option<&str> {
        match self {
            Self::Replay { rpc_url, .. } | Self::Simulate { rpc_url, .. } => rpc_url.as_deref(),
        }
    }

    /// Chain override carried by the request.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Self::Replay { chain_id, .. } | Self::Simulate { chain_id, .. } => *chain_id,
        }
    }

    /// Whether this request replays a mined transaction.
    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay { .. })
    }
}
