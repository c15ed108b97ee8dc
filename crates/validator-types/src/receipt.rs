// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::proto;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Valid,
    Invalid,
}

/// A recorded state mutation. Both sets and deletes are always recorded
/// (§9 open question: older receipts dropped deletes; this core always
/// records them, since fork rollback needs them).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    Set { address: Address, value: Vec<u8> },
    Delete { address: Address },
}

impl StateChange {
    pub fn address(&self) -> &Address {
        match self {
            StateChange::Set { address, .. } => address,
            StateChange::Delete { address } => address,
        }
    }

    pub fn to_proto(&self) -> proto::StateChange {
        match self {
            StateChange::Set { address, value } => proto::StateChange {
                address: address.to_string(),
                change: Some(proto::state_change::Change::SetValue(value.clone())),
            },
            StateChange::Delete { address } => proto::StateChange {
                address: address.to_string(),
                change: Some(proto::state_change::Change::Delete(true)),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub attributes: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

impl Event {
    pub fn to_proto(&self) -> proto::Event {
        proto::Event {
            event_type: self.event_type.clone(),
            attributes: self.attributes.clone().into_iter().collect(),
            data: self.data.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub state_changes: Vec<StateChange>,
    pub events: Vec<Event>,
    pub receipt_data: Vec<Vec<u8>>,
    pub invalid_reason: Option<String>,
}

impl TransactionReceipt {
    pub fn valid(transaction_id: impl Into<String>, state_changes: Vec<StateChange>, events: Vec<Event>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: TransactionStatus::Valid,
            state_changes,
            events,
            receipt_data: Vec::new(),
            invalid_reason: None,
        }
    }

    pub fn invalid(transaction_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: TransactionStatus::Invalid,
            state_changes: Vec::new(),
            events: Vec::new(),
            receipt_data: Vec::new(),
            invalid_reason: Some(reason.into()),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.status, TransactionStatus::Valid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReceipt {
    pub block_id: String,
    pub transaction_receipts: Vec<TransactionReceipt>,
}

impl BlockReceipt {
    /// A block receipt is valid only if every contained transaction is
    /// valid (§3/§8: a batch is atomic, so an invalid transaction anywhere
    /// invalidates its whole batch, and an invalid batch invalidates the
    /// block).
    pub fn all_valid(&self) -> bool {
        self.transaction_receipts.iter().all(TransactionReceipt::is_valid)
    }
}
