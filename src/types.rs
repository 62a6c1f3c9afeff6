//! Block-level values delivered by the relay's subscription feeds.

use alloy_primitives::{Address, Bytes, B256, U256};

use crate::tx::Transaction;

/// Execution payload header as announced by the relay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionPayloadHeader {
    pub parent_hash: B256,
    pub fee_recipient: Address,
    pub state_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bytes,
    pub prev_randao: B256,
    pub block_number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub base_fee_per_gas: U256,
    pub block_hash: B256,
    pub transactions_root: B256,
    /// Present from Shanghai onwards.
    pub withdrawals_root: Option<B256>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Withdrawal {
    pub index: u64,
    pub validator_index: u64,
    pub address: Address,
    /// Amount in gwei.
    pub amount: u64,
}

/// Full execution payload with decoded transactions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionPayload {
    pub header: ExecutionPayloadHeader,
    pub transactions: Vec<Transaction>,
    pub withdrawals: Vec<Withdrawal>,
}

/// Beacon block summary without the full body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompactBeaconBlock {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: B256,
    pub state_root: B256,
    pub randao_reveal: Bytes,
    pub graffiti: B256,
    pub execution_block_hash: B256,
}
