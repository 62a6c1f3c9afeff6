//! Wire messages of the relay `api.API` gRPC service.
//!
//! These mirror the service's protobuf schema field for field; the tags must
//! not be renumbered.

/// Fully qualified method paths of the `api.API` service.
pub mod methods {
    pub const SEND_TRANSACTION: &str = "/api.API/SendTransactionStream";
    pub const SEND_RAW_TRANSACTION: &str = "/api.API/SendRawTransactionStream";
    pub const SEND_TRANSACTION_SEQUENCE: &str = "/api.API/SendTransactionSequenceStream";
    pub const SEND_RAW_TRANSACTION_SEQUENCE: &str = "/api.API/SendRawTransactionSequenceStream";
    pub const BACKRUN: &str = "/api.API/Backrun";
    pub const SUBSCRIBE_NEW_TXS: &str = "/api.API/SubscribeNewTxs";
    pub const SUBSCRIBE_EXECUTION_HEADERS: &str = "/api.API/SubscribeExecutionHeaders";
    pub const SUBSCRIBE_EXECUTION_PAYLOADS: &str = "/api.API/SubscribeExecutionPayloads";
    pub const SUBSCRIBE_BEACON_BLOCKS: &str = "/api.API/SubscribeBeaconBlocks";
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transaction {
    #[prost(uint32, tag = "1")]
    pub chain_id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub to: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub gas: u64,
    #[prost(uint64, tag = "4")]
    pub gas_price: u64,
    #[prost(uint64, tag = "5")]
    pub max_fee: u64,
    #[prost(uint64, tag = "6")]
    pub priority_fee: u64,
    #[prost(bytes = "vec", tag = "7")]
    pub hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub input: Vec<u8>,
    #[prost(uint64, tag = "9")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "10")]
    pub value: Vec<u8>,
    #[prost(bytes = "vec", tag = "11")]
    pub from: Vec<u8>,
    #[prost(uint32, tag = "12")]
    pub r#type: u32,
    #[prost(uint64, tag = "13")]
    pub v: u64,
    #[prost(bytes = "vec", tag = "14")]
    pub r: Vec<u8>,
    #[prost(bytes = "vec", tag = "15")]
    pub s: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionPayloadHeader {
    #[prost(bytes = "vec", tag = "1")]
    pub parent_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub fee_recipient: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub state_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub receipts_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub logs_bloom: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub prev_randao: Vec<u8>,
    #[prost(uint64, tag = "7")]
    pub block_number: u64,
    #[prost(uint64, tag = "8")]
    pub gas_limit: u64,
    #[prost(uint64, tag = "9")]
    pub gas_used: u64,
    #[prost(uint64, tag = "10")]
    pub timestamp: u64,
    #[prost(bytes = "vec", tag = "11")]
    pub extra_data: Vec<u8>,
    #[prost(bytes = "vec", tag = "12")]
    pub base_fee_per_gas: Vec<u8>,
    #[prost(bytes = "vec", tag = "13")]
    pub block_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "14")]
    pub transactions_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "15")]
    pub withdrawals_root: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Withdrawal {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(uint64, tag = "2")]
    pub validator_index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub address: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub amount: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionPayload {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ExecutionPayloadHeader>,
    #[prost(message, repeated, tag = "2")]
    pub transactions: Vec<Transaction>,
    #[prost(message, repeated, tag = "3")]
    pub withdrawals: Vec<Withdrawal>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompactBeaconBlock {
    #[prost(uint64, tag = "1")]
    pub slot: u64,
    #[prost(uint64, tag = "2")]
    pub proposer_index: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub parent_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub state_root: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub randao_reveal: Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub graffiti: Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub execution_block_hash: Vec<u8>,
}

/// Opaque filter expression; empty bytes match every transaction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TxFilter {
    #[prost(bytes = "vec", tag = "1")]
    pub encoded: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawTxMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub raw_tx: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TxSequenceMsg {
    #[prost(message, repeated, tag = "1")]
    pub sequence: Vec<Transaction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawTxSequenceMsg {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub raw_txs: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionResponse {
    #[prost(string, tag = "1")]
    pub hash: String,
    /// Microseconds since the unix epoch at which the relay accepted the tx.
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TxSequenceResponse {
    #[prost(message, repeated, tag = "1")]
    pub sequence_response: Vec<TransactionResponse>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackrunMsg {
    #[prost(string, tag = "1")]
    pub hash: String,
    #[prost(message, optional, tag = "2")]
    pub tx: Option<Transaction>,
}
