//! Conversions between domain values and relay wire messages.
//!
//! The wire form stores fee fields as `u64` and the chain id as `u32`.
//! Encoding fails instead of truncating when a value does not fit.
//! Decoding drops access lists: the wire transaction does not carry them.

use alloy_primitives::{Address, Bytes, B256, U256};
use thiserror::Error;

use crate::stream::proto;
use crate::tx::{
    legacy_chain_and_parity, AccessListTx, DynamicFeeTx, LegacyTx, Signature, Transaction,
    TxError, TxType,
};
use crate::types::{CompactBeaconBlock, ExecutionPayload, ExecutionPayloadHeader, Withdrawal};

/// Chain id used when none is configured (Ethereum mainnet).
pub const MAINNET_CHAIN_ID: u64 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid signature: {0}")]
    InvalidSignature(#[source] TxError),

    #[error("unknown transaction type tag {0}")]
    UnknownTxType(u32),

    #[error("{field} does not fit the wire width of {bits} bits")]
    FieldOverflow { field: &'static str, bits: u32 },

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} exceeds 256 bits")]
    ValueTooLarge { field: &'static str },

    #[error("missing {0}")]
    MissingField(&'static str),
}

/// Stateless transaction codec bound to the chain whose signing rules are
/// used for sender recovery.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxCodec {
    chain_id: u64,
}

impl Default for TxCodec {
    fn default() -> Self {
        Self::new(MAINNET_CHAIN_ID)
    }
}

impl TxCodec {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn encode(&self, tx: &Transaction) -> Result<proto::Transaction, CodecError> {
        let sender = tx
            .recover_sender(self.chain_id)
            .map_err(CodecError::InvalidSignature)?;

        let chain_id = tx.chain_id().unwrap_or_default();
        let chain_id = u32::try_from(chain_id).map_err(|_| CodecError::FieldOverflow {
            field: "chain_id",
            bits: 32,
        })?;

        let (gas_price, max_fee, priority_fee) = match tx {
            Transaction::Legacy(LegacyTx { gas_price, .. })
            | Transaction::AccessList(AccessListTx { gas_price, .. }) => {
                (fee_to_wire("gas_price", *gas_price)?, 0, 0)
            }
            Transaction::DynamicFee(DynamicFeeTx {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            }) => (
                0,
                fee_to_wire("max_fee_per_gas", *max_fee_per_gas)?,
                fee_to_wire("max_priority_fee_per_gas", *max_priority_fee_per_gas)?,
            ),
        };

        let signature = tx.signature();
        Ok(proto::Transaction {
            chain_id,
            to: tx.to().map(|to| to.to_vec()).unwrap_or_default(),
            gas: tx.gas_limit(),
            gas_price,
            max_fee,
            priority_fee,
            hash: tx.hash().to_vec(),
            input: tx.input().to_vec(),
            nonce: tx.nonce(),
            value: tx.value().to_be_bytes_trimmed_vec(),
            from: sender.to_vec(),
            r#type: u32::from(tx.tx_type().tag()),
            v: signature.v,
            r: signature.r.to_be_bytes_trimmed_vec(),
            s: signature.s.to_be_bytes_trimmed_vec(),
        })
    }

    pub fn decode(&self, wire: proto::Transaction) -> Result<Transaction, CodecError> {
        let tx_type = TxType::from_tag(wire.r#type).ok_or(CodecError::UnknownTxType(wire.r#type))?;
        let to = optional_address("to", &wire.to)?;
        let value = u256_from_wire("value", &wire.value)?;
        let signature = Signature {
            v: wire.v,
            r: u256_from_wire("r", &wire.r)?,
            s: u256_from_wire("s", &wire.s)?,
        };
        let input = Bytes::from(wire.input);

        let tx = match tx_type {
            TxType::Legacy => Transaction::Legacy(LegacyTx {
                chain_id: legacy_chain_and_parity(wire.v)
                    .map_err(CodecError::InvalidSignature)?
                    .0,
                nonce: wire.nonce,
                gas_price: U256::from(wire.gas_price),
                gas_limit: wire.gas,
                to,
                value,
                input,
                signature,
            }),
            TxType::AccessList => Transaction::AccessList(AccessListTx {
                chain_id: u64::from(wire.chain_id),
                nonce: wire.nonce,
                gas_price: U256::from(wire.gas_price),
                gas_limit: wire.gas,
                to,
                value,
                input,
                access_list: Vec::new(),
                signature,
            }),
            TxType::DynamicFee => Transaction::DynamicFee(DynamicFeeTx {
                chain_id: u64::from(wire.chain_id),
                nonce: wire.nonce,
                max_priority_fee_per_gas: U256::from(wire.priority_fee),
                max_fee_per_gas: U256::from(wire.max_fee),
                gas_limit: wire.gas,
                to,
                value,
                input,
                access_list: Vec::new(),
                signature,
            }),
        };
        Ok(tx)
    }

    pub fn decode_header(
        &self,
        wire: proto::ExecutionPayloadHeader,
    ) -> Result<ExecutionPayloadHeader, CodecError> {
        let withdrawals_root = if wire.withdrawals_root.is_empty() {
            None
        } else {
            Some(b256("withdrawals_root", &wire.withdrawals_root)?)
        };

        Ok(ExecutionPayloadHeader {
            parent_hash: b256("parent_hash", &wire.parent_hash)?,
            fee_recipient: address("fee_recipient", &wire.fee_recipient)?,
            state_root: b256("state_root", &wire.state_root)?,
            receipts_root: b256("receipts_root", &wire.receipts_root)?,
            logs_bloom: Bytes::from(wire.logs_bloom),
            prev_randao: b256("prev_randao", &wire.prev_randao)?,
            block_number: wire.block_number,
            gas_limit: wire.gas_limit,
            gas_used: wire.gas_used,
            timestamp: wire.timestamp,
            extra_data: Bytes::from(wire.extra_data),
            base_fee_per_gas: u256_from_wire("base_fee_per_gas", &wire.base_fee_per_gas)?,
            block_hash: b256("block_hash", &wire.block_hash)?,
            transactions_root: b256("transactions_root", &wire.transactions_root)?,
            withdrawals_root,
        })
    }

    pub fn decode_payload(
        &self,
        wire: proto::ExecutionPayload,
    ) -> Result<ExecutionPayload, CodecError> {
        let header = wire.header.ok_or(CodecError::MissingField("payload header"))?;
        let transactions = wire
            .transactions
            .into_iter()
            .map(|tx| self.decode(tx))
            .collect::<Result<Vec<_>, _>>()?;
        let withdrawals = wire
            .withdrawals
            .into_iter()
            .map(|withdrawal| {
                Ok(Withdrawal {
                    index: withdrawal.index,
                    validator_index: withdrawal.validator_index,
                    address: address("withdrawal address", &withdrawal.address)?,
                    amount: withdrawal.amount,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;

        Ok(ExecutionPayload {
            header: self.decode_header(header)?,
            transactions,
            withdrawals,
        })
    }

    pub fn decode_beacon_block(
        &self,
        wire: proto::CompactBeaconBlock,
    ) -> Result<CompactBeaconBlock, CodecError> {
        Ok(CompactBeaconBlock {
            slot: wire.slot,
            proposer_index: wire.proposer_index,
            parent_root: b256("parent_root", &wire.parent_root)?,
            state_root: b256("state_root", &wire.state_root)?,
            randao_reveal: Bytes::from(wire.randao_reveal),
            graffiti: b256("graffiti", &wire.graffiti)?,
            execution_block_hash: b256("execution_block_hash", &wire.execution_block_hash)?,
        })
    }
}

fn fee_to_wire(field: &'static str, value: U256) -> Result<u64, CodecError> {
    u64::try_from(value).map_err(|_| CodecError::FieldOverflow { field, bits: 64 })
}

fn u256_from_wire(field: &'static str, bytes: &[u8]) -> Result<U256, CodecError> {
    U256::try_from_be_slice(bytes).ok_or(CodecError::ValueTooLarge { field })
}

fn b256(field: &'static str, bytes: &[u8]) -> Result<B256, CodecError> {
    check_length(field, bytes, 32)?;
    Ok(B256::from_slice(bytes))
}

fn address(field: &'static str, bytes: &[u8]) -> Result<Address, CodecError> {
    check_length(field, bytes, 20)?;
    Ok(Address::from_slice(bytes))
}

fn optional_address(field: &'static str, bytes: &[u8]) -> Result<Option<Address>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    address(field, bytes).map(Some)
}

fn check_length(field: &'static str, bytes: &[u8], expected: usize) -> Result<(), CodecError> {
    if bytes.len() != expected {
        return Err(CodecError::InvalidLength {
            field,
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, Bytes, U256};
    use k256::ecdsa::SigningKey;

    use super::*;
    use crate::tx::{address_of, AccessListItem};

    const GWEI: u64 = 1_000_000_000;
    const ETHER: u64 = 1_000_000_000_000_000_000;

    fn key() -> SigningKey {
        SigningKey::from_slice(&[0x11; 32]).expect("valid key")
    }

    fn recipient() -> Address {
        address!("00000000000000000000000000000000000000aa")
    }

    fn signed_legacy() -> Transaction {
        Transaction::Legacy(LegacyTx {
            chain_id: Some(1),
            nonce: 5,
            gas_price: U256::from(GWEI),
            gas_limit: 21_000,
            to: Some(recipient()),
            value: U256::from(ETHER),
            input: Bytes::new(),
            signature: Signature::default(),
        })
        .sign(&key())
        .expect("sign")
    }

    fn signed_access_list() -> Transaction {
        Transaction::AccessList(AccessListTx {
            chain_id: 1,
            nonce: 6,
            gas_price: U256::from(3 * GWEI),
            gas_limit: 60_000,
            to: Some(recipient()),
            value: U256::from(42u64),
            input: Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]),
            access_list: vec![AccessListItem {
                address: recipient(),
                storage_keys: vec![B256::repeat_byte(1)],
            }],
            signature: Signature::default(),
        })
        .sign(&key())
        .expect("sign")
    }

    fn signed_dynamic_fee() -> Transaction {
        Transaction::DynamicFee(DynamicFeeTx {
            chain_id: 1,
            nonce: 7,
            max_priority_fee_per_gas: U256::from(2 * GWEI),
            max_fee_per_gas: U256::from(90 * GWEI),
            gas_limit: 100_000,
            to: None,
            value: U256::ZERO,
            input: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
            access_list: Vec::new(),
            signature: Signature::default(),
        })
        .sign(&key())
        .expect("sign")
    }

    fn assert_common_fields(sent: &Transaction, decoded: &Transaction) {
        assert_eq!(decoded.tx_type(), sent.tx_type());
        assert_eq!(decoded.nonce(), sent.nonce());
        assert_eq!(decoded.gas_limit(), sent.gas_limit());
        assert_eq!(decoded.value(), sent.value());
        assert_eq!(decoded.to(), sent.to());
        assert_eq!(decoded.input(), sent.input());
        assert_eq!(decoded.signature(), sent.signature());
        assert_eq!(decoded.chain_id(), sent.chain_id());
    }

    #[test]
    fn legacy_scenario_round_trips_with_matching_sender() {
        let codec = TxCodec::default();
        let tx = signed_legacy();
        let wire = codec.encode(&tx).expect("encode");

        assert_eq!(wire.r#type, 0);
        assert_eq!(wire.gas_price, GWEI);
        assert_eq!(wire.max_fee, 0);
        assert_eq!(wire.from, address_of(key().verifying_key()).to_vec());
        assert_eq!(wire.hash, tx.hash().to_vec());

        let decoded = codec.decode(wire).expect("decode");
        assert_common_fields(&tx, &decoded);
        assert_eq!(decoded.gas_price(), Some(U256::from(GWEI)));
        assert_eq!(decoded, tx);
        assert_eq!(
            decoded.recover_sender(1).expect("recover"),
            address_of(key().verifying_key())
        );
    }

    #[test]
    fn access_list_round_trip_drops_access_list() {
        let codec = TxCodec::default();
        let tx = signed_access_list();
        let decoded = codec.decode(codec.encode(&tx).expect("encode")).expect("decode");

        assert_common_fields(&tx, &decoded);
        assert_eq!(decoded.gas_price(), tx.gas_price());
        assert!(decoded.access_list().is_empty());
    }

    #[test]
    fn dynamic_fee_round_trip_keeps_fee_pair() {
        let codec = TxCodec::default();
        let tx = signed_dynamic_fee();
        let wire = codec.encode(&tx).expect("encode");
        assert_eq!(wire.gas_price, 0);
        assert!(wire.to.is_empty());

        let decoded = codec.decode(wire).expect("decode");
        assert_common_fields(&tx, &decoded);
        assert_eq!(decoded.max_fee_per_gas(), U256::from(90 * GWEI));
        assert_eq!(decoded.max_priority_fee_per_gas(), U256::from(2 * GWEI));
        assert_eq!(decoded, tx);
    }

    #[test]
    fn encode_rejects_unsigned_transaction() {
        let unsigned = Transaction::Legacy(LegacyTx {
            chain_id: Some(1),
            ..LegacyTx::default()
        });
        assert!(matches!(
            TxCodec::default().encode(&unsigned),
            Err(CodecError::InvalidSignature(_))
        ));
    }

    #[test]
    fn encode_rejects_signature_for_other_chain() {
        let tx = signed_dynamic_fee();
        assert!(matches!(
            TxCodec::new(5).encode(&tx),
            Err(CodecError::InvalidSignature(TxError::ChainIdMismatch { .. }))
        ));
    }

    #[test]
    fn encode_rejects_fee_wider_than_wire() {
        let tx = Transaction::Legacy(LegacyTx {
            chain_id: Some(1),
            gas_price: U256::from(u64::MAX) + U256::from(1u64),
            gas_limit: 21_000,
            ..LegacyTx::default()
        })
        .sign(&key())
        .expect("sign");
        assert!(matches!(
            TxCodec::default().encode(&tx),
            Err(CodecError::FieldOverflow {
                field: "gas_price",
                ..
            })
        ));
    }

    #[test]
    fn decode_rejects_unknown_type_tag() {
        let mut wire = TxCodec::default()
            .encode(&signed_legacy())
            .expect("encode");
        wire.r#type = 3;
        assert!(matches!(
            TxCodec::default().decode(wire),
            Err(CodecError::UnknownTxType(3))
        ));
    }

    #[test]
    fn decode_rejects_malformed_recipient() {
        let mut wire = TxCodec::default()
            .encode(&signed_legacy())
            .expect("encode");
        wire.to = vec![0xaa; 19];
        assert!(matches!(
            TxCodec::default().decode(wire),
            Err(CodecError::InvalidLength {
                field: "to",
                expected: 20,
                actual: 19
            })
        ));
    }

    #[test]
    fn decode_rejects_invalid_legacy_v() {
        let mut wire = TxCodec::default()
            .encode(&signed_legacy())
            .expect("encode");
        wire.v = 29;
        assert!(matches!(
            TxCodec::default().decode(wire),
            Err(CodecError::InvalidSignature(TxError::InvalidV(29)))
        ));
    }

    fn wire_header() -> proto::ExecutionPayloadHeader {
        proto::ExecutionPayloadHeader {
            parent_hash: vec![1; 32],
            fee_recipient: vec![2; 20],
            state_root: vec![3; 32],
            receipts_root: vec![4; 32],
            logs_bloom: vec![0; 256],
            prev_randao: vec![5; 32],
            block_number: 18_000_000,
            gas_limit: 30_000_000,
            gas_used: 12_345_678,
            timestamp: 1_700_000_000,
            extra_data: b"builder".to_vec(),
            base_fee_per_gas: U256::from(25 * GWEI).to_be_bytes_trimmed_vec(),
            block_hash: vec![6; 32],
            transactions_root: vec![7; 32],
            withdrawals_root: Vec::new(),
        }
    }

    #[test]
    fn payload_decodes_header_and_transactions() {
        let codec = TxCodec::default();
        let tx = signed_dynamic_fee();
        let payload = codec
            .decode_payload(proto::ExecutionPayload {
                header: Some(wire_header()),
                transactions: vec![codec.encode(&tx).expect("encode")],
                withdrawals: vec![proto::Withdrawal {
                    index: 1,
                    validator_index: 2,
                    address: vec![9; 20],
                    amount: 32,
                }],
            })
            .expect("decode payload");

        assert_eq!(payload.header.block_number, 18_000_000);
        assert_eq!(payload.header.base_fee_per_gas, U256::from(25 * GWEI));
        assert_eq!(payload.header.withdrawals_root, None);
        assert_eq!(payload.transactions, vec![tx]);
        assert_eq!(payload.withdrawals[0].address, Address::repeat_byte(9));
    }

    #[test]
    fn payload_without_header_is_rejected() {
        let err = TxCodec::default()
            .decode_payload(proto::ExecutionPayload::default())
            .expect_err("missing header");
        assert!(matches!(err, CodecError::MissingField(_)));
    }

    #[test]
    fn beacon_block_requires_fixed_width_roots() {
        let codec = TxCodec::default();
        let mut wire = proto::CompactBeaconBlock {
            slot: 7_000_000,
            proposer_index: 12,
            parent_root: vec![1; 32],
            state_root: vec![2; 32],
            randao_reveal: vec![3; 96],
            graffiti: vec![0; 32],
            execution_block_hash: vec![4; 32],
        };
        let block = codec.decode_beacon_block(wire.clone()).expect("decode");
        assert_eq!(block.slot, 7_000_000);
        assert_eq!(block.execution_block_hash, B256::repeat_byte(4));

        wire.state_root.truncate(31);
        assert!(codec.decode_beacon_block(wire).is_err());
    }
}
