//! Ethereum transaction types, signing and sender recovery.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{Encodable, Header, RlpEncodable, EMPTY_STRING_CODE};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use thiserror::Error;

const EIP155_V_OFFSET: u64 = 35;
const LEGACY_V_OFFSET: u64 = 27;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("sign tx: {0}")]
    Sign(k256::ecdsa::Error),

    #[error("recover signer: {0}")]
    Recover(k256::ecdsa::Error),

    #[error("malformed signature scalars: {0}")]
    MalformedSignature(k256::ecdsa::Error),

    #[error("invalid signature v value {0}")]
    InvalidV(u64),

    #[error("chain id mismatch: signer expects {expected}, tx carries {actual}")]
    ChainIdMismatch { expected: u64, actual: u64 },

    #[error("chain id {0} does not fit an EIP-155 v value")]
    ChainIdTooLarge(u64),
}

/// Envelope type tag of a signed transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum TxType {
    Legacy = 0,
    AccessList = 1,
    DynamicFee = 2,
}

impl TxType {
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Legacy),
            1 => Some(Self::AccessList),
            2 => Some(Self::DynamicFee),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Raw signature values as they appear in the signed envelope.
///
/// For legacy transactions `v` is `27/28` or the EIP-155 encoded value; for
/// typed transactions it is the y-parity bit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Signature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, RlpEncodable)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LegacyTx {
    /// EIP-155 replay-protection chain id; `None` signs an unprotected tx.
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub signature: Signature,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessListTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub signature: Signature,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DynamicFeeTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list: Vec<AccessListItem>,
    pub signature: Signature,
}

/// A signed (or to-be-signed) transaction in one of the supported envelopes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Transaction {
    Legacy(LegacyTx),
    AccessList(AccessListTx),
    DynamicFee(DynamicFeeTx),
}

impl From<LegacyTx> for Transaction {
    fn from(tx: LegacyTx) -> Self {
        Self::Legacy(tx)
    }
}

impl From<AccessListTx> for Transaction {
    fn from(tx: AccessListTx) -> Self {
        Self::AccessList(tx)
    }
}

impl From<DynamicFeeTx> for Transaction {
    fn from(tx: DynamicFeeTx) -> Self {
        Self::DynamicFee(tx)
    }
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Self::Legacy(_) => TxType::Legacy,
            Self::AccessList(_) => TxType::AccessList,
            Self::DynamicFee(_) => TxType::DynamicFee,
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Self::Legacy(tx) => tx.chain_id,
            Self::AccessList(tx) => Some(tx.chain_id),
            Self::DynamicFee(tx) => Some(tx.chain_id),
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.nonce,
            Self::AccessList(tx) => tx.nonce,
            Self::DynamicFee(tx) => tx.nonce,
        }
    }

    pub fn gas_limit(&self) -> u64 {
        match self {
            Self::Legacy(tx) => tx.gas_limit,
            Self::AccessList(tx) => tx.gas_limit,
            Self::DynamicFee(tx) => tx.gas_limit,
        }
    }

    /// Legacy gas price, or `None` for fee-market transactions.
    pub fn gas_price(&self) -> Option<U256> {
        match self {
            Self::Legacy(tx) => Some(tx.gas_price),
            Self::AccessList(tx) => Some(tx.gas_price),
            Self::DynamicFee(_) => None,
        }
    }

    /// Fee cap; equal to the gas price for pre-London envelopes.
    pub fn max_fee_per_gas(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::AccessList(tx) => tx.gas_price,
            Self::DynamicFee(tx) => tx.max_fee_per_gas,
        }
    }

    /// Tip cap; equal to the gas price for pre-London envelopes.
    pub fn max_priority_fee_per_gas(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.gas_price,
            Self::AccessList(tx) => tx.gas_price,
            Self::DynamicFee(tx) => tx.max_priority_fee_per_gas,
        }
    }

    pub fn to(&self) -> Option<Address> {
        match self {
            Self::Legacy(tx) => tx.to,
            Self::AccessList(tx) => tx.to,
            Self::DynamicFee(tx) => tx.to,
        }
    }

    pub fn value(&self) -> U256 {
        match self {
            Self::Legacy(tx) => tx.value,
            Self::AccessList(tx) => tx.value,
            Self::DynamicFee(tx) => tx.value,
        }
    }

    pub fn input(&self) -> &Bytes {
        match self {
            Self::Legacy(tx) => &tx.input,
            Self::AccessList(tx) => &tx.input,
            Self::DynamicFee(tx) => &tx.input,
        }
    }

    pub fn access_list(&self) -> &[AccessListItem] {
        match self {
            Self::Legacy(_) => &[],
            Self::AccessList(tx) => &tx.access_list,
            Self::DynamicFee(tx) => &tx.access_list,
        }
    }

    pub fn signature(&self) -> Signature {
        match self {
            Self::Legacy(tx) => tx.signature,
            Self::AccessList(tx) => tx.signature,
            Self::DynamicFee(tx) => tx.signature,
        }
    }

    fn signature_mut(&mut self) -> &mut Signature {
        match self {
            Self::Legacy(tx) => &mut tx.signature,
            Self::AccessList(tx) => &mut tx.signature,
            Self::DynamicFee(tx) => &mut tx.signature,
        }
    }

    /// Hash the sender signs over.
    pub fn signature_hash(&self) -> B256 {
        let mut out = Vec::new();
        match self {
            Self::Legacy(tx) => {
                let mut list = legacy_fields(tx);
                if let Some(chain_id) = tx.chain_id {
                    list.push(&chain_id).push(&0u64).push(&0u64);
                }
                list.finish(&mut out);
            }
            Self::AccessList(tx) => {
                out.push(TxType::AccessList.tag());
                access_list_fields(tx).finish(&mut out);
            }
            Self::DynamicFee(tx) => {
                out.push(TxType::DynamicFee.tag());
                dynamic_fee_fields(tx).finish(&mut out);
            }
        }
        keccak256(&out)
    }

    /// Signed envelope bytes, as accepted by `eth_sendRawTransaction`.
    pub fn encoded(&self) -> Vec<u8> {
        let signature = self.signature();
        let mut out = Vec::new();
        let mut list = match self {
            Self::Legacy(tx) => legacy_fields(tx),
            Self::AccessList(tx) => {
                out.push(TxType::AccessList.tag());
                access_list_fields(tx)
            }
            Self::DynamicFee(tx) => {
                out.push(TxType::DynamicFee.tag());
                dynamic_fee_fields(tx)
            }
        };
        list.push(&signature.v)
            .push(&signature.r)
            .push(&signature.s);
        list.finish(&mut out);
        out
    }

    pub fn hash(&self) -> B256 {
        keccak256(self.encoded())
    }

    /// Signs the transaction with `key`, replacing any existing signature.
    pub fn sign(mut self, key: &SigningKey) -> Result<Self, TxError> {
        let prehash = self.signature_hash();
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(prehash.as_slice())
            .map_err(TxError::Sign)?;
        let bytes = signature.to_bytes();
        let parity = u64::from(recovery_id.to_byte());
        let v = match &self {
            Self::Legacy(LegacyTx {
                chain_id: Some(chain_id),
                ..
            }) => chain_id
                .checked_mul(2)
                .and_then(|doubled| doubled.checked_add(EIP155_V_OFFSET + parity))
                .ok_or(TxError::ChainIdTooLarge(*chain_id))?,
            Self::Legacy(_) => LEGACY_V_OFFSET + parity,
            Self::AccessList(_) | Self::DynamicFee(_) => parity,
        };
        *self.signature_mut() = Signature {
            v,
            r: U256::from_be_slice(&bytes[..32]),
            s: U256::from_be_slice(&bytes[32..]),
        };
        Ok(self)
    }

    /// Recovers the sender address, validating the signature against the
    /// London signing rules for `chain_id`.
    pub fn recover_sender(&self, chain_id: u64) -> Result<Address, TxError> {
        let signature = self.signature();
        let (prehash, parity) = match self {
            Self::Legacy(tx) => {
                let (tx_chain_id, parity) = legacy_chain_and_parity(signature.v)?;
                if let Some(actual) = tx_chain_id {
                    if actual != chain_id {
                        return Err(TxError::ChainIdMismatch {
                            expected: chain_id,
                            actual,
                        });
                    }
                }
                let unsigned = LegacyTx {
                    chain_id: tx_chain_id,
                    ..tx.clone()
                };
                (Self::Legacy(unsigned).signature_hash(), parity)
            }
            Self::AccessList(AccessListTx { chain_id: actual, .. })
            | Self::DynamicFee(DynamicFeeTx { chain_id: actual, .. }) => {
                if *actual != chain_id {
                    return Err(TxError::ChainIdMismatch {
                        expected: chain_id,
                        actual: *actual,
                    });
                }
                if signature.v > 1 {
                    return Err(TxError::InvalidV(signature.v));
                }
                (self.signature_hash(), signature.v as u8)
            }
        };

        let mut scalars = [0u8; 64];
        scalars[..32].copy_from_slice(&signature.r.to_be_bytes::<32>());
        scalars[32..].copy_from_slice(&signature.s.to_be_bytes::<32>());
        let ecdsa = EcdsaSignature::from_slice(&scalars).map_err(TxError::MalformedSignature)?;
        let recovery_id = RecoveryId::from_byte(parity).ok_or(TxError::InvalidV(signature.v))?;
        let key = VerifyingKey::recover_from_prehash(prehash.as_slice(), &ecdsa, recovery_id)
            .map_err(TxError::Recover)?;
        Ok(address_of(&key))
    }
}

/// Address controlled by `key`.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Splits a legacy `v` into its EIP-155 chain id (`None` for 27/28) and the
/// y-parity bit.
pub(crate) fn legacy_chain_and_parity(v: u64) -> Result<(Option<u64>, u8), TxError> {
    match v {
        27 | 28 => Ok((None, (v - LEGACY_V_OFFSET) as u8)),
        v if v >= EIP155_V_OFFSET => {
            let offset = v - EIP155_V_OFFSET;
            Ok((Some(offset / 2), (offset % 2) as u8))
        }
        v => Err(TxError::InvalidV(v)),
    }
}

fn legacy_fields(tx: &LegacyTx) -> RlpList {
    let mut list = RlpList::default();
    list.push(&tx.nonce)
        .push(&tx.gas_price)
        .push(&tx.gas_limit)
        .push_to(tx.to.as_ref())
        .push(&tx.value)
        .push(&tx.input);
    list
}

fn access_list_fields(tx: &AccessListTx) -> RlpList {
    let mut list = RlpList::default();
    list.push(&tx.chain_id)
        .push(&tx.nonce)
        .push(&tx.gas_price)
        .push(&tx.gas_limit)
        .push_to(tx.to.as_ref())
        .push(&tx.value)
        .push(&tx.input)
        .push(&tx.access_list);
    list
}

fn dynamic_fee_fields(tx: &DynamicFeeTx) -> RlpList {
    let mut list = RlpList::default();
    list.push(&tx.chain_id)
        .push(&tx.nonce)
        .push(&tx.max_priority_fee_per_gas)
        .push(&tx.max_fee_per_gas)
        .push(&tx.gas_limit)
        .push_to(tx.to.as_ref())
        .push(&tx.value)
        .push(&tx.input)
        .push(&tx.access_list);
    list
}

#[derive(Default)]
struct RlpList {
    payload: Vec<u8>,
}

impl RlpList {
    fn push<T: Encodable>(&mut self, value: &T) -> &mut Self {
        value.encode(&mut self.payload);
        self
    }

    fn push_to(&mut self, to: Option<&Address>) -> &mut Self {
        match to {
            Some(address) => address.encode(&mut self.payload),
            None => self.payload.push(EMPTY_STRING_CODE),
        }
        self
    }

    fn finish(self, out: &mut Vec<u8>) {
        Header {
            list: true,
            payload_length: self.payload.len(),
        }
        .encode(out);
        out.extend_from_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, U256};
    use k256::ecdsa::SigningKey;

    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(&[0x46; 32]).expect("valid key")
    }

    // EIP-155 reference transaction.
    fn eip155_example() -> LegacyTx {
        LegacyTx {
            chain_id: Some(1),
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(1_000_000_000_000_000_000u64),
            input: Bytes::new(),
            signature: Signature::default(),
        }
    }

    #[test]
    fn legacy_signature_hash_matches_eip155_vector() {
        let tx = Transaction::Legacy(eip155_example());
        assert_eq!(
            tx.signature_hash(),
            b256!("daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53")
        );
    }

    #[test]
    fn legacy_signing_matches_eip155_vector() {
        let tx = Transaction::Legacy(eip155_example())
            .sign(&test_key())
            .expect("sign");
        let signature = tx.signature();
        assert_eq!(signature.v, 37);
        assert_eq!(
            signature.r,
            U256::from_be_slice(
                b256!("28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276")
                    .as_slice()
            )
        );
        assert_eq!(
            signature.s,
            U256::from_be_slice(
                b256!("67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83")
                    .as_slice()
            )
        );
        assert_eq!(
            tx.recover_sender(1).expect("recover"),
            address!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f")
        );
    }

    #[test]
    fn typed_transactions_recover_their_signer() {
        let key = test_key();
        let expected = address_of(key.verifying_key());

        let access_list = Transaction::AccessList(AccessListTx {
            chain_id: 1,
            nonce: 3,
            gas_price: U256::from(7u64),
            gas_limit: 50_000,
            to: None,
            value: U256::ZERO,
            input: Bytes::from_static(&[0x60, 0x80]),
            access_list: vec![AccessListItem {
                address: address!("0000000000000000000000000000000000000001"),
                storage_keys: vec![B256::ZERO],
            }],
            signature: Signature::default(),
        })
        .sign(&key)
        .expect("sign");
        assert!(access_list.signature().v <= 1);
        assert_eq!(access_list.recover_sender(1).expect("recover"), expected);

        let dynamic = Transaction::DynamicFee(DynamicFeeTx {
            chain_id: 1,
            nonce: 4,
            max_priority_fee_per_gas: U256::from(2u64),
            max_fee_per_gas: U256::from(100u64),
            gas_limit: 21_000,
            to: Some(address!("3535353535353535353535353535353535353535")),
            value: U256::from(5u64),
            input: Bytes::new(),
            access_list: Vec::new(),
            signature: Signature::default(),
        })
        .sign(&key)
        .expect("sign");
        assert_eq!(dynamic.encoded()[0], 2);
        assert_eq!(dynamic.recover_sender(1).expect("recover"), expected);
    }

    #[test]
    fn recovery_rejects_foreign_chain() {
        let tx = Transaction::Legacy(eip155_example())
            .sign(&test_key())
            .expect("sign");
        assert!(matches!(
            tx.recover_sender(5),
            Err(TxError::ChainIdMismatch {
                expected: 5,
                actual: 1
            })
        ));
    }

    #[test]
    fn unsigned_transaction_has_no_sender() {
        let tx = Transaction::Legacy(eip155_example());
        assert!(tx.recover_sender(1).is_err());
    }

    #[test]
    fn oversized_legacy_chain_id_is_rejected_when_signing() {
        let chain_id = 1u64 << 63;
        let result = Transaction::Legacy(LegacyTx {
            chain_id: Some(chain_id),
            ..eip155_example()
        })
        .sign(&test_key());
        assert!(matches!(result, Err(TxError::ChainIdTooLarge(id)) if id == chain_id));
    }

    #[test]
    fn legacy_v_splits_into_chain_and_parity() {
        assert_eq!(legacy_chain_and_parity(27).expect("v"), (None, 0));
        assert_eq!(legacy_chain_and_parity(38).expect("v"), (Some(1), 1));
        assert!(matches!(
            legacy_chain_and_parity(30),
            Err(TxError::InvalidV(30))
        ));
    }

    #[test]
    fn unprotected_legacy_signature_uses_27_28() {
        let tx = Transaction::Legacy(LegacyTx {
            chain_id: None,
            ..eip155_example()
        })
        .sign(&test_key())
        .expect("sign");
        assert!(matches!(tx.signature().v, 27 | 28));
        assert_eq!(
            tx.recover_sender(1).expect("recover"),
            address_of(test_key().verifying_key())
        );
    }
}
