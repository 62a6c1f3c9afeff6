//! Rust client SDK for the Fiber transaction relay.
//!
//! The crate is organized by layer:
//! - `tx`: Ethereum transaction model, signing and sender recovery.
//! - `types`: block-level types delivered by subscriptions.
//! - `codec`: conversion between domain types and relay wire messages.
//! - `stream`: gRPC transport, persistent transaction streams and
//!   subscriptions.
//! - `retry`: retry and timeout helpers used while connecting.

/// Domain <-> wire conversion.
pub mod codec;
/// Retry and timeout helpers.
pub mod retry;
/// Relay connection, transaction streams and subscriptions.
pub mod stream;
/// Transaction types and signing.
pub mod tx;
/// Execution and beacon block types.
pub mod types;

pub use codec::{CodecError, TxCodec};
pub use stream::client::{
    ClientError, ClientOptions, RelayClient, RelayConnection, SequenceResult, SubmitResult,
};
pub use tx::Transaction;
