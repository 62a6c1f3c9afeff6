//! Relay client configuration and the connected `RelayConnection`.
//!
//! `RelayClient::connect` dials the relay and opens one persistent
//! bidirectional stream per transaction class before returning. Transaction
//! sends are paired with their response by order on the class's stream;
//! subscriptions run as long-lived calls that block the calling task.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use alloy_primitives::B256;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::errors::InvalidMetadataValue;
use tonic::{Code, Status};
use tracing::debug;

use crate::codec::{CodecError, TxCodec, MAINNET_CHAIN_ID};
use crate::retry::{retry_async, with_timeout, RetryPolicy};
use crate::stream::proto;
use crate::stream::session::{Session, TxClass};
use crate::stream::subscription::{self, Cancellation, SubscriptionKind};
use crate::stream::transport::{GrpcTransport, Inbound, Outbound, RelayTransport};
use crate::tx::Transaction;
use crate::types::{CompactBeaconBlock, ExecutionPayload, ExecutionPayloadHeader};

/// Production gRPC endpoint of the relay.
pub const RELAY_ENDPOINT: &str = "http://beta.fiberapi.io:8080";
/// Local development endpoint of the relay.
pub const LOCAL_RELAY_ENDPOINT: &str = "http://localhost:8080";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DIAL_ATTEMPTS: usize = 3;
    pub const DIAL_BACKOFF: Duration = Duration::from_millis(250);
    pub const DIAL_MAX_BACKOFF: Duration = Duration::from_secs(2);
    pub const DIAL_JITTER: Duration = Duration::from_millis(50);
    pub const STREAM_BUFFER: usize = 64;
}

/// Tunables applied at connect time.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Upper bound for the whole connect: dial plus opening all four streams.
    pub connect_timeout: Duration,
    /// Retry policy for dialing the endpoint.
    pub dial_retry: RetryPolicy,
    /// Chain whose signing rules are used to recover transaction senders.
    pub chain_id: u64,
    /// Outbound queue depth of each transaction stream.
    pub stream_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ClientDefaults::CONNECT_TIMEOUT,
            dial_retry: RetryPolicy {
                max_attempts: ClientDefaults::DIAL_ATTEMPTS,
                initial_backoff: ClientDefaults::DIAL_BACKOFF,
                max_backoff: ClientDefaults::DIAL_MAX_BACKOFF,
                jitter: ClientDefaults::DIAL_JITTER,
            },
            chain_id: MAINNET_CHAIN_ID,
            stream_buffer: ClientDefaults::STREAM_BUFFER,
        }
    }
}

/// Entry point for creating relay connections.
#[derive(Clone)]
pub struct RelayClient {
    api_key: SecretString,
    local: bool,
    endpoint_override: Option<String>,
    options: ClientOptions,
}

impl RelayClient {
    /// Creates a client for the production endpoint.
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            local: false,
            endpoint_override: None,
            options: ClientOptions::default(),
        }
    }

    /// Enables or disables local mode endpoint routing.
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit endpoint override.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Dials the relay and opens the four transaction streams.
    ///
    /// Fails as a whole if the dial or any stream open fails, or if it takes
    /// longer than [`ClientOptions::connect_timeout`].
    pub async fn connect(&self) -> Result<RelayConnection<GrpcTransport>, ClientError> {
        let timeout = self.options.connect_timeout;
        with_timeout(timeout, self.connect_inner())
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    async fn connect_inner(&self) -> Result<RelayConnection<GrpcTransport>, ClientError> {
        let endpoint = self.endpoint();
        let connect_timeout = self.options.connect_timeout;
        let channel = retry_async(
            &self.options.dial_retry,
            |attempt| async move {
                debug!(event = "relay_dial", attempt, endpoint);
                GrpcTransport::dial(endpoint, connect_timeout).await
            },
            ClientError::is_retryable,
        )
        .await?;

        let transport = GrpcTransport::new(channel, &self.api_key)?;
        RelayConnection::establish(transport, self.options.clone()).await
    }

    fn endpoint(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_RELAY_ENDPOINT
        } else {
            RELAY_ENDPOINT
        }
    }
}

/// Relay acknowledgement for a single transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubmitResult {
    pub hash: String,
    /// Microseconds since the unix epoch.
    pub timestamp: i64,
}

impl From<proto::TransactionResponse> for SubmitResult {
    fn from(response: proto::TransactionResponse) -> Self {
        Self {
            hash: response.hash,
            timestamp: response.timestamp,
        }
    }
}

/// Relay acknowledgement for a transaction sequence.
///
/// A sequence is processed as one unit, so it carries a single timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequenceResult {
    /// Hashes in submission order.
    pub hashes: Vec<String>,
    /// Microseconds since the unix epoch.
    pub timestamp: i64,
}

/// A connected relay client.
///
/// Calls on the same transaction class are serialized internally; calls on
/// different classes and subscriptions run independently. Call
/// [`RelayConnection::close`] once at shutdown so the relay can account for
/// the session correctly.
pub struct RelayConnection<T = GrpcTransport> {
    transport: RwLock<Option<Arc<T>>>,
    codec: TxCodec,
    shutdown: CancellationToken,
    transactions: Session<proto::Transaction, proto::TransactionResponse>,
    raw_transactions: Session<proto::RawTxMsg, proto::TransactionResponse>,
    sequences: Session<proto::TxSequenceMsg, proto::TxSequenceResponse>,
    raw_sequences: Session<proto::RawTxSequenceMsg, proto::TxSequenceResponse>,
}

impl<T> fmt::Debug for RelayConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("chain_id", &self.codec.chain_id())
            .field("closed", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<T: RelayTransport> RelayConnection<T> {
    /// Opens the four transaction streams over `transport`.
    ///
    /// Either all streams open or none stays open.
    pub async fn establish(transport: T, options: ClientOptions) -> Result<Self, ClientError> {
        let buffer = options.stream_buffer.max(1);

        let transactions = open_session(TxClass::Transaction, buffer, |outbound| {
            transport.open_transaction_stream(outbound)
        })
        .await?;
        let raw_transactions = open_session(TxClass::RawTransaction, buffer, |outbound| {
            transport.open_raw_transaction_stream(outbound)
        })
        .await?;
        let sequences = open_session(TxClass::TransactionSequence, buffer, |outbound| {
            transport.open_transaction_sequence_stream(outbound)
        })
        .await?;
        let raw_sequences = open_session(TxClass::RawTransactionSequence, buffer, |outbound| {
            transport.open_raw_transaction_sequence_stream(outbound)
        })
        .await?;

        debug!(event = "relay_connected", chain_id = options.chain_id);
        Ok(Self {
            transport: RwLock::new(Some(Arc::new(transport))),
            codec: TxCodec::new(options.chain_id),
            shutdown: CancellationToken::new(),
            transactions,
            raw_transactions,
            sequences,
            raw_sequences,
        })
    }

    pub fn codec(&self) -> TxCodec {
        self.codec
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sends a signed transaction and returns its hash and relay timestamp.
    pub async fn send_transaction(&self, tx: &Transaction) -> Result<SubmitResult, ClientError> {
        let message = self.codec.encode(tx).map_err(ClientError::Encode)?;
        let response = self.transactions.call(message).await?;
        Ok(response.into())
    }

    /// Sends an already signed and encoded transaction envelope.
    pub async fn send_raw_transaction(
        &self,
        raw_tx: impl Into<Vec<u8>>,
    ) -> Result<SubmitResult, ClientError> {
        let message = proto::RawTxMsg {
            raw_tx: raw_tx.into(),
        };
        let response = self.raw_transactions.call(message).await?;
        Ok(response.into())
    }

    /// Sends transactions that must be included in the given order.
    pub async fn send_transaction_sequence(
        &self,
        txs: &[Transaction],
    ) -> Result<SequenceResult, ClientError> {
        if txs.is_empty() {
            return Err(ClientError::EmptySequence);
        }
        let sequence = txs
            .iter()
            .map(|tx| self.codec.encode(tx))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ClientError::Encode)?;
        let response = self
            .sequences
            .call(proto::TxSequenceMsg { sequence })
            .await?;
        sequence_result(response)
    }

    /// Raw-envelope variant of [`RelayConnection::send_transaction_sequence`].
    pub async fn send_raw_transaction_sequence(
        &self,
        raw_txs: Vec<Vec<u8>>,
    ) -> Result<SequenceResult, ClientError> {
        if raw_txs.is_empty() {
            return Err(ClientError::EmptySequence);
        }
        let response = self
            .raw_sequences
            .call(proto::RawTxSequenceMsg { raw_txs })
            .await?;
        sequence_result(response)
    }

    /// Submits `tx` to be included right after the already seen `target`.
    pub async fn backrun_transaction(
        &self,
        target: B256,
        tx: &Transaction,
    ) -> Result<SubmitResult, ClientError> {
        let message = proto::BackrunMsg {
            hash: target.to_string(),
            tx: Some(self.codec.encode(tx).map_err(ClientError::Encode)?),
        };
        let transport = self.transport()?;
        let response = transport
            .backrun(message)
            .await
            .map_err(|source| ClientError::Backrun { source })?;
        Ok(response.into())
    }

    /// Streams new transactions matching `filter` into `feed`.
    ///
    /// `filter` is an encoded filter expression; `None` receives everything.
    /// Blocks until the stream ends, fails, `cancel` fires or the connection
    /// is closed, and should run on its own task. `feed` is closed when this
    /// returns, whatever the outcome.
    pub async fn subscribe_new_transactions(
        &self,
        filter: Option<Vec<u8>>,
        feed: mpsc::Sender<Transaction>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let kind = SubscriptionKind::NewTransactions;
        let filter = proto::TxFilter {
            encoded: filter.unwrap_or_default(),
        };
        let transport = self.transport()?;
        let inbound = open_subscription(kind, transport.subscribe_new_txs(filter)).await?;
        let codec = self.codec;
        subscription::route(
            kind,
            inbound,
            move |wire| codec.decode(wire),
            feed,
            self.cancellation(cancel),
        )
        .await
    }

    /// Streams execution payload headers into `feed`.
    ///
    /// Same lifecycle as [`RelayConnection::subscribe_new_transactions`].
    pub async fn subscribe_execution_payload_headers(
        &self,
        feed: mpsc::Sender<ExecutionPayloadHeader>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let kind = SubscriptionKind::ExecutionPayloadHeaders;
        let transport = self.transport()?;
        let inbound = open_subscription(kind, transport.subscribe_execution_headers()).await?;
        let codec = self.codec;
        subscription::route(
            kind,
            inbound,
            move |wire| codec.decode_header(wire),
            feed,
            self.cancellation(cancel),
        )
        .await
    }

    /// Streams full execution payloads into `feed`.
    pub async fn subscribe_execution_payloads(
        &self,
        feed: mpsc::Sender<ExecutionPayload>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let kind = SubscriptionKind::ExecutionPayloads;
        let transport = self.transport()?;
        let inbound = open_subscription(kind, transport.subscribe_execution_payloads()).await?;
        let codec = self.codec;
        subscription::route(
            kind,
            inbound,
            move |wire| codec.decode_payload(wire),
            feed,
            self.cancellation(cancel),
        )
        .await
    }

    /// Streams compact beacon blocks into `feed`.
    pub async fn subscribe_beacon_blocks(
        &self,
        feed: mpsc::Sender<CompactBeaconBlock>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        let kind = SubscriptionKind::BeaconBlocks;
        let transport = self.transport()?;
        let inbound = open_subscription(kind, transport.subscribe_beacon_blocks()).await?;
        let codec = self.codec;
        subscription::route(
            kind,
            inbound,
            move |wire| codec.decode_beacon_block(wire),
            feed,
            self.cancellation(cancel),
        )
        .await
    }

    /// Closes every transaction stream, stops all subscriptions and releases
    /// the transport.
    ///
    /// Calls still in flight are aborted with `StreamClosed` instead of being
    /// awaited. Calling it more than once is harmless.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.transactions.close().await;
        self.raw_transactions.close().await;
        self.sequences.close().await;
        self.raw_sequences.close().await;

        let released = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!(event = "relay_connection_closed");
        }
    }

    fn transport(&self) -> Result<Arc<T>, ClientError> {
        let guard = self.transport.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().cloned().ok_or(ClientError::ConnectionClosed)
    }

    fn cancellation(&self, caller: CancellationToken) -> Cancellation {
        Cancellation::new(caller, self.shutdown.clone())
    }
}

async fn open_session<Req, Resp, F, Fut>(
    class: TxClass,
    buffer: usize,
    open: F,
) -> Result<Session<Req, Resp>, ClientError>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: FnOnce(Outbound<Req>) -> Fut,
    Fut: Future<Output = Result<Inbound<Resp>, Status>>,
{
    let (outbound_tx, outbound_rx) = mpsc::channel(buffer);
    match open(ReceiverStream::new(outbound_rx)).await {
        Ok(inbound) => {
            debug!(event = "stream_opened", class = %class);
            Ok(Session::new(class, outbound_tx, inbound))
        }
        Err(source) => {
            debug!(event = "stream_open_failed", class = %class, error = %source);
            Err(ClientError::StreamOpen { class, source })
        }
    }
}

async fn open_subscription<W, Fut>(
    kind: SubscriptionKind,
    opening: Fut,
) -> Result<Inbound<W>, ClientError>
where
    Fut: Future<Output = Result<Inbound<W>, Status>>,
{
    debug!(event = "subscription_opening", kind = %kind);
    opening
        .await
        .map_err(|source| ClientError::Subscribe { kind, source })
}

fn sequence_result(response: proto::TxSequenceResponse) -> Result<SequenceResult, ClientError> {
    let timestamp = response
        .sequence_response
        .first()
        .map(|item| item.timestamp)
        .ok_or_else(|| ClientError::Protocol("empty sequence response".to_string()))?;
    Ok(SequenceResult {
        hashes: response
            .sequence_response
            .into_iter()
            .map(|item| item.hash)
            .collect(),
        timestamp,
    })
}

/// Errors produced by the relay client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial or channel-level transport failure.
    #[error("relay transport error: {0}")]
    Transport(#[source] tonic::transport::Error),

    #[error("invalid relay endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// API key could not be converted to gRPC metadata.
    #[error("invalid api-key metadata: {0}")]
    InvalidApiKey(#[source] InvalidMetadataValue),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// One of the persistent transaction streams failed to open; connect
    /// was aborted.
    #[error("failed to open {class} stream: {source}")]
    StreamOpen {
        class: TxClass,
        #[source]
        source: Status,
    },

    /// Transaction could not be converted to its wire form. No I/O happened.
    #[error("encode transaction: {0}")]
    Encode(#[source] CodecError),

    #[error("decode {kind} message: {source}")]
    Decode {
        kind: SubscriptionKind,
        #[source]
        source: CodecError,
    },

    #[error("{class} stream send half is closed")]
    Send { class: TxClass },

    #[error("{class} stream receive failed: {source}")]
    Receive {
        class: TxClass,
        #[source]
        source: Status,
    },

    #[error("{class} stream was closed by the relay")]
    StreamEnded { class: TxClass },

    /// The stream was closed earlier, by `close` or by a previous failure.
    #[error("{class} stream is closed")]
    StreamClosed { class: TxClass },

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("transaction sequence is empty")]
    EmptySequence,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backrun failed: {source}")]
    Backrun {
        #[source]
        source: Status,
    },

    #[error("failed to open {kind} subscription: {source}")]
    Subscribe {
        kind: SubscriptionKind,
        #[source]
        source: Status,
    },

    #[error("{kind} subscription failed: {source}")]
    Subscription {
        kind: SubscriptionKind,
        #[source]
        source: Status,
    },

    #[error("{kind} feed receiver was dropped")]
    FeedClosed { kind: SubscriptionKind },
}

impl ClientError {
    /// Whether retrying the operation (on a new connection if the stream is
    /// gone) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::StreamOpen { source, .. }
            | Self::Backrun { source }
            | Self::Subscribe { source, .. }
            | Self::Subscription { source, .. } => is_transient(source.code()),
            Self::InvalidEndpoint { .. }
            | Self::InvalidApiKey(_)
            | Self::Encode(_)
            | Self::Decode { .. }
            | Self::Send { .. }
            | Self::Receive { .. }
            | Self::StreamEnded { .. }
            | Self::StreamClosed { .. }
            | Self::ConnectionClosed
            | Self::EmptySequence
            | Self::Protocol(_)
            | Self::FeedClosed { .. } => false,
        }
    }
}

fn is_transient(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::ResourceExhausted | Code::DeadlineExceeded | Code::Aborted
    )
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use tonic::Status;

    use super::{
        sequence_result, ClientDefaults, ClientError, ClientOptions, RelayClient,
        LOCAL_RELAY_ENDPOINT, RELAY_ENDPOINT,
    };
    use crate::stream::proto::{TransactionResponse, TxSequenceResponse};
    use crate::stream::subscription::SubscriptionKind;

    #[test]
    fn relay_client_uses_production_endpoint_by_default() {
        let client = RelayClient::new(SecretString::new("test-api-key".to_string()));
        assert_eq!(client.endpoint(), RELAY_ENDPOINT);
    }

    #[test]
    fn relay_client_uses_local_endpoint_when_enabled() {
        let client =
            RelayClient::new(SecretString::new("test-api-key".to_string())).with_local_mode(true);
        assert_eq!(client.endpoint(), LOCAL_RELAY_ENDPOINT);
    }

    #[test]
    fn relay_client_endpoint_override_takes_precedence() {
        let client = RelayClient::new(SecretString::new("test-api-key".to_string()))
            .with_local_mode(true)
            .with_endpoint("http://relay-dev.example:8080   \n");
        assert_eq!(client.endpoint(), "http://relay-dev.example:8080");
    }

    #[test]
    fn default_options_use_client_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.connect_timeout, ClientDefaults::CONNECT_TIMEOUT);
        assert_eq!(options.dial_retry.max_attempts, ClientDefaults::DIAL_ATTEMPTS);
        assert_eq!(options.chain_id, 1);
    }

    #[test]
    fn sequence_timestamp_comes_from_first_item() {
        for len in 1..=5i64 {
            let response = TxSequenceResponse {
                sequence_response: (0..len)
                    .map(|index| TransactionResponse {
                        hash: format!("0x{index:02x}"),
                        timestamp: 1_000 + index,
                    })
                    .collect(),
            };
            let result = sequence_result(response).expect("non-empty");
            assert_eq!(result.timestamp, 1_000);
            assert_eq!(result.hashes.len(), len as usize);
            assert_eq!(result.hashes[0], "0x00");
        }
    }

    #[test]
    fn empty_sequence_response_is_a_protocol_error() {
        let result = sequence_result(TxSequenceResponse::default());
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn transient_statuses_are_retryable() {
        let unavailable = ClientError::Subscription {
            kind: SubscriptionKind::NewTransactions,
            source: Status::unavailable("restarting"),
        };
        assert!(unavailable.is_retryable());

        let denied = ClientError::Subscribe {
            kind: SubscriptionKind::BeaconBlocks,
            source: Status::permission_denied("bad key"),
        };
        assert!(!denied.is_retryable());
        assert!(!ClientError::EmptySequence.is_retryable());
    }
}
