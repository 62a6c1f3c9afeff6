//! Transport seam between the client and the relay's gRPC service.
//!
//! `RelayTransport` has one method per RPC. `GrpcTransport` is the production
//! implementation over a `tonic` channel; any other implementation (for
//! example an in-memory one in tests) can drive a `RelayConnection`.
//!
//! Opening a bidirectional stream does not wait for the relay's response
//! headers, which a relay may only send with its first response. The call is
//! driven by a background task; a rejected open surfaces as the first receive
//! failure on that stream.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::stream::client::ClientError;
use crate::stream::proto::{self, methods};

/// Metadata key carrying the API key on every call.
pub const API_KEY_METADATA: &str = "x-api-key";

const HTTP2_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const INBOUND_BUFFER: usize = 16;

/// Messages flowing from the server for one open call.
pub type Inbound<T> = BoxStream<'static, Result<T, Status>>;
/// Messages flowing to the server for one open call.
pub type Outbound<T> = ReceiverStream<T>;

#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    async fn open_transaction_stream(
        &self,
        outbound: Outbound<proto::Transaction>,
    ) -> Result<Inbound<proto::TransactionResponse>, Status>;

    async fn open_raw_transaction_stream(
        &self,
        outbound: Outbound<proto::RawTxMsg>,
    ) -> Result<Inbound<proto::TransactionResponse>, Status>;

    async fn open_transaction_sequence_stream(
        &self,
        outbound: Outbound<proto::TxSequenceMsg>,
    ) -> Result<Inbound<proto::TxSequenceResponse>, Status>;

    async fn open_raw_transaction_sequence_stream(
        &self,
        outbound: Outbound<proto::RawTxSequenceMsg>,
    ) -> Result<Inbound<proto::TxSequenceResponse>, Status>;

    async fn backrun(
        &self,
        message: proto::BackrunMsg,
    ) -> Result<proto::TransactionResponse, Status>;

    async fn subscribe_new_txs(
        &self,
        filter: proto::TxFilter,
    ) -> Result<Inbound<proto::Transaction>, Status>;

    async fn subscribe_execution_headers(
        &self,
    ) -> Result<Inbound<proto::ExecutionPayloadHeader>, Status>;

    async fn subscribe_execution_payloads(
        &self,
    ) -> Result<Inbound<proto::ExecutionPayload>, Status>;

    async fn subscribe_beacon_blocks(&self) -> Result<Inbound<proto::CompactBeaconBlock>, Status>;
}

/// `RelayTransport` over a `tonic` channel.
#[derive(Clone, Debug)]
pub struct GrpcTransport {
    grpc: Grpc<Channel>,
    api_key: AsciiMetadataValue,
}

impl GrpcTransport {
    /// Wraps an already configured channel (TLS, proxies and the like are the
    /// caller's concern).
    pub fn new(channel: Channel, api_key: &SecretString) -> Result<Self, ClientError> {
        let api_key = api_key
            .expose_secret()
            .parse()
            .map_err(ClientError::InvalidApiKey)?;
        Ok(Self {
            grpc: Grpc::new(channel),
            api_key,
        })
    }

    /// Dials `endpoint` and waits until the channel is connected.
    pub async fn dial(endpoint: &str, connect_timeout: Duration) -> Result<Channel, ClientError> {
        let endpoint = Endpoint::from_shared(endpoint.to_string())
            .map_err(|source| ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                source,
            })?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true)
            .http2_keep_alive_interval(HTTP2_KEEPALIVE_INTERVAL)
            .keep_alive_while_idle(true);
        endpoint.connect().await.map_err(ClientError::Transport)
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(API_KEY_METADATA, self.api_key.clone());
        request
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|err| Status::unavailable(format!("relay channel not ready: {err}")))?;
        Ok(grpc)
    }

    async fn bidi<Req, Resp>(
        &self,
        path: &'static str,
        outbound: Outbound<Req>,
    ) -> Result<Inbound<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let request = self.request(outbound);
        Ok(deferred_inbound(async move {
            let response = grpc
                .streaming(request, PathAndQuery::from_static(path), ProstCodec::default())
                .await?;
            Ok(response.into_inner())
        }))
    }

    async fn server_stream<Req, Resp>(
        &self,
        path: &'static str,
        message: Req,
    ) -> Result<Inbound<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let response = grpc
            .server_streaming(
                self.request(message),
                PathAndQuery::from_static(path),
                ProstCodec::default(),
            )
            .await?;
        Ok(response.into_inner().boxed())
    }
}

/// Returns the receive half of a call whose opening is still in progress.
///
/// A background task awaits `open`, then forwards every message. An open
/// failure is delivered as the first item. The task stops once the returned
/// stream is dropped.
fn deferred_inbound<Resp, S, F>(open: F) -> Inbound<Resp>
where
    Resp: Send + 'static,
    S: Stream<Item = Result<Resp, Status>> + Send + 'static,
    F: Future<Output = Result<S, Status>> + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
    tokio::spawn(async move {
        let opened = tokio::select! {
            _ = inbound_tx.closed() => return,
            opened = open => opened,
        };
        let mut inbound = match opened {
            Ok(inbound) => inbound.boxed(),
            Err(status) => {
                let _ = inbound_tx.send(Err(status)).await;
                return;
            }
        };
        loop {
            let next = tokio::select! {
                _ = inbound_tx.closed() => break,
                next = inbound.next() => next,
            };
            let Some(message) = next else {
                break;
            };
            if inbound_tx.send(message).await.is_err() {
                break;
            }
        }
    });
    ReceiverStream::new(inbound_rx).boxed()
}

#[async_trait]
impl RelayTransport for GrpcTransport {
    async fn open_transaction_stream(
        &self,
        outbound: Outbound<proto::Transaction>,
    ) -> Result<Inbound<proto::TransactionResponse>, Status> {
        self.bidi(methods::SEND_TRANSACTION, outbound).await
    }

    async fn open_raw_transaction_stream(
        &self,
        outbound: Outbound<proto::RawTxMsg>,
    ) -> Result<Inbound<proto::TransactionResponse>, Status> {
        self.bidi(methods::SEND_RAW_TRANSACTION, outbound).await
    }

    async fn open_transaction_sequence_stream(
        &self,
        outbound: Outbound<proto::TxSequenceMsg>,
    ) -> Result<Inbound<proto::TxSequenceResponse>, Status> {
        self.bidi(methods::SEND_TRANSACTION_SEQUENCE, outbound).await
    }

    async fn open_raw_transaction_sequence_stream(
        &self,
        outbound: Outbound<proto::RawTxSequenceMsg>,
    ) -> Result<Inbound<proto::TxSequenceResponse>, Status> {
        self.bidi(methods::SEND_RAW_TRANSACTION_SEQUENCE, outbound)
            .await
    }

    async fn backrun(
        &self,
        message: proto::BackrunMsg,
    ) -> Result<proto::TransactionResponse, Status> {
        let mut grpc = self.ready().await?;
        let response = grpc
            .unary(
                self.request(message),
                PathAndQuery::from_static(methods::BACKRUN),
                ProstCodec::default(),
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn subscribe_new_txs(
        &self,
        filter: proto::TxFilter,
    ) -> Result<Inbound<proto::Transaction>, Status> {
        self.server_stream(methods::SUBSCRIBE_NEW_TXS, filter).await
    }

    async fn subscribe_execution_headers(
        &self,
    ) -> Result<Inbound<proto::ExecutionPayloadHeader>, Status> {
        self.server_stream(methods::SUBSCRIBE_EXECUTION_HEADERS, ())
            .await
    }

    async fn subscribe_execution_payloads(
        &self,
    ) -> Result<Inbound<proto::ExecutionPayload>, Status> {
        self.server_stream(methods::SUBSCRIBE_EXECUTION_PAYLOADS, ())
            .await
    }

    async fn subscribe_beacon_blocks(&self) -> Result<Inbound<proto::CompactBeaconBlock>, Status> {
        self.server_stream(methods::SUBSCRIBE_BEACON_BLOCKS, ())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::time::Duration;

    use futures_util::{stream, StreamExt};
    use secrecy::SecretString;
    use tokio::sync::oneshot;
    use tonic::transport::Endpoint;
    use tonic::Status;

    use super::{deferred_inbound, GrpcTransport, Inbound, API_KEY_METADATA};
    use crate::stream::client::ClientError;

    #[tokio::test]
    async fn stream_is_returned_before_the_open_completes() {
        let (opened_tx, opened_rx) = oneshot::channel::<()>();
        let mut inbound: Inbound<u32> = deferred_inbound(async move {
            opened_rx
                .await
                .map_err(|_| Status::cancelled("open abandoned"))?;
            Ok(stream::iter(vec![Ok(1), Ok(2)]))
        });

        let early = tokio::time::timeout(Duration::from_millis(20), inbound.next()).await;
        assert!(early.is_err(), "nothing arrives before the open completes");

        opened_tx.send(()).expect("open");
        assert_eq!(inbound.next().await.map(Result::ok), Some(Some(1)));
        assert_eq!(inbound.next().await.map(Result::ok), Some(Some(2)));
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn rejected_open_is_the_first_item() {
        let mut inbound: Inbound<u32> = deferred_inbound(async {
            Err::<stream::Empty<Result<u32, Status>>, _>(Status::permission_denied("bad key"))
        });
        let first = inbound.next().await.expect("open failure");
        assert_eq!(
            first.expect_err("rejected").code(),
            tonic::Code::PermissionDenied
        );
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_a_pending_open() {
        let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
        let inbound: Inbound<u32> = deferred_inbound(async move {
            let _dropped_tx = dropped_tx;
            future::pending::<Result<stream::Empty<Result<u32, Status>>, Status>>().await
        });
        drop(inbound);
        tokio::time::timeout(Duration::from_secs(2), dropped_rx)
            .await
            .expect("open task stopped")
            .expect_err("sender dropped without sending");
    }

    #[tokio::test]
    async fn api_key_is_attached_to_every_request() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let transport =
            GrpcTransport::new(channel, &SecretString::new("test-api-key".to_string()))
                .expect("transport");
        let request = transport.request(());
        assert_eq!(
            request
                .metadata()
                .get(API_KEY_METADATA)
                .and_then(|value| value.to_str().ok()),
            Some("test-api-key")
        );
    }

    #[tokio::test]
    async fn api_key_must_be_valid_metadata() {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        let result = GrpcTransport::new(channel, &SecretString::new("bad\nkey".to_string()));
        assert!(matches!(result, Err(ClientError::InvalidApiKey(_))));
    }

    #[tokio::test]
    async fn dial_rejects_malformed_endpoint() {
        let result = GrpcTransport::dial("not a uri", std::time::Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientError::InvalidEndpoint { .. })));
    }
}
