//! Persistent per-class streams and request/response correlation.
//!
//! A `Session` owns both halves of one bidirectional stream. Responses carry
//! no request id, so a response is paired with a request purely by order.
//! `Session::call` holds the session lock for the whole send/receive round
//! trip, which keeps at most one call in flight per stream. `Session::close`
//! does not queue behind that lock: it cancels the session first, which
//! aborts a call still waiting on the peer.

use std::fmt;
use std::future::Future;

use futures_util::future::try_join;
use futures_util::stream;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stream::client::ClientError;
use crate::stream::transport::Inbound;

/// Transaction class served by one dedicated stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TxClass {
    Transaction,
    RawTransaction,
    TransactionSequence,
    RawTransactionSequence,
}

impl TxClass {
    pub const ALL: [TxClass; 4] = [
        TxClass::Transaction,
        TxClass::RawTransaction,
        TxClass::TransactionSequence,
        TxClass::RawTransactionSequence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::RawTransaction => "raw_transaction",
            Self::TransactionSequence => "transaction_sequence",
            Self::RawTransactionSequence => "raw_transaction_sequence",
        }
    }
}

impl fmt::Display for TxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One open bidirectional stream for a single transaction class.
pub struct Session<Req, Resp> {
    class: TxClass,
    closing: CancellationToken,
    state: Mutex<SessionState<Req, Resp>>,
}

struct SessionState<Req, Resp> {
    outbound: Option<mpsc::Sender<Req>>,
    inbound: Inbound<Resp>,
    // Set while a call is between its send and its receive. Still set at the
    // start of the next call means the previous call future was dropped and a
    // stale response may be queued on the stream.
    in_flight: bool,
}

impl<Req, Resp: Send + 'static> SessionState<Req, Resp> {
    fn close(&mut self) {
        self.outbound = None;
        self.inbound = stream::empty().boxed();
        self.in_flight = false;
    }
}

impl<Req, Resp> fmt::Debug for Session<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("class", &self.class)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> Session<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new(class: TxClass, outbound: mpsc::Sender<Req>, inbound: Inbound<Resp>) -> Self {
        Self {
            class,
            closing: CancellationToken::new(),
            state: Mutex::new(SessionState {
                outbound: Some(outbound),
                inbound,
                in_flight: false,
            }),
        }
    }

    pub fn class(&self) -> TxClass {
        self.class
    }

    pub async fn is_closed(&self) -> bool {
        self.closing.is_cancelled() || self.state.lock().await.outbound.is_none()
    }

    /// Writes one message to the send half.
    ///
    /// Pairing is the caller's responsibility; prefer [`Session::call`].
    pub async fn send(&self, message: Req) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        let outbound = self.open_sender(&mut state)?;
        let class = self.class;
        let result = self
            .unless_closing(async move {
                outbound
                    .send(message)
                    .await
                    .map_err(|_| ClientError::Send { class })
            })
            .await;
        self.close_on_error(&mut state, result)
    }

    /// Reads the next message from the receive half.
    pub async fn recv(&self) -> Result<Resp, ClientError> {
        let mut state = self.state.lock().await;
        self.open_sender(&mut state)?;
        let result = self
            .unless_closing(next_response(self.class, &mut state.inbound))
            .await;
        self.close_on_error(&mut state, result)
    }

    /// Sends `message` and returns the next response on this stream.
    ///
    /// The send and the receive run concurrently; the call only succeeds once
    /// both completed. A failure on either half closes the session. A
    /// concurrent [`Session::close`] aborts the call with `StreamClosed`.
    pub async fn call(&self, message: Req) -> Result<Resp, ClientError> {
        let mut state = self.state.lock().await;
        if state.in_flight {
            debug!(
                event = "session_desynchronized",
                class = %self.class,
            );
            state.close();
        }
        let outbound = self.open_sender(&mut state)?;

        state.in_flight = true;
        let class = self.class;
        let send = async move {
            outbound
                .send(message)
                .await
                .map_err(|_| ClientError::Send { class })
        };
        let receive = next_response(class, &mut state.inbound);
        let result = self
            .unless_closing(try_join(send, receive))
            .await
            .map(|((), response)| response);

        let result = self.close_on_error(&mut state, result);
        if result.is_ok() {
            state.in_flight = false;
        }
        result
    }

    /// Closes the send half and releases the receive half.
    ///
    /// An in-flight call is aborted with `StreamClosed` rather than awaited,
    /// so a peer that never answers cannot hold the close up. Idempotent.
    pub async fn close(&self) {
        self.closing.cancel();
        let mut state = self.state.lock().await;
        if state.outbound.is_some() {
            state.close();
            debug!(event = "session_closed", class = %self.class);
        }
    }

    fn open_sender(
        &self,
        state: &mut SessionState<Req, Resp>,
    ) -> Result<mpsc::Sender<Req>, ClientError> {
        if self.closing.is_cancelled() {
            return Err(ClientError::StreamClosed { class: self.class });
        }
        state
            .outbound
            .clone()
            .ok_or(ClientError::StreamClosed { class: self.class })
    }

    async fn unless_closing<T, F>(&self, work: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::select! {
            _ = self.closing.cancelled() => Err(ClientError::StreamClosed { class: self.class }),
            result = work => result,
        }
    }

    fn close_on_error<T>(
        &self,
        state: &mut SessionState<Req, Resp>,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        if let Err(err) = &result {
            if self.closing.is_cancelled() {
                return result;
            }
            debug!(
                event = "session_failed",
                class = %self.class,
                error = %err,
            );
            state.close();
        }
        result
    }
}

async fn next_response<Resp>(
    class: TxClass,
    inbound: &mut Inbound<Resp>,
) -> Result<Resp, ClientError> {
    match inbound.next().await {
        Some(Ok(response)) => Ok(response),
        Some(Err(source)) => Err(ClientError::Receive { class, source }),
        None => Err(ClientError::StreamEnded { class }),
    }
}
