//! Pumps a server-streaming feed into a caller-owned delivery channel.
//!
//! The router owns the feed's sender for the whole subscription and drops it
//! when the subscription ends, so the consumer observes exactly one close and
//! nothing is written after it.

use std::fmt;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::CodecError;
use crate::stream::client::ClientError;
use crate::stream::transport::Inbound;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SubscriptionKind {
    NewTransactions,
    ExecutionPayloadHeaders,
    ExecutionPayloads,
    BeaconBlocks,
}

impl SubscriptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewTransactions => "new_transactions",
            Self::ExecutionPayloadHeaders => "execution_payload_headers",
            Self::ExecutionPayloads => "execution_payloads",
            Self::BeaconBlocks => "beacon_blocks",
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stops a subscription when either the caller or the connection gives up.
#[derive(Clone, Debug)]
pub(crate) struct Cancellation {
    caller: CancellationToken,
    shutdown: CancellationToken,
}

impl Cancellation {
    pub(crate) fn new(caller: CancellationToken, shutdown: CancellationToken) -> Self {
        Self { caller, shutdown }
    }

    fn is_cancelled(&self) -> bool {
        self.caller.is_cancelled() || self.shutdown.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.caller.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Runs the streaming phase of a subscription until the stream ends, fails,
/// the consumer goes away, or `cancel` fires.
///
/// Clean end-of-stream and cancellation return `Ok(())`.
pub(crate) async fn route<W, T, D>(
    kind: SubscriptionKind,
    mut inbound: Inbound<W>,
    decode: D,
    feed: mpsc::Sender<T>,
    cancel: Cancellation,
) -> Result<(), ClientError>
where
    D: Fn(W) -> Result<T, CodecError>,
{
    debug!(event = "subscription_streaming", kind = %kind);
    let mut delivered: u64 = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            next = inbound.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(source)) => break Err(ClientError::Subscription { kind, source }),
            None => break Ok(()),
        };
        let item = match decode(message) {
            Ok(item) => item,
            Err(source) => break Err(ClientError::Decode { kind, source }),
        };

        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            sent = feed.send(item) => {
                if sent.is_err() {
                    break Err(ClientError::FeedClosed { kind });
                }
                delivered += 1;
            }
        }
    };

    drop(feed);
    match &outcome {
        Ok(()) => debug!(event = "subscription_closed", kind = %kind, delivered),
        Err(err) => debug!(
            event = "subscription_failed",
            kind = %kind,
            delivered,
            error = %err,
        ),
    }
    outcome
}
