//! Relay stream modules.
//!
//! - `client`: connect, the four persistent transaction streams, backrun and
//!   subscriptions.
//! - `proto`: protobuf messages and method paths of the relay service.
//! - `session`: one persistent bidirectional stream and its call pairing.
//! - `subscription`: delivery of server-streamed items to a caller channel.
//! - `transport`: the gRPC seam the client runs on.

/// Relay client and connection.
pub mod client;
/// Relay wire messages.
pub mod proto;
/// Per-class transaction stream.
pub mod session;
/// Subscription routing.
pub mod subscription;
/// gRPC transport.
pub mod transport;
