//! Authenticated realtime push channel.
//!
//! - [`ConnectionManager`] owns the single live connection per token.
//! - [`Connection`] runs the reconnect state machine and fans push events out
//!   to listeners.
//! - [`protocol`] defines the `{"event", "data"}` wire format.

pub mod connection;
pub mod manager;
pub mod protocol;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ChannelSubscription, Connection, ConnectionState, Listener};
pub use manager::ConnectionManager;
pub use protocol::{Channel, Frame, ServerEvent};
pub use retry::RetryPolicy;
pub use transport::{Connector, InboundFrame, Transport, WsConnector};
