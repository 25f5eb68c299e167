//! Outbound Gateway
//!
//! The one action presentation can take: send a chat message. Frames are only
//! handed to the transport while the connection is up; otherwise the caller
//! gets [`SendError::NotConnected`] straight away. Nothing is queued for
//! later and nothing is appended locally; the server echoes the message back
//! with its canonical id.

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::connection::ConnectionState;
use crate::error::SendError;
use crate::protocol::OutboundFrame;
use crate::store::SessionSnapshot;

#[derive(Clone, Debug)]
pub struct OutboundGateway {
    connection: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<SessionSnapshot>,
    outbound: mpsc::UnboundedSender<String>,
}

impl OutboundGateway {
    pub fn new(
        connection: watch::Receiver<ConnectionState>,
        snapshot: watch::Receiver<SessionSnapshot>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            connection,
            snapshot,
            outbound,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.borrow().is_connected()
    }

    /// Send `text` as the local user.
    pub fn send_message(&self, text: &str) -> Result<(), SendError> {
        if self.outbound.is_closed() {
            return Err(SendError::Closed);
        }
        if !self.is_connected() {
            debug!("send rejected: not connected");
            return Err(SendError::NotConnected);
        }

        let sender = self.snapshot.borrow().settings.username.clone();
        let frame = OutboundFrame::message(text, sender).encode()?;
        self.outbound.send(frame).map_err(|_| SendError::Closed)
    }
}
