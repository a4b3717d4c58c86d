//! A framed connection to a single peer.

use crate::error::NetError;
use slsk_core::framing::{self, CodeWidth, Frame};
use tokio::net::TcpStream;

/// The three connection purposes a peer can advertise during `PeerInit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Peer-to-peer messages (browse, search results, transfer negotiation).
    PeerToPeer,
    /// A raw connection carrying one file's bytes.
    FileTransfer,
    /// A distributed-overlay connection (search forwarding).
    Distributed,
}

impl ConnectionType {
    /// The single-character token exchanged on the wire for this type.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ConnectionType::PeerToPeer => "P",
            ConnectionType::FileTransfer => "F",
            ConnectionType::Distributed => "D",
        }
    }

    /// Parse the wire token back into a type.
    ///
    /// # Errors
    ///
    /// Returns `None` for any token other than `"P"`, `"F"`, or `"D"`.
    #[must_use]
    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "P" => Some(ConnectionType::PeerToPeer),
            "F" => Some(ConnectionType::FileTransfer),
            "D" => Some(ConnectionType::Distributed),
            _ => None,
        }
    }
}

/// A live, framed connection to one peer.
///
/// Distributed connections use single-byte codes on the wire; peer-message
/// connections use four-byte codes. File-transfer connections are not
/// framed by this type at all — see `slsk-transfer`, which reads the raw
/// socket directly after the initial offset exchange.
pub struct PeerConnection {
    stream: TcpStream,
    username: String,
    connection_type: ConnectionType,
    code_width: CodeWidth,
}

impl PeerConnection {
    /// Wrap an established socket, already past the handshake.
    #[must_use]
    pub fn new(stream: TcpStream, username: String, connection_type: ConnectionType) -> Self {
        let code_width = match connection_type {
            ConnectionType::Distributed => CodeWidth::One,
            ConnectionType::PeerToPeer | ConnectionType::FileTransfer => CodeWidth::Four,
        };
        Self {
            stream,
            username,
            connection_type,
            code_width,
        }
    }

    /// The remote username this connection was established with.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// What this connection is used for.
    #[must_use]
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Send one framed message.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Frame`] on any framing or I/O failure.
    pub async fn send(&mut self, code: u32, payload: &[u8]) -> Result<(), NetError> {
        framing::write_frame(&mut self.stream, code, payload, self.code_width)
            .await
            .map_err(NetError::from)
    }

    /// Receive one framed message.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Frame`] if the connection closes mid-frame or a
    /// frame exceeds the configured maximum size.
    pub async fn recv(&mut self) -> Result<Frame, NetError> {
        framing::read_frame(&mut self.stream, self.code_width, slsk_core::MAX_FRAME_SIZE)
            .await
            .map_err(NetError::from)
    }

    /// Split into the raw socket, discarding framing state. Used when a
    /// `PeerToPeer` connection is repurposed as a raw transfer socket after
    /// a `TransferRequest`/`TransferResponse` exchange.
    #[must_use]
    pub fn into_raw(self) -> TcpStream {
        self.stream
    }
}
