//! NAT-traversal handshake.
//!
//! Two peers can end up dialing each other by two different paths: one
//! opens a fresh socket and announces itself with `PeerInit`; the other was
//! invited by the server (`ConnectToPeer`) and instead announces the token
//! the server gave it with `PierceFirewall`. Either frame can arrive first
//! on a freshly accepted socket, so the accepting side must read one frame
//! and branch on its code before it knows which peer it is talking to.

use crate::connection::ConnectionType;
use crate::error::NetError;
use slsk_core::codes::peer::{PEER_INIT, PIERCE_FIREWALL};
use slsk_core::framing::{self, CodeWidth};
use tokio::io::{AsyncRead, AsyncWrite};

/// What the first frame on a freshly accepted socket turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The remote dialed us directly and announced itself.
    DirectInit {
        /// The remote's username.
        username: String,
        /// What the remote intends to use this connection for.
        connection_type: ConnectionType,
        /// The token the remote generated for this dial (a transfer
        /// correlation token for `FileTransfer`, otherwise unused by this
        /// layer but still reported).
        token: u32,
    },
    /// The remote was invited by the server and is presenting the token we
    /// gave it in our outbound `ConnectToPeer` request.
    PierceFirewall {
        /// The token from our original invitation.
        token: u32,
    },
}

/// Send a `PeerInit`: announce ourselves on a socket we dialed directly.
///
/// # Errors
///
/// Returns [`NetError::Frame`] on any framing or I/O failure.
pub async fn peer_init<W>(
    stream: &mut W,
    username: &str,
    connection_type: ConnectionType,
    token: u32,
) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let mut payload = Vec::new();
    framing::write_string(&mut payload, username);
    framing::write_string(&mut payload, connection_type.as_wire_str());
    payload.extend_from_slice(&token.to_le_bytes());
    framing::write_frame(stream, PEER_INIT, &payload, CodeWidth::Four)
        .await
        .map_err(NetError::from)
}

/// Send a `PierceFirewall`: present the token from a server-mediated
/// `ConnectToPeer` invitation on a socket we dialed in response to it.
///
/// # Errors
///
/// Returns [`NetError::Frame`] on any framing or I/O failure.
pub async fn pierce_firewall<W>(stream: &mut W, token: u32) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload = token.to_le_bytes().to_vec();
    framing::write_frame(stream, PIERCE_FIREWALL, &payload, CodeWidth::Four)
        .await
        .map_err(NetError::from)
}

/// Read the first frame off a freshly accepted socket and classify it.
///
/// # Errors
///
/// Returns [`NetError::InvalidHandshake`] if the frame's code is neither
/// `PeerInit` nor `PierceFirewall`, or if its payload is malformed.
pub async fn read_handshake<R>(stream: &mut R) -> Result<HandshakeOutcome, NetError>
where
    R: AsyncRead + Unpin,
{
    let frame = framing::read_frame(stream, CodeWidth::Four, slsk_core::MAX_FRAME_SIZE).await?;
    match frame.code {
        PEER_INIT => {
            let (username, rest) = framing::read_string(&frame.payload)
                .map_err(|e| NetError::InvalidHandshake(e.to_string()))?;
            let (conn_type_str, rest) = framing::read_string(rest)
                .map_err(|e| NetError::InvalidHandshake(e.to_string()))?;
            let connection_type = ConnectionType::from_wire_str(&conn_type_str).ok_or_else(|| {
                NetError::InvalidHandshake(format!("unknown connection type {conn_type_str:?}"))
            })?;
            if rest.len() < 4 {
                return Err(NetError::InvalidHandshake("missing token".into()));
            }
            let token = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Ok(HandshakeOutcome::DirectInit {
                username,
                connection_type,
                token,
            })
        }
        PIERCE_FIREWALL => {
            if frame.payload.len() < 4 {
                return Err(NetError::InvalidHandshake("missing token".into()));
            }
            let token = u32::from_le_bytes([
                frame.payload[0],
                frame.payload[1],
                frame.payload[2],
                frame.payload[3],
            ]);
            Ok(HandshakeOutcome::PierceFirewall { token })
        }
        other => Err(NetError::InvalidHandshake(format!(
            "unexpected first frame code {other}"
        ))),
    }
}
