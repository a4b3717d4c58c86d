//! The server connection and login handshake.

use crate::error::ClientError;
use md5::{Digest, Md5};
use slsk_core::codes::server::{LOGIN, PARENT_MIN_SPEED, PARENT_SPEED_RATIO, WISHLIST_INTERVAL};
use slsk_core::framing::{self, CodeWidth};
use slsk_core::version;
use slsk_core::Frame;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// The outcome of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    /// The server accepted the login.
    Success {
        /// The server's message-of-the-day text.
        greeting: String,
        /// The IP address the server observed this client connecting from.
        observed_ip: Ipv4Addr,
    },
    /// The server rejected the login.
    Failure {
        /// The reason the server gave.
        reason: String,
    },
}

/// A logged-in (or logging-in) connection to the Soulseek server.
///
/// Frames on this connection use the same 4-byte-code layout as peer
/// connections (see `slsk-net`), so this wraps the socket directly rather
/// than depending on `slsk-net`, which is peer-connection specific.
pub struct ServerSession {
    stream: Mutex<TcpStream>,
}

/// Info frames the server is expected to push immediately after a
/// successful login, before ordinary traffic begins.
#[derive(Debug, Default)]
pub struct PostLoginInfo {
    /// `ParentMinSpeed`, if seen.
    pub parent_min_speed: Option<u32>,
    /// `ParentSpeedRatio`, if seen.
    pub parent_speed_ratio: Option<u32>,
    /// `WishlistInterval`, if seen.
    pub wishlist_interval: Option<u32>,
}

impl PostLoginInfo {
    fn is_complete(&self) -> bool {
        self.parent_min_speed.is_some()
            && self.parent_speed_ratio.is_some()
            && self.wishlist_interval.is_some()
    }
}

/// How many frames to read past the login response while waiting for the
/// three post-login info frames, before giving up and handing whatever
/// arrived off to the caller's ordinary dispatch loop.
const POST_LOGIN_FRAME_BUDGET: usize = 16;

impl ServerSession {
    /// Dial `addr` and run the login handshake.
    ///
    /// On success, also returns any frames read while waiting for the
    /// post-login info frames that turned out not to be one of those three
    /// — the caller's dispatch loop must still process them, since this
    /// connection has no other frame queue.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Net`] on a dial or framing failure, or
    /// [`ClientError::LoginRejected`] if the server's response reports
    /// failure.
    pub async fn connect(
        addr: std::net::SocketAddr,
        username: &str,
        password: &str,
    ) -> Result<(Self, LoginResult, Vec<Frame>), ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(slsk_net::NetError::from)?;
        let session = Self {
            stream: Mutex::new(stream),
        };
        let (result, extra) = session.login(username, password).await?;
        Ok((session, result, extra))
    }

    async fn login(&self, username: &str, password: &str) -> Result<(LoginResult, Vec<Frame>), ClientError> {
        let hash = login_hash(username, password);

        let mut payload = Vec::new();
        framing::write_string(&mut payload, username);
        framing::write_string(&mut payload, password);
        payload.extend_from_slice(&version::MAJOR.to_le_bytes());
        framing::write_string(&mut payload, &hash);
        payload.extend_from_slice(&version::MINOR.to_le_bytes());

        let mut stream = self.stream.lock().await;
        framing::write_frame(&mut *stream, LOGIN, &payload, CodeWidth::Four)
            .await
            .map_err(slsk_net::NetError::from)?;

        let frame = framing::read_frame(&mut *stream, CodeWidth::Four, slsk_core::MAX_FRAME_SIZE)
            .await
            .map_err(slsk_net::NetError::from)?;

        let result = parse_login_response(&frame.payload)?;
        if !matches!(result, LoginResult::Success { .. }) {
            return Ok((result, Vec::new()));
        }

        let mut info = PostLoginInfo::default();
        let mut extra = Vec::new();
        for _ in 0..POST_LOGIN_FRAME_BUDGET {
            if info.is_complete() {
                break;
            }
            let frame = tokio::time::timeout(
                Duration::from_secs(10),
                framing::read_frame(&mut *stream, CodeWidth::Four, slsk_core::MAX_FRAME_SIZE),
            )
            .await;
            let frame = match frame {
                Ok(Ok(frame)) => frame,
                _ => break,
            };
            match frame.code {
                PARENT_MIN_SPEED if frame.payload.len() >= 4 => {
                    info.parent_min_speed = Some(u32::from_le_bytes(frame.payload[0..4].try_into().unwrap()));
                }
                PARENT_SPEED_RATIO if frame.payload.len() >= 4 => {
                    info.parent_speed_ratio = Some(u32::from_le_bytes(frame.payload[0..4].try_into().unwrap()));
                }
                WISHLIST_INTERVAL if frame.payload.len() >= 4 => {
                    info.wishlist_interval = Some(u32::from_le_bytes(frame.payload[0..4].try_into().unwrap()));
                }
                _ => extra.push(frame),
            }
        }
        drop(stream);

        Ok((result, extra))
    }

    /// Send one framed message on the server channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Net`] on any framing or I/O failure.
    pub async fn send(&self, code: u32, payload: &[u8]) -> Result<(), ClientError> {
        let mut stream = self.stream.lock().await;
        framing::write_frame(&mut *stream, code, payload, CodeWidth::Four)
            .await
            .map_err(|e| ClientError::Net(slsk_net::NetError::from(e)))
    }

    /// Receive one framed message on the server channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Net`] on any framing or I/O failure.
    pub async fn recv(&self) -> Result<slsk_core::Frame, ClientError> {
        let mut stream = self.stream.lock().await;
        framing::read_frame(&mut *stream, CodeWidth::Four, slsk_core::MAX_FRAME_SIZE)
            .await
            .map_err(|e| ClientError::Net(slsk_net::NetError::from(e)))
    }
}

fn login_hash(username: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_login_response(payload: &[u8]) -> Result<LoginResult, ClientError> {
    if payload.is_empty() {
        return Err(ClientError::Frame(slsk_core::FrameError::Truncated));
    }
    let success = payload[0] != 0;
    if success {
        let (greeting, rest) =
            framing::read_string(&payload[1..]).map_err(ClientError::Frame)?;
        if rest.len() < 4 {
            return Err(ClientError::Frame(slsk_core::FrameError::Truncated));
        }
        let observed_ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
        Ok(LoginResult::Success { greeting, observed_ip })
    } else {
        let (reason, _) = framing::read_string(&payload[1..]).map_err(ClientError::Frame)?;
        Ok(LoginResult::Failure { reason })
    }
}
