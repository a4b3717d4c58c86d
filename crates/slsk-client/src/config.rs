//! Client configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Per-channel connection tunables, one instance per wire channel (server,
/// peer-message, transfer, incoming listener, distributed).
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    /// How long to wait for a dial to complete before giving up.
    pub connect_timeout: Duration,
    /// How long a connection may sit with no frame before it is dropped.
    pub inactivity_timeout: Duration,
    /// Socket read buffer size, in bytes.
    pub read_buffer: usize,
    /// Socket write buffer size, in bytes.
    pub write_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            inactivity_timeout: Duration::from_secs(60),
            read_buffer: 16 * 1024,
            write_buffer: 16 * 1024,
        }
    }
}

/// The minimum severity of [`crate::ClientEvent`]-adjacent diagnostics a
/// deployment wants surfaced; lower-severity `tracing` events are still
/// emitted through the normal subscriber, this only gates what reaches a
/// future diagnostics event (spec §6's `minimum_diagnostic_level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Everything, including per-chunk transfer progress.
    Trace,
    /// Routine lifecycle detail.
    Debug,
    /// Notable state changes.
    Info,
    /// Recoverable problems.
    Warn,
    /// Failures a caller should act on.
    Error,
}

/// Every tunable a deployment can set when building a [`crate::SoulseekClient`].
///
/// Grouped by subsystem; each field documents the default a caller gets via
/// [`ClientConfig::default`] if it does not override it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Login username.
    pub username: String,
    /// Login password (hashed with the username before it goes on the wire).
    pub password: String,
    /// Server address to dial.
    pub server_addr: SocketAddr,
    /// Port this client advertises as its own listening port.
    pub listen_port: u16,
    /// Whether to bind and accept on `listen_port` at all. A client with
    /// this off can only be reached through server-mediated
    /// `ConnectToPeer` invitations of peers it has itself dialed.
    pub enable_listener: bool,

    /// Ceiling on a single frame's payload before it is rejected.
    pub max_frame_size: u32,
    /// How long to wait for a server or peer response before timing out a
    /// correlated request.
    pub message_timeout: Duration,

    /// Whether to join the distributed search overlay at all.
    pub enable_distributed_network: bool,
    /// Whether this client accepts distributed child connections.
    pub accept_distributed_children: bool,
    /// Maximum number of distributed children to accept at once.
    pub distributed_child_limit: usize,
    /// How long to wait with no parent before self-promoting to branch
    /// root in the distributed overlay.
    pub branch_root_promotion_delay: Duration,

    /// Whether to automatically accept private room invitations.
    pub accept_private_room_invitations: bool,
    /// Whether to silently drop a search request carrying a token already
    /// seen, rather than dispatching it again.
    pub deduplicate_search_requests: bool,
    /// Whether to automatically acknowledge private messages on receipt.
    pub auto_acknowledge_private_messages: bool,
    /// Whether to automatically acknowledge privilege notifications on
    /// receipt.
    pub auto_acknowledge_privilege_notifications: bool,

    /// How many concurrent uploads any single user may hold.
    pub maximum_concurrent_uploads_per_user: usize,
    /// Global ceiling on concurrent uploads across all users.
    pub maximum_concurrent_uploads: usize,
    /// How long to wait for a `TransferResponse` before giving up.
    pub transfer_response_timeout: Duration,

    /// Default termination policy applied to searches that do not specify
    /// their own.
    pub search_timeout: Duration,
    /// Default cap on collected results per search, if any.
    pub search_max_results: Option<usize>,

    /// Interval the server expects between wishlist search dispatches.
    pub wishlist_interval: Duration,

    /// First token the sequential token generator hands out.
    pub starting_token: u32,

    /// The least severe diagnostic a deployment wants surfaced.
    pub minimum_diagnostic_level: DiagnosticLevel,

    /// Tunables for the server connection.
    pub server_connection_options: ConnectionOptions,
    /// Tunables for outbound peer-message connections.
    pub peer_connection_options: ConnectionOptions,
    /// Tunables for raw transfer connections.
    pub transfer_connection_options: ConnectionOptions,
    /// Tunables for the inbound listener's accepted connections.
    pub incoming_connection_options: ConnectionOptions,
    /// Tunables for distributed-overlay connections.
    pub distributed_connection_options: ConnectionOptions,
}

impl ClientConfig {
    /// Start from sane defaults and override `username`/`password`/`server_addr`.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>, server_addr: SocketAddr) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            server_addr,
            ..Self::default_unset()
        }
    }

    fn default_unset() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            server_addr: "0.0.0.0:0".parse().unwrap(),
            listen_port: 2234,
            enable_listener: true,
            max_frame_size: slsk_core::MAX_FRAME_SIZE,
            message_timeout: Duration::from_secs(30),
            enable_distributed_network: true,
            accept_distributed_children: true,
            distributed_child_limit: 50,
            branch_root_promotion_delay: Duration::from_secs(30),
            accept_private_room_invitations: false,
            deduplicate_search_requests: true,
            auto_acknowledge_private_messages: true,
            auto_acknowledge_privilege_notifications: true,
            maximum_concurrent_uploads_per_user: 1,
            maximum_concurrent_uploads: 10,
            transfer_response_timeout: Duration::from_secs(15),
            search_timeout: Duration::from_secs(15),
            search_max_results: None,
            wishlist_interval: Duration::from_secs(12 * 60),
            starting_token: 1,
            minimum_diagnostic_level: DiagnosticLevel::Info,
            server_connection_options: ConnectionOptions::default(),
            peer_connection_options: ConnectionOptions::default(),
            transfer_connection_options: ConnectionOptions::default(),
            incoming_connection_options: ConnectionOptions::default(),
            distributed_connection_options: ConnectionOptions::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::default_unset()
    }
}
