//! Fixed message codes, partitioned by channel.
//!
//! Server and peer channels use 4-byte codes; the distributed channel uses
//! 1-byte codes. These are the codes this core covers — a production
//! deployment will see codes this list does not enumerate on the wire, and
//! an unrecognized code is simply not dispatched (it is not an error).

/// Server message codes (4-byte).
pub mod server {
    /// Login request/response.
    pub const LOGIN: u32 = 1;
    /// Server invites the client to dial a peer (NAT traversal).
    pub const CONNECT_TO_PEER: u32 = 18;
    /// Resolve a peer's listening endpoint.
    pub const GET_PEER_ADDRESS: u32 = 3;
    /// Add a user to the watch list.
    pub const ADD_USER: u32 = 5;
    /// Query privilege status.
    pub const CHECK_PRIVILEGES: u32 = 92;
    /// Minimum parent speed for distributed-overlay candidacy.
    pub const PARENT_MIN_SPEED: u32 = 83;
    /// Ratio controlling parent-speed advertisement.
    pub const PARENT_SPEED_RATIO: u32 = 84;
    /// Interval, in seconds, between wishlist searches.
    pub const WISHLIST_INTERVAL: u32 = 104;
    /// Candidate parents for the distributed overlay.
    pub const NET_INFO: u32 = 102;
    /// Private message delivery.
    pub const PRIVATE_MESSAGE: u32 = 22;
    /// Acknowledge a private message.
    pub const ACKNOWLEDGE_PRIVATE_MESSAGE: u32 = 23;
    /// Keepalive.
    pub const PING: u32 = 32;
    /// Full room listing.
    pub const ROOM_LIST: u32 = 64;
    /// Join a room.
    pub const JOIN_ROOM: u32 = 14;
    /// Leave a room.
    pub const LEAVE_ROOM: u32 = 15;
    /// Room chat message.
    pub const ROOM_MESSAGE: u32 = 13;
    /// Network-wide search.
    pub const SEARCH_REQUEST: u32 = 26;
    /// Room-scoped search.
    pub const ROOM_SEARCH_REQUEST: u32 = 120;
    /// User-scoped search.
    pub const USER_SEARCH_REQUEST: u32 = 42;
    /// Wishlist search.
    pub const WISHLIST_SEARCH_REQUEST: u32 = 103;
    /// The server kicked this client (duplicate login elsewhere).
    pub const KICKED: u32 = 41;
    /// Declare the client's listening port.
    pub const SET_LISTEN_PORT: u32 = 2;
    /// Toggle acceptance of private room invitations.
    pub const PRIVATE_ROOM_TOGGLE: u32 = 141;
    /// Distributed-overlay status advertisement.
    pub const HAVE_NO_PARENT: u32 = 71;
}

/// Peer message codes (4-byte).
pub mod peer {
    /// Handshake: announce (username, connection type, token) on a fresh socket.
    pub const PEER_INIT: u32 = 0x0100;
    /// Handshake: announce a token on a server-invited connection.
    pub const PIERCE_FIREWALL: u32 = 0x0101;
    /// Request a peer's shared folder listing.
    pub const BROWSE_REQUEST: u32 = 4;
    /// Response carrying a peer's shared folder listing.
    pub const BROWSE_RESPONSE: u32 = 5;
    /// Request the contents of one folder.
    pub const FOLDER_CONTENTS_REQUEST: u32 = 36;
    /// Response carrying one folder's contents.
    pub const FOLDER_CONTENTS_RESPONSE: u32 = 37;
    /// Request a peer's client info.
    pub const INFO_REQUEST: u32 = 15;
    /// Response carrying a peer's client info.
    pub const INFO_RESPONSE: u32 = 16;
    /// Query queue position for a file.
    pub const PLACE_IN_QUEUE_REQUEST: u32 = 51;
    /// Response carrying a queue position.
    pub const PLACE_IN_QUEUE_RESPONSE: u32 = 52;
    /// Request or offer a file transfer.
    pub const TRANSFER_REQUEST: u32 = 40;
    /// Reply to a transfer request.
    pub const TRANSFER_RESPONSE: u32 = 41;
    /// Notify the peer an upload attempt failed.
    pub const UPLOAD_FAILED: u32 = 46;
    /// Notify the peer an upload was denied.
    pub const UPLOAD_DENIED: u32 = 50;
    /// Search results delivered directly peer-to-peer.
    pub const SEARCH_RESPONSE: u32 = 9;
}

/// Distributed channel message codes (1-byte).
pub mod distributed {
    /// Advertise `(have_parent, parent_speed_ratio)`.
    pub const BRANCH_LEVEL: u32 = 4;
    /// Advertise the branch root's username.
    pub const BRANCH_ROOT: u32 = 5;
    /// A forwarded search request.
    pub const SEARCH_REQUEST: u32 = 3;
    /// Child-to-parent status advertisement.
    pub const SERVER_SEARCH_REQUEST: u32 = 93;
}
