//! The client facade: owns one server session and wires the
//! rest of the workspace's subsystems together behind a single handle.

use crate::collab::{
    ClientInfo, ClientInfoProvider, FolderContentsProvider, PerUserSlotAwaiter, QueueResolver, SharedFileProvider,
    SharedFolder, SlotAwaiter,
};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::session::{LoginResult, ServerSession};
use crate::tokens::TokenGenerator;
use crate::transfer_wire::{
    decode_transfer_request, decode_transfer_response, encode_transfer_request, encode_transfer_response,
    TransferDirection, TransferRequest, TransferResponse,
};
use slsk_core::codes::{peer, server};
use slsk_core::framing;
use slsk_core::state::{ClientState, StateMachine};
use slsk_core::waiter::WaitError;
use slsk_core::{Frame, WaitKey, Waiter};
use slsk_distributed::DistributedOverlay;
use slsk_net::{
    pierce_firewall, read_handshake, ConnectionType, EndpointCache, HandshakeOutcome, PeerConnection,
    PeerConnectionManager,
};
use slsk_search::{
    decode_search_response, normalize_query, FileEntry, SearchCoordinator, SearchScope, TerminationPolicy,
};
use slsk_transfer::{socket, ChunkContext, DownloadSession, Governor, TransferRegistry, UploadSession};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

/// Sentinel wait-code used only for handing a freshly accepted raw
/// transfer socket from the listener task to whichever side (an inbound
/// upload offer, or an outbound dial) is waiting for it. Distinct from
/// every real wire message code so it can share the same [`Waiter`]
/// instance as ordinary correlated waits without ever colliding.
const TRANSFER_SOCKET_WAIT_CODE: u32 = u32::MAX;

fn transfer_socket_key(token: u32) -> WaitKey {
    WaitKey::code(TRANSFER_SOCKET_WAIT_CODE).with_int(i64::from(token))
}

/// The top-level handle a caller holds for one Soulseek session.
///
/// Cheap to clone: every field is itself a handle (`Arc`, channel sender,
/// or lock-guarded state) shared across clones, matching the sharing style
/// of [`PeerConnectionManager`] and [`DistributedOverlay`].
#[derive(Clone)]
pub struct SoulseekClient {
    config: Arc<ClientConfig>,
    state: Arc<StateMachine>,
    session: Arc<RwLock<Option<Arc<ServerSession>>>>,
    peers: Arc<PeerConnectionManager>,
    overlay: DistributedOverlay,
    search: SearchCoordinator,
    downloads: Arc<TransferRegistry<DownloadSession>>,
    uploads: Arc<TransferRegistry<UploadSession>>,
    governor: Arc<dyn Governor>,
    events: broadcast::Sender<ClientEvent>,
    waiter: Arc<Waiter>,
    tokens: Arc<TokenGenerator>,
    per_user_uploads: Arc<PerUserSlotAwaiter>,
    slot_awaiter: Arc<dyn SlotAwaiter>,
    upload_semaphore: Arc<Semaphore>,
    shared_files: Option<Arc<dyn SharedFileProvider>>,
    folder_contents: Option<Arc<dyn FolderContentsProvider>>,
    client_info: Option<Arc<dyn ClientInfoProvider>>,
    queue_resolver: Option<Arc<dyn QueueResolver>>,
}

impl SoulseekClient {
    /// Build a client around `config`, resolving peer endpoints through
    /// `endpoint_cache`, pacing transfers through `governor`, and layering
    /// `slot_awaiter` on top of the per-user and global upload admission
    /// caps this facade enforces internally.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        endpoint_cache: Arc<dyn EndpointCache>,
        governor: Arc<dyn Governor>,
        slot_awaiter: Arc<dyn SlotAwaiter>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(1024);
        let overlay = DistributedOverlay::new(
            config.username.clone(),
            config.branch_root_promotion_delay,
            config.distributed_child_limit,
        );
        let username = config.username.clone();
        let waiter = Arc::new(Waiter::new(config.message_timeout));
        let tokens = Arc::new(TokenGenerator::new(config.starting_token));
        let per_user_uploads = Arc::new(PerUserSlotAwaiter::new(config.maximum_concurrent_uploads_per_user));
        let upload_semaphore = Arc::new(Semaphore::new(config.maximum_concurrent_uploads));
        Self {
            config: Arc::new(config),
            state: Arc::new(StateMachine::new()),
            session: Arc::new(RwLock::new(None)),
            peers: Arc::new(PeerConnectionManager::new(username, endpoint_cache)),
            overlay,
            search: SearchCoordinator::new(),
            downloads: Arc::new(TransferRegistry::new()),
            uploads: Arc::new(TransferRegistry::new()),
            governor,
            events,
            waiter,
            tokens,
            per_user_uploads,
            slot_awaiter,
            upload_semaphore,
            shared_files: None,
            folder_contents: None,
            client_info: None,
            queue_resolver: None,
        }
    }

    /// Answer inbound `BrowseRequest`s with `provider`.
    #[must_use]
    pub fn with_shared_files(mut self, provider: Arc<dyn SharedFileProvider>) -> Self {
        self.shared_files = Some(provider);
        self
    }

    /// Answer inbound `FolderContentsRequest`s with `provider`.
    #[must_use]
    pub fn with_folder_contents(mut self, provider: Arc<dyn FolderContentsProvider>) -> Self {
        self.folder_contents = Some(provider);
        self
    }

    /// Answer inbound `InfoRequest`s with `provider`.
    #[must_use]
    pub fn with_client_info(mut self, provider: Arc<dyn ClientInfoProvider>) -> Self {
        self.client_info = Some(provider);
        self
    }

    /// Answer inbound `PlaceInQueueRequest`s with `resolver`.
    #[must_use]
    pub fn with_queue_resolver(mut self, resolver: Arc<dyn QueueResolver>) -> Self {
        self.queue_resolver = Some(resolver);
        self
    }

    /// Subscribe to this client's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Current connection lifecycle state.
    pub async fn state(&self) -> ClientState {
        self.state.current().await
    }

    /// The distributed-overlay handle, for inspecting tree position or
    /// subscribing to its events directly.
    #[must_use]
    pub fn overlay(&self) -> &DistributedOverlay {
        &self.overlay
    }

    /// The peer-connection manager, for operations that need a direct
    /// connection to a specific user.
    #[must_use]
    pub fn peers(&self) -> &PeerConnectionManager {
        &self.peers
    }

    /// Dial the server, run the login handshake, send the post-login
    /// status frames, and spawn the background tasks that dispatch
    /// inbound server and (if enabled) listener traffic.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::LoginRejected`] if the server rejects the
    /// credentials, or [`ClientError::Net`] on a connection failure.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.transition_state(ClientState::CONNECTING, "dialing server").await;

        let connect_result =
            ServerSession::connect(self.config.server_addr, &self.config.username, &self.config.password).await;
        let (session, outcome, extra_frames) = match connect_result {
            Ok(triple) => triple,
            Err(e) => {
                self.transition_state(ClientState::DISCONNECTED, "connect failed").await;
                let _ = self.events.send(ClientEvent::Disconnected {
                    reason: Some(e.to_string()),
                });
                return Err(e);
            }
        };
        self.transition_state(ClientState::CONNECTED, "tcp connected").await;

        match outcome {
            LoginResult::Success { greeting, .. } => {
                self.transition_state(ClientState::LOGGING_IN, "login accepted").await;
                *self.session.write().await = Some(Arc::new(session));
                self.transition_state(ClientState::LOGGED_IN, "session ready").await;
                let _ = self.events.send(ClientEvent::Connected { greeting });

                self.post_login_handshake().await?;

                self.spawn_dispatch_loop();
                if self.config.enable_listener {
                    self.spawn_listener();
                }

                for frame in extra_frames {
                    self.dispatch_server_frame(frame).await;
                }

                Ok(())
            }
            LoginResult::Failure { reason } => {
                self.transition_state(ClientState::DISCONNECTED, "login rejected").await;
                let _ = self.events.send(ClientEvent::Disconnected {
                    reason: Some(reason.clone()),
                });
                Err(ClientError::LoginRejected(reason))
            }
        }
    }

    async fn transition_state(&self, next: ClientState, reason: &'static str) {
        let previous = self.state.transition(next).await;
        if previous != next {
            let _ = self.events.send(ClientEvent::StateChanged {
                previous,
                current: next,
                reason,
            });
        }
    }

    /// Declare our listening port and private-room preference, and push an
    /// initial distributed-network status update, in that order — the
    /// sequence the server expects immediately after a successful login.
    async fn post_login_handshake(&self) -> Result<(), ClientError> {
        let session = self.require_session().await?;

        session
            .send(server::SET_LISTEN_PORT, &(u32::from(self.config.listen_port)).to_le_bytes())
            .await?;

        session
            .send(server::PRIVATE_ROOM_TOGGLE, &[u8::from(self.config.accept_private_room_invitations)])
            .await?;

        session
            .send(server::HAVE_NO_PARENT, &[u8::from(self.overlay.is_branch_root())])
            .await?;

        Ok(())
    }

    async fn require_session(&self) -> Result<Arc<ServerSession>, ClientError> {
        self.session.read().await.clone().ok_or(ClientError::NotLoggedIn)
    }

    fn spawn_dispatch_loop(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let session = {
                    let guard = client.session.read().await;
                    guard.clone()
                };
                let Some(session) = session else { break };

                match session.recv().await {
                    Ok(frame) => client.dispatch_server_frame(frame).await,
                    Err(_) => {
                        *client.session.write().await = None;
                        client.transition_state(ClientState::DISCONNECTED, "server connection lost").await;
                        let _ = client.events.send(ClientEvent::Disconnected { reason: None });
                        client.overlay.reset().await;
                        break;
                    }
                }
            }
        });
    }

    async fn dispatch_server_frame(&self, frame: Frame) {
        match frame.code {
            server::KICKED => self.handle_kicked().await,
            server::CONNECT_TO_PEER => {
                if let Some((username, ip, port, token)) = parse_connect_to_peer(&frame.payload) {
                    tracing::debug!(%username, %port, %token, "server invited a connect-to-peer dial");
                    self.handle_connect_to_peer(username, ip, port, token).await;
                }
            }
            other => {
                tracing::trace!(code = other, "unhandled server frame");
            }
        }
    }

    async fn handle_kicked(&self) {
        *self.session.write().await = None;
        self.transition_state(ClientState::DISCONNECTED, "kicked by server").await;
        self.search.cancel_all();
        for download in self.downloads.drain() {
            let _ = download.cancel().await;
        }
        for upload in self.uploads.drain() {
            let _ = upload.cancel().await;
        }
        self.overlay.reset().await;
        let _ = self.events.send(ClientEvent::Kicked);
        let _ = self.events.send(ClientEvent::Disconnected {
            reason: Some("kicked".into()),
        });
    }

    async fn handle_connect_to_peer(&self, username: String, ip: Ipv4Addr, port: u16, token: u32) {
        let client = self.clone();
        tokio::spawn(async move {
            let addr = SocketAddr::new(std::net::IpAddr::V4(ip), port);
            let mut stream = match TcpStream::connect(addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(%username, %addr, error = %e, "connect-to-peer dial failed");
                    return;
                }
            };
            if let Err(e) = pierce_firewall(&mut stream, token).await {
                tracing::debug!(%username, error = %e, "pierce_firewall failed");
                return;
            }
            let connection = PeerConnection::new(stream, username.clone(), ConnectionType::PeerToPeer);
            let handle = client.peers.register_incoming(username.clone(), connection);
            client.spawn_peer_dispatch_loop(username, handle);
        });
    }

    fn spawn_listener(&self) {
        let client = self.clone();
        let port = self.config.listen_port;
        tokio::spawn(async move {
            let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to bind listener; remote-invited peers cannot reach this client");
                    return;
                }
            };
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let client = client.clone();
                        tokio::spawn(async move { client.classify_incoming(stream, addr).await });
                    }
                    Err(e) => tracing::debug!(error = %e, "listener accept failed"),
                }
            }
        });
    }

    async fn classify_incoming(&self, mut stream: TcpStream, addr: SocketAddr) {
        let outcome = match read_handshake(&mut stream).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(%addr, error = %e, "rejected handshake on incoming connection");
                return;
            }
        };

        match outcome {
            HandshakeOutcome::DirectInit {
                username,
                connection_type,
                token,
            } => match connection_type {
                ConnectionType::PeerToPeer => {
                    let connection = PeerConnection::new(stream, username.clone(), connection_type);
                    let handle = self.peers.register_incoming(username.clone(), connection);
                    self.spawn_peer_dispatch_loop(username, handle);
                }
                ConnectionType::FileTransfer => {
                    self.waiter.complete(&transfer_socket_key(token), stream);
                }
                ConnectionType::Distributed => {
                    if self.config.accept_distributed_children {
                        let connection = PeerConnection::new(stream, username.clone(), connection_type);
                        if let Err(e) = self.overlay.add_child(username, connection) {
                            tracing::debug!(%addr, error = %e, "rejected distributed child");
                        }
                    }
                }
            },
            HandshakeOutcome::PierceFirewall { token } => {
                self.waiter.complete(&transfer_socket_key(token), stream);
            }
        }
    }

    fn spawn_peer_dispatch_loop(&self, username: String, connection: Arc<tokio::sync::Mutex<PeerConnection>>) {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let frame = {
                    let mut guard = connection.lock().await;
                    guard.recv().await
                };
                match frame {
                    Ok(frame) => client.dispatch_peer_frame(&username, frame).await,
                    Err(e) => {
                        tracing::debug!(%username, error = %e, "peer connection closed");
                        client.peers.remove(&username);
                        break;
                    }
                }
            }
        });
    }

    async fn dispatch_peer_frame(&self, username: &str, frame: Frame) {
        match frame.code {
            peer::SEARCH_RESPONSE => match decode_search_response(&frame.payload) {
                Ok((token, result)) => {
                    self.search.record_result(token, result.clone());
                    let _ = self.events.send(ClientEvent::SearchResult { token, result });
                    if let Some(session) = self.search.get(token) {
                        if session.is_done() {
                            let _ = self.events.send(ClientEvent::SearchCompleted { token });
                        }
                    }
                }
                Err(e) => tracing::debug!(%username, error = %e, "malformed search response"),
            },
            peer::TRANSFER_RESPONSE => match decode_transfer_response(&frame.payload) {
                Ok(response) => {
                    let key = WaitKey::code(peer::TRANSFER_RESPONSE).with_int(i64::from(response.token));
                    if response.allowed {
                        self.waiter.complete(&key, response);
                    } else {
                        let reason = response.reason.unwrap_or_else(|| "rejected".into());
                        self.waiter.throw(&key, reason);
                    }
                }
                Err(e) => tracing::debug!(%username, error = %e, "malformed transfer response"),
            },
            peer::TRANSFER_REQUEST => match decode_transfer_request(&frame.payload) {
                Ok(request) => self.handle_incoming_transfer_request(username.to_string(), request).await,
                Err(e) => tracing::debug!(%username, error = %e, "malformed transfer request"),
            },
            peer::BROWSE_REQUEST => self.handle_browse_request(username).await,
            peer::FOLDER_CONTENTS_REQUEST => self.handle_folder_contents_request(username, &frame.payload).await,
            peer::INFO_REQUEST => self.handle_info_request(username).await,
            peer::PLACE_IN_QUEUE_REQUEST => self.handle_place_in_queue_request(username, &frame.payload).await,
            other => tracing::trace!(code = other, %username, "unhandled peer frame"),
        }
    }

    async fn handle_incoming_transfer_request(&self, username: String, request: TransferRequest) {
        match request.direction {
            TransferDirection::Download => {
                // No shared-file byte source is wired to this client (only
                // the metadata-level browse/folder-contents resolvers
                // exist), so every inbound pull request is declined.
                self.reply_transfer_response(&username, request.token, false, None, Some("not shared".into()))
                    .await;
            }
            TransferDirection::Upload => {
                let size = request.size.unwrap_or(0);
                let download = Arc::new(DownloadSession::new(request.token, username.clone(), request.filename.clone(), size));
                if let Err(e) = self.downloads.insert(request.token, &username, &request.filename, download.clone()) {
                    tracing::debug!(%username, error = %e, "could not track inbound upload offer");
                    self.reply_transfer_response(&username, request.token, false, None, Some(e.to_string())).await;
                    return;
                }
                let _ = download.mark_requested().await;
                self.reply_transfer_response(&username, request.token, true, Some(size), None).await;

                let client = self.clone();
                let token = request.token;
                tokio::spawn(async move {
                    let cancel = CancellationToken::new();
                    match client.waiter.wait_indefinitely::<TcpStream>(transfer_socket_key(token), cancel).await {
                        Ok(stream) => client.run_download_loop(stream, download, size).await,
                        Err(e) => {
                            download.fail(e.to_string()).await;
                            let _ = client.downloads.remove(token);
                        }
                    }
                });
            }
        }
    }

    async fn reply_transfer_response(
        &self,
        username: &str,
        token: u32,
        allowed: bool,
        size: Option<u64>,
        reason: Option<String>,
    ) {
        let response = TransferResponse {
            token,
            allowed,
            size,
            reason,
        };
        let payload = encode_transfer_response(&response);
        if let Err(e) = self.send_peer_frame(username, peer::TRANSFER_RESPONSE, &payload).await {
            tracing::debug!(%username, error = %e, "failed to send transfer response");
        }
    }

    async fn send_peer_frame(&self, username: &str, code: u32, payload: &[u8]) -> Result<(), ClientError> {
        let connection = self.peers.get_or_dial(username).await?;
        let mut guard = connection.lock().await;
        guard.send(code, payload).await?;
        Ok(())
    }

    /// The raw socket side every downloader runs, regardless of which side
    /// physically dialed it: send the zero-byte resume offset, then read
    /// chunks until the declared size is reached.
    async fn run_download_loop(&self, mut stream: TcpStream, download: Arc<DownloadSession>, total_size: u64) {
        if let Err(e) = socket::send_offset(&mut stream, 0).await {
            download.fail(e.to_string()).await;
            let _ = self.downloads.remove(download.token());
            return;
        }
        let _ = download.mark_in_progress(0).await;

        let cancel = CancellationToken::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match socket::read_chunk(&mut stream, &mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.finish_download(&download, Err(e.to_string())).await;
                    return;
                }
            };
            let transferred = match download.append(&buf[..n]).await {
                Ok(transferred) => transferred,
                Err(e) => {
                    self.finish_download(&download, Err(e.to_string())).await;
                    return;
                }
            };
            let _ = self.events.send(ClientEvent::DownloadProgress {
                token: download.token(),
                transferred,
                total: total_size,
            });
            self.governor
                .throttle(
                    ChunkContext {
                        token: download.token(),
                        bytes_this_chunk: n,
                        bytes_transferred: transferred,
                        total_size,
                    },
                    &cancel,
                )
                .await;
            if transferred >= total_size {
                break;
            }
        }

        let _ = download.complete().await;
        self.finish_download(&download, Ok(())).await;
    }

    async fn finish_download(&self, download: &Arc<DownloadSession>, result: Result<(), String>) {
        if let Err(ref reason) = result {
            download.fail(reason.clone()).await;
        }
        let _ = self.downloads.remove(download.token());
        let _ = self.events.send(ClientEvent::DownloadFinished {
            token: download.token(),
            result,
        });
    }

    /// Request `filename` from `username`: allocate a token, negotiate the
    /// transfer on the peer-message channel, and drive the raw socket to
    /// completion in a background task once the remote accepts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] if no server session is
    /// active, [`ClientError::Rejected`] if the remote declines, or
    /// [`ClientError::Timeout`] if it never responds.
    pub async fn download(&self, username: &str, filename: &str) -> Result<u32, ClientError> {
        self.require_session().await?;
        let token = self.tokens.next();
        let download = Arc::new(DownloadSession::new(token, username, filename, 0));
        self.downloads.insert(token, username, filename, download.clone())?;

        let request = TransferRequest {
            direction: TransferDirection::Download,
            token,
            filename: filename.to_string(),
            size: None,
        };
        if let Err(e) = self
            .send_peer_frame(username, peer::TRANSFER_REQUEST, &encode_transfer_request(&request))
            .await
        {
            let _ = self.downloads.remove(token);
            return Err(e);
        }

        let key = WaitKey::code(peer::TRANSFER_RESPONSE).with_int(i64::from(token));
        let response = match self.waiter.wait::<TransferResponse>(key, Some(self.config.transfer_response_timeout)).await {
            Ok(response) => response,
            Err(e) => {
                let _ = self.downloads.remove(token);
                return Err(map_wait_error(e));
            }
        };

        let size = response.size.unwrap_or(0);
        let _ = download.mark_requested().await;

        let peers = self.peers.clone();
        let username_owned = username.to_string();
        let client = self.clone();
        tokio::spawn(async move {
            match peers.dial_transfer(&username_owned, token).await {
                Ok(conn) => client.run_download_loop(conn.into_raw(), download, size).await,
                Err(e) => {
                    download.fail(e.to_string()).await;
                    let _ = client.downloads.remove(token);
                }
            }
        });

        Ok(token)
    }

    /// The raw socket side every uploader runs, regardless of which side
    /// physically dialed it: read the resume offset the remote requests,
    /// then write chunks of `data` starting there.
    async fn run_upload_loop(&self, mut stream: TcpStream, upload: Arc<UploadSession>, data: Vec<u8>, username: String) {
        let offset = match socket::recv_offset(&mut stream).await {
            Ok(offset) => offset,
            Err(e) => {
                self.finish_upload(&upload, &username, Err(e.to_string())).await;
                return;
            }
        };
        let _ = upload.mark_in_progress(offset).await;

        let total = upload.size();
        let cancel = CancellationToken::new();
        let mut sent = offset;
        let mut cursor = offset as usize;
        const CHUNK: usize = 64 * 1024;
        while cursor < data.len() {
            let end = (cursor + CHUNK).min(data.len());
            let chunk = &data[cursor..end];
            if let Err(e) = socket::write_chunk(&mut stream, chunk).await {
                self.finish_upload(&upload, &username, Err(e.to_string())).await;
                return;
            }
            sent += chunk.len() as u64;
            cursor = end;
            let _ = upload.advance(chunk.len() as u64).await;
            let _ = self.events.send(ClientEvent::UploadProgress {
                token: upload.token(),
                transferred: sent,
                total,
            });
            self.governor
                .throttle(
                    ChunkContext {
                        token: upload.token(),
                        bytes_this_chunk: chunk.len(),
                        bytes_transferred: sent,
                        total_size: total,
                    },
                    &cancel,
                )
                .await;
        }

        let _ = upload.complete().await;
        self.finish_upload(&upload, &username, Ok(())).await;
    }

    async fn finish_upload(&self, upload: &Arc<UploadSession>, username: &str, result: Result<(), String>) {
        if let Err(ref reason) = result {
            upload.fail(reason.clone()).await;
        }
        let _ = self.uploads.remove(upload.token());
        self.release_upload_admission(username, upload.filename()).await;
        let _ = self.events.send(ClientEvent::UploadFinished {
            token: upload.token(),
            result,
        });
    }

    async fn release_upload_admission(&self, username: &str, filename: &str) {
        self.slot_awaiter.slot_released(username, filename).await;
        self.per_user_uploads.slot_released(username, filename).await;
    }

    /// Offer `data` as `filename` to `username`, passing it through the
    /// three admission layers (per-user cap, external [`SlotAwaiter`],
    /// global cap) before negotiating and running the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] if no server session is
    /// active, [`ClientError::Rejected`] if the remote declines, or
    /// [`ClientError::Timeout`] if it never responds.
    pub async fn upload(&self, username: &str, filename: &str, data: Vec<u8>) -> Result<u32, ClientError> {
        self.require_session().await?;

        self.per_user_uploads.await_slot(username, filename).await?;
        if let Err(e) = self.slot_awaiter.await_slot(username, filename).await {
            self.per_user_uploads.slot_released(username, filename).await;
            return Err(e);
        }
        let global_permit = self
            .upload_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("upload semaphore is never closed");

        let size = data.len() as u64;
        let token = self.tokens.next();
        let upload = Arc::new(UploadSession::new(token, username, filename, size));
        if let Err(e) = self.uploads.insert(token, username, filename, upload.clone()) {
            self.release_upload_admission(username, filename).await;
            return Err(e.into());
        }

        let request = TransferRequest {
            direction: TransferDirection::Upload,
            token,
            filename: filename.to_string(),
            size: Some(size),
        };
        if let Err(e) = self
            .send_peer_frame(username, peer::TRANSFER_REQUEST, &encode_transfer_request(&request))
            .await
        {
            let _ = self.uploads.remove(token);
            self.release_upload_admission(username, filename).await;
            return Err(e);
        }

        let key = WaitKey::code(peer::TRANSFER_RESPONSE).with_int(i64::from(token));
        if let Err(e) = self.waiter.wait::<TransferResponse>(key, Some(self.config.transfer_response_timeout)).await {
            let _ = self.uploads.remove(token);
            self.release_upload_admission(username, filename).await;
            return Err(map_wait_error(e));
        }
        let _ = upload.mark_requested().await;

        let peers = self.peers.clone();
        let username_owned = username.to_string();
        let filename_owned = filename.to_string();
        let client = self.clone();
        tokio::spawn(async move {
            let _global_permit = global_permit;
            match peers.dial_transfer(&username_owned, token).await {
                Ok(conn) => client.run_upload_loop(conn.into_raw(), upload, data, username_owned).await,
                Err(e) => {
                    upload.fail(e.to_string()).await;
                    let _ = client.uploads.remove(token);
                    client.release_upload_admission(&username_owned, &filename_owned).await;
                }
            }
        });

        Ok(token)
    }

    async fn handle_browse_request(&self, username: &str) {
        let Some(provider) = self.shared_files.clone() else { return };
        let folders = provider.browse().await;
        let payload = encode_browse_response(&folders);
        if let Err(e) = self.send_peer_frame(username, peer::BROWSE_RESPONSE, &payload).await {
            tracing::debug!(%username, error = %e, "failed to send browse response");
        }
    }

    async fn handle_folder_contents_request(&self, username: &str, payload: &[u8]) {
        let Some(provider) = self.folder_contents.clone() else { return };
        let Ok((folder, _)) = framing::read_string(payload) else { return };
        let contents = provider.folder_contents(&folder).await;
        let response = encode_folder_contents_response(&folder, contents.as_ref());
        if let Err(e) = self.send_peer_frame(username, peer::FOLDER_CONTENTS_RESPONSE, &response).await {
            tracing::debug!(%username, error = %e, "failed to send folder contents response");
        }
    }

    async fn handle_info_request(&self, username: &str) {
        let Some(provider) = self.client_info.clone() else { return };
        let info = provider.client_info().await;
        let payload = encode_info_response(&info);
        if let Err(e) = self.send_peer_frame(username, peer::INFO_RESPONSE, &payload).await {
            tracing::debug!(%username, error = %e, "failed to send info response");
        }
    }

    async fn handle_place_in_queue_request(&self, username: &str, payload: &[u8]) {
        let Some(resolver) = self.queue_resolver.clone() else { return };
        let Ok((filename, _)) = framing::read_string(payload) else { return };
        let position = resolver.place_in_queue(username, &filename).await;
        let response = encode_place_in_queue_response(&filename, position);
        if let Err(e) = self.send_peer_frame(username, peer::PLACE_IN_QUEUE_RESPONSE, &response).await {
            tracing::debug!(%username, error = %e, "failed to send place-in-queue response");
        }
    }

    /// Dispatch a search under a freshly allocated sequential token and
    /// begin collecting results, using the client's configured default
    /// termination policy. For [`SearchScope::User`] this sends one
    /// `UserSearchRequest` frame per username rather than a single frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotLoggedIn`] if no server session is
    /// active, or [`ClientError::Search`] if the query has no terms left
    /// after normalization.
    pub async fn search(&self, query: &str, scope: SearchScope) -> Result<u32, ClientError> {
        let session = self.require_session().await?;
        let normalized = normalize_query(query)?;

        let policy = TerminationPolicy {
            max_results: self.config.search_max_results,
            timeout: self.config.search_timeout,
        };
        let token = loop {
            let candidate = self.tokens.next();
            match self.search.start(candidate, normalized.clone(), scope.clone(), policy) {
                Ok(_) => break candidate,
                Err(slsk_search::SearchError::DuplicateToken(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        let targets = scope.targets();
        if targets.is_empty() {
            let mut payload = Vec::new();
            payload.extend_from_slice(&token.to_le_bytes());
            if let Some(target) = scope.target() {
                framing::write_string(&mut payload, target);
            }
            framing::write_string(&mut payload, &normalized);
            session.send(scope.message_code(), &payload).await?;
        } else {
            for username in targets {
                let mut payload = Vec::new();
                framing::write_string(&mut payload, username);
                payload.extend_from_slice(&token.to_le_bytes());
                framing::write_string(&mut payload, &normalized);
                session.send(scope.message_code(), &payload).await?;
            }
        }

        Ok(token)
    }

    /// The search coordinator, for polling or awaiting a specific search's
    /// results directly.
    #[must_use]
    pub fn search_coordinator(&self) -> &SearchCoordinator {
        &self.search
    }

    /// The download registry.
    #[must_use]
    pub fn downloads(&self) -> &TransferRegistry<DownloadSession> {
        &self.downloads
    }

    /// The upload registry.
    #[must_use]
    pub fn uploads(&self) -> &TransferRegistry<UploadSession> {
        &self.uploads
    }

    /// The per-chunk transfer throttle collaborator.
    #[must_use]
    pub fn governor(&self) -> &Arc<dyn Governor> {
        &self.governor
    }
}

fn map_wait_error(e: WaitError) -> ClientError {
    match e {
        WaitError::Timeout => ClientError::Timeout,
        WaitError::Cancelled => ClientError::Cancelled,
        WaitError::Thrown(reason) => ClientError::Rejected(reason),
    }
}

fn parse_connect_to_peer(payload: &[u8]) -> Option<(String, Ipv4Addr, u16, u32)> {
    let (username, rest) = framing::read_string(payload).ok()?;
    // Skip the connection-type string (e.g. "P"/"F"/"D") to reach the
    // fixed-width fields; server `ConnectToPeer` frames list it between
    // the username and the address.
    let (_conn_type, rest) = framing::read_string(rest).ok()?;
    if rest.len() < 10 {
        return None;
    }
    let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
    let port = u16::from_le_bytes([rest[4], rest[5]]);
    let token = u32::from_le_bytes([rest[6], rest[7], rest[8], rest[9]]);
    Some((username, ip, port, token))
}

fn encode_file_entry(payload: &mut Vec<u8>, file: &FileEntry) {
    framing::write_string(payload, &file.filename);
    payload.extend_from_slice(&file.size.to_le_bytes());
    framing::write_string(payload, &file.extension);
    payload.extend_from_slice(&(file.attributes.len() as u32).to_le_bytes());
    for (kind, value) in &file.attributes {
        payload.extend_from_slice(&kind.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
    }
}

fn encode_shared_folder(payload: &mut Vec<u8>, folder: &SharedFolder) {
    framing::write_string(payload, &folder.name);
    payload.extend_from_slice(&(folder.files.len() as u32).to_le_bytes());
    for file in &folder.files {
        encode_file_entry(payload, file);
    }
}

fn encode_browse_response(folders: &[SharedFolder]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(folders.len() as u32).to_le_bytes());
    for folder in folders {
        encode_shared_folder(&mut payload, folder);
    }
    payload
}

fn encode_folder_contents_response(folder: &str, contents: Option<&SharedFolder>) -> Vec<u8> {
    let mut payload = Vec::new();
    framing::write_string(&mut payload, folder);
    match contents {
        Some(folder) => {
            payload.push(1);
            encode_shared_folder(&mut payload, folder);
        }
        None => payload.push(0),
    }
    payload
}

fn encode_info_response(info: &ClientInfo) -> Vec<u8> {
    let mut payload = Vec::new();
    framing::write_string(&mut payload, &info.description);
    match &info.picture {
        Some(bytes) => {
            payload.push(1);
            payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            payload.extend_from_slice(bytes);
        }
        None => payload.push(0),
    }
    payload.extend_from_slice(&info.upload_speed.to_le_bytes());
    payload.extend_from_slice(&info.queue_length.to_le_bytes());
    payload
}

fn encode_place_in_queue_response(filename: &str, position: Option<u32>) -> Vec<u8> {
    let mut payload = Vec::new();
    framing::write_string(&mut payload, filename);
    match position {
        Some(pos) => {
            payload.push(1);
            payload.extend_from_slice(&pos.to_le_bytes());
        }
        None => payload.push(0),
    }
    payload
}
