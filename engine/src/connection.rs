//! §4.3 connection state machine and reactor contract, grounded directly on
//! `gw_read_backend_event` / `gw_write_backend_event` / `gw_error_backend_event`
//! / `gw_backend_hangup` / `gw_backend_close` / `gw_read_and_write` in
//! `mysql_backend.c`. The five reactor callbacks return 0/1 in the original;
//! here they are `async fn`s so the owning task can `.await` the underlying
//! non-blocking socket operation exactly once per callback, matching the
//! teacher's one-poll-per-epoll-event connection tasks.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::auth::driver::{AuthDriver, AuthState, DriverOutcome};
use crate::auth::scramble::native_password_scramble;
use crate::auth::Authenticator;
use crate::error::EngineError;
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::{parse_auth_switch_request, Packet, ReplyKind};
use crate::resultset::{ResultSetAggregator, Step as ResultSetStep};
use crate::router::{ErrorAction, Router, RouterCapabilities};
use crate::server::ServerConfig;
use crate::session::{SessionHandle, SessionState};
use crate::sescmd::{SessionCommandReassembler, Step};

/// §4.3 progress codes standing in for the original's 0/1 reactor return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NoEvent,
    Advanced,
}

pub struct BackendConnection<R, W> {
    reader: PacketReader<R>,
    writer: PacketWriter<W>,

    router: Arc<dyn Router>,
    auth: AuthDriver,
    sescmd: SessionCommandReassembler,
    resultset: ResultSetAggregator,

    /// §4.3.a step 4 gating: the client-facing session this connection's
    /// replies are delivered to. Defaults to router-ready/polling/auth-complete
    /// so connections not wired to a real session (pool-manager `create()`,
    /// unit tests) behave exactly as before this field existed.
    pub session: SessionHandle,

    session_id: u64,
    pub user: String,
    pub password_sha1: Option<[u8; 20]>,
    pub db: Option<String>,
    pub scramble: [u8; 20],
    /// §3 "the negotiated character set ... copied from the corresponding
    /// client-side connection when the session was opened".
    pub charset: u16,

    /// §3 connection fields exercised by the pool re-use adapter.
    pub polling: bool,
    pub ignore_reply: bool,
    pub stored_query: Option<Vec<u8>>,
    pub current_command: Option<CommandCode>,
    pub was_persistent: bool,

    /// §3 "delay queue": bytes the client wrote before auth completed,
    /// drained in one write on the transition to `COMPLETE` (§4.2, §8
    /// invariant 2).
    delay_queue: Vec<u8>,

    /// §4.4 "archive the command from the per-connection command log".
    pub command_log: Vec<CommandCode>,

    /// §4.6 credentials awaiting commit once the backend acks the synthetic
    /// `COM_CHANGE_USER` this engine forwarded on the client's behalf.
    pending_change_user: Option<PendingChangeUser>,

    deprecate_eof: bool,

    /// §7 "put the server into maintenance mode": shared with the owning
    /// pool manager so a host-blocked auth failure on any one connection to
    /// this server is visible to every other connection/checkout attempt.
    /// `None` for connections not drawn from a pool (e.g. in unit tests).
    server: Option<Arc<Mutex<ServerConfig>>>,
}

struct PendingChangeUser {
    user: String,
    password_sha1: Option<[u8; 20]>,
    db: Option<String>,
}

impl<R, W> BackendConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        read_half: R,
        write_half: W,
        authenticator: Arc<dyn Authenticator>,
        router: Arc<dyn Router>,
        session_id: u64,
        user: String,
        password_sha1: Option<[u8; 20]>,
        db: Option<String>,
    ) -> Self {
        let mut auth = AuthDriver::new(authenticator);
        // By the time a `BackendConnection` exists the transport-level
        // connect already completed (tokio's `TcpStream::connect` only
        // resolves once established); there is no non-blocking
        // `PENDING_CONNECT` window to observe here, so the driver starts
        // straight in `CONNECTED`.
        auth.on_connect_started(false);
        Self {
            reader: PacketReader::new(read_half),
            writer: PacketWriter::new(write_half),
            router,
            auth,
            sescmd: SessionCommandReassembler::default(),
            resultset: ResultSetAggregator::default(),
            // Connections constructed outside a real session owner (the pool
            // manager's `create()`, unit/integration tests) start router-ready
            // so replies flow exactly as they did before `session` existed;
            // callers that own a real session flip these fields as the
            // client side's own state changes.
            session: SessionHandle {
                id: session_id,
                state: SessionState::RouterReady,
                client_polling: true,
                client_auth_complete: true,
            },
            session_id,
            user,
            password_sha1,
            db,
            scramble: [0u8; 20],
            charset: 0,
            polling: true,
            ignore_reply: false,
            stored_query: None,
            current_command: None,
            was_persistent: false,
            delay_queue: Vec::new(),
            command_log: Vec::new(),
            pending_change_user: None,
            deprecate_eof: true,
            server: None,
        }
    }

    /// Attaches the `ServerConfig` this connection is backed by, so a
    /// host-blocked auth failure can mark it into maintenance (§7). Called
    /// by the pool manager right after construction.
    pub fn set_server(&mut self, server: Arc<Mutex<ServerConfig>>) {
        self.server = Some(server);
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        self.auth.authenticator()
    }

    pub fn archive_command(&mut self, cmd: CommandCode) {
        self.command_log.push(cmd);
    }

    /// §3 "delay queue": a client write that arrives while auth is still in
    /// flight is appended here instead of going to the socket; once auth
    /// reaches `COMPLETE` the whole queue is flushed as a single write
    /// (§4.2, §8 invariant 2 / "happy auth" scenario). Writes observed after
    /// `COMPLETE` go straight to the socket.
    ///
    /// §4.5 "during the ignore-reply interval, further writes are appended
    /// to `stored_query`": a write that arrives while a pool-reuse/change-user
    /// exchange is still in flight never reaches the backend socket directly,
    /// except `COM_QUIT`, which triggers a fake hangup immediately instead of
    /// being queued behind a reply that will never come.
    pub async fn client_write(&mut self, bytes: Vec<u8>) -> Result<(), EngineError> {
        if self.auth.state != AuthState::Complete {
            self.delay_queue.extend_from_slice(&bytes);
            return Ok(());
        }
        if self.ignore_reply {
            if bytes.first() == Some(&(CommandCode::ComQuit as u8)) {
                return Err(self.fake_hangup_as(EngineError::Hangup).await);
            }
            match &mut self.stored_query {
                Some(stored) => stored.extend_from_slice(&bytes),
                None => self.stored_query = Some(bytes),
            }
            return Ok(());
        }
        // §4.4: a fresh client command that needs its reply shape captured
        // verbatim (INIT_DB, SET NAMES as COM_QUERY, STMT_PREPARE, ...) is
        // recognized off its command byte so `on_readable` knows to route
        // the reply through the reassembler instead of forwarding it as-is.
        if !self.sescmd.is_in_progress() && !self.resultset.is_in_progress() {
            self.current_command = bytes
                .first()
                .and_then(|&b| num_traits::FromPrimitive::from_u8(b))
                .filter(|cmd| cmd.is_session_command() || cmd.expects_resultset());
        }
        self.writer.write_payload(&bytes);
        self.writer
            .end_packet()
            .await
            .map_err(|_| EngineError::SocketError)
    }

    #[cfg(test)]
    pub fn delay_queue_len(&self) -> usize {
        self.delay_queue.len()
    }

    async fn drain_delay_queue(&mut self) -> Result<(), EngineError> {
        if self.delay_queue.is_empty() {
            return Ok(());
        }
        let bytes = std::mem::take(&mut self.delay_queue);
        self.writer.write_payload(&bytes);
        self.writer
            .end_packet()
            .await
            .map_err(|_| EngineError::SocketError)
    }

    /// §4.6 step 4: build and stage the synthetic `COM_CHANGE_USER` the
    /// engine forwards to the backend on the client's behalf. The new
    /// credentials only take effect once the backend's own OK arrives, at
    /// which point `deliver_complete_reply` commits them; per the resolved
    /// open question this implementation never assumes success up front.
    pub fn begin_change_user(
        &mut self,
        user: String,
        password_sha1: Option<[u8; 20]>,
        db: Option<String>,
        charset: u16,
    ) -> Vec<u8> {
        use crate::protocol::mysql::packet::writers::build_com_change_user;

        let change_user = build_com_change_user(
            &user,
            password_sha1.as_ref().map(|s| s.as_slice()),
            &self.scramble,
            db.as_deref(),
            charset,
        );
        self.ignore_reply = true;
        self.current_command = Some(CommandCode::ComChangeUser);
        self.pending_change_user = Some(PendingChangeUser {
            user,
            password_sha1,
            db,
        });
        change_user
    }

    /// §5 "shared resources": a connection may return to the pool only when
    /// it is idle, COMPLETE, with no stored query, no ignore_reply, and
    /// nothing queued in the reassembler or delay queue.
    pub fn ready_for_pool(&self) -> bool {
        self.auth.state == AuthState::Complete
            && !self.ignore_reply
            && self.stored_query.is_none()
            && self.delay_queue.is_empty()
            && !self.sescmd.is_in_progress()
            && !self.resultset.is_in_progress()
    }

    /// Drives the handshake through to COMPLETE or a terminal failure,
    /// blocking the caller (used by the pool manager's `create()`, which is
    /// already async and off the client's own reactor).
    pub async fn run_auth_to_completion(&mut self) -> Result<(), EngineError> {
        loop {
            if self.auth.state == AuthState::Complete {
                return Ok(());
            }
            let packet = self.reader.next_packet().await.map_err(|_| EngineError::ReadFailed)?;
            let Some(packet) = packet else {
                return Err(EngineError::ReadFailed);
            };
            let outcome = self
                .auth
                .on_readable(
                    &packet,
                    &self.user,
                    self.password_sha1.as_deref(),
                    self.db.as_deref(),
                )
                .await;
            if let DriverOutcome::Advanced(AuthState::ResponseSent) = &outcome {
                if let Some(scramble) = self.auth.take_server_scramble() {
                    self.scramble = scramble;
                }
                if let Some(handshake) = self.auth.take_pending_response() {
                    self.writer.write_payload(&handshake);
                    self.writer.end_packet().await.map_err(|_| EngineError::SocketError)?;
                }
            }
            if self.auth.state == AuthState::Complete {
                common::metrics::record_auth_outcome("succeeded");
                self.drain_delay_queue().await?;
            }
            if let DriverOutcome::AuthFailed(_, err) = outcome {
                return Err(self.fail_auth(err).await);
            }
        }
    }

    /// §4.2 "on entry to FAILED or HANDSHAKE_FAILED": notify the router with
    /// the synthetic "Authentication with backend failed..." packet and
    /// `REPLY_CLIENT`, recording the auth-outcome metric. The caller still
    /// gets back the original, specifically-classified `EngineError` (e.g.
    /// `HostBlocked`, `AccessDenied`) so it can apply the §7 side effects
    /// (maintenance marking, user-list refresh) that live outside this
    /// engine.
    async fn fail_auth(&mut self, err: EngineError) -> EngineError {
        common::metrics::record_auth_outcome("failed");
        if err == EngineError::HostBlocked {
            if let Some(server) = &self.server {
                warn!(session_id = self.session_id, "backend server blocking connections, marking in maintenance");
                server.lock().unwrap().mark_maintenance();
            }
        }
        let err_packet = EngineError::AuthFailed.to_err_packet(0);
        self.router
            .handle_error(self.session_id, &err_packet, ErrorAction::ReplyClient)
            .await;
        self.session.mark_stopping();
        err
    }

    /// §4.3.a `gw_read_backend_event`: drain every complete packet the
    /// reactor's wakeup made available, reassemble a complete session-command
    /// or result-set reply if one is in flight, then route it.
    pub async fn on_readable(&mut self) -> Result<Progress, EngineError> {
        if self.auth.state != AuthState::Complete {
            return self.on_readable_during_auth().await;
        }

        let packets = self
            .reader
            .read_available()
            .await
            .map_err(|_| EngineError::ReadFailed)?;
        if packets.is_empty() {
            return Ok(Progress::NoEvent);
        }

        let caps = self.router.capabilities();
        // §4.3.a step 2 "STMT_OUTPUT/ignore_reply": dispatch one packet at a
        // time, which is what `route_one_packet` does below regardless of
        // branch; ignore_reply always takes this path too since step 3 only
        // knows how to classify a single reply.
        let per_packet_dispatch = self.ignore_reply || caps.contains(RouterCapabilities::STMT_OUTPUT);

        let resultset_tracked = !per_packet_dispatch
            && caps.contains(RouterCapabilities::RESULTSET_OUTPUT)
            && self.current_command.map(|cmd| cmd.expects_resultset()).unwrap_or(false);

        if !per_packet_dispatch && !resultset_tracked && caps.contains(RouterCapabilities::CONTIGUOUS_OUTPUT) {
            // §4.3.a step 2 "coalesce into one buffer": every packet already
            // drained for this wakeup is one reply, delivered as a single
            // buffer. Concatenating owned byte vectors cannot itself fail,
            // so there is no fatal-coalesce-failure branch to implement.
            let mut buffer = Vec::with_capacity(packets.iter().map(|p| p.payload.len() + 4).sum());
            for packet in &packets {
                buffer.extend_from_slice(&packet.to_framed_bytes());
            }
            self.deliver_complete_reply(buffer).await?;
            return Ok(Progress::Advanced);
        }

        for packet in packets {
            self.route_one_packet(packet, resultset_tracked).await?;
        }
        Ok(Progress::Advanced)
    }

    /// Routes one already-framed complete packet: into the result-set
    /// aggregator, the session-command reassembler, or straight through as a
    /// single-packet reply, per §4.4/§4.3.a step 2.
    async fn route_one_packet(&mut self, packet: Packet, resultset_tracked: bool) -> Result<(), EngineError> {
        if resultset_tracked {
            if !self.resultset.is_in_progress() && !ResultSetAggregator::begins_resultset(&packet.payload) {
                // Bare OK/ERR reply to a query that returned no rows.
                self.deliver_complete_reply(packet.to_framed_bytes()).await?;
                return Ok(());
            }
            let framed = packet.to_framed_bytes();
            match self.resultset.feed(&packet, &framed, self.deprecate_eof) {
                ResultSetStep::NeedMore => {}
                ResultSetStep::Complete(full) => {
                    common::metrics::record_resultset_complete();
                    self.deliver_complete_reply(full).await?;
                }
            }
            return Ok(());
        }

        // §4.4 only tracks commands whose reply shape must be captured
        // verbatim; a reply to anything else is delivered as the single
        // already-framed packet handed back.
        let tracked_cmd = self.current_command.filter(|cmd| cmd.is_session_command());
        let Some(cmd) = tracked_cmd else {
            self.deliver_complete_reply(packet.to_framed_bytes()).await?;
            return Ok(());
        };

        let slab = packet.to_framed_bytes();
        if !self.sescmd.is_in_progress() {
            let count = crate::sescmd::expected_packet_count(cmd, &packet.payload, self.deprecate_eof);
            self.sescmd.begin(count);
        }

        match self.sescmd.feed(&slab) {
            Step::NeedMore(_) => Ok(()),
            Step::Complete(full) => {
                self.archive_command(cmd);
                common::metrics::record_sescmd_complete();
                self.deliver_complete_reply(full).await?;
                Ok(())
            }
        }
    }

    async fn on_readable_during_auth(&mut self) -> Result<Progress, EngineError> {
        let packet = self.reader.next_packet().await.map_err(|_| EngineError::ReadFailed)?;
        let Some(packet) = packet else {
            return Err(EngineError::ReadFailed);
        };
        let outcome = self
            .auth
            .on_readable(&packet, &self.user, self.password_sha1.as_deref(), self.db.as_deref())
            .await;

        match outcome {
            DriverOutcome::Advanced(AuthState::ResponseSent) => {
                if let Some(handshake) = self.auth.take_pending_response() {
                    self.writer.write_payload(&handshake);
                    self.writer.end_packet().await.map_err(|_| EngineError::SocketError)?;
                }
                if let Some(scramble) = self.auth.take_server_scramble() {
                    self.scramble = scramble;
                }
                Ok(Progress::Advanced)
            }
            DriverOutcome::Advanced(AuthState::Complete) => {
                debug!(session_id = self.session_id, "backend auth complete");
                common::metrics::record_auth_outcome("succeeded");
                self.drain_delay_queue().await?;
                Ok(Progress::Advanced)
            }
            DriverOutcome::Advanced(_) => Ok(Progress::Advanced),
            DriverOutcome::AuthFailed(_, err) => {
                warn!(session_id = self.session_id, "backend auth failed: {err}");
                Err(self.fail_auth(err).await)
            }
        }
    }

    /// §4.3.a step 4: "session-command-or-single-packet delivery" gated on
    /// the session being router-ready, the client still polling, and the
    /// client having completed its own auth. "If the session cannot accept,
    /// free the packet."
    async fn deliver_complete_reply(&mut self, buffer: Vec<u8>) -> Result<(), EngineError> {
        self.current_command = None;

        if self.ignore_reply {
            return self.handle_ignore_reply(buffer).await;
        }

        if self.router.capabilities().contains(RouterCapabilities::NO_RSESSION) {
            return Ok(());
        }
        if !self.session.ok_to_route() {
            debug!(session_id = self.session_id, "session not ready to route, dropping reply");
            return Ok(());
        }
        self.router.client_reply(self.session_id, &buffer).await;
        Ok(())
    }

    /// §4.3.a step 3: dispatch the single reply kept while `ignore_reply` is
    /// set, covering the OK / auth-switch / ERR branches.
    async fn handle_ignore_reply(&mut self, buffer: Vec<u8>) -> Result<(), EngineError> {
        let Ok((_, first)) = crate::protocol::mysql::packet::frame_next(&buffer) else {
            return Err(self.fake_hangup_as(EngineError::Protocol).await);
        };

        match first.classify() {
            ReplyKind::Ok => {
                self.ignore_reply = false;
                if let Some(pending) = self.pending_change_user.take() {
                    self.user = pending.user;
                    self.password_sha1 = pending.password_sha1;
                    self.db = pending.db;
                    self.router.client_reply(self.session_id, &buffer).await;
                    return Ok(());
                }
                if let Some(query) = self.stored_query.take() {
                    self.writer.write_payload(&query);
                    self.writer.end_packet().await.map_err(|_| EngineError::SocketError)?;
                }
                Ok(())
            }
            ReplyKind::AuthSwitchRequest => {
                let Some(switch) = parse_auth_switch_request(&first.payload) else {
                    return Err(self.fake_hangup_as(EngineError::Protocol).await);
                };
                if !switch.plugin_name.is_empty()
                    && switch.plugin_name != crate::protocol::mysql::constants::DEFAULT_AUTH_PLUGIN
                {
                    warn!(
                        session_id = self.session_id,
                        plugin = %switch.plugin_name,
                        "backend requested unsupported auth plugin during ignore-reply, giving up"
                    );
                    return Err(self.fake_hangup_as(EngineError::PostPoolResetFailed).await);
                }
                self.scramble = switch.scramble;
                let password_sha1 = self
                    .pending_change_user
                    .as_ref()
                    .and_then(|p| p.password_sha1);
                let response = match password_sha1 {
                    Some(pw) => native_password_scramble(&pw, &self.scramble).to_vec(),
                    None => Vec::new(),
                };
                self.writer.write_payload(&response);
                self.writer.end_packet().await.map_err(|_| EngineError::SocketError)?;
                // ignore_reply stays set; the next readable event delivers
                // the server's verdict on this new response.
                Ok(())
            }
            ReplyKind::Err => {
                warn!(session_id = self.session_id, "backend rejected COM_CHANGE_USER reset");
                self.router
                    .handle_error(self.session_id, &buffer, ErrorAction::ReplyClient)
                    .await;
                self.pending_change_user = None;
                self.stored_query = None;
                Err(self.fake_hangup_as(EngineError::PostPoolResetFailed).await)
            }
            ReplyKind::Eof | ReplyKind::Other => {
                Err(self.fake_hangup_as(EngineError::Protocol).await)
            }
        }
    }

    /// §7 "a fake hangup is the engine's standard way to force the reactor
    /// to re-enter on the hangup path and thus converge on the same teardown
    /// logic": run the same notification `on_hangup` does, but let the
    /// caller see the originating error kind.
    async fn fake_hangup_as(&mut self, err: EngineError) -> EngineError {
        self.on_hangup().await;
        err
    }

    /// §4.3.b `gw_write_backend_event`: flush anything pending now that the
    /// backend socket reports writable again.
    pub async fn on_writable(&mut self) -> Result<Progress, EngineError> {
        match self.auth.on_writable() {
            DriverOutcome::Advanced(_) => Ok(Progress::Advanced),
            DriverOutcome::AuthFailed(_, err) => Err(err),
        }
    }

    /// §4.3.c `gw_error_backend_event`: a connection error was reported by
    /// the reactor; classify it per §7 and hand it to the router. When the
    /// owning session is a *dummy* one with no pooled backing, the
    /// connection is simply torn down rather than handed to the router.
    pub async fn on_error(&mut self, err: EngineError, session_dummy: bool) -> Progress {
        if session_dummy && !self.was_persistent {
            self.polling = false;
            return Progress::Advanced;
        }
        if !self.polling {
            return Progress::NoEvent;
        }
        error!(session_id = self.session_id, "backend connection error: {err}");
        let err_packet = err.to_err_packet(0);
        let recovered = self
            .router
            .handle_error(self.session_id, &err_packet, ErrorAction::NewConnection)
            .await;
        self.polling = false;
        if recovered {
            Progress::Advanced
        } else {
            self.session.mark_stopping();
            Progress::NoEvent
        }
    }

    /// §4.3.d `gw_backend_hangup`. Hangups on a connection drawn from the
    /// persistent pool are expected during recycling and are suppressed.
    pub async fn on_hangup(&mut self) -> Progress {
        self.polling = false;
        if self.was_persistent {
            debug!(session_id = self.session_id, "persistent-pool hangup suppressed");
            return Progress::Advanced;
        }
        warn!(session_id = self.session_id, "backend hung up");
        let err_packet = EngineError::Hangup.to_err_packet(0);
        self.router
            .handle_error(self.session_id, &err_packet, ErrorAction::NewConnection)
            .await;
        Progress::Advanced
    }

    /// §4.3.e `gw_backend_close`: emit `COM_QUIT`, flush best-effort, and
    /// report whether the owning (stopping) session should close its client
    /// side too.
    pub async fn on_close(&mut self, session_stopping: bool) -> Progress {
        self.polling = false;
        self.writer.write_payload(&[CommandCode::ComQuit as u8]);
        let _ = self.writer.end_packet().await;
        let _ = self.writer.flush_all().await;
        if session_stopping {
            debug!(session_id = self.session_id, "session stopping, closing client side too");
        }
        Progress::Advanced
    }
}
