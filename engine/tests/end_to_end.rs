//! End-to-end scenarios from §8, driving `BackendConnection` over
//! `tokio::io::duplex` stand-ins for the reactor-owned socket, with a
//! recording `Router` and a stub `Authenticator` taking the place of the
//! injected collaborators.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use backend_engine::auth::{AuthenticateResult, Authenticator, ExtractResult};
use backend_engine::connection::BackendConnection;
use backend_engine::error::EngineError;
use backend_engine::pool::PoolReuseAdapter;
use backend_engine::protocol::mysql::constants::CommandCode;
use backend_engine::protocol::mysql::handshake::ServerHandshake;
use backend_engine::router::{ErrorAction, Router, RouterCapabilities};

type TestConn = BackendConnection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

struct StubAuthenticator;

#[async_trait]
impl Authenticator for StubAuthenticator {
    async fn send_credentials(
        &self,
        _handshake: &ServerHandshake,
        _user: &str,
        _password_sha1: Option<&[u8]>,
        _db: Option<&str>,
    ) -> std::io::Result<Vec<u8>> {
        Ok(vec![0xAA])
    }

    fn extract(&self, _buffer: &[u8]) -> ExtractResult {
        ExtractResult::Succeeded
    }

    async fn authenticate(&self, _buffer: &[u8]) -> AuthenticateResult {
        AuthenticateResult::Succeeded
    }
}

#[derive(Default)]
struct RecordingRouter {
    replies: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<(Vec<u8>, ErrorAction)>>,
}

#[async_trait]
impl Router for RecordingRouter {
    fn capabilities(&self) -> RouterCapabilities {
        RouterCapabilities::CONTIGUOUS_OUTPUT
    }

    async fn client_reply(&self, _session_id: u64, buffer: &[u8]) {
        self.replies.lock().unwrap().push(buffer.to_vec());
    }

    async fn handle_error(&self, _session_id: u64, err_buffer: &[u8], action: ErrorAction) -> bool {
        self.errors.lock().unwrap().push((err_buffer.to_vec(), action));
        false
    }
}

fn framed(seq: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut buf = vec![
        (len & 0xff) as u8,
        ((len >> 8) & 0xff) as u8,
        ((len >> 16) & 0xff) as u8,
        seq,
    ];
    buf.extend_from_slice(payload);
    buf
}

/// Builds a handshake v10 payload whose scramble is `scramble`, in the byte
/// layout `decode_server_handshake` expects.
fn handshake_payload(scramble: &[u8; 20]) -> Vec<u8> {
    let mut p = Vec::new();
    p.push(10u8);
    p.extend_from_slice(b"8.0.34-test\0");
    p.extend_from_slice(&7u32.to_le_bytes());
    p.extend_from_slice(&scramble[..8]);
    p.push(0); // filler
    p.extend_from_slice(&0x0080u16.to_le_bytes()); // caps lower
    p.push(45); // charset
    p.extend_from_slice(&2u16.to_le_bytes()); // status flags
    p.extend_from_slice(&0x0008u16.to_le_bytes()); // caps upper
    p.push(21); // auth-plugin-data-len
    p.extend_from_slice(&[0u8; 10]); // reserved
    p.extend_from_slice(&scramble[8..20]);
    p.push(0);
    p.extend_from_slice(b"mysql_native_password\0");
    p
}

async fn read_one_packet<R: tokio::io::AsyncRead + Unpin>(r: &mut R) -> Vec<u8> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header).await.unwrap();
    let len = header[0] as usize | (header[1] as usize) << 8 | (header[2] as usize) << 16;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.unwrap();
    payload
}

fn new_pair() -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(8192)
}

#[tokio::test]
async fn happy_auth_flushes_delay_queue_once() {
    let (client_side, server_side) = new_pair();
    let (mut server_rh, mut server_wh) = split(server_side);
    let (conn_rh, conn_wh) = split(client_side);

    let router = Arc::new(RecordingRouter::default());
    let mut conn: TestConn = BackendConnection::new(
        conn_rh,
        conn_wh,
        Arc::new(StubAuthenticator),
        router.clone(),
        1,
        "alice".to_string(),
        Some([1u8; 20]),
        Some("app".to_string()),
    );

    // Arrives before auth completes: must be queued, not forwarded.
    conn.client_write(vec![9, 9, 9]).await.unwrap();

    let scramble = [5u8; 20];
    let server_task = tokio::spawn(async move {
        server_wh
            .write_all(&framed(0, &handshake_payload(&scramble)))
            .await
            .unwrap();

        let credentials = read_one_packet(&mut server_rh).await;
        assert_eq!(credentials, vec![0xAA]);

        server_wh.write_all(&framed(2, &[0x00, 0, 0])).await.unwrap();

        read_one_packet(&mut server_rh).await
    });

    conn.run_auth_to_completion().await.unwrap();

    let drained = server_task.await.unwrap();
    assert_eq!(drained, vec![9, 9, 9], "delay queue must flush as a single write");
    assert!(router.replies.lock().unwrap().is_empty());
    assert!(router.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn host_blocked_err_notifies_router_and_fails() {
    let (client_side, server_side) = new_pair();
    let (_server_rh, mut server_wh) = split(server_side);
    let (conn_rh, conn_wh) = split(client_side);

    let router = Arc::new(RecordingRouter::default());
    let mut conn: TestConn = BackendConnection::new(
        conn_rh,
        conn_wh,
        Arc::new(StubAuthenticator),
        router.clone(),
        7,
        "bob".to_string(),
        None,
        None,
    );

    let mut err_payload = vec![0xffu8];
    err_payload.extend_from_slice(&1129u16.to_le_bytes());
    server_wh.write_all(&framed(0, &err_payload)).await.unwrap();

    let result = conn.run_auth_to_completion().await;
    assert!(matches!(result, Err(EngineError::HostBlocked)));

    let errors = router.errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    let (packet, action) = &errors[0];
    assert_eq!(*action, ErrorAction::ReplyClient);
    assert_eq!(packet, &EngineError::AuthFailed.to_err_packet(0));
    assert!(router.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn auth_switch_during_change_user_rescrambles_with_new_salt() {
    let (client_side, server_side) = new_pair();
    let (mut server_rh, mut server_wh) = split(server_side);
    let (conn_rh, conn_wh) = split(client_side);

    let router = Arc::new(RecordingRouter::default());
    let mut conn: TestConn = BackendConnection::new(
        conn_rh,
        conn_wh,
        Arc::new(StubAuthenticator),
        router.clone(),
        3,
        "carol".to_string(),
        Some([2u8; 20]),
        None,
    );

    // Fast-forward past the initial handshake so `ignore_reply` is the only
    // thing under test; the connection starts CONNECTED by construction.
    let handshake_scramble = [1u8; 20];
    let server_task = tokio::spawn(async move {
        server_wh
            .write_all(&framed(0, &handshake_payload(&handshake_scramble)))
            .await
            .unwrap();
        let _credentials = read_one_packet(&mut server_rh).await;
        server_wh.write_all(&framed(2, &[0x00, 0, 0])).await.unwrap();
        (server_rh, server_wh)
    });
    conn.run_auth_to_completion().await.unwrap();
    let (mut server_rh, mut server_wh) = server_task.await.unwrap();

    // `begin_change_user` only stages engine-side state (`ignore_reply`,
    // `pending_change_user`, `current_command`) and hands back the framed
    // packet; actually writing it to the backend socket is the external
    // reactor's job (out of scope for this crate, same as `client_write`).
    let new_password_sha1 = [3u8; 20];
    let change_user_bytes = conn.begin_change_user(
        "carol2".to_string(),
        Some(new_password_sha1),
        None,
        45,
    );
    assert_eq!(change_user_bytes[4], CommandCode::ComChangeUser as u8);

    let new_scramble = [9u8; 20];
    let mut switch_payload = vec![0xfeu8];
    switch_payload.extend_from_slice(b"mysql_native_password\0");
    switch_payload.extend_from_slice(&new_scramble);
    server_wh.write_all(&framed(3, &switch_payload)).await.unwrap();

    let progress = conn.on_readable().await.unwrap();
    assert_eq!(progress, backend_engine::connection::Progress::Advanced);

    let response = read_one_packet(&mut server_rh).await;
    let expected =
        backend_engine::auth::scramble::native_password_scramble(&new_password_sha1, &new_scramble);
    assert_eq!(response, expected.to_vec());
    assert_eq!(conn.scramble, new_scramble);
}

#[tokio::test]
async fn pool_handoff_drops_com_quit_without_writing_to_backend() {
    let (client_side, server_side) = new_pair();
    let (mut server_rh, mut server_wh) = split(server_side);
    let (conn_rh, conn_wh) = split(client_side);

    let router = Arc::new(RecordingRouter::default());
    let mut conn: TestConn = BackendConnection::new(
        conn_rh,
        conn_wh,
        Arc::new(StubAuthenticator),
        router,
        9,
        "dave".to_string(),
        None,
        None,
    );

    let handshake_scramble = [4u8; 20];
    let server_task = tokio::spawn(async move {
        server_wh
            .write_all(&framed(0, &handshake_payload(&handshake_scramble)))
            .await
            .unwrap();
        let _credentials = read_one_packet(&mut server_rh).await;
        server_wh.write_all(&framed(2, &[0x00, 0, 0])).await.unwrap();
        (server_rh, server_wh)
    });
    conn.run_auth_to_completion().await.unwrap();
    let (server_rh, server_wh) = server_task.await.unwrap();

    // Connection just drawn from the idle pool: COMPLETE, still polling.
    conn.was_persistent = true;
    let com_quit = vec![1, 0, 0, 0, CommandCode::ComQuit as u8];
    assert!(PoolReuseAdapter::on_first_write(&mut conn, com_quit, "dave", None, None, 45).is_none());
    assert!(!conn.was_persistent);

    // A second, unrelated pool checkout instead gets the synthetic
    // COM_CHANGE_USER to re-stamp the new owner's identity.
    conn.was_persistent = true;
    let first_write = vec![1, 0, 0, 0, CommandCode::ComQuery as u8, b'x'];
    let change_user = PoolReuseAdapter::on_first_write(
        &mut conn,
        first_write.clone(),
        "erin",
        Some(&[6u8; 20]),
        None,
        45,
    )
    .expect("non-quit first write stages a COM_CHANGE_USER");
    assert_eq!(change_user[4], CommandCode::ComChangeUser as u8);
    assert!(!conn.was_persistent);
    assert!(conn.ignore_reply);

    // `on_first_write`'s returned bytes are handed to the external reactor to
    // write to the backend socket, same as `begin_change_user`'s; not this
    // crate's responsibility to transmit, only to stage correctly.
    let _ = (server_rh, server_wh);
}
