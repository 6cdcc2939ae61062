//! Session endpoint: host/joiner roles, the TCP state machine, and the
//! connected read loop that dispatches frames to an injected event sink.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout as with_timeout;
use tracing::{debug, info, warn};

use crate::code::PairCode;
use crate::error::{Error, Result};
use crate::heartbeat::{HeartbeatSupervisor, LivenessClock};
use crate::protocol::{
    read_frame_with_timeout, write_frame, DisconnectPayload, FileInfoPayload, HeartbeatPayload,
    Message, PairAcceptPayload, PairRejectPayload, PairRequestPayload, ReconnectPayload,
};
use crate::trust::TrustStore;

const READ_POLL: Duration = Duration::from_secs(1);

/// Callbacks a [`Connected`] session's read loop reports into. All methods
/// have empty default bodies so a consumer only overrides what it cares
/// about.
pub trait SessionEventSink: Send + Sync {
    /// The handshake completed and the session is connected to `peer_hostname`.
    fn on_connected(&self, _peer_hostname: &str) {}
    /// The session has torn down, orderly or not.
    fn on_disconnected(&self) {}
    /// The peer announced an incoming file.
    fn on_file_info(&self, _info: FileInfoPayload) {}
    /// The peer sent one chunk of file data.
    fn on_file_data(&self, _chunk_index: u32, _data: Vec<u8>) {}
    /// A chunk was accepted into the active receive; `received`/`total` are
    /// the chunk counts so far, out of the transfer's total chunk count.
    fn on_progress(&self, _received: usize, _total: u32) {}
    /// The peer asked for a file listing. Reserved: no component currently
    /// originates this request.
    fn on_file_list_request(&self) {}
    /// The peer sent a file listing. Reserved: no component currently acts
    /// on this beyond the informational callback.
    fn on_file_list(&self, _files: Vec<String>) {}
    /// The peer acknowledged a chunk (informational; not required for progress).
    fn on_ack(&self, _chunk_index: u32, _success: bool) {}
    /// The peer asked to resume a transfer it already has some chunks of.
    fn on_resume(&self, _file_hash: String, _received_chunks: Vec<u32>, _device_id: String) {}
    /// The peer told us which chunks it still needs after a resume request.
    fn on_resume_ok(&self, _file_hash: String, _needed_chunks: Vec<u32>) {}
    /// A transfer finished, successfully or not.
    fn on_complete(&self, _file_hash: String, _success: bool) {}
    /// An out-of-band error was reported, by the peer or by the loop itself.
    fn on_error(&self, _message: String) {}
}

/// Serializes writes to a session's TCP socket so the heartbeat
/// supervisor and a transfer task never interleave partial frames.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl FrameWriter {
    fn new(write_half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(write_half)),
        }
    }

    /// Send a single frame, holding the writer lock for its duration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let mut guard = self.inner.lock().await;
        write_frame(&mut *guard, message).await
    }
}

/// A live, handshaken session, ready to run its read loop.
pub struct Connected {
    /// The peer's advertised hostname.
    pub peer_hostname: String,
    /// The peer's socket address.
    pub peer_addr: SocketAddr,
    /// The peer's device id, if known (present after a trusted reconnect,
    /// or when the caller supplied one for a fresh pairing).
    pub peer_device_id: Option<String>,
    read_half: OwnedReadHalf,
    writer: FrameWriter,
}

impl Connected {
    /// A cloneable handle for sending frames on this session.
    #[must_use]
    pub fn writer(&self) -> FrameWriter {
        self.writer.clone()
    }

    /// Run the connected-state read loop until orderly `Disconnect`, EOF,
    /// or a read error. Spawns and tears down a [`HeartbeatSupervisor`]
    /// for the duration. Always calls `sink.on_disconnected()` on exit,
    /// after calling `sink.on_connected()` at the start.
    ///
    /// # Errors
    ///
    /// Returns the error that broke the loop, if it was not an orderly
    /// `Disconnect`.
    pub async fn run<S: SessionEventSink + 'static>(
        mut self,
        sink: Arc<S>,
        max_payload: u32,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Result<()> {
        sink.on_connected(&self.peer_hostname);

        let clock = LivenessClock::new();
        let writer_for_heartbeat = self.writer.clone();
        let running = Arc::new(AtomicBool::new(true));
        let running_for_heartbeat = Arc::clone(&running);

        let heartbeat = HeartbeatSupervisor::spawn(
            clock.clone(),
            heartbeat_interval,
            heartbeat_timeout,
            move || {
                let writer = writer_for_heartbeat.clone();
                async move {
                    writer
                        .send(&Message::Heartbeat(HeartbeatPayload {
                            timestamp: chrono::Utc::now().timestamp(),
                        }))
                        .await
                        .is_ok()
                }
            },
            move || {
                running_for_heartbeat.store(false, Ordering::SeqCst);
            },
        );

        let result = self.read_loop(&sink, max_payload, &running, &clock).await;
        heartbeat.stop();
        sink.on_disconnected();
        result
    }

    async fn read_loop<S: SessionEventSink + 'static>(
        &mut self,
        sink: &Arc<S>,
        max_payload: u32,
        running: &Arc<AtomicBool>,
        clock: &LivenessClock,
    ) -> Result<()> {
        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(Error::HeartbeatTimeout(0));
            }

            match read_frame_with_timeout(&mut self.read_half, max_payload, READ_POLL).await {
                Ok(Message::Heartbeat(_)) => {
                    clock.note_response();
                    continue;
                }
                Ok(Message::FileInfo(info)) => sink.on_file_info(info),
                Ok(Message::FileData(index, bytes)) => sink.on_file_data(index, bytes),
                Ok(Message::FileAck(ack)) => sink.on_ack(ack.chunk_index, ack.success),
                Ok(Message::FileAckBatch(batch)) => {
                    for index in batch.chunk_indices {
                        sink.on_ack(index, true);
                    }
                }
                Ok(Message::FileResume(resume)) => {
                    sink.on_resume(resume.file_hash, resume.received_chunks, resume.device_id);
                }
                Ok(Message::FileResumeOk(ok)) => {
                    sink.on_resume_ok(ok.file_hash, ok.needed_chunks);
                }
                Ok(Message::FileComplete(complete)) => {
                    sink.on_complete(complete.file_hash, complete.success);
                }
                Ok(Message::FileError(err)) => sink.on_error(err.error),
                Ok(Message::Disconnect(_)) => return Ok(()),
                Ok(Message::FileListRequest(_)) => sink.on_file_list_request(),
                Ok(Message::FileListResponse(resp)) => sink.on_file_list(resp.files),
                Ok(other @ (Message::PairRequest(_)
                | Message::PairAccept(_)
                | Message::PairReject(_)
                | Message::Reconnect(_))) => {
                    warn!(?other, "unexpected handshake frame mid-session, ignoring");
                }
                Err(Error::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Send an orderly `Disconnect` frame. The read loop (if still
    /// running) will observe EOF or the peer's own `Disconnect` shortly
    /// after, or the caller may simply drop this handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.writer
            .send(&Message::Disconnect(DisconnectPayload::default()))
            .await
    }
}

/// The listening half of a session: accepts an incoming TCP connection
/// and drives the host side of the pairing/reconnect handshake.
pub struct Host {
    device_id: String,
    hostname: String,
    trust: Arc<StdMutex<TrustStore>>,
    max_payload: u32,
    handshake_timeout: Duration,
}

impl Host {
    /// Build a host endpoint bound to a device identity and trust store.
    #[must_use]
    pub fn new(
        device_id: String,
        hostname: String,
        trust: Arc<StdMutex<TrustStore>>,
        max_payload: u32,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            device_id,
            hostname,
            trust,
            max_payload,
            handshake_timeout,
        }
    }

    /// Handshake an already-accepted socket. `expected_code` is the
    /// current one-shot pair code (ignored for `Reconnect` attempts).
    /// `known_peer_device_id`, if given, is recorded as the new peer's
    /// identity on a successful fresh pairing (the wire `PairRequest`
    /// payload itself carries no device id).
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeRejected`] or [`Error::NotTrusted`] if the
    /// handshake fails; propagates I/O and timeout errors.
    pub async fn accept(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        expected_code: &PairCode,
        known_peer_device_id: Option<&str>,
    ) -> Result<Connected> {
        let (mut read_half, write_half) = stream.into_split();
        let writer = FrameWriter::new(write_half);

        let first = read_frame_with_timeout(&mut read_half, self.max_payload, self.handshake_timeout)
            .await?;

        match first {
            Message::PairRequest(PairRequestPayload { pair_code, hostname }) => {
                let offered = PairCode::parse(&pair_code).ok();
                let accepted = offered.is_some_and(|c| expected_code.matches(c.as_str()));
                if !accepted {
                    writer
                        .send(&Message::PairReject(PairRejectPayload {
                            reason: "配对码错误".to_string(),
                        }))
                        .await?;
                    return Err(Error::HandshakeRejected("配对码错误".to_string()));
                }

                if let Some(device_id) = known_peer_device_id {
                    let mut trust = self.trust.lock().unwrap();
                    trust.add(device_id, &hostname, peer_addr.ip())?;
                }

                writer
                    .send(&Message::PairAccept(PairAcceptPayload {
                        hostname: self.hostname.clone(),
                    }))
                    .await?;

                info!(%peer_addr, %hostname, "pairing accepted");
                Ok(Connected {
                    peer_hostname: hostname,
                    peer_addr,
                    peer_device_id: known_peer_device_id.map(str::to_string),
                    read_half,
                    writer,
                })
            }
            Message::Reconnect(ReconnectPayload { device_id, hostname }) => {
                let trusted = {
                    let mut trust = self.trust.lock().unwrap();
                    let is_trusted = trust.is_trusted(&device_id);
                    if is_trusted {
                        trust.touch(&device_id, Some(peer_addr.ip()))?;
                    }
                    is_trusted
                };

                if !trusted {
                    let reason = "设备未受信任…".to_string();
                    writer
                        .send(&Message::PairReject(PairRejectPayload {
                            reason: reason.clone(),
                        }))
                        .await?;
                    return Err(Error::NotTrusted(device_id));
                }

                writer
                    .send(&Message::PairAccept(PairAcceptPayload {
                        hostname: self.hostname.clone(),
                    }))
                    .await?;

                info!(%peer_addr, %device_id, "reconnect accepted");
                Ok(Connected {
                    peer_hostname: hostname,
                    peer_addr,
                    peer_device_id: Some(device_id),
                    read_half,
                    writer,
                })
            }
            other => {
                debug!(?other, "unexpected first frame, closing");
                Err(Error::HandshakeRejected(
                    "expected PairRequest or Reconnect as first frame".to_string(),
                ))
            }
        }
    }

    /// This host's own device id, echoed into accepted reconnects' logs.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Dial `addr`, aborting with [`Error::Timeout`] if the connection does not
/// complete within `connect_timeout`.
async fn dial(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    match with_timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(connected) => Ok(connected?),
        Err(_) => Err(Error::Timeout(connect_timeout.as_secs())),
    }
}

/// The dialing half of a session: connects out to a host and drives the
/// joiner side of the pairing/reconnect handshake.
pub struct Joiner {
    device_id: String,
    hostname: String,
    trust: Arc<StdMutex<TrustStore>>,
    max_payload: u32,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl Joiner {
    /// Build a joiner endpoint bound to a device identity and trust store.
    #[must_use]
    pub fn new(
        device_id: String,
        hostname: String,
        trust: Arc<StdMutex<TrustStore>>,
        max_payload: u32,
        connect_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            device_id,
            hostname,
            trust,
            max_payload,
            connect_timeout,
            handshake_timeout,
        }
    }

    /// Dial `addr` and offer `pair_code`. On `PairAccept`, records the
    /// server as trusted (when `known_peer_device_id` is given) and
    /// returns a connected session. On `PairReject`, propagates the
    /// reason as [`Error::HandshakeRejected`].
    ///
    /// # Errors
    ///
    /// Returns an error if the dial, handshake I/O, or rejection fails.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        pair_code: &PairCode,
        known_peer_device_id: Option<&str>,
    ) -> Result<Connected> {
        let stream = dial(addr, self.connect_timeout).await?;
        let (mut read_half, write_half) = stream.into_split();
        let writer = FrameWriter::new(write_half);

        writer
            .send(&Message::PairRequest(PairRequestPayload {
                pair_code: pair_code.as_str().to_string(),
                hostname: self.hostname.clone(),
            }))
            .await?;

        let reply = read_frame_with_timeout(&mut read_half, self.max_payload, self.handshake_timeout)
            .await?;

        match reply {
            Message::PairAccept(PairAcceptPayload { hostname }) => {
                if let Some(device_id) = known_peer_device_id {
                    let mut trust = self.trust.lock().unwrap();
                    trust.add(device_id, &hostname, addr.ip())?;
                }
                info!(%addr, %hostname, "pairing succeeded");
                Ok(Connected {
                    peer_hostname: hostname,
                    peer_addr: addr,
                    peer_device_id: known_peer_device_id.map(str::to_string),
                    read_half,
                    writer,
                })
            }
            Message::PairReject(PairRejectPayload { reason }) => {
                Err(Error::HandshakeRejected(reason))
            }
            _ => Err(Error::HandshakeRejected(
                "unexpected reply to PairRequest".to_string(),
            )),
        }
    }

    /// Dial `addr` as an already-trusted device, skipping the pair code.
    ///
    /// # Errors
    ///
    /// Returns an error if the dial, handshake I/O, or rejection fails.
    pub async fn reconnect(&self, addr: SocketAddr) -> Result<Connected> {
        let stream = dial(addr, self.connect_timeout).await?;
        let (mut read_half, write_half) = stream.into_split();
        let writer = FrameWriter::new(write_half);

        writer
            .send(&Message::Reconnect(ReconnectPayload {
                device_id: self.device_id.clone(),
                hostname: self.hostname.clone(),
            }))
            .await?;

        let reply = read_frame_with_timeout(&mut read_half, self.max_payload, self.handshake_timeout)
            .await?;

        match reply {
            Message::PairAccept(PairAcceptPayload { hostname }) => {
                let mut trust = self.trust.lock().unwrap();
                trust.touch(&self.device_id, Some(addr.ip())).ok();
                drop(trust);
                info!(%addr, "reconnected");
                Ok(Connected {
                    peer_hostname: hostname,
                    peer_addr: addr,
                    peer_device_id: None,
                    read_half,
                    writer,
                })
            }
            Message::PairReject(PairRejectPayload { reason }) => {
                Err(Error::HandshakeRejected(reason))
            }
            _ => Err(Error::HandshakeRejected(
                "unexpected reply to Reconnect".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutexAlias;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct RecordingSink {
        calls: StdMutexAlias<Vec<String>>,
    }

    impl SessionEventSink for RecordingSink {
        fn on_connected(&self, peer_hostname: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("connected:{peer_hostname}"));
        }
        fn on_disconnected(&self) {
            self.calls.lock().unwrap().push("disconnected".to_string());
        }
        fn on_file_info(&self, info: FileInfoPayload) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("file_info:{}", info.filename));
        }
    }

    fn trust_store(dir: &std::path::Path) -> Arc<StdMutex<TrustStore>> {
        Arc::new(StdMutex::new(
            TrustStore::load(dir.join("trust.json")).unwrap(),
        ))
    }

    #[tokio::test]
    async fn pair_request_with_correct_code_is_accepted() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = Host::new(
            "host-1".to_string(),
            "host-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
        );
        let code = PairCode::generate(42);
        let code_for_accept = code.clone();

        let accept_task = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            host.accept(stream, peer_addr, &code_for_accept, None)
                .await
        });

        let joiner = Joiner::new(
            "joiner-1".to_string(),
            "joiner-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let connected = joiner.connect(addr, &code, None).await.unwrap();
        assert_eq!(connected.peer_hostname, "host-machine");

        let accepted = accept_task.await.unwrap().unwrap();
        assert_eq!(accepted.peer_hostname, "joiner-machine");
    }

    #[tokio::test]
    async fn pair_request_with_wrong_code_is_rejected() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = Host::new(
            "host-1".to_string(),
            "host-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
        );
        let correct = PairCode::generate(1);
        let wrong = PairCode::generate(2);

        let accept_task = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            host.accept(stream, peer_addr, &correct, None).await
        });

        let joiner = Joiner::new(
            "joiner-1".to_string(),
            "joiner-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let joined = joiner.connect(addr, &wrong, None).await;
        assert!(matches!(joined, Err(Error::HandshakeRejected(reason)) if reason == "配对码错误"));

        let accepted = accept_task.await.unwrap();
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn reconnect_from_untrusted_device_is_rejected() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = Host::new(
            "host-1".to_string(),
            "host-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
        );
        let code = PairCode::generate(1);

        let accept_task = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            host.accept(stream, peer_addr, &code, None).await
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut read_half, write_half) = stream.into_split();
        let writer = FrameWriter::new(write_half);
        writer
            .send(&Message::Reconnect(ReconnectPayload {
                device_id: "unknown-device".to_string(),
                hostname: "joiner-machine".to_string(),
            }))
            .await
            .unwrap();
        let reply = read_frame_with_timeout(
            &mut read_half,
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(matches!(reply, Message::PairReject(_)));

        let accepted = accept_task.await.unwrap();
        assert!(matches!(accepted, Err(Error::NotTrusted(_))));
    }

    #[tokio::test]
    async fn connected_session_dispatches_file_info_then_disconnects() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let host = Host::new(
            "host-1".to_string(),
            "host-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
        );
        let code = PairCode::generate(1);
        let code_clone = code.clone();

        let server_task = tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            let connected = host.accept(stream, peer_addr, &code_clone, None).await.unwrap();
            let sink = Arc::new(RecordingSink::default());
            connected
                .run(
                    Arc::clone(&sink),
                    crate::DEFAULT_MAX_PAYLOAD_BYTES,
                    Duration::from_secs(30),
                    Duration::from_secs(30),
                )
                .await
                .unwrap();
            sink.calls.lock().unwrap().clone()
        });

        let joiner = Joiner::new(
            "joiner-1".to_string(),
            "joiner-machine".to_string(),
            trust_store(dir.path()),
            crate::DEFAULT_MAX_PAYLOAD_BYTES,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let connected = joiner.connect(addr, &code, None).await.unwrap();
        connected
            .writer()
            .send(&Message::FileInfo(FileInfoPayload {
                filename: "a.txt".to_string(),
                filesize: 5,
                hash: "deadbeef".to_string(),
                is_folder: false,
            }))
            .await
            .unwrap();
        connected.disconnect().await.unwrap();

        let calls = server_task.await.unwrap();
        assert!(calls.contains(&"connected:joiner-machine".to_string()));
        assert!(calls.contains(&"file_info:a.txt".to_string()));
        assert!(calls.contains(&"disconnected".to_string()));
    }
}
