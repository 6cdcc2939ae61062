//! The interactive send/receive loop driven once a session reaches the
//! `Connected` state.
//!
//! Typed `send <path>` lines and the peer's frames are serviced
//! concurrently: the peer's frames are dispatched by [`InteractiveSink`]
//! running inside `Connected::run`'s read loop, while this module's task
//! reads stdin and drives outgoing transfers. The wire format carries no
//! per-chunk file identifier, so only one file is ever received at a time
//! — exactly as the protocol models it.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use lanshare_core::protocol::{
    DisconnectPayload, FileCompletePayload, FileInfoPayload, FileResumeOkPayload,
    FileResumePayload, Message,
};
use lanshare_core::session::{Connected, FrameWriter, SessionEventSink};
use lanshare_core::state::StateStore;
use lanshare_core::transfer::receiver::ChunkReceiver;
use lanshare_core::transfer::sender::ChunkSender;

/// Everything the loop needs beyond the live session itself.
pub struct SessionInputs {
    /// The peer's hostname, for display.
    pub peer_label: String,
    /// The peer's device id if known, else `peer_label` again — recorded
    /// in persisted transfer state for provenance.
    pub peer_device_id: String,
    pub state: StateStore,
    pub state_root: PathBuf,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub chunk_size: u64,
    pub max_payload: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

enum Signal {
    Resume {
        file_hash: String,
        received_chunks: Vec<u32>,
    },
    ResumeOk {
        file_hash: String,
        needed_chunks: Vec<u32>,
    },
}

struct InteractiveSink {
    peer_label: String,
    state: StateStore,
    state_root: PathBuf,
    download_dir: PathBuf,
    chunk_size: u64,
    active_receive: Mutex<Option<ChunkReceiver>>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl SessionEventSink for InteractiveSink {
    fn on_connected(&self, peer_hostname: &str) {
        println!("— connected to {peer_hostname} —");
    }

    fn on_disconnected(&self) {
        println!("— disconnected —");
    }

    fn on_file_info(&self, info: FileInfoPayload) {
        println!("< incoming {} ({} bytes)", info.filename, info.filesize);
        let result = ChunkReceiver::start(
            self.state.clone(),
            &self.state_root,
            self.download_dir.clone(),
            info.filename,
            info.filesize,
            info.hash,
            self.peer_label.clone(),
            self.chunk_size,
            info.is_folder,
        );
        match result {
            Ok(receiver) => *self.active_receive.lock().unwrap() = Some(receiver),
            Err(e) => error!(error = %e, "failed to start receive"),
        }
    }

    fn on_file_data(&self, chunk_index: u32, data: Vec<u8>) {
        let mut guard = self.active_receive.lock().unwrap();
        let Some(receiver) = guard.as_mut() else {
            warn!(chunk_index, "chunk arrived with no active receive, dropping");
            return;
        };
        let (received, total) = match receiver.write_chunk(chunk_index, &data) {
            Ok(progress) => progress,
            Err(e) => {
                error!(error = %e, "failed to write chunk");
                return;
            }
        };
        self.on_progress(received, total);
        if receiver.is_complete() {
            let receiver = guard.take().expect("matched Some above");
            match receiver.complete() {
                Ok(path) => println!("< received {}", path.display()),
                Err(e) => error!(error = %e, "failed to finalize receive"),
            }
        }
    }

    fn on_progress(&self, received: usize, total: u32) {
        println!("< received chunk {received}/{total}");
    }

    fn on_resume(&self, file_hash: String, received_chunks: Vec<u32>, device_id: String) {
        info!(%file_hash, %device_id, "peer requested resume");
        let _ = self.signals.send(Signal::Resume {
            file_hash,
            received_chunks,
        });
    }

    fn on_resume_ok(&self, file_hash: String, needed_chunks: Vec<u32>) {
        let _ = self.signals.send(Signal::ResumeOk {
            file_hash,
            needed_chunks,
        });
    }

    fn on_complete(&self, file_hash: String, success: bool) {
        if !success {
            println!("< transfer {file_hash} was reported failed by the peer");
        }
    }

    fn on_error(&self, message: String) {
        eprintln!("! peer error: {message}");
    }
}

/// Run a connected session until the peer disconnects or the user types
/// `quit`.
pub async fn run(connected: Connected, inputs: SessionInputs) -> Result<()> {
    let writer = connected.writer();
    let (signals_tx, mut signals_rx) = mpsc::unbounded_channel();

    let sink = Arc::new(InteractiveSink {
        peer_label: inputs.peer_label.clone(),
        state: inputs.state.clone(),
        state_root: inputs.state_root.clone(),
        download_dir: inputs.download_dir.clone(),
        chunk_size: inputs.chunk_size,
        active_receive: Mutex::new(None),
        signals: signals_tx,
    });

    resume_pending_receive(&sink, &inputs, &writer).await;

    let run_sink = Arc::clone(&sink);
    let max_payload = inputs.max_payload;
    let heartbeat_interval = inputs.heartbeat_interval;
    let heartbeat_timeout = inputs.heartbeat_timeout;
    let session_task = tokio::spawn(async move {
        connected
            .run(run_sink, max_payload, heartbeat_interval, heartbeat_timeout)
            .await
    });

    println!("type 'send <path>...' to send files, 'quit' to disconnect");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
                    let _ = writer.send(&Message::Disconnect(DisconnectPayload::default())).await;
                    break;
                }
                if let Some(paths) = line.strip_prefix("send ") {
                    for token in paths.split_whitespace() {
                        if let Err(e) = send_file(&writer, &inputs, token).await {
                            eprintln!("! send failed: {e:#}");
                        }
                    }
                } else {
                    println!("unrecognized command: {line}");
                }
            }
            signal = signals_rx.recv() => {
                match signal {
                    Some(Signal::Resume { file_hash, received_chunks }) => {
                        if let Err(e) = resume_send(&writer, &inputs, &file_hash, &received_chunks).await {
                            eprintln!("! resume failed: {e:#}");
                        }
                    }
                    Some(Signal::ResumeOk { file_hash, needed_chunks }) => {
                        println!("< peer will resend {} chunk(s) of {file_hash}", needed_chunks.len());
                    }
                    None => {}
                }
            }
        }
    }

    match session_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "session ended with an error"),
        Err(e) => error!(error = %e, "session task panicked"),
    }
    Ok(())
}

async fn send_file(writer: &FrameWriter, inputs: &SessionInputs, path_str: &str) -> Result<()> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        anyhow::bail!("no such file or directory: {}", path.display());
    }
    std::fs::create_dir_all(&inputs.temp_dir)?;

    let (mut sender, name, size, hash, is_folder) = ChunkSender::prepare(
        inputs.state.clone(),
        &path,
        &inputs.peer_device_id,
        inputs.chunk_size,
        &inputs.temp_dir,
    )?;

    println!("> sending {name} ({size} bytes)");
    writer
        .send(&Message::FileInfo(FileInfoPayload {
            filename: name,
            filesize: size,
            hash: hash.clone(),
            is_folder,
        }))
        .await?;

    while let Some((index, bytes)) = sender.next_chunk()? {
        writer.send(&Message::FileData(index, bytes)).await?;
        sender.mark_sent(index)?;
    }

    writer
        .send(&Message::FileComplete(FileCompletePayload {
            file_hash: hash,
            success: true,
        }))
        .await?;
    sender.complete()?;
    println!("> done");
    Ok(())
}

async fn resume_send(
    writer: &FrameWriter,
    inputs: &SessionInputs,
    file_hash: &str,
    received_chunks: &[u32],
) -> Result<()> {
    let Some(existing) = inputs.state.load_sending(file_hash)? else {
        warn!(file_hash, "resume requested for a transfer we have no record of, ignoring");
        return Ok(());
    };

    let (mut sender, ..) = ChunkSender::prepare(
        inputs.state.clone(),
        &existing.file_path,
        &inputs.peer_device_id,
        inputs.chunk_size,
        &inputs.temp_dir,
    )?;

    let have: BTreeSet<u32> = received_chunks.iter().copied().collect();
    let needed = sender.needed_from(&have);
    sender.resume_from(have)?;

    writer
        .send(&Message::FileResumeOk(FileResumeOkPayload {
            file_hash: file_hash.to_string(),
            needed_chunks: needed,
        }))
        .await?;

    while let Some((index, bytes)) = sender.next_chunk()? {
        writer.send(&Message::FileData(index, bytes)).await?;
        sender.mark_sent(index)?;
    }

    writer
        .send(&Message::FileComplete(FileCompletePayload {
            file_hash: file_hash.to_string(),
            success: true,
        }))
        .await?;
    sender.complete()?;
    Ok(())
}

/// If a receive was left incomplete by a prior session with this peer,
/// reload it, wire it in as the sink's active receive, and proactively
/// ask the peer to resume it.
async fn resume_pending_receive(sink: &Arc<InteractiveSink>, inputs: &SessionInputs, writer: &FrameWriter) {
    let pending = match inputs.state.list_pending_receiving() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to list pending receives");
            return;
        }
    };
    let Some(state) = pending.into_iter().find(|s| !s.is_complete()) else {
        return;
    };

    info!(file_hash = %state.file_hash, "resuming a pending receive");
    let receiver = match ChunkReceiver::start(
        inputs.state.clone(),
        &inputs.state_root,
        inputs.download_dir.clone(),
        state.file_name.clone(),
        state.file_size,
        state.file_hash.clone(),
        state.sender_device_id.clone(),
        state.chunk_size,
        state.is_folder,
    ) {
        Ok(receiver) => receiver,
        Err(e) => {
            error!(error = %e, "failed to reload pending receive");
            return;
        }
    };

    let received_chunks: Vec<u32> = receiver.received_chunks().iter().copied().collect();
    *sink.active_receive.lock().unwrap() = Some(receiver);

    let frame = Message::FileResume(FileResumePayload {
        file_hash: state.file_hash,
        received_chunks,
        device_id: inputs.peer_device_id.clone(),
    });
    if let Err(e) = writer.send(&frame).await {
        error!(error = %e, "failed to send resume request");
    }
}
