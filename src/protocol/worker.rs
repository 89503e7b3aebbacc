//! Per-connection worker task.
//!
//! A [`ConnectionWorker`] owns one [`Connection`] on a tokio task. Inbound bytes,
//! send requests and lifecycle commands arrive on a bounded channel and are applied
//! in FIFO order; a periodic tick on the same task drives retransmissions and the
//! fragment sweep, so the connection is never touched from two places at once.
//!
//! Everything the connection produces goes to the output channel. On shutdown the
//! timer is stopped first, then queued commands are drained and discarded.

use crate::core::message::Message;
use crate::error::constants::ERR_WORKER_GONE;
use crate::error::{ProtocolError, Result};
use crate::protocol::connection::{Connection, ConnectionEvent, ConnectionState};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum WorkerCommand {
    /// Bytes received from the transport
    Inbound(Bytes),
    /// Send an already serialized payload
    Send { message_id: u16, payload: Vec<u8> },
    /// Start the key exchange as initiator
    Connect,
    Close,
    Reset,
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerOutput {
    Transmit(Bytes),
    Deliver(Message),
    /// Inbound message or fragment discarded
    Dropped(ProtocolError),
    /// A send request was refused; the connection is still usable
    SendRejected(ProtocolError),
    HandshakeFailed(ProtocolError),
    Established,
    /// Terminal error; a `Closed` output follows
    Failed(ProtocolError),
    Closed,
}

/// Handle to a running connection task
#[derive(Debug)]
pub struct ConnectionWorker {
    commands: mpsc::Sender<WorkerCommand>,
    handle: JoinHandle<Connection>,
}

impl ConnectionWorker {
    /// Spawn the task. Must be called from within a tokio runtime.
    pub fn spawn(
        connection: Connection,
        outputs: mpsc::Sender<WorkerOutput>,
        queue_depth: usize,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(queue_depth.max(1));
        let tick = connection.config().reliability.tick_interval;
        let handle = tokio::spawn(run(connection, receiver, outputs, tick));
        Self { commands, handle }
    }

    /// Sender for feeding this worker from elsewhere, e.g. a socket reader
    pub fn commands(&self) -> mpsc::Sender<WorkerCommand> {
        self.commands.clone()
    }

    pub async fn enqueue_inbound(&self, bytes: Bytes) -> Result<()> {
        self.submit(WorkerCommand::Inbound(bytes)).await
    }

    pub async fn send(&self, message_id: u16, payload: Vec<u8>) -> Result<()> {
        self.submit(WorkerCommand::Send {
            message_id,
            payload,
        })
        .await
    }

    pub async fn connect(&self) -> Result<()> {
        self.submit(WorkerCommand::Connect).await
    }

    pub async fn close(&self) -> Result<()> {
        self.submit(WorkerCommand::Close).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.submit(WorkerCommand::Reset).await
    }

    /// Stop the task and hand back the connection
    pub async fn shutdown(self) -> Result<Connection> {
        // the task may already have exited on its own
        let _ = self.commands.send(WorkerCommand::Shutdown).await;
        self.handle
            .await
            .map_err(|e| ProtocolError::Custom(format!("worker task failed: {e}")))
    }

    async fn submit(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ProtocolError::Custom(ERR_WORKER_GONE.to_string()))
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// False once the output receiver is gone
async fn emit(outputs: &mpsc::Sender<WorkerOutput>, output: WorkerOutput) -> bool {
    outputs.send(output).await.is_ok()
}

async fn emit_frames(outputs: &mpsc::Sender<WorkerOutput>, frames: Vec<Bytes>) -> bool {
    for frame in frames {
        if !emit(outputs, WorkerOutput::Transmit(frame)).await {
            return false;
        }
    }
    true
}

async fn emit_events(outputs: &mpsc::Sender<WorkerOutput>, events: Vec<ConnectionEvent>) -> bool {
    for event in events {
        let output = match event {
            ConnectionEvent::Deliver(message) => WorkerOutput::Deliver(message),
            ConnectionEvent::Transmit(frame) => WorkerOutput::Transmit(frame),
            ConnectionEvent::Dropped(e) => WorkerOutput::Dropped(e),
            ConnectionEvent::Established => WorkerOutput::Established,
            ConnectionEvent::HandshakeFailed(e) => WorkerOutput::HandshakeFailed(e),
            // the state check after the command reports the close
            ConnectionEvent::PeerClosed => continue,
        };
        if !emit(outputs, output).await {
            return false;
        }
    }
    true
}

enum Flow {
    Continue,
    Stop,
}

async fn apply(
    connection: &mut Connection,
    command: WorkerCommand,
    outputs: &mpsc::Sender<WorkerOutput>,
) -> Flow {
    let open = match command {
        WorkerCommand::Inbound(bytes) => match connection.feed(&bytes, now()) {
            Ok(events) => emit_events(outputs, events).await,
            Err(e) => emit(outputs, WorkerOutput::Failed(e)).await,
        },
        WorkerCommand::Send {
            message_id,
            payload,
        } => match connection.encode_bytes(message_id, payload, now()) {
            Ok(frames) => emit_frames(outputs, frames).await,
            Err(e) => emit(outputs, WorkerOutput::SendRejected(e)).await,
        },
        WorkerCommand::Connect => match connection.connect(now()) {
            Ok(frames) => emit_frames(outputs, frames).await,
            Err(e) => emit(outputs, WorkerOutput::HandshakeFailed(e)).await,
        },
        WorkerCommand::Close => match connection.close(now()) {
            Ok(frames) => emit_frames(outputs, frames).await,
            Err(e) => emit(outputs, WorkerOutput::SendRejected(e)).await,
        },
        WorkerCommand::Reset => {
            connection.reset();
            true
        }
        WorkerCommand::Shutdown => return Flow::Stop,
    };

    if open {
        Flow::Continue
    } else {
        Flow::Stop
    }
}

async fn run(
    mut connection: Connection,
    mut commands: mpsc::Receiver<WorkerCommand>,
    outputs: mpsc::Sender<WorkerOutput>,
    tick: Duration,
) -> Connection {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(peer = connection.local_peer_id(), "worker started");

    loop {
        let flow = tokio::select! {
            biased;

            _ = ticker.tick() => match connection.on_tick(now()) {
                Ok(frames) => {
                    if emit_frames(&outputs, frames).await { Flow::Continue } else { Flow::Stop }
                }
                Err(e) => {
                    warn!(error = %e, "connection failed");
                    let _ = emit(&outputs, WorkerOutput::Failed(e)).await;
                    Flow::Continue
                }
            },

            command = commands.recv() => match command {
                Some(command) => apply(&mut connection, command, &outputs).await,
                None => Flow::Stop,
            },
        };

        if let Flow::Stop = flow {
            break;
        }
        if connection.state() == ConnectionState::Closed {
            let _ = emit(&outputs, WorkerOutput::Closed).await;
            break;
        }
    }

    drop(ticker);
    commands.close();
    let mut discarded = 0usize;
    while commands.try_recv().is_ok() {
        discarded += 1;
    }
    info!(peer = connection.local_peer_id(), discarded, "worker stopped");
    connection
}
