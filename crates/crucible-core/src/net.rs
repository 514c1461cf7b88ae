//! The TCP worker-connection hub (spec §5's "task + channel" idiom): one
//! reader/writer task pair per live connection, forwarding parsed frames to
//! the coordinator's single receiving loop through [`WorkerHub`]'s
//! [`WorkerChannel`](crate::WorkerChannel) implementation.
//!
//! A worker dials the coordinator, sends `response_manifest` to announce
//! itself (registering it under `message.sender_id` as its worker id), and
//! from then on `done` frames flow back through the same reader task while
//! `execute`/`exit` frames are written by a dedicated writer task draining
//! an `mpsc` queue — so `dispatch` never blocks on socket backpressure from
//! the coordinator's single-threaded event loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::io::split;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crucible_errors::{CoreError, CoreResult};
use crucible_types::ComponentInvocation;
use crucible_wire::{read_frame, write_frame, Message, WireMessage};

use crate::{WorkerChannel, WorkerReady};

const COORDINATOR_SENDER_ID: &str = "coordinator";

enum HubEvent {
    Ready(WorkerReady),
    Done { worker_id: String, component_id: Uuid },
}

struct Writer {
    tx: mpsc::UnboundedSender<Message>,
}

/// Accepts worker connections on a bound TCP listener and answers
/// [`WorkerChannel`] against them.
pub struct WorkerHub {
    local_addr: std::net::SocketAddr,
    writers: Arc<Mutex<HashMap<String, Writer>>>,
    events_rx: mpsc::UnboundedReceiver<HubEvent>,
    pending_ready: VecDeque<WorkerReady>,
    pending_done: VecDeque<(String, Uuid)>,
}

impl WorkerHub {
    /// Binds `addr` (typically `coordinator.host:coordinator.worker_manager_port`,
    /// spec §6) and spawns the accept loop in the background.
    pub async fn bind(addr: impl ToSocketAddrs) -> CoreResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CoreError::ChannelError(format!("binding worker hub listener: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CoreError::ChannelError(format!("reading worker hub local address: {e}")))?;
        let writers = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let accept_writers = writers.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => continue,
                };
                spawn_connection(stream, accept_writers.clone(), events_tx.clone());
            }
        });

        Ok(Self { local_addr, writers, events_rx, pending_ready: VecDeque::new(), pending_done: VecDeque::new() })
    }

    /// The address the accept loop is actually listening on — useful when
    /// `bind` was given port `0` and the caller needs the assigned port.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// The number of currently registered (announced) worker connections.
    pub async fn connection_count(&self) -> usize {
        self.writers.lock().await.len()
    }

    /// Sends `exit` to every registered worker (spec §5 "Cancellation").
    pub async fn broadcast_exit(&self) {
        let writers = self.writers.lock().await;
        for writer in writers.values() {
            if let Ok(msg) = WireMessage::Exit.into_message(COORDINATOR_SENDER_ID) {
                let _ = writer.tx.send(msg);
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    writers: Arc<Mutex<HashMap<String, Writer>>>,
    events: mpsc::UnboundedSender<HubEvent>,
) {
    let (mut read_half, mut write_half) = split(stream);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write_frame(&mut write_half, &msg).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let mut worker_id: Option<String> = None;
        loop {
            let frame = match read_frame(&mut read_half).await {
                Ok(frame) => frame,
                Err(_) => break,
            };
            let sender_id = frame.sender_id.clone();
            let typed = match WireMessage::from_message(&frame) {
                Ok(typed) => typed,
                Err(_) => continue,
            };
            match typed {
                WireMessage::ResponseManifest(manifest) => {
                    if worker_id.is_none() {
                        worker_id = Some(sender_id.clone());
                        writers.lock().await.insert(sender_id.clone(), Writer { tx: tx.clone() });
                    }
                    let _ = events.send(HubEvent::Ready(WorkerReady { worker_id: sender_id, manifest }));
                }
                WireMessage::Done { component_id } => {
                    if let Some(id) = &worker_id {
                        let _ = events.send(HubEvent::Done { worker_id: id.clone(), component_id });
                    }
                }
                WireMessage::RequestManifest | WireMessage::Execute(_) | WireMessage::Exit => {
                    // These flow coordinator -> worker; a well-behaved worker
                    // never sends them back. Ignore rather than treat a
                    // protocol confusion as a channel error.
                }
            }
        }
        if let Some(id) = worker_id {
            writers.lock().await.remove(&id);
        }
    });
}

impl WorkerChannel for WorkerHub {
    async fn dispatch(&mut self, worker_id: &str, invocation: ComponentInvocation) -> CoreResult<()> {
        let msg = WireMessage::Execute(invocation)
            .into_message(COORDINATOR_SENDER_ID)
            .map_err(|e| CoreError::ChannelError(e.to_string()))?;
        let writers = self.writers.lock().await;
        let writer = writers
            .get(worker_id)
            .ok_or_else(|| CoreError::ChannelError(format!("no live connection registered for worker {worker_id}")))?;
        writer
            .tx
            .send(msg)
            .map_err(|_| CoreError::ChannelError(format!("connection for worker {worker_id} has closed")))
    }

    async fn await_done(&mut self, worker_id: &str, component_id: Uuid) -> CoreResult<()> {
        loop {
            if let Some(pos) = self.pending_done.iter().position(|(w, c)| w == worker_id && *c == component_id) {
                self.pending_done.remove(pos);
                return Ok(());
            }
            match self.events_rx.recv().await {
                Some(HubEvent::Done { worker_id: w, component_id: c }) if w == worker_id && c == component_id => {
                    return Ok(());
                }
                Some(HubEvent::Done { worker_id: w, component_id: c }) => self.pending_done.push_back((w, c)),
                Some(HubEvent::Ready(ready)) => self.pending_ready.push_back(ready),
                None => return Err(CoreError::ChannelError("worker hub event channel closed".to_string())),
            }
        }
    }

    async fn await_ready(&mut self) -> CoreResult<WorkerReady> {
        if let Some(ready) = self.pending_ready.pop_front() {
            return Ok(ready);
        }
        loop {
            match self.events_rx.recv().await {
                Some(HubEvent::Ready(ready)) => return Ok(ready),
                Some(HubEvent::Done { worker_id, component_id }) => self.pending_done.push_back((worker_id, component_id)),
                None => return Err(CoreError::ChannelError("worker hub event channel closed".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio::io::AsyncReadExt;

    use crucible_types::{ComponentType, Manifest, SemanticVersion};
    use crucible_wire::{write_frame as wf, Message as WireMsg};

    use super::*;

    async fn connect_worker(addr: std::net::SocketAddr, worker_id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let manifest = Manifest::new(
            "scaler",
            ComponentType::Library,
            SemanticVersion::zero(),
            BTreeMap::new(),
            true,
        );
        let msg = WireMessage::ResponseManifest(manifest).into_message(worker_id).unwrap();
        wf(&mut stream, &msg).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn a_worker_announcing_itself_is_delivered_as_await_ready() {
        let mut hub = WorkerHub::bind("127.0.0.1:0").await.unwrap();
        let addr = hub.local_addr();

        let _conn = connect_worker(addr, "worker-1").await;
        let ready = hub.await_ready().await.unwrap();
        assert_eq!(ready.worker_id, "worker-1");
        assert_eq!(ready.manifest.name, "scaler");
    }

    #[tokio::test]
    async fn dispatch_writes_an_execute_frame_the_worker_can_read() {
        let mut hub = WorkerHub::bind("127.0.0.1:0").await.unwrap();
        let addr = hub.local_addr();

        let mut conn = connect_worker(addr, "worker-1").await;
        let ready = hub.await_ready().await.unwrap();

        let invocation = ComponentInvocation::new("/tmp/work", vec!["python".into(), "train.py".into()]);
        let component_id = invocation.component_id;
        hub.dispatch(&ready.worker_id, invocation).await.unwrap();

        let mut len_buf = [0u8; 4];
        conn.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        conn.read_exact(&mut body).await.unwrap();
        let frame = WireMsg::decode_body(&body).unwrap();
        let typed = WireMessage::from_message(&frame).unwrap();
        match typed {
            WireMessage::Execute(decoded) => assert_eq!(decoded.component_id, component_id),
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn done_is_matched_to_the_waiting_component_id_even_out_of_order() {
        let mut hub = WorkerHub::bind("127.0.0.1:0").await.unwrap();
        let addr = hub.local_addr();

        let mut conn = connect_worker(addr, "worker-1").await;
        let _ready = hub.await_ready().await.unwrap();

        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        let msg_other = WireMessage::Done { component_id: other }.into_message("worker-1").unwrap();
        let msg_wanted = WireMessage::Done { component_id: wanted }.into_message("worker-1").unwrap();
        wf(&mut conn, &msg_other).await.unwrap();
        wf(&mut conn, &msg_wanted).await.unwrap();

        hub.await_done("worker-1", wanted).await.unwrap();
        hub.await_done("worker-1", other).await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_to_an_unregistered_worker_is_a_channel_error() {
        let mut hub = WorkerHub::bind("127.0.0.1:0").await.unwrap();

        let invocation = ComponentInvocation::new("/tmp/work", vec!["python".into()]);
        let err = hub.dispatch("no-such-worker", invocation).await.unwrap_err();
        assert!(matches!(err, CoreError::ChannelError(_)));
    }
}
