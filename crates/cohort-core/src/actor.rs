//! Actor runtime: one tokio task per node.
//!
//! Each node runs as its own task and owns its [`Node`] exclusively. Peers
//! exchange encoded [`Frame`]s over unbounded mpsc inboxes; a bounded inbox
//! could deadlock two nodes that are sending to each other. Driver commands
//! travel through the same inbox and answer on a oneshot channel. Commands
//! whose outcome depends on other nodes (`request_mutex`, `take_snapshot`)
//! answer only once that outcome happens, so `request_mutex(..).await`
//! returns inside the critical section.
//!
//! Channel FIFO comes from the mpsc channel itself; sequence numbers are
//! still assigned per channel so [`Node::receive`] can verify it.

use cohort_proto::{Frame, NodeId};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    bus::SequenceCounters,
    error::{BusError, NetworkError, NodeError},
    node::{Node, NodeAction},
    snapshot::LocalSnapshot,
    state::ProcessState,
};

type Reply<T> = oneshot::Sender<Result<T, NodeError>>;

enum Command {
    RequestMutex(Reply<()>),
    ReleaseMutex(Reply<()>),
    TakeSnapshot { round: u64, reply: Reply<LocalSnapshot> },
    SendData { to: NodeId, body: Vec<u8>, reply: Reply<()> },
    Activate { target: NodeId, reply: Reply<()> },
    Start(Reply<()>),
    Finish(Reply<()>),
    State(oneshot::Sender<ProcessState>),
    Shutdown,
}

enum Inbound {
    Frame(Frame),
    Command(Command),
}

/// Notifications from node tasks to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    /// Node entered the critical section
    Entered(NodeId),
    /// Node left the critical section
    Left(NodeId),
    /// Node completed its part of a snapshot round
    SnapshotComplete(LocalSnapshot),
    /// Root detected global termination
    GlobalTermination(NodeId),
    /// Node discarded an incoming frame
    Dropped {
        /// Receiving node
        node: NodeId,
        /// Why
        error: NodeError,
    },
}

struct Actor {
    node: Node,
    peers: Vec<mpsc::UnboundedSender<Inbound>>,
    counters: SequenceCounters,
    events: mpsc::UnboundedSender<ActorEvent>,
    pending_entry: Option<Reply<()>>,
    pending_snapshot: Option<(u64, Reply<LocalSnapshot>)>,
}

impl Actor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        let id = self.node.id();
        tracing::debug!(node = id, "actor started");
        while let Some(inbound) = inbox.recv().await {
            match inbound {
                Inbound::Frame(frame) => match self.node.receive(&frame) {
                    Ok(actions) => self.execute(actions),
                    Err(error) => {
                        tracing::warn!(node = id, from = frame.header.sender(), %error, "dropped message");
                        let _ = self.events.send(ActorEvent::Dropped { node: id, error });
                    },
                },
                Inbound::Command(Command::Shutdown) => break,
                Inbound::Command(command) => self.command(command),
            }
        }
        tracing::debug!(node = id, "actor stopped");
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::RequestMutex(reply) => match self.node.request_mutex() {
                Ok(actions) => {
                    self.pending_entry = Some(reply);
                    self.execute(actions);
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                },
            },
            Command::ReleaseMutex(reply) => {
                let result = self.node.release_mutex().map(|actions| self.execute(actions));
                let _ = reply.send(result);
            },
            Command::TakeSnapshot { round, reply } => match self.node.initiate_snapshot(round) {
                Ok(actions) => {
                    self.pending_snapshot = Some((round, reply));
                    self.execute(actions);
                },
                Err(e) => {
                    let _ = reply.send(Err(e));
                },
            },
            Command::SendData { to, body, reply } => {
                let result = self.node.send_data(to, body).map(|actions| self.execute(actions));
                let _ = reply.send(result);
            },
            Command::Activate { target, reply } => {
                let result = self.node.activate(target).map(|actions| self.execute(actions));
                let _ = reply.send(result);
            },
            Command::Start(reply) => {
                self.node.start_process();
                let _ = reply.send(Ok(()));
            },
            Command::Finish(reply) => {
                let actions = self.node.finish_process();
                self.execute(actions);
                let _ = reply.send(Ok(()));
            },
            Command::State(reply) => {
                let _ = reply.send(self.node.state().clone());
            },
            Command::Shutdown => {},
        }
    }

    fn execute(&mut self, actions: Vec<NodeAction>) {
        let id = self.node.id();
        for action in actions {
            match action {
                NodeAction::Send { to, message } => {
                    let Some(peer) = self.peers.get(to as usize) else {
                        let error = BusError::InvalidAddress { recipient: to, node_count: self.peers.len() };
                        tracing::warn!(node = id, %error, "dropping outbound message");
                        continue;
                    };
                    let seq = self.counters.assign(id, to);
                    match message.into_frame(to, seq) {
                        Ok(frame) => {
                            if peer.send(Inbound::Frame(frame)).is_err() {
                                tracing::warn!(node = id, to, "peer has stopped");
                            }
                        },
                        Err(error) => tracing::warn!(node = id, to, %error, "framing failed"),
                    }
                },
                NodeAction::EnteredCriticalSection => {
                    if let Some(reply) = self.pending_entry.take() {
                        let _ = reply.send(Ok(()));
                    }
                    let _ = self.events.send(ActorEvent::Entered(id));
                },
                NodeAction::LeftCriticalSection => {
                    let _ = self.events.send(ActorEvent::Left(id));
                },
                NodeAction::SnapshotComplete(local) => {
                    if self.pending_snapshot.as_ref().is_some_and(|(round, _)| *round == local.round) {
                        if let Some((_, reply)) = self.pending_snapshot.take() {
                            let _ = reply.send(Ok(local.clone()));
                        }
                    }
                    let _ = self.events.send(ActorEvent::SnapshotComplete(local));
                },
                NodeAction::GlobalTermination => {
                    let _ = self.events.send(ActorEvent::GlobalTermination(id));
                },
            }
        }
    }
}

/// Handle to a set of running node tasks.
pub struct ActorNetwork {
    inboxes: Vec<mpsc::UnboundedSender<Inbound>>,
    events: mpsc::UnboundedReceiver<ActorEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActorNetwork {
    /// Spawn one task per node. Must be called inside a tokio runtime.
    pub fn spawn(nodes: Vec<Node>) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (inboxes, receivers): (Vec<_>, Vec<_>) =
            nodes.iter().map(|_| mpsc::unbounded_channel()).unzip();

        let tasks = nodes
            .into_iter()
            .zip(receivers)
            .map(|(node, inbox)| {
                let actor = Actor {
                    node,
                    peers: inboxes.clone(),
                    counters: SequenceCounters::new(),
                    events: event_tx.clone(),
                    pending_entry: None,
                    pending_snapshot: None,
                };
                tokio::spawn(actor.run(inbox))
            })
            .collect();

        Self { inboxes, events, tasks }
    }

    /// Nodes in the network.
    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    /// True if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    async fn call<T>(
        &self,
        node: NodeId,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, NetworkError> {
        let inbox = self.inboxes.get(node as usize).ok_or(NetworkError::UnknownNode(node))?;
        let (tx, rx) = oneshot::channel();
        inbox.send(Inbound::Command(make(tx))).map_err(|_| NetworkError::ActorStopped(node))?;
        rx.await
            .map_err(|_| NetworkError::ActorStopped(node))?
            .map_err(|e| NetworkError::node(node, e))
    }

    /// Request the critical section; resolves once `node` has entered it.
    ///
    /// # Errors
    ///
    /// - `Node` with the mutex error, `UnknownNode`, `ActorStopped`
    pub async fn request_mutex(&self, node: NodeId) -> Result<(), NetworkError> {
        self.call(node, Command::RequestMutex).await
    }

    /// Leave the critical section.
    ///
    /// # Errors
    ///
    /// - `Node` with the mutex error, `UnknownNode`, `ActorStopped`
    pub async fn release_mutex(&self, node: NodeId) -> Result<(), NetworkError> {
        self.call(node, Command::ReleaseMutex).await
    }

    /// Start snapshot `round` at `initiator`; resolves with the initiator's
    /// completed contribution.
    ///
    /// # Errors
    ///
    /// - `Node` with the snapshot error, `UnknownNode`, `ActorStopped`
    pub async fn take_snapshot(&self, initiator: NodeId, round: u64) -> Result<LocalSnapshot, NetworkError> {
        self.call(initiator, |reply| Command::TakeSnapshot { round, reply }).await
    }

    /// Send application data between neighbors.
    ///
    /// # Errors
    ///
    /// - `Node` with `NotNeighbor`, `UnknownNode`, `ActorStopped`
    pub async fn send_data(&self, from: NodeId, to: NodeId, body: Vec<u8>) -> Result<(), NetworkError> {
        self.call(from, |reply| Command::SendData { to, body, reply }).await
    }

    /// Engage `target` in `from`'s work.
    ///
    /// # Errors
    ///
    /// - `Node` with `NotActive`, `UnknownNode`, `ActorStopped`
    pub async fn activate(&self, from: NodeId, target: NodeId) -> Result<(), NetworkError> {
        self.call(from, |reply| Command::Activate { target, reply }).await
    }

    /// Begin spontaneous work at `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, `ActorStopped`
    pub async fn start_process(&self, node: NodeId) -> Result<(), NetworkError> {
        self.call(node, Command::Start).await
    }

    /// Mark `node`'s local work as done.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, `ActorStopped`
    pub async fn finish_process(&self, node: NodeId) -> Result<(), NetworkError> {
        self.call(node, Command::Finish).await
    }

    /// Current application state of `node`.
    ///
    /// # Errors
    ///
    /// - `UnknownNode`, `ActorStopped`
    pub async fn state(&self, node: NodeId) -> Result<ProcessState, NetworkError> {
        let inbox = self.inboxes.get(node as usize).ok_or(NetworkError::UnknownNode(node))?;
        let (tx, rx) = oneshot::channel();
        inbox.send(Inbound::Command(Command::State(tx))).map_err(|_| NetworkError::ActorStopped(node))?;
        rx.await.map_err(|_| NetworkError::ActorStopped(node))
    }

    /// Next notification from any node.
    pub async fn next_event(&mut self) -> Option<ActorEvent> {
        self.events.recv().await
    }

    /// Stop every task and wait for them to exit.
    pub async fn shutdown(self) {
        for inbox in &self.inboxes {
            let _ = inbox.send(Inbound::Command(Command::Shutdown));
        }
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!(%error, "actor task failed");
            }
        }
    }
}
