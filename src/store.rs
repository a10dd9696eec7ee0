//! The single-writer serializer (C3): the only task that ever touches
//! [`Graph`] directly. Everyone else talks to it through [`StoreHandle`],
//! over a capacity-1 channel that gives the whole server synchronous,
//! one-request-at-a-time back-pressure (see SPEC_FULL.md §5).

use crate::error::StoreError;
use crate::graph::Graph;
use crate::protocol::{self, Command, CommandKind, ReplyCode};
use tokio::sync::{mpsc, oneshot};

type ReplyTx = oneshot::Sender<(ReplyCode, Option<StoreError>)>;

enum Message {
    Request { cmd: Command, reply: ReplyTx },
    /// Internal-only: returns a clone of the current graph so the lifecycle
    /// can persist a snapshot without ever sharing `&mut Graph` outside this
    /// task. Never constructed from the wire.
    Dump(oneshot::Sender<Graph>),
}

/// A cheap, cloneable handle that connection handlers use to submit requests.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Message>,
}

impl StoreHandle {
    /// Parses `line`, enqueues it, and awaits the serializer's reply.
    ///
    /// This is the one synchronous-looking operation exposed to handlers;
    /// internally it suspends on both the channel send and the oneshot recv.
    pub async fn handle(&self, line: &str) -> (ReplyCode, Option<StoreError>) {
        let cmd = match protocol::parse(line) {
            Ok(cmd) => cmd,
            Err(_) => return (ReplyCode::Error, None),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(Message::Request { cmd, reply: reply_tx })
            .await
            .is_err()
        {
            // The serializer task is gone (should only happen during/after
            // shutdown); treat as a hard error rather than panicking.
            return (ReplyCode::Error, None);
        }

        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => (ReplyCode::Error, None),
        }
    }

    /// Asks the serializer for a point-in-time snapshot of the graph. Used
    /// only by the lifecycle shutdown path, after every connection handler
    /// has been drained.
    pub async fn dump(&self) -> Option<Graph> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Dump(tx)).await.is_err() {
            return None;
        }
        rx.await.ok()
    }
}

pub struct GraphStore;

impl GraphStore {
    /// Spawns the serializer task over `graph` and returns a handle to it.
    ///
    /// The task runs until every [`StoreHandle`] clone (and the one retained
    /// by the lifecycle for the final `dump`) has been dropped, at which
    /// point the channel closes and the task exits on its own — equivalent
    /// to the source project's "leave the worker idle forever" strategy,
    /// since no new request can reach the queue after drain either way.
    pub fn spawn(graph: Graph) -> (StoreHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::worker(graph, rx));
        (StoreHandle { tx }, handle)
    }

    async fn worker(mut graph: Graph, mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            match message {
                Message::Request { cmd, reply } => {
                    let (code, err) = Self::dispatch(&mut graph, cmd);
                    // Reply before looking at the next request: this is what
                    // makes the channel's capacity-1 back-pressure double as
                    // "at most one request being processed, server-wide".
                    let _ = reply.send((code, err));
                }
                Message::Dump(reply) => {
                    let _ = reply.send(graph.clone());
                }
            }
        }
        tracing::debug!("serializer idle: no handles remain");
    }

    fn dispatch(graph: &mut Graph, cmd: Command) -> (ReplyCode, Option<StoreError>) {
        match cmd.kind {
            CommandKind::Index => match graph.index(&cmd.pkg, &cmd.deps) {
                Ok(()) => {
                    tracing::info!(pkg = %cmd.pkg, deps = ?cmd.deps, "indexed");
                    (ReplyCode::Ok, None)
                }
                Err(err) => {
                    tracing::info!(pkg = %cmd.pkg, error = %err, "index failed");
                    (ReplyCode::Fail, Some(err))
                }
            },
            CommandKind::Remove => match graph.remove(&cmd.pkg) {
                Ok(()) => {
                    tracing::info!(pkg = %cmd.pkg, "removed");
                    (ReplyCode::Ok, None)
                }
                Err(err) => {
                    tracing::info!(pkg = %cmd.pkg, error = %err, "remove failed");
                    (ReplyCode::Fail, Some(err))
                }
            },
            CommandKind::Query => match graph.query(&cmd.pkg) {
                Ok(()) => (ReplyCode::Ok, None),
                Err(err) => (ReplyCode::Fail, Some(err)),
            },
            CommandKind::Noop => (ReplyCode::Ok, None),
            CommandKind::Invalid(token) => {
                let err = StoreError::InvalidCommand(token);
                tracing::warn!(error = %err, "invalid command");
                (ReplyCode::Error, Some(err))
            }
        }
    }
}
