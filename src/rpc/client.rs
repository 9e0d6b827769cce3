//! JSON-RPC client for the bridge side of the socket.
//!
//! Calls may overlap. Each outgoing request gets a fresh numeric id and a
//! oneshot waiter in the pending table; the reader task resolves waiters by
//! id, so responses can arrive in any order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use crate::core::error::{RpcCallError, TransportError};
use crate::rpc::jsonrpc::{RpcRequest, RpcResponse};
use crate::rpc::transport::{FrameSender, FramedConnection};

type Waiter = oneshot::Sender<Result<Value, RpcCallError>>;

#[derive(Default)]
struct PendingTable {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

/// Client end of one host connection.
pub struct RpcClient {
    sender: FrameSender,
    pending: Arc<Mutex<PendingTable>>,
    next_id: AtomicU64,
    closed: watch::Receiver<bool>,
}

impl RpcClient {
    /// Connect to the host socket and start the response reader.
    pub async fn connect(path: &Path) -> Result<Arc<Self>, TransportError> {
        let connection = FramedConnection::connect(path).await?;
        Ok(Arc::new(Self::from_connection(connection)))
    }

    pub fn from_connection(connection: FramedConnection) -> Self {
        let sender = connection.sender();
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let (closed_tx, closed) = watch::channel(false);

        tokio::spawn(read_responses(connection, pending.clone(), closed_tx));

        Self {
            sender,
            pending,
            next_id: AtomicU64::new(1),
            closed,
        }
    }

    /// Send a request and wait for its correlated response.
    ///
    /// There is no timeout; the call only fails early if the connection
    /// closes.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if table.closed {
                return Err(RpcCallError::ConnectionClosed);
            }
            table.waiters.insert(id, tx);
        }

        debug!(id, method, "sending request");
        if !self.sender.send(&RpcRequest::new(id, method, params)) {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .waiters
                .remove(&id);
            return Err(RpcCallError::ConnectionClosed);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcCallError::ConnectionClosed),
        }
    }

    /// Number of calls still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }

    /// Resolves once the connection to the host has closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        while !*closed.borrow_and_update() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }
}

async fn read_responses(
    mut connection: FramedConnection,
    pending: Arc<Mutex<PendingTable>>,
    closed: watch::Sender<bool>,
) {
    loop {
        match connection.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<RpcResponse>(&line) {
                Ok(response) => resolve(&pending, response),
                // Unrelated garbage must not fail calls that are still waiting
                Err(e) => warn!("ignoring unparseable frame from host: {e}"),
            },
            Ok(None) => {
                debug!("host closed the connection");
                break;
            }
            Err(e) => {
                warn!("connection to host failed: {e}");
                break;
            }
        }
    }

    let waiters = {
        let mut table = pending.lock().unwrap_or_else(PoisonError::into_inner);
        table.closed = true;
        std::mem::take(&mut table.waiters)
    };
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(RpcCallError::ConnectionClosed));
    }
    let _ = closed.send(true);
}

fn resolve(pending: &Mutex<PendingTable>, response: RpcResponse) {
    let Some(id) = response.id.as_u64() else {
        warn!(id = %response.id, "response with unknown id shape");
        return;
    };

    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .waiters
        .remove(&id);

    match waiter {
        Some(waiter) => {
            let _ = waiter.send(response.into_outcome().map_err(RpcCallError::Remote));
        }
        None => warn!(id, "response for a request that is not pending"),
    }
}
