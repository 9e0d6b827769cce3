/// Host RPC Server
///
/// Listens on the local socket and serves JSON-RPC requests from bridge
/// processes. Every request carries `[contextToken, args]`; the token is
/// verified before the handler registered for the method is awaited.
///
/// Lifecycle: Created -> Starting -> Listening -> Stopping -> Stopped.
/// A failed bind returns to Created so `start()` can be retried.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::error::HostError;
use crate::host::registry::ToolRegistry;
use crate::host::token::TokenSigner;
use crate::rpc::jsonrpc::{RpcError, RpcRequest, RpcResponse};
use crate::rpc::transport::{self, FrameSender, FramedConnection};

/// Upper bound on a graceful stop
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Starting,
    Listening,
    Stopping,
    Stopped,
}

/// Resolves requests to handlers. Shared by every connection task.
pub struct Dispatcher {
    registry: Arc<RwLock<ToolRegistry>>,
    signer: Arc<TokenSigner>,
    debug: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, signer: Arc<TokenSigner>, debug: bool) -> Self {
        Self {
            registry,
            signer,
            debug,
        }
    }

    /// Run one request to completion.
    ///
    /// Order: split params, verify the token, find the handler, await it.
    pub async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let (token, args) = split_params(params)?;
        let context = self.signer.verify(&token)?;

        let handler = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handler(method)
            .ok_or_else(|| RpcError::method_not_found(method))?;

        if self.debug {
            debug!(method, %context, "dispatching");
        }
        handler(context, args).await.map_err(RpcError::handler)
    }
}

/// Split positional `[token, args]` params. The token must already be a
/// string; nothing is coerced.
fn split_params(params: Option<Value>) -> Result<(String, Value), RpcError> {
    let Some(Value::Array(mut items)) = params else {
        return Err(RpcError::invalid_params(
            "Invalid params: expected [contextToken, args]",
        ));
    };
    let args = if items.len() > 1 {
        items.swap_remove(1)
    } else {
        Value::Null
    };
    match items.into_iter().next() {
        Some(Value::String(token)) => Ok((token, args)),
        Some(other) => Err(RpcError::invalid_params(format!(
            "Invalid params: context token must be a string, got {}",
            type_name(&other)
        ))),
        None => Err(RpcError::invalid_params(
            "Invalid params: missing context token",
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

pub struct HostRpcServer {
    socket_path: PathBuf,
    dispatcher: Arc<Dispatcher>,
    state: Mutex<ServerState>,
    running: Mutex<Option<Running>>,
    stop_timeout: Duration,
}

impl HostRpcServer {
    pub fn new(socket_path: impl Into<PathBuf>, dispatcher: Dispatcher) -> Self {
        Self {
            socket_path: socket_path.into(),
            dispatcher: Arc::new(dispatcher),
            state: Mutex::new(ServerState::Created),
            running: Mutex::new(None),
            stop_timeout: STOP_TIMEOUT,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Bind the socket and start accepting connections.
    pub async fn start(&self) -> Result<(), HostError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ServerState::Created {
                return Err(HostError::AlreadyStarted);
            }
            *state = ServerState::Starting;
        }

        let listener = match transport::bind(&self.socket_path) {
            Ok(listener) => listener,
            Err(e) => {
                error!("{e}");
                self.set_state(ServerState::Created);
                return Err(e.into());
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, self.dispatcher.clone(), shutdown_rx));
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            shutdown,
            accept_task,
        });

        self.set_state(ServerState::Listening);
        info!(path = %self.socket_path.display(), "host RPC server listening");
        Ok(())
    }

    /// Close the listener and all connections.
    ///
    /// A no-op unless Listening. If closing takes longer than the stop
    /// timeout the server is marked Stopped anyway and the timeout is
    /// returned; the socket file may be left behind in that case.
    pub async fn stop(&self) -> Result<(), HostError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ServerState::Listening {
                return Ok(());
            }
            *state = ServerState::Stopping;
        }

        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Running {
            shutdown,
            mut accept_task,
        }) = running
        else {
            self.set_state(ServerState::Stopped);
            return Ok(());
        };

        let _ = shutdown.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut accept_task).await {
            Ok(_) => {
                match std::fs::remove_file(&self.socket_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %self.socket_path.display(), "failed to remove socket file: {e}"),
                }
                self.set_state(ServerState::Stopped);
                info!("host RPC server stopped");
                Ok(())
            }
            Err(_) => {
                accept_task.abort();
                self.set_state(ServerState::Stopped);
                warn!(timeout = ?self.stop_timeout, "host RPC server stop timed out");
                Err(HostError::ShutdownTimeout(self.stop_timeout))
            }
        }
    }
}

impl Drop for HostRpcServer {
    fn drop(&mut self) {
        if let Some(running) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = running.shutdown.send(true);
            running.accept_task.abort();
        }
    }
}

static CONNECTION_IDS: AtomicU64 = AtomicU64::new(1);

async fn accept_loop(
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let id = CONNECTION_IDS.fetch_add(1, Ordering::Relaxed);
                    debug!(connection = id, "accepted connection");
                    connections.spawn(serve_connection(id, stream, dispatcher.clone(), shutdown.clone()));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    id: u64,
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connection = FramedConnection::new(stream, format!("connection-{id}"));
    let sender = connection.sender();
    let mut in_flight = JoinSet::new();

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
            line = connection.next_line() => line,
        };
        match line {
            Ok(Some(line)) => handle_frame(&dispatcher, &sender, &mut in_flight, line),
            Ok(None) => break,
            Err(e) => {
                warn!(connection = id, "read failed: {e}");
                break;
            }
        }
    }

    // Handlers hold write handles; the socket only closes once they are gone
    in_flight.shutdown().await;
    connection.close();
    debug!(connection = id, "connection closed");
}

/// Decode one frame and dispatch it on its own task in `in_flight`.
///
/// Parse failures are answered right away with a `null` id; they never
/// end the connection.
fn handle_frame(
    dispatcher: &Arc<Dispatcher>,
    sender: &FrameSender,
    in_flight: &mut JoinSet<()>,
    line: String,
) {
    let value: Value = match serde_json::from_str(&line) {
        Ok(value) => value,
        Err(e) => {
            warn!("parse error on incoming frame: {e}");
            sender.send(&RpcResponse::failure(Value::Null, RpcError::parse_error(e.to_string())));
            return;
        }
    };

    let id = value.get("id").cloned();
    let request: RpcRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => {
            sender.send(&RpcResponse::failure(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request(e.to_string()),
            ));
            return;
        }
    };

    let dispatcher = dispatcher.clone();
    let sender = sender.clone();
    in_flight.spawn(async move {
        let outcome = dispatcher.dispatch(&request.method, request.params).await;
        match request.id {
            Some(id) => {
                if let Err(e) = &outcome {
                    debug!(method = %request.method, code = e.code, "request failed: {}", e.message);
                }
                sender.send(&RpcResponse::from_outcome(id, outcome));
            }
            None => debug!(method = %request.method, "notification handled"),
        }
    });
}
