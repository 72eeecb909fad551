//! JSON-RPC 2.0 server projecting the engine over HTTP/1.1.
//!
//! One request per connection with `Connection: close`; accepts run on a
//! dedicated thread, each connection on its own worker. Authentication is
//! aria2-style: the first params element must be `token:<secret>` when a
//! secret is configured.

mod gid;
mod http;
mod methods;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use falcon_core::DownloadEngine;

use methods::{MethodDispatcher, INVALID_REQUEST, PARSE_ERROR, UNAUTHORIZED};

#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub bind_address: String,
    /// 0 asks the OS for an ephemeral port (useful in tests).
    pub listen_port: u16,
    /// Empty disables authentication.
    pub secret: String,
    pub enable_cors: bool,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            listen_port: 6800,
            secret: String::new(),
            enable_cors: false,
        }
    }
}

struct ServerShared {
    engine: DownloadEngine,
    config: RpcServerConfig,
    stop_requested: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

pub struct RpcServer {
    shared: Arc<ServerShared>,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl RpcServer {
    pub fn new(engine: DownloadEngine, config: RpcServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                engine,
                config,
                stop_requested: AtomicBool::new(false),
                workers: Mutex::new(Vec::new()),
            }),
            local_addr: Mutex::new(None),
            accept_thread: Mutex::new(None),
        }
    }

    /// Binds and starts the accept loop; returns the bound address.
    pub fn start(&self) -> Result<SocketAddr> {
        let bind = format!(
            "{}:{}",
            self.shared.config.bind_address, self.shared.config.listen_port
        );
        let listener = TcpListener::bind(&bind).with_context(|| format!("bind {}", bind))?;
        let addr = listener.local_addr().context("local_addr")?;
        *self.local_addr.lock().unwrap() = Some(addr);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || accept_loop(listener, shared));
        *self.accept_thread.lock().unwrap() = Some(handle);

        tracing::info!("JSON-RPC server listening on {}", addr);
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Stops accepting, wakes the accept loop, and joins every worker.
    /// Idempotent.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if let Some(addr) = self.local_addr() {
            // The listener blocks in accept; poke it awake.
            let _ = TcpStream::connect(addr);
        }
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let workers: Vec<_> = self.shared.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    for stream in listener.incoming() {
        if shared.stop_requested.load(Ordering::SeqCst) {
            break;
        }
        let Ok(stream) = stream else { continue };
        let shared_conn = Arc::clone(&shared);
        let handle = std::thread::spawn(move || handle_connection(stream, &shared_conn));
        shared.workers.lock().unwrap().push(handle);
    }
}

fn cors_headers(config: &RpcServerConfig) -> Vec<(&'static str, &'static str)> {
    if config.enable_cors {
        vec![
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Methods", "POST, OPTIONS"),
            ("Access-Control-Allow-Headers", "Content-Type"),
        ]
    } else {
        Vec::new()
    }
}

fn handle_connection(mut stream: TcpStream, shared: &ServerShared) {
    let Some(request) = http::read_request(&mut stream) else {
        return;
    };
    let extra = cors_headers(&shared.config);

    if request.method.eq_ignore_ascii_case("OPTIONS") {
        http::write_response(&mut stream, 204, "No Content", &extra, "");
        return;
    }
    if !request.method.eq_ignore_ascii_case("POST") {
        http::write_response(
            &mut stream,
            405,
            "Method Not Allowed",
            &extra,
            r#"{"error":"method not allowed"}"#,
        );
        return;
    }
    if request.path != "/" && request.path != "/jsonrpc" {
        http::write_response(
            &mut stream,
            404,
            "Not Found",
            &extra,
            r#"{"error":"not found"}"#,
        );
        return;
    }

    let body = handle_jsonrpc(shared, &request.body).to_string();
    http::write_response(&mut stream, 200, "OK", &extra, &body);
}

fn error_response(id: &Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message.into()},
    })
}

fn handle_jsonrpc(shared: &ServerShared, body: &str) -> Value {
    let mut id = Value::Null;

    let request: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return error_response(&id, PARSE_ERROR, format!("Parse error: {}", e)),
    };
    let Some(obj) = request.as_object() else {
        return error_response(&id, INVALID_REQUEST, "Invalid Request");
    };

    id = obj.get("id").cloned().unwrap_or(Value::Null);
    let method = obj.get("method").and_then(Value::as_str).unwrap_or("");
    let mut params = obj.get("params").cloned().unwrap_or_else(|| json!([]));

    if method.is_empty() || (!params.is_array() && !params.is_object()) {
        return error_response(&id, INVALID_REQUEST, "Invalid Request");
    }

    if !validate_and_strip_token(&mut params, &shared.config.secret) {
        return error_response(&id, UNAUTHORIZED, "Unauthorized");
    }

    let dispatcher = MethodDispatcher {
        engine: &shared.engine,
        secret: &shared.config.secret,
    };
    match dispatcher.dispatch(method, params) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(e) => error_response(&id, e.code, e.message),
    }
}

/// aria2-style authentication: with a secret configured, the first params
/// element must be `token:<secret>`, and is removed before dispatch.
fn validate_and_strip_token(params: &mut Value, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    let Value::Array(items) = params else {
        return false;
    };
    let expected = format!("token:{}", secret);
    if items.first().and_then(Value::as_str) != Some(expected.as_str()) {
        return false;
    }
    items.remove(0);
    true
}
