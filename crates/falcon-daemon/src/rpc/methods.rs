//! aria2-compatible method dispatch over the engine API.

use serde_json::{json, Value};

use falcon_core::types::DownloadOptions;
use falcon_core::{DownloadEngine, DownloadTask, TaskStatus};

use super::gid::{parse_gid, to_gid};

/// JSON-RPC error codes. `-32xxx` are protocol errors; small positive
/// codes mirror aria2's engine failures.
pub(crate) const PARSE_ERROR: i64 = -32700;
pub(crate) const INVALID_REQUEST: i64 = -32600;
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;
pub(crate) const INVALID_PARAMS: i64 = -32602;
pub(crate) const UNAUTHORIZED: i64 = -32001;
pub(crate) const ENGINE_FAILURE: i64 = 1;
pub(crate) const TASK_NOT_FOUND: i64 = 2;

pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn invalid_params() -> RpcError {
    RpcError::new(INVALID_PARAMS, "Invalid params")
}

const METHODS: &[&str] = &[
    "aria2.addUri",
    "aria2.pause",
    "aria2.unpause",
    "aria2.remove",
    "aria2.tellStatus",
    "aria2.tellActive",
    "aria2.tellWaiting",
    "aria2.tellStopped",
    "aria2.getGlobalStat",
    "aria2.getVersion",
    "system.listMethods",
    "system.multicall",
];

/// Projects an engine status onto aria2's status vocabulary.
pub(crate) fn aria2_status(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Downloading | TaskStatus::Preparing => "active",
        TaskStatus::Pending => "waiting",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "complete",
        TaskStatus::Cancelled => "removed",
        TaskStatus::Failed => "error",
    }
}

/// The tellStatus object shape aria2 clients expect: numeric fields as
/// strings, plus a synthetic single-entry files array.
pub(crate) fn task_status_json(task: &DownloadTask) -> Value {
    json!({
        "gid": to_gid(task.id()),
        "status": aria2_status(task.status()),
        "totalLength": task.total_bytes().to_string(),
        "completedLength": task.downloaded_bytes().to_string(),
        "downloadSpeed": task.speed().to_string(),
        "errorMessage": task.error_message(),
        "files": [{
            "path": task.output_path().to_string_lossy(),
            "length": task.total_bytes().to_string(),
            "completedLength": task.downloaded_bytes().to_string(),
            "uris": [{"uri": task.url()}],
        }],
    })
}

pub(crate) struct MethodDispatcher<'a> {
    pub engine: &'a DownloadEngine,
    pub secret: &'a str,
}

impl MethodDispatcher<'_> {
    pub fn dispatch(&self, method: &str, mut params: Value) -> Result<Value, RpcError> {
        // Multicall inner calls may redundantly carry the token again.
        self.maybe_strip_token(&mut params);

        match method {
            "system.listMethods" => Ok(json!(METHODS)),
            "system.multicall" => self.multicall(&params),
            "aria2.getVersion" => Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "enabledFeatures": ["jsonrpc", "https", "segmented-download"],
            })),
            "aria2.getGlobalStat" => Ok(self.global_stat()),
            "aria2.addUri" => self.add_uri(&params),
            "aria2.pause" | "aria2.unpause" | "aria2.remove" | "aria2.tellStatus" => {
                self.by_gid(method, &params)
            }
            "aria2.tellActive" => Ok(Value::Array(
                self.engine
                    .active_tasks()
                    .iter()
                    .map(|t| task_status_json(t))
                    .collect(),
            )),
            "aria2.tellWaiting" => {
                let mut waiting = self.engine.tasks_by_status(TaskStatus::Pending);
                waiting.extend(self.engine.tasks_by_status(TaskStatus::Paused));
                self.sliced(&params, waiting)
            }
            "aria2.tellStopped" => {
                let mut stopped = self.engine.tasks_by_status(TaskStatus::Completed);
                stopped.extend(self.engine.tasks_by_status(TaskStatus::Failed));
                stopped.extend(self.engine.tasks_by_status(TaskStatus::Cancelled));
                self.sliced(&params, stopped)
            }
            _ => Err(RpcError::new(METHOD_NOT_FOUND, "Method not found")),
        }
    }

    fn maybe_strip_token(&self, params: &mut Value) {
        if self.secret.is_empty() {
            return;
        }
        let expected = format!("token:{}", self.secret);
        if let Value::Array(items) = params {
            if items.first().and_then(Value::as_str) == Some(expected.as_str()) {
                items.remove(0);
            }
        }
    }

    fn multicall(&self, params: &Value) -> Result<Value, RpcError> {
        let calls = params
            .get(0)
            .and_then(Value::as_array)
            .ok_or_else(invalid_params)?;

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let Some(call) = call.as_object() else {
                results.push(json!({"code": INVALID_REQUEST, "message": "Invalid Request"}));
                continue;
            };
            let method = call
                .get("methodName")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let call_params = call.get("params").cloned().unwrap_or_else(|| json!([]));
            // Per-call failures do not abort the batch.
            match self.dispatch(method, call_params) {
                Ok(value) => results.push(json!([value])),
                Err(e) => results.push(json!({"code": e.code, "message": e.message})),
            }
        }
        Ok(Value::Array(results))
    }

    fn global_stat(&self) -> Value {
        let stats = self.engine.stats();
        let stopped = stats.completed_tasks + stats.failed_tasks + stats.cancelled_tasks;
        json!({
            "downloadSpeed": self.engine.total_speed().to_string(),
            "uploadSpeed": "0",
            "numActive": stats.active_tasks.to_string(),
            "numWaiting": (stats.waiting_tasks + stats.paused_tasks).to_string(),
            "numStopped": stopped.to_string(),
            "numStoppedTotal": stopped.to_string(),
        })
    }

    fn add_uri(&self, params: &Value) -> Result<Value, RpcError> {
        let uris = params
            .get(0)
            .and_then(Value::as_array)
            .filter(|u| !u.is_empty())
            .ok_or_else(invalid_params)?;
        let url = uris[0].as_str().ok_or_else(invalid_params)?;

        let mut options = DownloadOptions::default();
        if let Some(map) = params.get(1).and_then(Value::as_object) {
            apply_aria2_options(&mut options, map);
        }

        let task = self
            .engine
            .add_task(url, options)
            .map_err(|e| RpcError::new(ENGINE_FAILURE, e.to_string()))?;
        self.engine.start_task(task.id());
        Ok(Value::String(to_gid(task.id())))
    }

    fn by_gid(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let gid = params
            .get(0)
            .and_then(Value::as_str)
            .ok_or_else(invalid_params)?;
        let id = parse_gid(gid).ok_or_else(|| RpcError::new(TASK_NOT_FOUND, "Task not found"))?;
        let task = self
            .engine
            .get_task(id)
            .ok_or_else(|| RpcError::new(TASK_NOT_FOUND, "Task not found"))?;

        match method {
            "aria2.pause" => {
                if !self.engine.pause_task(id) {
                    return Err(RpcError::new(ENGINE_FAILURE, "Pause failed"));
                }
                Ok(Value::String(gid.to_string()))
            }
            "aria2.unpause" => {
                if !self.engine.resume_task(id) {
                    return Err(RpcError::new(ENGINE_FAILURE, "Resume failed"));
                }
                Ok(Value::String(gid.to_string()))
            }
            "aria2.remove" => {
                if !self.engine.cancel_task(id) {
                    return Err(RpcError::new(ENGINE_FAILURE, "Remove failed"));
                }
                Ok(Value::String(gid.to_string()))
            }
            _ => Ok(task_status_json(&task)),
        }
    }

    fn sliced(
        &self,
        params: &Value,
        tasks: Vec<std::sync::Arc<DownloadTask>>,
    ) -> Result<Value, RpcError> {
        let offset = int_param(params, 0).ok_or_else(invalid_params)?;
        let num = int_param(params, 1).ok_or_else(invalid_params)?;
        let start = offset.max(0) as usize;
        let count = num.max(0) as usize;
        Ok(Value::Array(
            tasks
                .iter()
                .skip(start)
                .take(count)
                .map(|t| task_status_json(t))
                .collect(),
        ))
    }
}

/// aria2 sends integers both as numbers and as decimal strings.
fn int_param(params: &Value, index: usize) -> Option<i64> {
    let v = params.get(index)?;
    v.as_i64().or_else(|| v.as_str()?.parse().ok())
}

fn str_option(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u64_option(map: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    let v = map.get(key)?;
    v.as_u64().or_else(|| v.as_str()?.parse().ok())
}

/// Maps aria2 option keys onto `DownloadOptions`.
fn apply_aria2_options(options: &mut DownloadOptions, map: &serde_json::Map<String, Value>) {
    if let Some(v) = str_option(map, "dir") {
        options.output_directory = v;
    }
    if let Some(v) = str_option(map, "out") {
        options.output_filename = v;
    }
    if let Some(v) = str_option(map, "user-agent") {
        options.user_agent = v;
    }
    if let Some(v) = str_option(map, "referer") {
        options.referer = v;
    }
    if let Some(v) = str_option(map, "load-cookies") {
        options.cookie_file = v;
    }
    if let Some(v) = str_option(map, "save-cookies") {
        options.cookie_jar = v;
    }
    if let Some(v) = str_option(map, "http-user") {
        options.http_username = v;
    }
    if let Some(v) = str_option(map, "http-passwd") {
        options.http_password = v;
    }
    if let Some(v) = str_option(map, "all-proxy") {
        options.proxy = v;
    }
    if let Some(v) = str_option(map, "all-proxy-user") {
        options.proxy_username = v;
    }
    if let Some(v) = str_option(map, "all-proxy-passwd") {
        options.proxy_password = v;
    }
    match map.get("check-certificate") {
        Some(Value::Bool(b)) => options.verify_ssl = *b,
        Some(Value::String(s)) => options.verify_ssl = s != "false",
        _ => {}
    }
    if let Some(v) = u64_option(map, "max-tries") {
        options.max_retries = v as u32;
    }
    if let Some(v) = u64_option(map, "retry-wait") {
        options.retry_delay_seconds = v;
    }
    if let Some(v) = u64_option(map, "max-connection-per-server") {
        options.max_connections = (v as usize).max(1);
    }
    if let Some(v) = u64_option(map, "max-download-limit") {
        options.speed_limit = v;
    }
    match map.get("header") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(h) = item.as_str() {
                    apply_header_line(options, h);
                }
            }
        }
        Some(Value::String(h)) => apply_header_line(options, h),
        _ => {}
    }
}

fn apply_header_line(options: &mut DownloadOptions, line: &str) {
    if let Some((name, value)) = line.split_once(':') {
        options.set_header(name.trim(), value.trim());
    }
}
