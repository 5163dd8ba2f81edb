//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Talks to one page target of a Chrome/Chromium instance via its
//! debugging WebSocket endpoint. Commands are sent as JSON with an
//! auto-incrementing id; a reader task routes responses back to the
//! caller through oneshot channels.

use avrender_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

/// Guard timeout for a single CDP command round trip. Workflow-level
/// waits are bounded separately by the poll loops.
const COMMAND_TIMEOUT_SECS: u64 = 30;

pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Handle to the reader task so we can abort on close.
    _reader_handle: tokio::task::JoinHandle<()>,
    /// Handle to the writer task.
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint (a page target).
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Cdp(format!("failed to connect to {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: routes command responses by id. Events are not
        // consumed by this driver; observed state is polled instead.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("failed to send command: {}", e)))?;

        let timeout = tokio::time::timeout(
            std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS),
            rx,
        );
        match timeout.await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("{}: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp("response channel closed".into())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method, COMMAND_TIMEOUT_SECS
                )))
            }
        }
    }

    /// Enable a CDP domain (e.g. "Page", "Runtime", "DOM", "Network").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Navigate the page to a URL.
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url}))
            .await
    }

    /// Evaluate JavaScript in the page context, returning the value.
    pub async fn evaluate_js(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Evaluate JavaScript expected to yield a DOM element, returning
    /// its remote objectId. `None` if the expression produced null or
    /// a non-object value.
    pub async fn evaluate_object(&self, expression: &str) -> Result<Option<String>> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": false,
                }),
            )
            .await?;
        let obj = result.get("result");
        let subtype = obj
            .and_then(|o| o.get("subtype"))
            .and_then(|v| v.as_str());
        if subtype == Some("null") {
            return Ok(None);
        }
        Ok(obj
            .and_then(|o| o.get("objectId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    /// Call a function on a remote object.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
    ) -> Result<Value> {
        self.send_command(
            "Runtime.callFunctionOn",
            json!({
                "objectId": object_id,
                "functionDeclaration": function_declaration,
                "returnByValue": true,
            }),
        )
        .await
    }

    /// Set files on a file input element identified by objectId.
    pub async fn set_file_input_files(
        &self,
        files: Vec<String>,
        object_id: &str,
    ) -> Result<()> {
        self.send_command(
            "DOM.setFileInputFiles",
            json!({
                "files": files,
                "objectId": object_id,
            }),
        )
        .await?;
        Ok(())
    }

    /// Create a new page target (tab) with the given URL. Used in
    /// attach mode so the driver works in its own tab.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no targetId returned from createTarget".into()))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
