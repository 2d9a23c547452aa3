//! Chromium over the DevTools protocol.

use super::{BrowserDriver, Cookies, PageId};
use crate::config::Config;
use crate::errors::{Result, TailError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace};

const DEVTOOLS_BANNER: &str = "DevTools listening on ";
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

const CHROME_ARGS: &[&str] = &[
    "--disable-accelerated-2d-canvas",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-features=site-per-process",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-setuid-sandbox",
    "--disable-sync",
    "--disable-translate",
    "--disable-web-security",
    "--disable-webgl",
    "--metrics-recording-only",
    "--no-first-run",
    "--safebrowsing-disable-auto-update",
    "--no-sandbox",
    "--password-store=basic",
    "--use-mock-keychain",
    "--lang=en-US",
    "--remote-debugging-port=0",
];

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

/// A Chromium child process driven through its DevTools websocket.
pub struct CdpBrowser {
    child: tokio::sync::Mutex<Child>,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    // page (target) id -> flattened session id
    sessions: Mutex<HashMap<PageId, String>>,
    tasks: Vec<JoinHandle<()>>,
}

impl CdpBrowser {
    /// Start Chromium, pointed at the intercepting proxy.
    pub async fn launch(config: &Config) -> Result<Self> {
        let mut command = Command::new(&config.chromium);
        command
            .args(CHROME_ARGS)
            .arg(format!("--proxy-server=127.0.0.1:{}", config.port))
            .arg(format!("--user-agent={}", config.user_agent))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if config.headless {
            command.arg("--headless=new");
        }
        let mut child = command.arg("about:blank").spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TailError::Browser("no stderr pipe".into()))?;
        let mut stderr = BufReader::new(stderr).lines();
        let ws_url = tokio::time::timeout(LAUNCH_TIMEOUT, async {
            while let Some(line) = stderr.next_line().await? {
                if let Some(url) = line.trim().strip_prefix(DEVTOOLS_BANNER) {
                    return Ok::<_, TailError>(url.to_string());
                }
            }
            Err(TailError::Browser("browser exited before DevTools came up".into()))
        })
        .await
        .map_err(|_| TailError::Browser("timed out waiting for DevTools".into()))??;
        debug!("devtools at {}", ws_url);

        // keep draining stderr, a full pipe would stall the browser
        let drain = tokio::spawn(async move {
            while let Ok(Some(line)) = stderr.next_line().await {
                trace!("chromium: {}", line);
            }
        });

        let (ws, _) = connect_async(ws_url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut outbox) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    dispatch(&reader_pending, &text);
                }
            }
            // fail everything still waiting
            if let Ok(mut pending) = reader_pending.lock() {
                pending.clear();
            }
        });

        Ok(Self {
            child: tokio::sync::Mutex::new(child),
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            tasks: vec![drain, writer, reader],
        })
    }

    async fn call(&self, method: &str, params: Value, session: Option<&str>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session {
            request["sessionId"] = Value::String(session.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| TailError::Browser("poisoned".into()))?
            .insert(id, tx);
        self.outgoing
            .send(Message::Text(request.to_string()))
            .map_err(|_| TailError::Browser("devtools connection closed".into()))?;

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(TailError::Browser(format!("{}: {}", method, message))),
            Err(_) => Err(TailError::Browser("devtools connection closed".into())),
        }
    }

    fn session(&self, page: &PageId) -> Result<String> {
        self.sessions
            .lock()
            .map_err(|_| TailError::Browser("poisoned".into()))?
            .get(page)
            .cloned()
            .ok_or_else(|| TailError::Browser(format!("unknown page {}", page)))
    }
}

fn dispatch(pending: &Pending, text: &str) {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let Some(id) = msg.get("id").and_then(Value::as_u64) else {
        trace!("devtools event: {}", msg.get("method").unwrap_or(&serde_json::Value::Null));
        return;
    };
    let Some(tx) = pending.lock().ok().and_then(|mut p| p.remove(&id)) else {
        return;
    };
    let reply = match msg.get("error") {
        Some(error) => Err(error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string()),
        None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = tx.send(reply);
}

#[async_trait]
impl BrowserDriver for CdpBrowser {
    async fn new_page(&self) -> Result<PageId> {
        let created = self
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target = created["targetId"]
            .as_str()
            .ok_or_else(|| TailError::Browser("createTarget: no targetId".into()))?
            .to_string();
        let attached = self
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target, "flatten": true }),
                None,
            )
            .await?;
        let session = attached["sessionId"]
            .as_str()
            .ok_or_else(|| TailError::Browser("attachToTarget: no sessionId".into()))?
            .to_string();
        self.sessions
            .lock()
            .map_err(|_| TailError::Browser("poisoned".into()))?
            .insert(target.clone(), session);
        Ok(target)
    }

    async fn goto(&self, page: &PageId, url: &str) -> Result<()> {
        let session = self.session(page)?;
        let navigated = self
            .call("Page.navigate", json!({ "url": url }), Some(&session))
            .await?;
        match navigated.get("errorText").and_then(Value::as_str) {
            Some(error) => Err(TailError::Browser(format!("navigating to {}: {}", url, error))),
            None => Ok(()),
        }
    }

    async fn close_page(&self, page: &PageId) -> Result<()> {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(page);
        }
        self.call("Target.closeTarget", json!({ "targetId": page }), None)
            .await
            .map(|_| ())
    }

    async fn evaluate(&self, page: &PageId, expression: &str) -> Result<Value> {
        let session = self.session(page)?;
        let evaluated = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true, "awaitPromise": true }),
                Some(&session),
            )
            .await?;
        if let Some(details) = evaluated.get("exceptionDetails") {
            return Err(TailError::Browser(format!("evaluate: {}", details)));
        }
        Ok(evaluated["result"]["value"].clone())
    }

    async fn cookies(&self) -> Result<Cookies> {
        let cookies = self.call("Storage.getCookies", json!({}), None).await?;
        match cookies.get("cookies") {
            Some(Value::Array(cookies)) => Ok(cookies.clone()),
            _ => Ok(vec![]),
        }
    }

    async fn set_cookies(&self, cookies: &Cookies) -> Result<()> {
        // getCookies reports a few read-only fields that setCookies rejects
        let cookies: Vec<Value> = cookies
            .iter()
            .cloned()
            .map(|mut cookie| {
                if let Some(fields) = cookie.as_object_mut() {
                    fields.remove("size");
                    fields.remove("session");
                }
                cookie
            })
            .collect();
        self.call("Storage.setCookies", json!({ "cookies": cookies }), None)
            .await
            .map(|_| ())
    }

    async fn close(&self) -> Result<()> {
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            self.call("Browser.close", json!({}), None),
        )
        .await;
        let mut child = self.child.lock().await;
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        Ok(())
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
