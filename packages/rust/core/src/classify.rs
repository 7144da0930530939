//! Classification bridge: the LLM-backed [`Classifier`] implementation.
//!
//! Spawns a JSON-lines stdin/stdout bridge subprocess and exchanges one
//! request/response pair per classification call. The bridge's answer text
//! is parsed as JSON; anything unparseable degrades to `Ok(None)` so call
//! sites fall back instead of failing.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use orgscope_shared::{Classifier, ClassifierConfig, ClassifyTask, OrgScopeError, Result};
use orgscope_storage::Storage;

// ---------------------------------------------------------------------------
// Protocol types (mirroring the bridge schemas)
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "classify")]
    Classify { id: String, task: &'a ClassifyTask },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "result")]
    Result { id: String, result: BridgeResult },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

/// Classification result from the bridge.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct BridgeResult {
    text: String,
    tokens_in: u64,
    tokens_out: u64,
    model: String,
    latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Handle to the spawned bridge subprocess.
struct BridgeHandle {
    child: Child,
    stdin: std::process::ChildStdin,
    reader: BufReader<std::process::ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    /// Spawn the bridge subprocess and wait for its ready signal.
    fn spawn(config: &ClassifierConfig) -> Result<Self> {
        info!(cmd = %config.bridge_cmd, script = %config.bridge_script, "spawning classifier bridge");

        let mut child = Command::new(&config.bridge_cmd)
            .arg("run")
            .arg(&config.bridge_script)
            .env("ORGSCOPE_MODEL", &config.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Bridge logs go to parent stderr
            .spawn()
            .map_err(|e| {
                OrgScopeError::Classify(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OrgScopeError::Classify("failed to capture bridge stdin".into()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OrgScopeError::Classify("failed to capture bridge stdout".into()))?;

        let reader = BufReader::new(stdout);

        let mut handle = Self {
            child,
            stdin,
            reader,
            request_counter: 0,
        };

        handle.wait_for_ready()?;
        Ok(handle)
    }

    /// Wait for the bridge to send its "ready" message.
    fn wait_for_ready(&mut self) -> Result<()> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| OrgScopeError::Classify(format!("bridge read error: {e}")))?;

        let msg: ResponseMessage = serde_json::from_str(line.trim()).map_err(|e| {
            OrgScopeError::Classify(format!("invalid bridge ready message: {e} (got: {line})"))
        })?;

        match msg {
            ResponseMessage::Ready => {
                info!("classifier bridge is ready");
                Ok(())
            }
            _ => Err(OrgScopeError::Classify(format!(
                "expected ready message, got: {line}"
            ))),
        }
    }

    /// Send a classification task and wait for the response text.
    fn send_task(&mut self, task: &ClassifyTask) -> Result<String> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let request = RequestMessage::Classify {
            id: id.clone(),
            task,
        };

        let json = serde_json::to_string(&request)
            .map_err(|e| OrgScopeError::Classify(format!("failed to serialize request: {e}")))?;

        writeln!(self.stdin, "{json}")
            .map_err(|e| OrgScopeError::Classify(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| OrgScopeError::Classify(format!("failed to flush bridge stdin: {e}")))?;

        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| OrgScopeError::Classify(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(OrgScopeError::Classify(
                "bridge closed stdout unexpectedly".into(),
            ));
        }

        let msg: ResponseMessage = serde_json::from_str(line.trim()).map_err(|e| {
            OrgScopeError::Classify(format!(
                "invalid bridge response: {e} (got: {})",
                &line[..line.len().min(200)]
            ))
        })?;

        match msg {
            ResponseMessage::Result { id: resp_id, result } => {
                debug_assert_eq!(resp_id, id);
                Ok(result.text)
            }
            ResponseMessage::Error { id: _, error } => Err(OrgScopeError::Classify(error)),
            ResponseMessage::Ready => Err(OrgScopeError::Classify(
                "unexpected ready message during classification".into(),
            )),
        }
    }

    /// Send shutdown and wait for the bridge to exit.
    fn shutdown(&mut self) {
        let json = serde_json::to_string(&RequestMessage::Shutdown).unwrap();
        let _ = writeln!(self.stdin, "{json}");
        let _ = self.stdin.flush();

        match self.child.wait() {
            Ok(status) => info!(?status, "classifier bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeClassifier
// ---------------------------------------------------------------------------

/// [`Classifier`] backed by the bridge subprocess.
pub struct BridgeClassifier {
    bridge: Mutex<BridgeHandle>,
    model: String,
}

impl BridgeClassifier {
    /// Spawn the bridge and wait for it to come up.
    pub fn spawn(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            bridge: Mutex::new(BridgeHandle::spawn(config)?),
            model: config.model.clone(),
        })
    }

    /// The model identifier used for cache keying.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Classifier for BridgeClassifier {
    fn classify(&self, task: &ClassifyTask) -> Result<Option<serde_json::Value>> {
        let mut bridge = self
            .bridge
            .lock()
            .map_err(|_| OrgScopeError::Classify("bridge mutex poisoned".into()))?;

        let text = bridge.send_task(task)?;
        Ok(parse_answer_text(&text))
    }
}

impl Drop for BridgeClassifier {
    fn drop(&mut self) {
        if let Ok(mut bridge) = self.bridge.lock() {
            bridge.shutdown();
        }
    }
}

/// Parse the bridge's answer text as JSON. Null, empty, and malformed
/// answers are all `None` — callers treat them identically.
fn parse_answer_text(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Models often wrap JSON in a code fence.
    let trimmed = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "classifier answer was not valid JSON");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Cached classification
// ---------------------------------------------------------------------------

/// Compute a prompt hash for cache keying.
fn prompt_hash(task: &ClassifyTask) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.prompt.as_bytes());
    if let Some(context) = &task.context_json {
        hasher.update(context.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Run a classification with a storage-backed result cache.
///
/// Cache hits skip the bridge entirely; misses are stored after the call.
/// The cached value `"null"` records a declined answer so repeated runs do
/// not re-ask questions the model cannot answer.
pub async fn classify_cached(
    storage: &Storage,
    classifier: &dyn Classifier,
    model: &str,
    task: &ClassifyTask,
) -> Result<Option<serde_json::Value>> {
    let hash = prompt_hash(task);

    if let Some(cached) = storage
        .get_classify_cache(&task.task_type, &hash, model)
        .await?
    {
        debug!(task_type = %task.task_type, "classification cache hit");
        return Ok(serde_json::from_str::<serde_json::Value>(&cached)
            .ok()
            .filter(|v| !v.is_null()));
    }

    let answer = classifier.classify(task)?;

    let to_store = match &answer {
        Some(value) => value.to_string(),
        None => "null".to_string(),
    };
    if let Err(e) = storage
        .set_classify_cache(&task.task_type, &hash, model, &to_store)
        .await
    {
        warn!(error = %e, "failed to store classification result");
    }

    Ok(answer)
}
