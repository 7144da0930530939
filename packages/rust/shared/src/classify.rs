//! The classification capability contract.
//!
//! Classification (LLM-backed) is the least reliable dependency in the
//! pipeline, so it is modeled as an explicit capability: every call returns
//! `Ok(None)` for null or malformed responses, and every call site carries
//! a documented fallback. Implementations live in `orgscope-core`
//! ([`BridgeClassifier`]) — this crate only defines the seam.

use serde::Serialize;

use crate::error::Result;

/// One classification request. `task_type` selects the bridge-side prompt
/// template; `prompt` carries the user-visible question; `context_json`
/// carries structured supporting data.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyTask {
    pub task_type: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_json: Option<String>,
}

impl ClassifyTask {
    pub fn new(task_type: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            prompt: prompt.into(),
            context_json: None,
        }
    }

    pub fn with_context(mut self, context_json: impl Into<String>) -> Self {
        self.context_json = Some(context_json.into());
        self
    }
}

/// Capability interface for external classification calls.
///
/// `Ok(None)` means "no usable answer" — the bridge returned null, the
/// response was malformed, or classification is disabled. Callers must
/// treat all three identically and fall back. `Err` is reserved for
/// programmer/transport errors the caller cannot degrade around.
pub trait Classifier: Send + Sync {
    fn classify(&self, task: &ClassifyTask) -> Result<Option<serde_json::Value>>;
}

/// A classifier that never answers. Used in tests and when classification
/// is disabled; exercises every fallback branch.
pub struct NullClassifier;

impl Classifier for NullClassifier {
    fn classify(&self, _task: &ClassifyTask) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_classifier_always_declines() {
        let task = ClassifyTask::new("division_grouping", "group these people");
        let result = NullClassifier.classify(&task).expect("never errors");
        assert!(result.is_none());
    }

    #[test]
    fn task_serializes_without_empty_context() {
        let task = ClassifyTask::new("subsidiary_list", "list subsidiaries of Acme");
        let json = serde_json::to_string(&task).expect("serialize");
        assert!(json.contains(r#""task_type":"subsidiary_list"#));
        assert!(!json.contains("context_json"));

        let task = task.with_context(r#"{"parent":"Acme"}"#);
        let json = serde_json::to_string(&task).expect("serialize");
        assert!(json.contains("context_json"));
    }
}
