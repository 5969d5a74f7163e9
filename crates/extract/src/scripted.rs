use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::CompletionError;
use crate::llm::CompletionCapability;
use crate::prompt::PromptKind;

/// A prompt pair the scripted backend received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: PromptKind,
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(Value),
    Fail(String),
}

/// Deterministic completion backend: replies are queued per stage and handed
/// out in order. An exhausted queue behaves like an unavailable backend.
#[derive(Default)]
pub struct ScriptedCompletion {
    queues: Mutex<HashMap<PromptKind, VecDeque<Scripted>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: PromptKind, reply: Value) -> &Self {
        self.enqueue(kind, Scripted::Reply(reply));
        self
    }

    pub fn push_failure(&self, kind: PromptKind, message: impl Into<String>) -> &Self {
        self.enqueue(kind, Scripted::Fail(message.into()));
        self
    }

    fn enqueue(&self, kind: PromptKind, item: Scripted) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(kind).or_default().push_back(item);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_of(&self, kind: PromptKind) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }
}

#[async_trait]
impl CompletionCapability for ScriptedCompletion {
    async fn complete(&self, system: &str, user: &str, _temperature: f32, _retries: usize) -> Result<Value> {
        let kind = PromptKind::of(system);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                kind,
                system: system.to_string(),
                user: user.to_string(),
            });

        let next = self
            .queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Scripted::Reply(value)) => Ok(value),
            Some(Scripted::Fail(message)) => Err(CompletionError::Unavailable(message).into()),
            None => Err(CompletionError::Unavailable(format!("no scripted reply for {kind:?}")).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{EXTRACTION_SYSTEM_PROMPT, VALIDATION_SYSTEM_PROMPT};
    use serde_json::json;

    #[tokio::test]
    async fn replies_are_routed_by_stage() {
        let scripted = ScriptedCompletion::new();
        scripted
            .push(PromptKind::Extraction, json!({"entities": []}))
            .push(PromptKind::Validation, json!({"accepted": []}));

        let v = scripted.complete(VALIDATION_SYSTEM_PROMPT, "u", 0.3, 2).await.unwrap();
        assert_eq!(v, json!({"accepted": []}));
        let e = scripted.complete(EXTRACTION_SYSTEM_PROMPT, "u", 0.3, 2).await.unwrap();
        assert_eq!(e, json!({"entities": []}));

        assert!(scripted.complete(EXTRACTION_SYSTEM_PROMPT, "u", 0.3, 2).await.is_err());
        assert_eq!(scripted.calls_of(PromptKind::Extraction), 2);
        assert_eq!(scripted.calls().len(), 3);
    }
}
