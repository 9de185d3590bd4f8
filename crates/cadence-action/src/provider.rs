//! Completion provider boundary.
//!
//! Concrete agents ask a [`CompletionProvider`] for text. Real backends live
//! in the host; [`StaticProvider`] ships for tests and offline runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            model: None,
        }
    }
}

/// Text-completion backend used by agents.
///
/// Failures should be reported as [`ActionError::Provider`] (retryable) or
/// [`ActionError::Timeout`].
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn get_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ActionError>;

    fn name(&self) -> &str {
        "provider"
    }
}

/// Provider that replays scripted responses, then falls back to a fixed reply.
pub struct StaticProvider {
    scripted: Mutex<VecDeque<Result<String, ActionError>>>,
    fallback: Result<String, ActionError>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl Default for StaticProvider {
    fn default() -> Self {
        Self::new("ok")
    }
}

impl StaticProvider {
    /// Always answer with `reply` unless a scripted response is queued.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            fallback: Ok(reply.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with `error` unless a scripted response is queued.
    pub fn failing(error: ActionError) -> Self {
        Self {
            fallback: Err(error),
            ..Self::new("")
        }
    }

    /// Queue a one-off response ahead of the fallback.
    pub fn push_response(&self, response: Result<String, ActionError>) {
        self.scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CompletionProvider for StaticProvider {
    async fn get_completion(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
