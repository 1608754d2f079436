//! Scripted `LLMProvider` doubles for unit tests.

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LLMResponse, LlmError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reaction to a `chat` call.
pub(crate) enum Step {
    Reply {
        content: String,
        input_tokens: usize,
        output_tokens: usize,
    },
    Fail(String),
    /// Sleep far longer than any test timeout.
    Hang,
}

impl Step {
    pub(crate) fn reply(content: &str, input_tokens: usize, output_tokens: usize) -> Self {
        Step::Reply {
            content: content.to_string(),
            input_tokens,
            output_tokens,
        }
    }
}

/// Answers calls from a queue, in call order.
pub(crate) struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next_step(&self) -> edgequake_llm::Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply {
                content,
                input_tokens,
                output_tokens,
            }) => Ok(LLMResponse::new(content, "scripted").with_usage(input_tokens, output_tokens)),
            Some(Step::Fail(msg)) => Err(LlmError::NetworkError(msg)),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(LlmError::NetworkError("hang finished".into()))
            }
            None => Err(LlmError::ApiError("script exhausted".into())),
        }
    }
}

/// Answers by the base64 payload of the attached image, after a delay.
pub(crate) struct PerImageProvider {
    replies: HashMap<String, (Duration, String)>,
}

impl PerImageProvider {
    pub(crate) fn new(replies: Vec<(&str, u64, String)>) -> Self {
        Self {
            replies: replies
                .into_iter()
                .map(|(key, delay_ms, reply)| {
                    (key.to_string(), (Duration::from_millis(delay_ms), reply))
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn max_context_length(&self) -> usize {
        8192
    }

    async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
        self.next_step().await
    }

    async fn complete_with_options(
        &self,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.next_step().await
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.next_step().await
    }
}

#[async_trait]
impl LLMProvider for PerImageProvider {
    fn name(&self) -> &str {
        "per-image"
    }

    fn model(&self) -> &str {
        "per-image"
    }

    fn max_context_length(&self) -> usize {
        8192
    }

    async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
        Err(LlmError::InvalidRequest("no image attached".into()))
    }

    async fn complete_with_options(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.complete(prompt).await
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> edgequake_llm::Result<LLMResponse> {
        let key = messages
            .iter()
            .filter_map(|m| m.images.as_ref())
            .flatten()
            .map(|img| img.data.clone())
            .next()
            .ok_or_else(|| LlmError::InvalidRequest("no image attached".into()))?;
        let (delay, reply) = self
            .replies
            .get(&key)
            .cloned()
            .ok_or_else(|| LlmError::InvalidRequest(format!("unexpected image {key}")))?;
        tokio::time::sleep(delay).await;
        Ok(LLMResponse::new(reply, "per-image").with_usage(10, 2))
    }
}
