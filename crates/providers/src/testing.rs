//! Scripted in-process provider for exercising routing and lifecycle code
//! without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::{ModelSpec, DEFAULT_MAX_WAIT};
use crate::client::{GenerationOutput, GenerationRequest, PreparedRequest, ProviderClient, Submission};
use crate::error::{ProviderError, ProviderErrorKind};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Return these URLs.
    Images(Vec<String>),
    /// Fail with this kind.
    Fail(ProviderErrorKind),
}

/// A provider whose replies are queued by the test. Once the queue is
/// empty every call succeeds with one image.
pub struct FakeProvider {
    name: String,
    models: Vec<ModelSpec>,
    webhooks: bool,
    delay: Duration,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    cancels: Mutex<Vec<String>>,
    probe_ok: AtomicBool,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            models: vec![fake_model(&format!("{name}-model"))],
            webhooks: false,
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
            probe_ok: AtomicBool::new(true),
        }
    }

    pub fn with_models(mut self, ids: &[&str]) -> Self {
        self.models = ids.iter().map(|id| fake_model(id)).collect();
        self
    }

    pub fn with_webhooks(mut self) -> Self {
        self.webhooks = true;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, reply: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    pub fn fail_next(&self, kind: ProviderErrorKind) {
        self.push(Scripted::Fail(kind));
    }

    pub fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    /// Number of `generate` and `submit_with_webhook` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancels.lock().map(|c| c.clone()).unwrap_or_default()
    }

    async fn next_reply(&self) -> (usize, Scripted) {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self
            .script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| Scripted::Images(vec![format!("https://{}.test/{n}.png", self.name)]));
        (n, reply)
    }

    fn error(&self, kind: ProviderErrorKind) -> ProviderError {
        ProviderError::new(&self.name, kind, format!("scripted {kind:?}"))
    }
}

fn fake_model(id: &str) -> ModelSpec {
    ModelSpec {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        handle: id.to_string(),
        max_width: 2048,
        max_height: 2048,
        max_steps: 100,
        supports_negative_prompt: true,
        estimated_time_secs: 1.0,
        cost_per_image: None,
        max_wait: DEFAULT_MAX_WAIT,
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn estimate_time(&self, request: &PreparedRequest) -> f64 {
        request.model.estimated_time_secs * f64::from(request.params.batch_size)
    }

    fn supports_webhooks(&self) -> bool {
        self.webhooks
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, ProviderError> {
        let prepared = self.prepare(request);
        match self.next_reply().await {
            (_, Scripted::Fail(kind)) => Err(self.error(kind)),
            (_, Scripted::Images(images)) if images.is_empty() => {
                Err(self.error(ProviderErrorKind::EmptyResult))
            }
            (_, Scripted::Images(images)) => Ok(GenerationOutput {
                images,
                provider: self.name.clone(),
                model: prepared.model.id.clone(),
                params: prepared.params,
                generation_time: self.delay,
                external_id: None,
            }),
        }
    }

    async fn submit_with_webhook(
        &self,
        request: &GenerationRequest,
        _webhook_url: &str,
    ) -> Result<Submission, ProviderError> {
        if !self.webhooks {
            return Err(self.error(ProviderErrorKind::Unsupported));
        }
        let prepared = self.prepare(request);
        match self.next_reply().await {
            (_, Scripted::Fail(kind)) => Err(self.error(kind)),
            (n, Scripted::Images(_)) => Ok(Submission {
                provider: self.name.clone(),
                model: prepared.model.id.clone(),
                params: prepared.params,
                external_id: format!("{}-ext-{n}", self.name),
            }),
        }
    }

    async fn cancel(&self, external_id: &str) -> Result<(), ProviderError> {
        if let Ok(mut cancels) = self.cancels.lock() {
            cancels.push(external_id.to_string());
        }
        Ok(())
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(self.error(ProviderErrorKind::Network))
        }
    }
}
