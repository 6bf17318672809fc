//! Per-request resource scopes.
//!
//! `ForwardContext` wraps one upstream call: the provider, the timeout
//! policy, and chainable before/after hooks. `HandleContext` wraps one
//! client-facing request: identity, scenario flags, the response-model
//! label, and the stream hook chain the pipeline drives.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use config::{ProviderConfig, ScenarioFlags};
use uuid::Uuid;

use crate::{
    error::{GatewayError, GatewayResult},
    unified::{UnifiedChunk, UnifiedRequest, UnifiedUsage},
    usage::UsageStatus,
};

/// Hook mutating the outgoing request before the upstream call.
pub type BeforeRequestHook = Box<dyn Fn(&mut UnifiedRequest) -> GatewayResult<()> + Send + Sync>;

/// Hook observing the outcome after the upstream call.
pub type AfterRequestHook = Box<dyn FnOnce(&RequestOutcome) + Send + Sync>;

/// What the after-hooks see once a call finished.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// Final usage, observed or estimated.
    pub usage: UnifiedUsage,
    /// Terminal status.
    pub status: UsageStatus,
    /// Error code from the taxonomy, for non-success outcomes.
    pub error_code: Option<String>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
}

/// Scope of one upstream call.
pub struct ForwardContext {
    /// The provider being called.
    pub provider: ProviderConfig,
    /// Timeout for unary calls; streams carry no outer deadline.
    pub timeout: Option<Duration>,
    before: Vec<BeforeRequestHook>,
    after: Vec<AfterRequestHook>,
}

impl ForwardContext {
    /// Create a scope. Unary calls get the provider's timeout; streaming
    /// calls rely on cancellation alone.
    pub fn new(provider: ProviderConfig, streaming: bool) -> Self {
        let timeout = (!streaming).then(|| Duration::from_secs(provider.timeout_secs));

        ForwardContext {
            provider,
            timeout,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Chain a before-request hook.
    pub fn on_before(mut self, hook: BeforeRequestHook) -> Self {
        self.before.push(hook);
        self
    }

    /// Chain an after-request hook.
    pub fn on_after(mut self, hook: AfterRequestHook) -> Self {
        self.after.push(hook);
        self
    }

    /// Apply the before-hooks to the outgoing request, in order.
    pub fn prepare(&self, request: &mut UnifiedRequest) -> GatewayResult<()> {
        for hook in &self.before {
            hook(request)?;
        }

        Ok(())
    }

    /// Run the after-hooks, in registration order.
    pub fn complete(self, outcome: &RequestOutcome) {
        for hook in self.after {
            hook(outcome);
        }
    }
}

/// Hook observing every stream chunk.
pub type StreamEventHook = Box<dyn FnMut(&UnifiedChunk) + Send>;

/// Hook running once when a stream completes normally.
pub type StreamCompleteHook = Box<dyn FnOnce() + Send>;

/// Hook observing a terminal stream error.
pub type StreamErrorHook = Box<dyn FnMut(&GatewayError) + Send>;

/// Scope of one client-facing request.
pub struct HandleContext {
    /// Scenario tag of the request.
    pub scenario: String,
    /// The scenario's behavior flags.
    pub flags: ScenarioFlags,
    /// Provider serving the request.
    pub provider: Uuid,
    /// Rule that routed the request.
    pub rule: Uuid,
    /// Actual upstream model name.
    pub model: String,
    /// Client-visible request model.
    pub request_model: String,
    /// Label echoed back in responses.
    pub response_model: String,
    on_event: Vec<StreamEventHook>,
    on_complete: Vec<StreamCompleteHook>,
    on_error: Vec<StreamErrorHook>,
}

impl HandleContext {
    /// Create a handle scope.
    pub fn new(
        scenario: String,
        flags: ScenarioFlags,
        provider: Uuid,
        rule: Uuid,
        model: String,
        request_model: String,
        response_model: String,
    ) -> Self {
        HandleContext {
            scenario,
            flags,
            provider,
            rule,
            model,
            request_model,
            response_model,
            on_event: Vec::new(),
            on_complete: Vec::new(),
            on_error: Vec::new(),
        }
    }

    /// Chain a stream-event hook.
    pub fn on_stream_event(mut self, hook: StreamEventHook) -> Self {
        self.on_event.push(hook);
        self
    }

    /// Chain a stream-complete hook.
    pub fn on_stream_complete(mut self, hook: StreamCompleteHook) -> Self {
        self.on_complete.push(hook);
        self
    }

    /// Chain a stream-error hook.
    pub fn on_stream_error(mut self, hook: StreamErrorHook) -> Self {
        self.on_error.push(hook);
        self
    }

    /// Run the event hooks for one chunk, in registration order. A panic
    /// inside a hook is recovered and reported as an error so the stream
    /// can close cleanly instead of tearing down the task.
    pub fn dispatch_event(&mut self, chunk: &UnifiedChunk) -> GatewayResult<()> {
        for hook in &mut self.on_event {
            if catch_unwind(AssertUnwindSafe(|| hook(chunk))).is_err() {
                log::error!("Stream event hook panicked; aborting stream");
                return Err(GatewayError::InternalError(Some("stream handler panic".to_string())));
            }
        }

        Ok(())
    }

    /// Run the complete-hooks once the stream ended normally.
    pub fn dispatch_complete(&mut self) {
        for hook in self.on_complete.drain(..) {
            if catch_unwind(AssertUnwindSafe(hook)).is_err() {
                log::error!("Stream complete hook panicked");
            }
        }
    }

    /// Run the error-hooks for a terminal stream error.
    pub fn dispatch_error(&mut self, error: &GatewayError) {
        for hook in &mut self.on_error {
            if catch_unwind(AssertUnwindSafe(|| hook(error))).is_err() {
                log::error!("Stream error hook panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::unified::UnifiedMessageDelta;

    fn provider() -> ProviderConfig {
        serde_json::from_value(serde_json::json!({
            "uuid": Uuid::new_v4(),
            "name": "p",
            "dialect": "openai",
            "api_base": "https://api.example/v1",
            "credential": { "api_key": "k" },
            "timeout_secs": 30,
        }))
        .unwrap()
    }

    fn chunk() -> UnifiedChunk {
        UnifiedChunk {
            id: "c1".to_string(),
            model: "m".to_string(),
            choices: vec![crate::unified::UnifiedChoiceDelta {
                index: 0,
                delta: UnifiedMessageDelta::default(),
                finish_reason: None,
            }],
            usage: None,
            created: 0,
        }
    }

    #[test]
    fn unary_scope_carries_the_provider_timeout() {
        let unary = ForwardContext::new(provider(), false);
        assert_eq!(unary.timeout, Some(Duration::from_secs(30)));

        let streaming = ForwardContext::new(provider(), true);
        assert_eq!(streaming.timeout, None);
    }

    #[test]
    fn before_hooks_apply_in_order() {
        let context = ForwardContext::new(provider(), false)
            .on_before(Box::new(|req| {
                req.system = Some("first".to_string());
                Ok(())
            }))
            .on_before(Box::new(|req| {
                let current = req.system.take().unwrap_or_default();
                req.system = Some(format!("{current}+second"));
                Ok(())
            }));

        let mut request: UnifiedRequest = serde_json::from_value(serde_json::json!({
            "model": "m",
            "messages": [],
            "system": null,
            "max_tokens": null,
            "temperature": null,
            "top_p": null,
            "top_k": null,
            "frequency_penalty": null,
            "presence_penalty": null,
            "stop_sequences": null,
            "stream": null,
            "thinking_budget": null,
            "tools": null,
            "tool_choice": null,
            "parallel_tool_calls": null,
            "user_id": null,
        }))
        .unwrap();

        context.prepare(&mut request).unwrap();
        assert_eq!(request.system.as_deref(), Some("first+second"));
    }

    #[test]
    fn panicking_event_hook_is_recovered() {
        let calls = Arc::new(AtomicU32::new(0));
        let observed = calls.clone();

        let mut handle = HandleContext::new(
            "default".to_string(),
            ScenarioFlags::default(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "m".to_string(),
            "alpha".to_string(),
            "alpha".to_string(),
        )
        .on_stream_event(Box::new(move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
        }))
        .on_stream_event(Box::new(|_| panic!("boom")));

        let chunk = chunk();

        assert!(handle.dispatch_event(&chunk).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
