//! Shared request preparation: scenario and rule resolution, smart
//! routing, service selection, compaction, max-token fill, and the
//! per-request contexts the forwarding paths run under.

use std::sync::Arc;

use config::{Dialect, ProviderConfig, Service};
use jiff::Timestamp;

use crate::{
    Gateway,
    balance::HealthFilter,
    context::{ForwardContext, HandleContext, RequestOutcome},
    error::{GatewayError, GatewayResult},
    record::{RecordedRequest, RecorderHandle},
    route, token_count,
    unified::UnifiedRequest,
    usage::{UsageRecord, UsageStatus, UsageTracker, categorize_error},
};

/// Everything a forwarding path needs for one routed request.
pub(super) struct PreparedRequest {
    /// The outbound request, compacted and rewritten to the upstream
    /// model name.
    pub request: UnifiedRequest,
    /// The selected provider.
    pub provider: ProviderConfig,
    /// The selected service.
    pub service: Service,
    /// The handle context carrying identity and stream hooks.
    pub context: HandleContext,
    /// Statistics window of the selected service.
    pub window_seconds: u64,
    /// Input-token estimate of the outbound request.
    pub input_estimate: u32,
    /// Recording handle, when the scenario taps this request.
    pub recorder: Option<RecorderHandle>,
}

pub(super) fn prepare(
    gateway: &Gateway,
    scenario_tag: &str,
    mut request: UnifiedRequest,
    recorded: RecordedRequest,
) -> GatewayResult<PreparedRequest> {
    let config = gateway.config.current();

    let scenario = route::resolve_scenario(&config, scenario_tag)?;
    let rule = route::resolve_rule(scenario, &request.model)?;
    let flags = scenario.flags;

    // Smart routing may restrict the service list for this call only.
    let mut routing_rule = rule.clone();
    routing_rule.services = route::effective_services(rule, &request);

    let health = {
        let config = Arc::clone(&config);
        let streaks = Arc::clone(&gateway.health);

        move |service: &Service| {
            let provider_enabled = config
                .provider(service.provider)
                .map(|provider| provider.enabled)
                .unwrap_or(false);

            provider_enabled && streaks.is_healthy(service)
        }
    };

    let service = gateway.balancer.select_service(&routing_rule, &health)?;

    let provider = config
        .provider(service.provider)
        .filter(|provider| provider.enabled)
        .cloned()
        .ok_or(GatewayError::ProviderUnavailable)?;

    if flags.enable_compact {
        request.compact();
    }

    let request_model = rule.request_model.clone();
    let response_model = rule
        .response_model
        .clone()
        .unwrap_or_else(|| request_model.clone());

    request.model = service.model.clone();

    // This dialect requires max_tokens; fill from configuration, capped
    // by the model template's ceiling.
    if provider.dialect == Dialect::Anthropic && request.max_tokens.is_none() {
        let ceiling = config.gateway.max_tokens_for_model(&service.model);
        request.max_tokens = Some(config.gateway.default_max_tokens.min(ceiling));
    }

    let input_estimate = token_count::estimate_input_tokens(&request);

    let recorder = flags
        .enable_recording
        .then(|| gateway.recorder.start(scenario_tag, recorded));

    let context = HandleContext::new(
        scenario_tag.to_string(),
        flags,
        provider.uuid,
        rule.uuid,
        service.model.clone(),
        request_model,
        response_model,
    );

    let window_seconds = service_window(&service);

    Ok(PreparedRequest {
        request,
        provider,
        service,
        context,
        window_seconds,
        input_estimate,
        recorder,
    })
}

fn service_window(service: &Service) -> u64 {
    service.window.seconds
}

/// Build the unary forward context: provider timeout plus an after-hook
/// that writes exactly one usage record for the call.
pub(super) fn unary_forward_context(
    gateway: &Gateway,
    prepared: &PreparedRequest,
) -> ForwardContext {
    let tracker = Arc::clone(&gateway.tracker);
    let template = unary_record_template(prepared);
    let window_seconds = prepared.window_seconds;

    ForwardContext::new(prepared.provider.clone(), false).on_after(Box::new(move |outcome| {
        let mut record = template.clone();
        record.timestamp = Timestamp::now();
        record.input_tokens = outcome.usage.prompt_tokens;
        record.output_tokens = outcome.usage.completion_tokens;
        record.total_tokens = outcome.usage.total_tokens;
        record.status = outcome.status;
        record.error_code = outcome.error_code.clone();
        record.latency_ms = outcome.latency_ms;

        record_detached(tracker, record, window_seconds);
    }))
}

fn unary_record_template(prepared: &PreparedRequest) -> UsageRecord {
    UsageRecord {
        provider: prepared.provider.uuid,
        model: prepared.service.model.clone(),
        scenario: prepared.context.scenario.clone(),
        rule: prepared.context.rule,
        request_model: prepared.context.request_model.clone(),
        timestamp: Timestamp::now(),
        input_tokens: 0,
        output_tokens: 0,
        total_tokens: 0,
        status: UsageStatus::Success,
        error_code: None,
        latency_ms: 0,
        streamed: false,
    }
}

fn record_detached(tracker: Arc<UsageTracker>, record: UsageRecord, window_seconds: u64) {
    tokio::spawn(async move {
        tracker.record(record, window_seconds).await;
    });
}

/// Forward context for stream setup failures: the streaming path has no
/// unary after-hook chain, so failures get their own recording context.
pub(super) fn stream_failure_context(
    gateway: &Gateway,
    provider: &ProviderConfig,
    service: &Service,
    context: &HandleContext,
    window_seconds: u64,
) -> ForwardContext {
    let tracker = Arc::clone(&gateway.tracker);

    let template = UsageRecord {
        provider: provider.uuid,
        model: service.model.clone(),
        scenario: context.scenario.clone(),
        rule: context.rule,
        request_model: context.request_model.clone(),
        timestamp: Timestamp::now(),
        input_tokens: 0,
        output_tokens: 0,
        total_tokens: 0,
        status: UsageStatus::Error,
        error_code: None,
        latency_ms: 0,
        streamed: true,
    };

    ForwardContext::new(provider.clone(), true).on_after(Box::new(move |outcome| {
        let mut record = template.clone();
        record.timestamp = Timestamp::now();
        record.input_tokens = outcome.usage.prompt_tokens;
        record.output_tokens = outcome.usage.completion_tokens;
        record.total_tokens = outcome.usage.total_tokens;
        record.status = outcome.status;
        record.error_code = outcome.error_code.clone();
        record.latency_ms = outcome.latency_ms;

        record_detached(Arc::clone(&tracker), record, window_seconds);
    }))
}

/// Outcome of a failed upstream call, for the after-hooks.
pub(super) fn failure_outcome(error: &GatewayError, input_estimate: u32, latency_ms: u64) -> RequestOutcome {
    RequestOutcome {
        usage: crate::unified::UnifiedUsage {
            prompt_tokens: input_estimate,
            completion_tokens: 0,
            total_tokens: input_estimate,
        },
        status: UsageStatus::Error,
        error_code: Some(
            error
                .error_code()
                .map(str::to_string)
                .unwrap_or_else(|| categorize_error(&error.to_string()).to_string()),
        ),
        latency_ms,
    }
}
