//! Openai-dialect client surface.

use std::{sync::Arc, time::Instant};

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use axum_serde::Sonic;
use uuid::Uuid;

use config::DEFAULT_SCENARIO;

use crate::{
    Gateway,
    context::RequestOutcome,
    dialect::{anthropic, openai},
    error::GatewayResult,
    record::RecordedRequest,
    stream::{ClientDialect, StreamAccounting, sse_response},
    unified::{UnifiedRequest, UnifiedResponse},
    usage::UsageStatus,
};

use super::prepare::{self, PreparedRequest};

/// Test-only header forcing the response through a cross-dialect
/// round-trip before it leaves the gateway.
pub(super) const ROUNDTRIP_HEADER: &str = "x-tingly-response-roundtrip";

pub(super) async fn chat_completions(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> GatewayResult<Response> {
    chat_completions_inner(gateway, DEFAULT_SCENARIO, headers, request).await
}

pub(super) async fn chat_completions_scoped(
    State(gateway): State<Arc<Gateway>>,
    Path(scenario): Path<String>,
    headers: HeaderMap,
    Sonic(request): Sonic<openai::ChatCompletionRequest>,
) -> GatewayResult<Response> {
    chat_completions_inner(gateway, &scenario, headers, request).await
}

async fn chat_completions_inner(
    gateway: Arc<Gateway>,
    scenario: &str,
    headers: HeaderMap,
    request: openai::ChatCompletionRequest,
) -> GatewayResult<Response> {
    log::debug!(
        "Chat completions for model '{}' in scenario '{scenario}' ({} messages, stream: {})",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false)
    );

    let streaming = request.stream.unwrap_or(false);

    let recorded = RecordedRequest {
        method: "POST".to_string(),
        url: format!("/openai/v1/chat/completions/{scenario}"),
        headers: captured_headers(&headers),
        body: serde_json::to_value(&request).unwrap_or_default(),
    };

    let unified = UnifiedRequest::from(request);
    let prepared = prepare::prepare(&gateway, scenario, unified, recorded)?;

    if streaming {
        stream_response(gateway, prepared).await
    } else {
        let roundtrip = wants_anthropic_roundtrip(&headers);
        unary_response(gateway, prepared, roundtrip).await
    }
}

async fn stream_response(gateway: Arc<Gateway>, prepared: PreparedRequest) -> GatewayResult<Response> {
    let PreparedRequest {
        request,
        provider,
        service,
        context,
        window_seconds,
        input_estimate,
        recorder,
    } = prepared;

    let forward = crate::context::ForwardContext::new(provider.clone(), true);
    let started = Instant::now();

    match gateway.forwarder.stream(&forward, &service, request).await {
        Ok(chunks) => {
            gateway.health.record_success(provider.uuid, &service.model);

            let accounting =
                StreamAccounting::new(Arc::clone(&gateway.tracker), &context, input_estimate, window_seconds);

            Ok(sse_response(chunks, ClientDialect::Openai, context, accounting, recorder))
        }
        Err(error) => {
            gateway.health.record_failure(provider.uuid, &service.model);

            let forward = prepare::stream_failure_context(&gateway, &provider, &service, &context, window_seconds);
            forward.complete(&prepare::failure_outcome(
                &error,
                input_estimate,
                started.elapsed().as_millis() as u64,
            ));

            Err(error)
        }
    }
}

async fn unary_response(
    gateway: Arc<Gateway>,
    prepared: PreparedRequest,
    roundtrip: bool,
) -> GatewayResult<Response> {
    let response_model = prepared.context.response_model.clone();
    let recorder = prepared.recorder.clone();
    let input_estimate = prepared.input_estimate;

    let forward = prepare::unary_forward_context(&gateway, &prepared);
    let started = Instant::now();

    let result = gateway
        .forwarder
        .chat(&forward, &prepared.service, prepared.request.clone())
        .await;

    match result {
        Ok(mut unified) => {
            gateway
                .health
                .record_success(prepared.provider.uuid, &prepared.service.model);

            unified.model = response_model;
            ensure_identity(&mut unified);

            forward.complete(&RequestOutcome {
                usage: unified.usage,
                status: UsageStatus::Success,
                error_code: None,
                latency_ms: started.elapsed().as_millis() as u64,
            });

            let unified = if roundtrip { anthropic_roundtrip(unified) } else { unified };

            let wire = openai::ChatCompletionResponse::from(unified);

            if let Some(recorder) = recorder {
                recorder.complete(serde_json::to_value(&wire).unwrap_or_default());
            }

            Ok(Json(wire).into_response())
        }
        Err(error) => {
            gateway
                .health
                .record_failure(prepared.provider.uuid, &prepared.service.model);

            forward.complete(&prepare::failure_outcome(
                &error,
                input_estimate,
                started.elapsed().as_millis() as u64,
            ));

            Err(error)
        }
    }
}

/// Detour a finished response through the anthropic dialect and back,
/// proving translation equivalence end to end.
fn anthropic_roundtrip(unified: UnifiedResponse) -> UnifiedResponse {
    let created = unified.created;
    let model = unified.model.clone();

    let detour = anthropic::MessagesResponse::from(unified);
    let mut back = UnifiedResponse::from(detour);

    back.created = created;
    back.model = model;
    back
}

fn ensure_identity(response: &mut UnifiedResponse) {
    if response.id.is_empty() {
        response.id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    }

    if response.created == 0 {
        response.created = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
    }
}

pub(super) fn wants_anthropic_roundtrip(headers: &HeaderMap) -> bool {
    headers
        .get(ROUNDTRIP_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("anthropic"))
}

pub(super) fn captured_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| {
            !matches!(
                name.as_str(),
                "authorization" | "x-api-key" | "proxy-authorization" | "cookie"
            )
        })
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("<binary>").to_string()))
        .collect()
}
