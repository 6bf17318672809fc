//! Anthropic-dialect client surface.

use std::{sync::Arc, time::Instant};

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use axum_serde::Sonic;
use serde::Deserialize;
use uuid::Uuid;

use config::DEFAULT_SCENARIO;

use crate::{
    Gateway,
    context::RequestOutcome,
    dialect::{anthropic, openai},
    error::{AnthropicErrorResponse, AnthropicResult},
    record::RecordedRequest,
    stream::{ClientDialect, StreamAccounting, sse_response},
    unified::{UnifiedRequest, UnifiedResponse},
    usage::UsageStatus,
};

use super::{
    chat::{ROUNDTRIP_HEADER, captured_headers},
    prepare::{self, PreparedRequest},
};

/// Query parameters of the messages endpoints.
#[derive(Debug, Default, Deserialize)]
pub(super) struct MessagesParams {
    /// Selects the beta payload schema. Both schemas parse through the
    /// same containers; the flag is accepted for wire compatibility.
    #[serde(default)]
    pub beta: Option<bool>,
}

pub(super) async fn messages(
    State(gateway): State<Arc<Gateway>>,
    Query(params): Query<MessagesParams>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    messages_inner(gateway, DEFAULT_SCENARIO, params, headers, request).await
}

pub(super) async fn messages_scoped(
    State(gateway): State<Arc<Gateway>>,
    Path(scenario): Path<String>,
    Query(params): Query<MessagesParams>,
    headers: HeaderMap,
    Sonic(request): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    messages_inner(gateway, &scenario, params, headers, request).await
}

async fn messages_inner(
    gateway: Arc<Gateway>,
    scenario: &str,
    params: MessagesParams,
    headers: HeaderMap,
    request: anthropic::MessagesRequest,
) -> AnthropicResult<Response> {
    log::debug!(
        "Messages for model '{}' in scenario '{scenario}' ({} messages, stream: {}, beta: {})",
        request.model,
        request.messages.len(),
        request.stream.unwrap_or(false),
        params.beta.unwrap_or(false),
    );

    let streaming = request.stream.unwrap_or(false);

    let recorded = RecordedRequest {
        method: "POST".to_string(),
        url: format!("/anthropic/v1/messages/{scenario}"),
        headers: captured_headers(&headers),
        body: serde_json::to_value(&request).unwrap_or_default(),
    };

    let unified = UnifiedRequest::from(request);
    let prepared = prepare::prepare(&gateway, scenario, unified, recorded).map_err(AnthropicErrorResponse::from)?;

    if streaming {
        stream_response(gateway, prepared).await
    } else {
        let roundtrip = wants_openai_roundtrip(&headers);
        unary_response(gateway, prepared, roundtrip).await
    }
}

async fn stream_response(gateway: Arc<Gateway>, prepared: PreparedRequest) -> AnthropicResult<Response> {
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

            Ok(sse_response(
                chunks,
                ClientDialect::Anthropic,
                context,
                accounting,
                recorder,
            ))
        }
        Err(error) => {
            gateway.health.record_failure(provider.uuid, &service.model);

            let forward = prepare::stream_failure_context(&gateway, &provider, &service, &context, window_seconds);
            forward.complete(&prepare::failure_outcome(
                &error,
                input_estimate,
                started.elapsed().as_millis() as u64,
            ));

            Err(AnthropicErrorResponse::from(error))
        }
    }
}

async fn unary_response(
    gateway: Arc<Gateway>,
    prepared: PreparedRequest,
    roundtrip: bool,
) -> AnthropicResult<Response> {
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

            if unified.id.is_empty() {
                unified.id = format!("msg_{}", Uuid::new_v4().simple());
            }

            forward.complete(&RequestOutcome {
                usage: unified.usage,
                status: UsageStatus::Success,
                error_code: None,
                latency_ms: started.elapsed().as_millis() as u64,
            });

            let unified = if roundtrip { openai_roundtrip(unified) } else { unified };

            let wire = anthropic::MessagesResponse::from(unified);

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

            Err(AnthropicErrorResponse::from(error))
        }
    }
}

/// Detour the response through the openai dialect and back.
fn openai_roundtrip(unified: UnifiedResponse) -> UnifiedResponse {
    let model = unified.model.clone();
    let stop_reason = unified.stop_reason.clone();
    let stop_sequence = unified.stop_sequence.clone();

    let detour = openai::ChatCompletionResponse::from(unified);
    let mut back = UnifiedResponse::from(detour);

    back.model = model;

    // The openai wire has no detailed stop fields; restore what the
    // bijection cannot carry so the anthropic client sees the original.
    back.stop_reason = stop_reason.or_else(|| {
        back.choices
            .first()
            .and_then(|choice| choice.finish_reason.clone())
            .map(crate::unified::UnifiedStopReason::from)
    });
    back.stop_sequence = stop_sequence;

    back
}

fn wants_openai_roundtrip(headers: &HeaderMap) -> bool {
    headers
        .get(ROUNDTRIP_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value.eq_ignore_ascii_case("openai") || value.eq_ignore_ascii_case("anthropic")
        })
}

/// Token counting: anthropic upstreams answer natively, everything else
/// gets the local estimate.
pub(super) async fn count_tokens(
    State(gateway): State<Arc<Gateway>>,
    Sonic(request): Sonic<anthropic::CountTokensRequest>,
) -> AnthropicResult<Json<anthropic::CountTokensResponse>> {
    let unified = UnifiedRequest::from(anthropic::MessagesRequest {
        model: request.model,
        messages: request.messages,
        max_tokens: 1,
        system: request.system,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: None,
        stream: None,
        thinking: None,
        metadata: None,
        tools: request.tools,
        tool_choice: None,
    });

    let prepared = prepare::prepare(
        &gateway,
        DEFAULT_SCENARIO,
        unified,
        RecordedRequest {
            method: "POST".to_string(),
            url: "/anthropic/v1/messages/count_tokens".to_string(),
            headers: Vec::new(),
            body: serde_json::Value::Null,
        },
    )
    .map_err(AnthropicErrorResponse::from)?;

    let input_tokens = gateway
        .forwarder
        .count_tokens(&prepared.provider, prepared.request)
        .await
        .map_err(AnthropicErrorResponse::from)?;

    Ok(Json(anthropic::CountTokensResponse { input_tokens }))
}
