//! Google-dialect upstream plumbing.
//!
//! Unary calls hit `:generateContent`; streaming uses
//! `:streamGenerateContent?alt=sse`, whose chunks reuse the unary
//! response shape.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;

use config::ProviderConfig;

use crate::{
    dialect::google::{GenerateContentRequest, GenerateContentResponse},
    error::{GatewayError, GatewayResult},
    unified::{
        UnifiedChoiceDelta, UnifiedChunk, UnifiedMessageDelta, UnifiedRequest, UnifiedResponse, UnifiedRole,
        UnifiedUsage,
    },
    upstream::ChunkStream,
};

pub(super) async fn chat(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
    timeout: Duration,
) -> GatewayResult<UnifiedResponse> {
    let model = request.model.clone();
    let url = format!(
        "{}/models/{}:generateContent?key={}",
        provider.api_base,
        model,
        provider.credential.bearer().expose_secret()
    );

    let google_request = GenerateContentRequest::from(request);

    let body = sonic_rs::to_vec(&google_request).map_err(|e| {
        log::error!("Failed to serialize generateContent request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::ForwardFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("generateContent upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let response_text = response.text().await.map_err(|e| {
        log::error!("Failed to read generateContent body: {e}");
        GatewayError::InternalError(None)
    })?;

    let google_response: GenerateContentResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse generateContent response: {e}");
        log::debug!("Unparseable response body: {response_text}");
        GatewayError::InternalError(None)
    })?;

    let mut unified = UnifiedResponse::from(google_response);
    unified.created = super::openai::now_unix();
    if unified.model.is_empty() {
        unified.model = model;
    }

    Ok(unified)
}

pub(super) async fn chat_stream(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
) -> GatewayResult<ChunkStream> {
    let model = request.model.clone();
    let url = format!(
        "{}/models/{}:streamGenerateContent?alt=sse&key={}",
        provider.api_base,
        model,
        provider.credential.bearer().expose_secret()
    );

    let google_request = GenerateContentRequest::from(request);

    let body = sonic_rs::to_vec(&google_request).map_err(|e| {
        log::error!("Failed to serialize streaming generateContent request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::StreamCreationFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Streaming generateContent upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();
    let created = super::openai::now_unix();

    let chunk_stream = futures::stream::unfold(
        (Box::pin(event_stream), model, false),
        move |(mut stream, model, mut role_sent)| async move {
            loop {
                let event = stream.next().await?;

                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        let failure = GatewayError::ForwardFailed(format!("upstream stream failed: {error}"));
                        return Some((Err(failure), (stream, model, role_sent)));
                    }
                };

                let parsed = match sonic_rs::from_str::<GenerateContentResponse>(&event.data) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        log::warn!("Skipping unparseable generateContent chunk: {error}");
                        continue;
                    }
                };

                let Some(candidate) = parsed.candidates.into_iter().next() else {
                    continue;
                };

                let text: String = candidate
                    .content
                    .iter()
                    .flat_map(|content| content.parts.iter())
                    .filter_map(|part| part.text.as_deref())
                    .collect();

                let finish_reason = candidate
                    .finish_reason
                    .as_deref()
                    .map(crate::unified::google::finish_reason);

                let usage = parsed.usage_metadata.map(|usage| UnifiedUsage {
                    prompt_tokens: usage.prompt_token_count,
                    completion_tokens: usage.candidates_token_count,
                    total_tokens: usage.total_token_count,
                });

                if text.is_empty() && finish_reason.is_none() && usage.is_none() {
                    continue;
                }

                let role = (!role_sent).then_some(UnifiedRole::Assistant);
                role_sent = true;

                let chunk = UnifiedChunk {
                    id: String::new(),
                    model: model.clone(),
                    choices: vec![UnifiedChoiceDelta {
                        index: 0,
                        delta: UnifiedMessageDelta {
                            role,
                            content: (!text.is_empty()).then_some(text),
                            ..Default::default()
                        },
                        finish_reason,
                    }],
                    usage,
                    created,
                };

                return Some((Ok(chunk), (stream, model, role_sent)));
            }
        },
    );

    Ok(Box::pin(chunk_stream))
}
