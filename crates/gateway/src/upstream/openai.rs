//! OpenAI-dialect upstream plumbing: chat completions and the responses
//! endpoint family, unary and streaming.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;

use config::ProviderConfig;

use crate::{
    dialect::{openai, responses},
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
    let url = format!("{}/chat/completions", provider.api_base);

    let mut openai_request = openai::ChatCompletionRequest::from(request);
    openai_request.stream = Some(false);

    let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
        log::error!("Failed to serialize chat completion request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .bearer_auth(provider.credential.bearer().expose_secret())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::ForwardFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Chat completion upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let response_text = response.text().await.map_err(|e| {
        log::error!("Failed to read chat completion response body: {e}");
        GatewayError::InternalError(None)
    })?;

    let openai_response: openai::ChatCompletionResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse chat completion response: {e}");
        log::debug!("Unparseable response body: {response_text}");
        GatewayError::InternalError(None)
    })?;

    Ok(UnifiedResponse::from(openai_response))
}

pub(super) async fn chat_stream(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
) -> GatewayResult<ChunkStream> {
    let url = format!("{}/chat/completions", provider.api_base);

    let mut openai_request = openai::ChatCompletionRequest::from(request);
    openai_request.stream = Some(true);
    openai_request.stream_options = Some(openai::StreamOptions {
        include_usage: Some(true),
    });

    let body = sonic_rs::to_vec(&openai_request).map_err(|e| {
        log::error!("Failed to serialize streaming chat request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .bearer_auth(provider.credential.bearer().expose_secret())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::StreamCreationFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Streaming chat upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();

    let chunk_stream = event_stream.filter_map(|event| async move {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                return Some(Err(GatewayError::ForwardFailed(format!(
                    "upstream stream failed: {error}"
                ))));
            }
        };

        // Either terminator spelling; the leading-space variant is what
        // some clients of this gateway emit themselves.
        if event.data.trim() == "[DONE]" {
            return None;
        }

        match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
            Ok(chunk) => Some(Ok(UnifiedChunk::from(chunk))),
            Err(error) => {
                log::warn!("Skipping unparseable stream chunk: {error}");
                None
            }
        }
    });

    Ok(Box::pin(chunk_stream))
}

pub(super) async fn responses(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
    timeout: Duration,
) -> GatewayResult<UnifiedResponse> {
    let url = format!("{}/responses", provider.api_base);

    let mut responses_request = responses::ResponsesRequest::from(request);
    responses_request.stream = Some(false);

    let body = sonic_rs::to_vec(&responses_request).map_err(|e| {
        log::error!("Failed to serialize responses request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .bearer_auth(provider.credential.bearer().expose_secret())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::ForwardFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Responses upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let response_text = response.text().await.map_err(|e| {
        log::error!("Failed to read responses body: {e}");
        GatewayError::InternalError(None)
    })?;

    let parsed: responses::ResponsesResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse responses body: {e}");
        log::debug!("Unparseable response body: {response_text}");
        GatewayError::InternalError(None)
    })?;

    Ok(UnifiedResponse::from(parsed))
}

pub(super) async fn responses_stream(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
) -> GatewayResult<ChunkStream> {
    let url = format!("{}/responses", provider.api_base);
    let model = request.model.clone();

    let mut responses_request = responses::ResponsesRequest::from(request);
    responses_request.stream = Some(true);

    let body = sonic_rs::to_vec(&responses_request).map_err(|e| {
        log::error!("Failed to serialize streaming responses request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = client
        .post(&url)
        .bearer_auth(provider.credential.bearer().expose_secret())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::StreamCreationFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Streaming responses upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();
    let created = now_unix();

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

                let parsed = match sonic_rs::from_str::<responses::ResponsesStreamEvent>(&event.data) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        log::warn!("Skipping unparseable responses event: {error}");
                        continue;
                    }
                };

                let chunk = match parsed {
                    responses::ResponsesStreamEvent::OutputTextDelta { delta } => {
                        let role = (!role_sent).then_some(UnifiedRole::Assistant);
                        role_sent = true;

                        UnifiedChunk {
                            id: String::new(),
                            model: model.clone(),
                            choices: vec![UnifiedChoiceDelta {
                                index: 0,
                                delta: UnifiedMessageDelta {
                                    role,
                                    content: Some(delta),
                                    ..Default::default()
                                },
                                finish_reason: None,
                            }],
                            usage: None,
                            created,
                        }
                    }
                    responses::ResponsesStreamEvent::Completed { response } => {
                        let usage = response.usage.map(|usage| UnifiedUsage {
                            prompt_tokens: usage.input_tokens,
                            completion_tokens: usage.output_tokens,
                            total_tokens: usage.total_tokens,
                        });

                        UnifiedChunk {
                            id: response.id,
                            model: model.clone(),
                            choices: vec![UnifiedChoiceDelta {
                                index: 0,
                                delta: UnifiedMessageDelta::default(),
                                finish_reason: Some(crate::unified::UnifiedFinishReason::Stop),
                            }],
                            usage,
                            created,
                        }
                    }
                    responses::ResponsesStreamEvent::Failed { response } => {
                        let failure = GatewayError::ForwardFailed(format!(
                            "responses stream failed with status {:?}",
                            response.status
                        ));
                        return Some((Err(failure), (stream, model, role_sent)));
                    }
                    responses::ResponsesStreamEvent::Other(_) => continue,
                };

                return Some((Ok(chunk), (stream, model, role_sent)));
            }
        },
    );

    Ok(Box::pin(chunk_stream))
}

pub(super) fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
