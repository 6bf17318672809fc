//! Upstream forwarding: cached clients, per-dialect request/response
//! plumbing, and SSE ingestion into the unified chunk stream.

pub mod pool;

mod anthropic;
mod google;
mod openai;

use std::{pin::Pin, sync::Arc, time::Duration};

use config::{Dialect, ProviderConfig, Service};
use futures::Stream;

use crate::{
    context::ForwardContext,
    error::{GatewayError, GatewayResult},
    probe::{AdaptiveProbe, EndpointFamily},
    unified::{UnifiedChunk, UnifiedRequest, UnifiedResponse},
};

pub use anthropic::AnthropicChunkAdapter;
pub use pool::ClientPool;

/// Stream of unified chunks from an upstream call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GatewayResult<UnifiedChunk>> + Send>>;

/// Per-dialect upstream dispatcher.
pub struct Forwarder {
    pool: Arc<ClientPool>,
    probe: Arc<AdaptiveProbe>,
}

impl Forwarder {
    /// Create a forwarder over the shared client pool and prober.
    pub fn new(pool: Arc<ClientPool>, probe: Arc<AdaptiveProbe>) -> Self {
        Forwarder { pool, probe }
    }

    /// The shared client pool.
    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    /// The shared prober.
    pub fn probe(&self) -> &Arc<AdaptiveProbe> {
        &self.probe
    }

    /// Forward a unary chat request and translate the response into the
    /// unified model. The forward context supplies the provider and the
    /// timeout, and its before-hooks have already shaped the request.
    pub async fn chat(
        &self,
        context: &ForwardContext,
        service: &Service,
        mut request: UnifiedRequest,
    ) -> GatewayResult<UnifiedResponse> {
        context.prepare(&mut request)?;

        let provider = &context.provider;
        let client = self.pool.client(provider)?;
        let timeout = context
            .timeout
            .unwrap_or_else(|| Duration::from_secs(provider.timeout_secs));

        match provider.dialect {
            Dialect::Anthropic => anthropic::chat(&client, provider, request, timeout).await,
            Dialect::Google => google::chat(&client, provider, request, timeout).await,
            Dialect::Openai => match self.endpoint_family(provider, service, &request.model).await? {
                EndpointFamily::Responses => openai::responses(&client, provider, request, timeout).await,
                _ => openai::chat(&client, provider, request, timeout).await,
            },
        }
    }

    /// Open a streaming chat call and return the unified chunk stream.
    /// No outer deadline: model responses may legitimately exceed any
    /// fixed ceiling, cancellation rides on dropping the stream.
    pub async fn stream(
        &self,
        context: &ForwardContext,
        service: &Service,
        mut request: UnifiedRequest,
    ) -> GatewayResult<ChunkStream> {
        context.prepare(&mut request)?;

        let provider = &context.provider;
        let client = self.pool.client(provider)?;

        match provider.dialect {
            Dialect::Anthropic => anthropic::chat_stream(&client, provider, request).await,
            Dialect::Google => google::chat_stream(&client, provider, request).await,
            Dialect::Openai => match self.endpoint_family(provider, service, &request.model).await? {
                EndpointFamily::Responses => openai::responses_stream(&client, provider, request).await,
                _ => openai::chat_stream(&client, provider, request).await,
            },
        }
    }

    /// Forward a count-tokens request. Anthropic upstreams answer
    /// natively; every other dialect gets a local estimate.
    pub async fn count_tokens(
        &self,
        provider: &ProviderConfig,
        request: UnifiedRequest,
    ) -> GatewayResult<u32> {
        match provider.dialect {
            Dialect::Anthropic => {
                let client = self.pool.client(provider)?;
                let timeout = Duration::from_secs(provider.timeout_secs);
                anthropic::count_tokens(&client, provider, request, timeout).await
            }
            _ => Ok(crate::token_count::estimate_input_tokens(&request)),
        }
    }

    /// The endpoint family for an openai-style call: the per-service
    /// override wins, otherwise the prober's cached verdict. A `none`
    /// verdict fails fast instead of burning a doomed upstream call.
    async fn endpoint_family(
        &self,
        provider: &ProviderConfig,
        service: &Service,
        model: &str,
    ) -> GatewayResult<EndpointFamily> {
        if service.prefer_completions {
            return Ok(EndpointFamily::Chat);
        }

        match self.probe.preferred_endpoint(provider, model).await {
            EndpointFamily::None => Err(GatewayError::ModelNotAvailable(format!(
                "no usable endpoint family for '{model}' on provider '{}'",
                provider.name
            ))),
            family => Ok(family),
        }
    }
}
