//! Service surface - named operations in, JSON responses out
//!
//! [`Bridge::handle`] is the single entry point: it parses the operation and
//! its parameters, runs the transform, and renders either
//! `{"status":"ok","result":{...}}` or
//! `{"status":"error","detail":{"errorKind":..,"category":..,"message":..,"correlationId":..}}`,
//! where `category` is `client`, `conflict` or `transient`.
//! Each request runs inside a tracing span carrying a fresh correlation id.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::StateCache;
use crate::config::AppConfig;
use crate::error::{BridgeError, ErrorCategory, ErrorKind};
use crate::invoke::SafeInvoker;
use crate::retry::RetryPolicy;
use crate::transform::{TransformComposer, TransformOutcome, TransformRequest};
use crate::transport::Transport;


/// Failure detail returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub error_kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub correlation_id: String,
}

/// Response envelope for one request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServiceResponse {
    Ok { result: TransformOutcome },
    Error { detail: ErrorDetail },
}

impl ServiceResponse {
    fn failed(err: BridgeError, correlation_id: String) -> Self {
        ServiceResponse::Error {
            detail: ErrorDetail {
                error_kind: err.kind,
                category: err.kind.category(),
                message: err.message,
                path: err.path,
                correlation_id,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ServiceResponse::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ServiceResponse::Ok { .. } => None,
            ServiceResponse::Error { detail } => Some(detail.error_kind),
        }
    }

    pub fn result(&self) -> Option<&TransformOutcome> {
        match self {
            ServiceResponse::Ok { result } => Some(result),
            ServiceResponse::Error { .. } => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The control bridge as seen by its callers
pub struct Bridge {
    composer: TransformComposer,
}

impl Bridge {
    pub fn new(composer: TransformComposer) -> Self {
        Self { composer }
    }

    /// Wire up invoker, cache and composer over `transport`
    pub fn from_config(transport: Arc<dyn Transport>, config: &AppConfig) -> Self {
        let cache = Arc::new(StateCache::new(config.cache.ttl()));
        let composer = TransformComposer::new(SafeInvoker::new(transport), cache)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_export_dir(&config.export.output_dir);
        Self::new(composer)
    }

    pub fn composer(&self) -> &TransformComposer {
        &self.composer
    }

    /// Apply reloadable settings. Host address changes need a restart.
    pub fn apply_config(&self, config: &AppConfig) {
        self.composer.cache().set_ttl(config.cache.ttl());
        self.composer
            .set_retry_policy(RetryPolicy::from_config(&config.retry));
        self.composer
            .set_export_dir(Path::new(&config.export.output_dir));
        info!(
            "🔄 Bridge tuning updated (ttl {}ms, {} attempts)",
            config.cache.ttl_ms, config.retry.max_attempts
        );
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_cache(&self) -> usize {
        let removed = self.composer.cache().purge_expired();
        if removed > 0 {
            debug!("🧹 Purged {} expired cache entries", removed);
        }
        removed
    }

    /// Run the named operation with untyped parameters
    pub async fn handle(&self, op: &str, params: &Value) -> ServiceResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!("request", op = %op, correlation_id = %correlation_id);

        async move {
            let result = match TransformRequest::from_params(op, params) {
                Ok(request) => self.composer.execute(request).await,
                Err(e) => {
                    warn!("rejected {}: {}", op, e);
                    Err(e)
                }
            };
            match result {
                Ok(outcome) => ServiceResponse::Ok { result: outcome },
                Err(e) => ServiceResponse::failed(e, correlation_id),
            }
        }
        .instrument(span)
        .await
    }

    /// Run an already-typed request
    pub async fn execute(&self, request: TransformRequest) -> ServiceResponse {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "request",
            op = %request.operation(),
            correlation_id = %correlation_id
        );

        async move {
            match self.composer.execute(request).await {
                Ok(outcome) => ServiceResponse::Ok { result: outcome },
                Err(e) => ServiceResponse::failed(e, correlation_id),
            }
        }
        .instrument(span)
        .await
    }

    pub async fn shutdown(&self) {
        let transport = self.composer.invoker().transport();
        if let Err(e) = transport.shutdown().await {
            warn!("Transport {} did not shut down cleanly: {}", transport.name(), e);
        }
    }
}
