//! Outcome classification for request attempts.
//!
//! A [`Classifier`] looks at one attempt and decides whether the executor
//! should stop with a response, stop with an error, or try again. The default
//! status policy lives in [`default_decision`]; resource-specific classifiers
//! handle their special case and defer to it for everything else.

use async_trait::async_trait;
use std::sync::Arc;
use tessera_core::{
    AccessError, AccessResult, HttpResponse, Method, OpContext, RequestError, TransportError,
};

/// Statuses that are never retried by default.
pub const TERMINAL_STATUSES: [u16; 5] = [400, 401, 403, 404, 409];

/// One request attempt as seen by a classifier.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub method: Method,
    pub url: String,
    pub outcome: Result<HttpResponse, TransportError>,
}

impl Attempt {
    pub fn status(&self) -> Option<u16> {
        self.outcome.as_ref().ok().map(|r| r.status)
    }

    /// Short description of the attempt's failure, for the final error.
    pub fn describe(&self) -> String {
        match &self.outcome {
            Ok(response) => format!("status {}: {}", response.status, response.text()),
            Err(e) => e.message.clone(),
        }
    }
}

/// What the executor does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry,
    /// Stop and hand this response to the caller
    Done(HttpResponse),
    Fail(AccessError),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, ctx: &OpContext, attempt: &Attempt) -> Decision;
}

/// Default status policy.
///
/// 2xx succeeds. A GET 404 is a valid "not found" with no body, a DELETE 404
/// is an already-deleted resource. Other 400/401/403/404/409 responses are
/// terminal; everything else, transport failures included, is retried.
pub fn default_decision(attempt: &Attempt) -> Decision {
    let response = match &attempt.outcome {
        Ok(response) => response,
        Err(_) => return Decision::Retry,
    };
    match (attempt.method, response.status) {
        (_, status) if (200..300).contains(&status) => Decision::Done(response.clone()),
        (Method::Get, 404) => Decision::Done(HttpResponse::empty(404)),
        (Method::Delete, 404) => Decision::Done(HttpResponse::empty(200)),
        (method, status) if TERMINAL_STATUSES.contains(&status) => {
            Decision::Fail(AccessError::Request(RequestError::Terminal {
                method,
                url: attempt.url.clone(),
                status,
                body: response.text(),
            }))
        }
        _ => Decision::Retry,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

#[async_trait]
impl Classifier for DefaultClassifier {
    async fn classify(&self, _ctx: &OpContext, attempt: &Attempt) -> Decision {
        default_decision(attempt)
    }
}

/// Checks whether the resource a request targets currently exists.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Remote key of the stored resource, or `None` if it is absent.
    async fn probe(&self, ctx: &OpContext) -> AccessResult<Option<String>>;
}

/// Treats a 409 on a client-keyed create as success when the key is ours.
///
/// An earlier attempt may have created the resource before its response was
/// lost; the retry then collides with itself.
pub struct CreateConflictClassifier {
    object_type: String,
    key: String,
    probe: Arc<dyn Probe>,
}

impl CreateConflictClassifier {
    pub fn new(object_type: impl Into<String>, key: impl Into<String>, probe: Arc<dyn Probe>) -> Self {
        Self {
            object_type: object_type.into(),
            key: key.into(),
            probe,
        }
    }
}

#[async_trait]
impl Classifier for CreateConflictClassifier {
    async fn classify(&self, ctx: &OpContext, attempt: &Attempt) -> Decision {
        if attempt.method != Method::Post || attempt.status() != Some(409) {
            return default_decision(attempt);
        }
        match self.probe.probe(ctx).await {
            Ok(Some(existing)) if existing == self.key => {
                tracing::debug!(
                    object_type = %self.object_type,
                    key = %self.key,
                    "create conflicted with its own earlier attempt"
                );
                Decision::Done(HttpResponse::new(200, "OK"))
            }
            Ok(_) => Decision::Fail(AccessError::Request(RequestError::Conflict {
                object_type: self.object_type.clone(),
                key: self.key.clone(),
            })),
            Err(e) => Decision::Fail(e),
        }
    }
}

/// Retries a DELETE answered with 500 only while the resource still exists.
pub struct DeleteServerErrorClassifier {
    probe: Arc<dyn Probe>,
}

impl DeleteServerErrorClassifier {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Classifier for DeleteServerErrorClassifier {
    async fn classify(&self, ctx: &OpContext, attempt: &Attempt) -> Decision {
        if attempt.method != Method::Delete || attempt.status() != Some(500) {
            return default_decision(attempt);
        }
        match self.probe.probe(ctx).await {
            Ok(None) => {
                tracing::debug!(url = %attempt.url, "delete returned 500 but resource is gone");
                Decision::Done(HttpResponse::empty(200))
            }
            Ok(Some(_)) => Decision::Retry,
            Err(e) => {
                tracing::debug!(url = %attempt.url, error = %e, "existence probe failed");
                Decision::Retry
            }
        }
    }
}
