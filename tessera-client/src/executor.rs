//! Retrying request executor.

use crate::classify::{Attempt, Classifier, Decision};
use crate::limiter::Limiter;
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tessera_core::{
    AccessResult, Credentials, HttpRequest, HttpResponse, Method, OpContext, RequestError,
    Transport,
};
use tokio::time::Instant;

/// Issues requests under the limiter and repeats them as the classifier asks.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    limiter: Limiter,
    retry: Arc<dyn RetryPolicy>,
    credentials: Credentials,
    verbose: bool,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Limiter,
        retry: Arc<dyn RetryPolicy>,
        credentials: Credentials,
    ) -> Self {
        Self {
            transport,
            limiter,
            retry,
            credentials,
            verbose: false,
        }
    }

    /// Log request and response bodies at trace level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }

    /// Run `method url` until the classifier stops or `ctx` finishes.
    ///
    /// Each attempt holds one limiter slot for the duration of the exchange
    /// only; backoff waits do not occupy a slot.
    pub async fn execute(
        &self,
        ctx: &OpContext,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        classifier: &dyn Classifier,
    ) -> AccessResult<HttpResponse> {
        let mut request = HttpRequest::new(method, url).with_credentials(self.credentials.clone());
        if let Some(body) = body {
            if self.verbose {
                tracing::trace!(%method, url, body = %String::from_utf8_lossy(&body), "request body");
            }
            request = request.with_body(body);
        }

        let mut backoff = self.retry.backoff();
        let mut attempts: u32 = 0;
        loop {
            if let Some(cause) = ctx.err() {
                return Err(cause.into());
            }
            attempts += 1;

            let started = Instant::now();
            let outcome = {
                let _permit = ctx.run(self.limiter.acquire()).await?;
                ctx.run(self.transport.send(request.clone())).await?
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(response) => {
                    tracing::debug!(
                        %method,
                        url,
                        attempt = attempts,
                        status = response.status,
                        elapsed_ms,
                        "request completed"
                    );
                    if self.verbose {
                        tracing::trace!(%method, url, body = %response.text(), "response body");
                    }
                }
                Err(e) => tracing::debug!(
                    %method,
                    url,
                    attempt = attempts,
                    error = %e,
                    timeout = e.timeout,
                    elapsed_ms,
                    "request failed"
                ),
            }

            let attempt = Attempt {
                method,
                url: url.to_string(),
                outcome,
            };
            match classifier.classify(ctx, &attempt).await {
                Decision::Done(response) => return Ok(response),
                Decision::Fail(e) => return Err(e),
                Decision::Retry => {}
            }

            match backoff.next() {
                Some(wait) => {
                    tracing::debug!(%method, url, attempt = attempts, wait_ms = wait.as_millis() as u64, "retrying");
                    ctx.sleep(wait).await?;
                }
                None => {
                    let last = attempt.describe();
                    tracing::warn!(%method, url, attempts, last = %last, "retries exhausted");
                    return Err(RequestError::RetriesExhausted {
                        method,
                        url: url.to_string(),
                        attempts,
                        last,
                    }
                    .into());
                }
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("credentials", &self.credentials)
            .field("verbose", &self.verbose)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::DefaultClassifier;
    use crate::retry::{FixedBackoff, NoRetry};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tessera_core::{AccessError, ContextError, TransportError};

    /// Replays scripted outcomes; repeats the last one forever.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().expect("lock")
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            *self.calls.lock().expect("lock") += 1;
            let mut outcomes = self.outcomes.lock().expect("lock");
            if outcomes.len() > 1 {
                outcomes.pop_front().expect("non-empty")
            } else {
                outcomes.front().cloned().expect("script must not be empty")
            }
        }
    }

    fn executor(transport: Arc<Scripted>, retry: Arc<dyn RetryPolicy>) -> Executor {
        Executor::new(transport, Limiter::new(2), retry, Credentials::None)
    }

    fn fixed(retries: u32) -> Arc<dyn RetryPolicy> {
        Arc::new(FixedBackoff {
            interval: Duration::from_millis(100),
            max_retries: retries,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let transport = Scripted::new(vec![
            Ok(HttpResponse::empty(503)),
            Err(TransportError::new("reset")),
            Ok(HttpResponse::new(200, "{}")),
        ]);
        let exec = executor(Arc::clone(&transport), fixed(5));
        let response = exec
            .execute(&OpContext::new(), Method::Get, "u", None, &DefaultClassifier)
            .await
            .expect("third attempt succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 3);
        assert_eq!(exec.limiter().available(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_status_is_not_retried() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(403, "denied"))]);
        let exec = executor(Arc::clone(&transport), fixed(5));
        let err = exec
            .execute(&OpContext::new(), Method::Put, "u", Some(b"{}".to_vec()), &DefaultClassifier)
            .await
            .expect_err("403 is terminal");
        assert_eq!(err.status(), Some(403));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion() {
        let transport = Scripted::new(vec![Ok(HttpResponse::new(502, "bad gateway"))]);
        let exec = executor(Arc::clone(&transport), fixed(2));
        let err = exec
            .execute(&OpContext::new(), Method::Get, "u", None, &DefaultClassifier)
            .await
            .expect_err("always 502");
        match err {
            AccessError::Request(RequestError::RetriesExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_policy_makes_one_attempt() {
        let transport = Scripted::new(vec![Ok(HttpResponse::empty(500))]);
        let exec = executor(Arc::clone(&transport), Arc::new(NoRetry));
        assert!(exec
            .execute(&OpContext::new(), Method::Get, "u", None, &DefaultClassifier)
            .await
            .is_err());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_retry_loop() {
        let transport = Scripted::new(vec![Ok(HttpResponse::empty(503))]);
        let exec = executor(Arc::clone(&transport), fixed(1000));
        let ctx = OpContext::with_timeout(Duration::from_millis(350));
        let err = exec
            .execute(&ctx, Method::Get, "u", None, &DefaultClassifier)
            .await
            .expect_err("deadline");
        assert_eq!(err, AccessError::Context(ContextError::DeadlineExceeded));
        // Attempts at 0, 100, 200, 300 ms.
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_sends_nothing() {
        let transport = Scripted::new(vec![Ok(HttpResponse::empty(200))]);
        let exec = executor(Arc::clone(&transport), fixed(3));
        let ctx = OpContext::new();
        ctx.cancel();
        let err = exec
            .execute(&ctx, Method::Get, "u", None, &DefaultClassifier)
            .await
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 0);
    }
}
