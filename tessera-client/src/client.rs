//! Remote object client: CRUD, lookup and listing for one resource.

use crate::classify::{
    CreateConflictClassifier, DefaultClassifier, DeleteServerErrorClassifier, Probe,
};
use crate::executor::Executor;
use crate::monitor::WriteMonitor;
use crate::pager::{PageParams, Pager};
use async_trait::async_trait;
use futures_util::stream::Stream;
use reqwest::Url;
use serde_json::{Map, Value};
use std::sync::Arc;
use tessera_cache::{RemoteFetcher, ResourceCache};
use tessera_core::{
    key_from_value, AccessError, AccessResult, CacheError, ClientConfig, ConfigError, Diagnostics, Method,
    OpContext, Outcome, RemoteObject, RequestError,
};

/// Handle on one remote resource.
///
/// Created by [`AccessLayer::resource`](crate::AccessLayer::resource). Clones
/// share the executor and cache. Operations that learn or change the
/// object's identity or content (`create`, `update`, `populate_raw_json`)
/// update the handle's object in place.
#[derive(Clone)]
pub struct ResourceClient {
    config: Arc<ClientConfig>,
    executor: Executor,
    cache: Arc<ResourceCache>,
    object: RemoteObject,
}

impl ResourceClient {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        executor: Executor,
        cache: Arc<ResourceCache>,
        object: RemoteObject,
    ) -> Self {
        Self {
            config,
            executor,
            cache,
            object,
        }
    }

    pub fn object(&self) -> &RemoteObject {
        &self.object
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Same connection and cache, different object of the same type.
    pub fn with_object(&self, object: RemoteObject) -> Self {
        Self {
            object,
            ..self.clone()
        }
    }

    /// Set the document to write, stamping its content hash.
    pub fn populate_raw_json(&mut self, body: Map<String, Value>) -> AccessResult<()> {
        self.object.populate_raw_json(body)
    }

    // ========================================================================
    // URLS
    // ========================================================================

    fn collection_url(&self) -> AccessResult<Url> {
        let raw = format!(
            "{}/{}",
            self.config.base_url(),
            self.object.descriptor().collection_path()
        );
        Url::parse(&raw).map_err(|e| {
            ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: raw,
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn item_url(&self, key: &str) -> AccessResult<String> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.config.base_url(),
                reason: "cannot be a base".to_string(),
            })?
            .push(key);
        Ok(url.to_string())
    }

    fn list_url(
        &self,
        params: &PageParams,
        offset: usize,
        count: Option<usize>,
    ) -> AccessResult<String> {
        let d = self.object.descriptor();
        let mut url = self.collection_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("sort", &d.key_field);
            query.append_pair("order", "asc");
            if offset > 0 {
                query.append_pair("offset", &offset.to_string());
            }
            if let Some(count) = count {
                query.append_pair("count", &count.to_string());
            }
            if !params.fields.is_empty() {
                let mut fields = params.fields.clone();
                for required in [&d.key_field, &d.logical_id_field] {
                    if !fields.contains(required) {
                        fields.push(required.clone());
                    }
                }
                query.append_pair("fields", &fields.join(","));
            }
            if let Some(filter) = &params.filter {
                query.append_pair("filter", filter);
            }
        }
        Ok(url.to_string())
    }

    fn require_key(&self, target: &RemoteObject, operation: &str) -> AccessResult<String> {
        target.rest_key().map(str::to_string).ok_or_else(|| {
            ConfigError::MissingIdentifier {
                object_type: target.object_type().to_string(),
                operation: operation.to_string(),
            }
            .into()
        })
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// POST the populated document and cache the created object.
    pub async fn create(&mut self, ctx: &OpContext) -> AccessResult<RemoteObject> {
        let body = self.object.to_body()?;
        let url = self.collection_url()?.to_string();

        let response = match (self.object.descriptor().client_generated_key, self.object.rest_key()) {
            (true, Some(key)) => {
                let classifier = CreateConflictClassifier::new(
                    self.object.object_type(),
                    key,
                    self.probe(self.object.identity()),
                );
                self.executor
                    .execute(ctx, Method::Post, &url, Some(body), &classifier)
                    .await?
            }
            _ => {
                self.executor
                    .execute(ctx, Method::Post, &url, Some(body), &DefaultClassifier)
                    .await?
            }
        };

        let key = self.assigned_key(&response.body)?;
        let created = self.settle(key)?;
        self.cache.add(&created)?;
        tracing::debug!(
            object_type = %created.object_type(),
            key = %created.display_id(),
            "created"
        );
        self.object = created.clone();
        Ok(created)
    }

    /// Key from a create response: the server's document, else our own key.
    fn assigned_key(&self, body: &[u8]) -> AccessResult<String> {
        let key_field = &self.object.descriptor().key_field;
        let from_server = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get(key_field).and_then(key_from_value));
        from_server
            .or_else(|| self.object.rest_key().map(str::to_string))
            .ok_or_else(|| {
                RequestError::InvalidResponse {
                    object_type: self.object.object_type().to_string(),
                    reason: format!("create response carries no {}", key_field),
                }
                .into()
            })
    }

    /// The written document as stored under `key`.
    fn settle(&self, key: String) -> AccessResult<RemoteObject> {
        let d = self.object.descriptor();
        let mut doc = self.object.raw().cloned().unwrap_or_default();
        doc.entry(d.key_field.clone())
            .or_insert_with(|| Value::String(key.clone()));
        self.object.identity().with_rest_key(key).populate_document(doc)
    }

    /// GET the object by remote key. `None` means the server has no such object.
    pub async fn read(&self, ctx: &OpContext) -> AccessResult<Option<RemoteObject>> {
        self.read_object(ctx, &self.object).await
    }

    async fn read_object(
        &self,
        ctx: &OpContext,
        target: &RemoteObject,
    ) -> AccessResult<Option<RemoteObject>> {
        let key = self.require_key(target, "read")?;
        let url = self.item_url(&key)?;
        let response = self
            .executor
            .execute(ctx, Method::Get, &url, None, &DefaultClassifier)
            .await?;
        if response.status == 404 || response.body.is_empty() {
            return Ok(None);
        }
        let found = target.identity().populate(&response.body)?;
        if let (Some(logical_id), Some(key)) = (found.logical_id(), found.rest_key()) {
            let d = found.descriptor();
            self.cache
                .update_logical_id(&d.interface, &d.object_type, logical_id, key)?;
        }
        Ok(Some(found))
    }

    /// PUT the populated document. The cache is refreshed on success.
    pub async fn update(&mut self, ctx: &OpContext) -> AccessResult<RemoteObject> {
        self.put(ctx).await?;
        let key = self.require_key(&self.object, "update")?;
        let updated = self.settle(key)?;
        self.cache.add(&updated)?;
        self.object = updated.clone();
        Ok(updated)
    }

    async fn put(&self, ctx: &OpContext) -> AccessResult<()> {
        let key = self.require_key(&self.object, "update")?;
        let body = self.object.to_body()?;
        let url = self.item_url(&key)?;
        self.executor
            .execute(ctx, Method::Put, &url, Some(body), &DefaultClassifier)
            .await?;
        Ok(())
    }

    /// PUT the document and wait until reads return it.
    ///
    /// Succeeds once the stored content hash matches the written one; a
    /// warning is attached if that took more than one check. The cache is
    /// only updated on success.
    pub async fn update_async(&mut self, ctx: &OpContext) -> AccessResult<Outcome<RemoteObject>> {
        let key = self.require_key(&self.object, "update")?;
        let expected = self
            .object
            .content_hash()
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingRequired {
                field: format!("{} content hash", self.object.object_type()),
            })?;

        let writer = self.clone();
        let checker = self.clone();
        let report = WriteMonitor::new(self.config.confirm.clone())
            .run(
                ctx,
                move |write_ctx| async move { writer.put(&write_ctx).await },
                |check_ctx| {
                    let checker = checker.clone();
                    let expected = expected.clone();
                    async move {
                        let stored = checker.read_object(&check_ctx, &checker.object).await?;
                        Ok::<bool, AccessError>(
                            stored.and_then(|o| o.content_hash().map(str::to_string))
                                == Some(expected),
                        )
                    }
                },
            )
            .await;

        let diagnostics = report.into_result(self.object.object_type(), &key)?;
        let updated = self.settle(key)?;
        self.cache.add(&updated)?;
        self.object = updated.clone();
        Ok(Outcome::new(updated, diagnostics))
    }

    /// DELETE the object and wait until it is no longer readable.
    ///
    /// The cache entry is dropped before the request goes out. A DELETE
    /// answered with 404 counts as success. If the object stays visible
    /// after the delete returned, existence is re-checked every poll
    /// interval until it disappears or `ctx` ends, and a warning is
    /// attached.
    pub async fn delete(&self, ctx: &OpContext) -> AccessResult<Outcome<()>> {
        let key = self.require_key(&self.object, "delete")?;
        self.cache.remove(&self.object)?;

        let url = self.item_url(&key)?;
        let classifier = DeleteServerErrorClassifier::new(self.probe(self.object.identity()));
        self.executor
            .execute(ctx, Method::Delete, &url, None, &classifier)
            .await?;

        let mut checks: u32 = 0;
        loop {
            checks += 1;
            if self.read_object(ctx, &self.object).await?.is_none() {
                break;
            }
            tracing::warn!(
                object_type = %self.object.object_type(),
                key = %key,
                checks,
                "deleted object is still visible"
            );
            ctx.sleep(self.config.confirm.poll_interval).await?;
        }

        let mut diagnostics = Diagnostics::new();
        if checks > 1 {
            diagnostics.warn(
                "Delete took time to propagate",
                format!(
                    "{} {} stayed visible for {} existence checks after the delete succeeded",
                    self.object.object_type(),
                    key,
                    checks - 1
                ),
            );
        }
        Ok(Outcome::new((), diagnostics))
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Cached object if present, else resolve and read it once for all callers.
    pub async fn find(&self, ctx: &OpContext) -> AccessResult<Option<RemoteObject>> {
        self.cache.find(ctx, &self.object, self).await
    }

    /// Remote key of the object whose logical id is `target`'s.
    ///
    /// Uses the server filter when the object type supports it, otherwise
    /// scans every page. More than one match is an error.
    pub async fn lookup_by_logical_id(
        &self,
        ctx: &OpContext,
        target: &RemoteObject,
    ) -> AccessResult<Option<String>> {
        let Some(logical_id) = target.logical_id() else {
            return Ok(None);
        };
        let d = target.descriptor();

        let candidates = if d.server_filtering {
            let params = PageParams::new().with_filter(format!("{}={}", d.logical_id_field, logical_id));
            self.with_object(target.identity()).dump(ctx, params).await?
        } else {
            tracing::debug!(
                object_type = %d.object_type,
                logical_id,
                "no server filter; scanning all pages"
            );
            self.with_object(target.identity())
                .dump(ctx, PageParams::new())
                .await?
        };

        let matches: Vec<RemoteObject> = candidates
            .into_iter()
            .filter(|o| o.logical_id() == Some(logical_id))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [found] => {
                let key = found.rest_key().map(str::to_string);
                if let Some(key) = &key {
                    self.cache
                        .update_logical_id(&d.interface, &d.object_type, logical_id, key)?;
                }
                Ok(key)
            }
            many => Err(CacheError::AmbiguousLogicalId {
                object_type: d.object_type.clone(),
                logical_id: logical_id.to_string(),
                matches: many.len(),
            }
            .into()),
        }
    }

    fn probe(&self, target: RemoteObject) -> Arc<dyn Probe> {
        Arc::new(KeyProbe {
            client: self.clone(),
            target,
        })
    }

    // ========================================================================
    // LISTING
    // ========================================================================

    /// Every object matching `params`, across all pages.
    pub async fn dump(&self, ctx: &OpContext, params: PageParams) -> AccessResult<Vec<RemoteObject>> {
        self.pages(params).collect(ctx).await
    }

    /// Lazy page-by-page listing.
    pub fn pages(&self, params: PageParams) -> Pager {
        Pager::new(self.clone(), params)
    }

    /// Lazy item-by-item listing.
    pub fn stream(
        &self,
        ctx: OpContext,
        params: PageParams,
    ) -> impl Stream<Item = AccessResult<RemoteObject>> {
        self.pages(params).into_stream(ctx)
    }

    pub(crate) async fn list_page(
        &self,
        ctx: &OpContext,
        params: &PageParams,
        offset: usize,
        count: Option<usize>,
    ) -> AccessResult<Vec<RemoteObject>> {
        let url = self.list_url(params, offset, count)?;
        let response = self
            .executor
            .execute(ctx, Method::Get, &url, None, &DefaultClassifier)
            .await?;
        if response.status == 404 || response.body.is_empty() {
            return Ok(Vec::new());
        }

        let object_type = self.object.object_type();
        let docs = match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Array(docs)) => docs,
            Ok(_) => {
                return Err(RequestError::InvalidResponse {
                    object_type: object_type.to_string(),
                    reason: "listing is not a JSON array".to_string(),
                }
                .into())
            }
            Err(e) => {
                return Err(RequestError::InvalidResponse {
                    object_type: object_type.to_string(),
                    reason: format!("listing is not JSON: {}", e),
                }
                .into())
            }
        };

        let template = RemoteObject::new(Arc::clone(self.object.descriptor()), None, None);
        docs.into_iter()
            .map(|doc| match doc {
                Value::Object(doc) => template.populate_document(doc),
                _ => Err(RequestError::InvalidResponse {
                    object_type: object_type.to_string(),
                    reason: "listing entry is not a JSON object".to_string(),
                }
                .into()),
            })
            .collect()
    }
}

#[async_trait]
impl RemoteFetcher for ResourceClient {
    async fn lookup_key(
        &self,
        ctx: &OpContext,
        obj: &RemoteObject,
    ) -> AccessResult<Option<String>> {
        self.lookup_by_logical_id(ctx, obj).await
    }

    async fn read(&self, ctx: &OpContext, obj: &RemoteObject) -> AccessResult<Option<RemoteObject>> {
        self.read_object(ctx, obj).await
    }
}

/// Existence check used by the create and delete classifiers.
struct KeyProbe {
    client: ResourceClient,
    target: RemoteObject,
}

#[async_trait]
impl Probe for KeyProbe {
    async fn probe(&self, ctx: &OpContext) -> AccessResult<Option<String>> {
        Ok(self
            .client
            .read_object(ctx, &self.target)
            .await?
            .and_then(|found| found.rest_key().map(str::to_string)))
    }
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("base_url", &self.config.base_url())
            .field("object_type", &self.object.object_type())
            .field("rest_key", &self.object.rest_key())
            .field("logical_id", &self.object.logical_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NoRetry;
    use crate::AccessLayer;
    use tessera_core::{HttpRequest, HttpResponse, Transport, TransportError};

    /// Transport that records URLs and answers 404.
    #[derive(Default)]
    struct Recorder {
        urls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.urls.lock().expect("lock").push(request.url);
            Ok(HttpResponse::empty(404))
        }
    }

    fn handle(recorder: Arc<Recorder>, object_type: &str, key: Option<&str>) -> ResourceClient {
        AccessLayer::builder()
            .transport(recorder)
            .retry_policy(Arc::new(NoRetry))
            .build()
            .resource(
                &ClientConfig::new("api.local", 8089).with_base_path("svc"),
                key,
                None,
                object_type,
            )
            .expect("known type")
    }

    #[test]
    fn test_item_url_escapes_key() {
        let client = handle(Arc::default(), "role", None);
        assert_eq!(
            client.item_url("a b/c").expect("url"),
            "https://api.local:8089/svc/access/role/a%20b%2Fc"
        );
    }

    #[test]
    fn test_list_url_query() {
        let client = handle(Arc::default(), "role", None);
        let params = PageParams::new()
            .with_fields(["caps"])
            .with_filter("name=ops");
        let url = client.list_url(&params, 200, Some(100)).expect("url");
        assert_eq!(
            url,
            "https://api.local:8089/svc/access/role?sort=id&order=asc&offset=200&count=100\
             &fields=caps%2Cid%2Cname&filter=name%3Dops"
        );
    }

    #[tokio::test]
    async fn test_read_requires_key() {
        let client = handle(Arc::default(), "role", None);
        let err = client
            .read(&OpContext::new())
            .await
            .expect_err("no key");
        assert!(matches!(
            err,
            AccessError::Config(ConfigError::MissingIdentifier { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_not_found_is_none() {
        let recorder = Arc::new(Recorder::default());
        let client = handle(Arc::clone(&recorder), "role", Some("7"));
        assert!(client.read(&OpContext::new()).await.expect("read").is_none());
        assert_eq!(
            recorder.urls.lock().expect("lock").as_slice(),
            ["https://api.local:8089/svc/access/role/7"]
        );
    }

    #[tokio::test]
    async fn test_create_requires_body() {
        let mut client = handle(Arc::default(), "role", None);
        assert!(client.create(&OpContext::new()).await.is_err());
    }
}
