//! The access layer: owner of everything shared between resource handles.

use crate::client::ResourceClient;
use crate::executor::Executor;
use crate::limiter::Limiter;
use crate::retry::{ExponentialBackoff, RetryPolicy};
use crate::transport::ReqwestTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tessera_cache::{CacheStats, ResourceCache};
use tessera_core::{
    AccessResult, CacheError, ClientConfig, ConnectionKey, DescriptorTable, LayerSettings,
    RemoteObject, Transport,
};

/// Descriptor table, resource cache, limiters and connection pools.
///
/// Construct one per process and hand out resource handles with
/// [`AccessLayer::resource`]. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct AccessLayer {
    inner: Arc<LayerInner>,
}

struct LayerInner {
    descriptors: DescriptorTable,
    cache: Arc<ResourceCache>,
    settings: LayerSettings,
    transports: Mutex<HashMap<ConnectionKey, Arc<dyn Transport>>>,
    limiters: Mutex<HashMap<usize, Limiter>>,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

/// Builder for [`AccessLayer`].
#[derive(Default)]
pub struct AccessLayerBuilder {
    settings: LayerSettings,
    descriptors: Option<DescriptorTable>,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
}

impl AccessLayerBuilder {
    pub fn settings(mut self, settings: LayerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the builtin descriptor table.
    pub fn descriptors(mut self, descriptors: DescriptorTable) -> Self {
        self.descriptors = Some(descriptors);
        self
    }

    /// Send every request through `transport` instead of pooled HTTP clients.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `policy` instead of each config's exponential backoff.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> AccessLayer {
        tracing::debug!(
            cache_capacity = self.settings.cache_capacity,
            verbose = self.settings.verbose,
            "access layer initialized"
        );
        AccessLayer {
            inner: Arc::new(LayerInner {
                descriptors: self.descriptors.unwrap_or_default(),
                cache: Arc::new(ResourceCache::new(self.settings.cache_capacity)),
                settings: self.settings,
                transports: Mutex::new(HashMap::new()),
                limiters: Mutex::new(HashMap::new()),
                transport: self.transport,
                retry_policy: self.retry_policy,
            }),
        }
    }
}

impl AccessLayer {
    pub fn builder() -> AccessLayerBuilder {
        AccessLayerBuilder::default()
    }

    pub fn new(settings: LayerSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    /// Layer configured from `TESSERA_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(LayerSettings::from_env())
    }

    pub fn settings(&self) -> &LayerSettings {
        &self.inner.settings
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.inner.descriptors
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> AccessResult<CacheStats> {
        self.inner.cache.stats()
    }

    /// Handle on one resource of `object_type`.
    ///
    /// Fails immediately if the object type is unknown or the config is
    /// invalid.
    pub fn resource(
        &self,
        config: &ClientConfig,
        rest_key: Option<&str>,
        logical_id: Option<&str>,
        object_type: &str,
    ) -> AccessResult<ResourceClient> {
        let descriptor = self.inner.descriptors.get(object_type)?;
        config.validate()?;

        let executor = self.executor(config)?;
        let object = RemoteObject::new(
            descriptor,
            rest_key.map(str::to_string),
            logical_id.map(str::to_string),
        );
        Ok(ResourceClient::new(
            Arc::new(config.clone()),
            executor,
            Arc::clone(&self.inner.cache),
            object,
        ))
    }

    fn executor(&self, config: &ClientConfig) -> AccessResult<Executor> {
        let retry = match &self.inner.retry_policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(ExponentialBackoff::from(&config.retry)) as Arc<dyn RetryPolicy>,
        };
        Ok(Executor::new(
            self.transport_for(config)?,
            self.limiter_for(config.concurrency)?,
            retry,
            config.credentials.clone(),
        )
        .with_verbose(self.inner.settings.verbose))
    }

    /// One transport per connection identity; credentials are not part of it.
    fn transport_for(&self, config: &ClientConfig) -> AccessResult<Arc<dyn Transport>> {
        if let Some(transport) = &self.inner.transport {
            return Ok(Arc::clone(transport));
        }
        let key = config.connection_key();
        let mut transports = self
            .inner
            .transports
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        if let Some(transport) = transports.get(&key) {
            return Ok(Arc::clone(transport));
        }
        tracing::debug!(base_url = %key.base_url, concurrency = key.concurrency, "creating transport");
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&key)?);
        transports.insert(key, Arc::clone(&transport));
        Ok(transport)
    }

    /// Limiters are shared by every config with the same concurrency level.
    fn limiter_for(&self, concurrency: usize) -> AccessResult<Limiter> {
        let mut limiters = self
            .inner
            .limiters
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?;
        Ok(limiters
            .entry(concurrency)
            .or_insert_with(|| Limiter::new(concurrency))
            .clone())
    }
}

impl Default for AccessLayer {
    fn default() -> Self {
        Self::new(LayerSettings::default())
    }
}

impl std::fmt::Debug for AccessLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLayer")
            .field("settings", &self.inner.settings)
            .field("object_types", &self.inner.descriptors.object_types())
            .finish()
    }
}
