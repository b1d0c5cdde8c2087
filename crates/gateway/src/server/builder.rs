//! Builder assembling the gateway from configuration and adapters.

use std::sync::Arc;

use super::{Gateway, GatewayInner, PipelineExecutor};
use crate::analytics::AnalyticsStore;
use crate::batch::BatchProcessor;
use crate::cache::{ResponseCache, spawn_sweeper};
use crate::catalog::ModelCatalog;
use crate::endpoint::EndpointStore;
use crate::error::{Error, Result};
use crate::router::Router;
use crate::upstream::{AdapterSet, UpstreamAdapter};
use crate::webhook::{DeliveryTransport, HttpTransport, WebhookDispatcher};

/// Assembles a [`Gateway`] from configuration, upstream adapters, and an
/// optional webhook transport override.
///
/// `build` spawns the cache sweeper and the batch worker, so it must run
/// inside a tokio runtime.
pub struct GatewayBuilder {
    config: config::Config,
    adapters: AdapterSet,
    delivery_transport: Option<Arc<dyn DeliveryTransport>>,
}

impl GatewayBuilder {
    pub fn new(config: config::Config) -> Self {
        Self {
            config,
            adapters: AdapterSet::new(),
            delivery_transport: None,
        }
    }

    /// Register one upstream adapter per provider.
    pub fn with_adapter(mut self, adapter: Arc<dyn UpstreamAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    /// Replace the webhook delivery transport. Tests use this to observe
    /// deliveries without HTTP.
    pub fn with_delivery_transport(mut self, transport: Arc<dyn DeliveryTransport>) -> Self {
        self.delivery_transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        if self.adapters.is_empty() {
            return Err(Error::Internal(Some(
                "cannot build a gateway without upstream adapters".into(),
            )));
        }

        log::debug!("Initializing gateway with {} adapter(s)", self.adapters.len());

        let catalog = Arc::new(ModelCatalog::from_config(&self.config.catalog));

        let cache = Arc::new(ResponseCache::new(self.config.cache.clone()));
        // The sweeper exits on its own once the cache is dropped.
        let _ = spawn_sweeper(&cache);

        let transport = self
            .delivery_transport
            .unwrap_or_else(|| Arc::new(HttpTransport) as Arc<dyn DeliveryTransport>);
        let webhooks = Arc::new(WebhookDispatcher::new(self.config.webhooks.clone(), transport));

        let analytics = Arc::new(AnalyticsStore::new(Arc::clone(&catalog), self.config.analytics.clone()));

        let router = Router::new(Arc::clone(&catalog), self.adapters, self.config.router.clone());

        let batches = BatchProcessor::new(Arc::clone(&catalog), self.config.batch.clone());

        let inner = Arc::new(GatewayInner {
            catalog,
            endpoints: EndpointStore::new(),
            cache,
            router,
            webhooks: Arc::clone(&webhooks),
            analytics,
            batches,
        });

        let executor = Arc::new(PipelineExecutor {
            gateway: Arc::downgrade(&inner),
        });
        inner.batches.start(executor, webhooks);

        Ok(Gateway { inner })
    }
}
