// Step template lookup
// Templates are administrator configuration; the engine only reads them.

use async_trait::async_trait;
use moka::future::Cache;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::TemplateError;
use super::types::{StepTemplate, TemplateId};
use crate::store::StoreError;

/// Read-only access to the step pipeline of each request type
#[async_trait]
pub trait StepTemplateReader: Send + Sync {
    /// Templates for one request type, ascending by order
    async fn templates_for(&self, request_type_code: &str) -> Result<Vec<StepTemplate>, StoreError>;

    async fn template(&self, id: TemplateId) -> Result<Option<StepTemplate>, StoreError>;
}

/// Validated in-memory template set
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    by_type: BTreeMap<String, Vec<StepTemplate>>,
}

impl TemplateCatalog {
    /// Build a catalog, rejecting zero orders and duplicate (type, order) pairs.
    /// Templates without an id get one assigned in input order.
    pub fn new(templates: Vec<StepTemplate>) -> Result<Self, TemplateError> {
        let mut by_type: BTreeMap<String, Vec<StepTemplate>> = BTreeMap::new();
        let mut ids = HashSet::new();
        let mut next_id = templates.iter().map(|t| t.id).max().unwrap_or(0);

        for mut template in templates {
            if template.order == 0 {
                return Err(TemplateError::ZeroOrder {
                    request_type_code: template.request_type_code,
                });
            }
            if template.id == 0 {
                next_id += 1;
                template.id = next_id;
            }
            if !ids.insert(template.id) {
                return Err(TemplateError::DuplicateId { id: template.id });
            }

            let steps = by_type.entry(template.request_type_code.clone()).or_default();
            if steps.iter().any(|t| t.order == template.order) {
                return Err(TemplateError::DuplicateOrder {
                    request_type_code: template.request_type_code,
                    order: template.order,
                });
            }
            steps.push(template);
        }

        for steps in by_type.values_mut() {
            steps.sort_by_key(|t| t.order);
        }

        Ok(Self { by_type })
    }

    pub fn request_types(&self) -> impl Iterator<Item = &str> {
        self.by_type.keys().map(String::as_str)
    }

    pub fn templates(&self) -> impl Iterator<Item = &StepTemplate> {
        self.by_type.values().flatten()
    }
}

#[async_trait]
impl StepTemplateReader for TemplateCatalog {
    async fn templates_for(&self, request_type_code: &str) -> Result<Vec<StepTemplate>, StoreError> {
        Ok(self
            .by_type
            .get(request_type_code)
            .cloned()
            .unwrap_or_default())
    }

    async fn template(&self, id: TemplateId) -> Result<Option<StepTemplate>, StoreError> {
        Ok(self.templates().find(|t| t.id == id).cloned())
    }
}

/// Caches another reader's answers for a bounded time
pub struct CachedTemplateReader<R> {
    inner: R,
    pipelines: Cache<String, Arc<Vec<StepTemplate>>>,
    templates: Cache<TemplateId, StepTemplate>,
}

impl<R: StepTemplateReader> CachedTemplateReader<R> {
    pub fn new(inner: R, capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            pipelines: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            templates: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Drop everything cached, e.g. after an administrator edit
    pub fn invalidate(&self) {
        self.pipelines.invalidate_all();
        self.templates.invalidate_all();
    }
}

#[async_trait]
impl<R: StepTemplateReader> StepTemplateReader for CachedTemplateReader<R> {
    async fn templates_for(&self, request_type_code: &str) -> Result<Vec<StepTemplate>, StoreError> {
        if let Some(cached) = self.pipelines.get(request_type_code).await {
            debug!(request_type = request_type_code, "Template cache hit");
            return Ok(cached.as_ref().clone());
        }

        let loaded = self.inner.templates_for(request_type_code).await?;
        // An unknown type is a configuration error; let the next call re-check.
        if !loaded.is_empty() {
            self.pipelines
                .insert(request_type_code.to_string(), Arc::new(loaded.clone()))
                .await;
        }
        Ok(loaded)
    }

    async fn template(&self, id: TemplateId) -> Result<Option<StepTemplate>, StoreError> {
        if let Some(cached) = self.templates.get(&id).await {
            return Ok(Some(cached));
        }

        let loaded = self.inner.template(id).await?;
        if let Some(template) = &loaded {
            self.templates.insert(id, template.clone()).await;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn purchase_steps() -> Vec<StepTemplate> {
        vec![
            StepTemplate::new(3, "PURCHASE", 3, "CEO"),
            StepTemplate::new(1, "PURCHASE", 1, "STAFF"),
            StepTemplate::new(2, "PURCHASE", 2, "TEAM_LEAD"),
        ]
    }

    #[tokio::test]
    async fn test_catalog_orders_steps_ascending() {
        let catalog = TemplateCatalog::new(purchase_steps()).unwrap();
        let steps = catalog.templates_for("PURCHASE").await.unwrap();

        let orders: Vec<u32> = steps.iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(catalog.templates_for("LEAVE").await.unwrap().is_empty());
        assert_eq!(catalog.template(2).await.unwrap().unwrap().role_code, "TEAM_LEAD");
    }

    #[test]
    fn test_catalog_rejects_duplicate_order() {
        let mut steps = purchase_steps();
        steps.push(StepTemplate::new(4, "PURCHASE", 2, "CFO"));

        let err = TemplateCatalog::new(steps).unwrap_err();
        assert_eq!(
            err,
            TemplateError::DuplicateOrder {
                request_type_code: "PURCHASE".to_string(),
                order: 2
            }
        );
    }

    #[test]
    fn test_catalog_rejects_zero_order_and_duplicate_ids() {
        let zero = vec![StepTemplate::new(1, "PURCHASE", 0, "STAFF")];
        assert!(matches!(
            TemplateCatalog::new(zero),
            Err(TemplateError::ZeroOrder { .. })
        ));

        let clash = vec![
            StepTemplate::new(1, "PURCHASE", 1, "STAFF"),
            StepTemplate::new(1, "LEAVE", 1, "STAFF"),
        ];
        assert!(matches!(
            TemplateCatalog::new(clash),
            Err(TemplateError::DuplicateId { id: 1 })
        ));
    }

    #[test]
    fn test_catalog_assigns_missing_ids() {
        let steps = vec![
            StepTemplate::new(0, "LEAVE", 1, "STAFF"),
            StepTemplate::new(7, "LEAVE", 2, "HR"),
        ];
        let catalog = TemplateCatalog::new(steps).unwrap();
        let ids: Vec<TemplateId> = catalog.templates().map(|t| t.id).collect();
        assert_eq!(ids, vec![8, 7]);
    }

    struct CountingReader {
        catalog: TemplateCatalog,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StepTemplateReader for CountingReader {
        async fn templates_for(&self, code: &str) -> Result<Vec<StepTemplate>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.catalog.templates_for(code).await
        }

        async fn template(&self, id: TemplateId) -> Result<Option<StepTemplate>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.catalog.template(id).await
        }
    }

    #[tokio::test]
    async fn test_cached_reader_hits_inner_once() {
        let inner = CountingReader {
            catalog: TemplateCatalog::new(purchase_steps()).unwrap(),
            calls: AtomicUsize::new(0),
        };
        let cached = CachedTemplateReader::new(inner, 100, Duration::from_secs(60));

        for _ in 0..3 {
            assert_eq!(cached.templates_for("PURCHASE").await.unwrap().len(), 3);
            assert!(cached.template(1).await.unwrap().is_some());
        }
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);

        cached.invalidate();
        cached.templates_for("PURCHASE").await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cached_reader_does_not_cache_unknown_types() {
        let inner = CountingReader {
            catalog: TemplateCatalog::default(),
            calls: AtomicUsize::new(0),
        };
        let cached = CachedTemplateReader::new(inner, 100, Duration::from_secs(60));

        assert!(cached.templates_for("LEAVE").await.unwrap().is_empty());
        assert!(cached.templates_for("LEAVE").await.unwrap().is_empty());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }
}
