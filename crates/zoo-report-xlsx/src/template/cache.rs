use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{BlockCatalog, TemplateError, TemplateLoader, TemplateStore};

type CatalogKey = (String, String);

/// Read-through cache of block catalogs keyed by `(template id, sheet name)`.
///
/// Entries are populated once and never replaced; callers share them as `Arc<BlockCatalog>`.
/// Failed loads are not cached.
#[derive(Debug)]
pub struct CatalogCache<S> {
    loader: TemplateLoader<S>,
    entries: RwLock<HashMap<CatalogKey, Arc<BlockCatalog>>>,
}

impl<S: TemplateStore> CatalogCache<S> {
    pub fn new(loader: TemplateLoader<S>) -> Self {
        Self {
            loader,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &TemplateLoader<S> {
        &self.loader
    }

    pub fn get(&self, template_id: &str, sheet_name: &str) -> Result<Arc<BlockCatalog>, TemplateError> {
        let key = (template_id.to_string(), sheet_name.to_string());
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(catalog) = entries.get(&key) {
                log::debug!("catalog cache hit for {template_id}/{sheet_name}");
                return Ok(Arc::clone(catalog));
            }
        }

        log::debug!("catalog cache miss for {template_id}/{sheet_name}");
        // Loading happens outside the lock; a concurrent loader may win the insert.
        let loaded = Arc::new(self.loader.load(template_id, sheet_name)?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(entries.entry(key).or_insert(loaded)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
