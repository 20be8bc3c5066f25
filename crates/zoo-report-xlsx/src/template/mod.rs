//! Loading design templates and indexing their blocks.

mod blocks;
mod cache;
pub(crate) mod sheet;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::package::{PackageLimits, XlsxError, XlsxPackage};

pub use blocks::{
    BlockCatalog, BlockDefinition, BlockIndexer, CellTemplate, TemplateAssets, TemplateCell,
    TemplateRow, IMPLICIT_BLOCK_NAME,
};
pub use cache::CatalogCache;

pub(crate) use blocks::CarriedName;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("template {template} has no sheet named {sheet:?}")]
    SheetNotFound { template: String, sheet: String },
    #[error("sheet {sheet:?} of template {template} contains no blocks and no rows")]
    EmptyTemplate { template: String, sheet: String },
    #[error("block {name:?} has an unsupported range reference: {reference}")]
    InvalidBlockRange { name: String, reference: String },
    #[error("blocks {first:?} and {second:?} overlap")]
    OverlappingBlocks { first: String, second: String },
    #[error("failed to read template {template}: {source}")]
    Store {
        template: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Package(#[from] XlsxError),
}

/// Source of raw template bytes.
pub trait TemplateStore: Send + Sync {
    /// Bytes of the template named `id`, or `None` when no such template exists.
    fn fetch(&self, id: &str) -> io::Result<Option<Vec<u8>>>;
}

impl<S: TemplateStore + ?Sized> TemplateStore for Arc<S> {
    fn fetch(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        (**self).fetch(id)
    }
}

/// Templates stored as `<root>/<id>.xlsx` (or `.xltx`).
#[derive(Debug, Clone)]
pub struct DirTemplateStore {
    root: PathBuf,
}

impl DirTemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, id: &str) -> Vec<PathBuf> {
        let has_extension = Path::new(id)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xltx"));
        if has_extension {
            vec![self.root.join(id)]
        } else {
            vec![
                self.root.join(format!("{id}.xlsx")),
                self.root.join(format!("{id}.xltx")),
            ]
        }
    }
}

impl TemplateStore for DirTemplateStore {
    fn fetch(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        for path in self.candidates(id) {
            match std::fs::read(&path) {
                Ok(bytes) => {
                    log::debug!("read template {id} from {}", path.display());
                    return Ok(Some(bytes));
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

/// In-memory templates, mostly for tests and embedded assets.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, bytes: Vec<u8>) {
        let mut templates = self
            .templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        templates.insert(id.into(), Arc::new(bytes));
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn fetch(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(templates.get(id).map(|bytes| bytes.as_ref().clone()))
    }
}

/// Template ids are plain file stems: ASCII letters, digits, `.`, `_` and `-`, never `..`.
pub fn validate_template_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains("..")
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Reads templates from a [`TemplateStore`] and indexes one sheet into a [`BlockCatalog`].
#[derive(Debug, Clone)]
pub struct TemplateLoader<S> {
    store: S,
    limits: PackageLimits,
}

impl<S: TemplateStore> TemplateLoader<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            limits: PackageLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PackageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn load(&self, template_id: &str, sheet_name: &str) -> Result<BlockCatalog, TemplateError> {
        if !validate_template_id(template_id) {
            log::warn!("rejecting template id {template_id:?}");
            return Err(TemplateError::TemplateNotFound(template_id.to_string()));
        }
        let bytes = self
            .store
            .fetch(template_id)
            .map_err(|source| TemplateError::Store {
                template: template_id.to_string(),
                source,
            })?
            .ok_or_else(|| TemplateError::TemplateNotFound(template_id.to_string()))?;

        let package = XlsxPackage::from_bytes_limited(&bytes, self.limits)?;
        BlockIndexer::new(template_id).index(&package, sheet_name)
    }
}
