//! One-call report rendering and the error taxonomy handed to the HTTP layer.

use thiserror::Error;

use crate::render::{RenderEngine, RenderError, RenderInstruction, RenderOptions};
use crate::template::{CatalogCache, TemplateError, TemplateStore};
use crate::write::WriteError;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("the report has no rows")]
    EmptyDataset,
    #[error("upstream data source failed: {0}")]
    UpstreamFailure(String),
}

/// How the HTTP layer should classify a [`ReportError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportErrorKind {
    /// Nothing to export; not a failure.
    NoData,
    /// The request asked for more than a workbook can hold.
    ClientFault,
    ServerFault,
}

impl ReportError {
    pub fn kind(&self) -> ReportErrorKind {
        match self {
            ReportError::EmptyDataset => ReportErrorKind::NoData,
            ReportError::Render(RenderError::RowLimitExceeded { .. }) => ReportErrorKind::ClientFault,
            _ => ReportErrorKind::ServerFault,
        }
    }
}

/// Fail with [`ReportError::EmptyDataset`] when an upstream query returned no rows.
pub fn ensure_rows(count: usize) -> Result<(), ReportError> {
    if count == 0 {
        Err(ReportError::EmptyDataset)
    } else {
        Ok(())
    }
}

/// Load (or reuse) the catalog, render `instructions` and serialize the result.
pub fn render_report<S, I>(
    cache: &CatalogCache<S>,
    template_id: &str,
    sheet_name: &str,
    instructions: I,
    options: &RenderOptions,
) -> Result<Vec<u8>, ReportError>
where
    S: TemplateStore,
    I: IntoIterator<Item = RenderInstruction>,
{
    let catalog = cache.get(template_id, sheet_name)?;
    let document = RenderEngine::new(options.clone()).render(&catalog, instructions)?;
    Ok(document.serialize()?)
}
