//! Live document rendering.
//!
//! Two flavours exist. Full authority documents are rendered from a single
//! template and replace whatever the tracker holds. Mixed authority
//! documents are edited by humans; only the areas delimited by
//! `c2pAreaStart`/`c2pAreaEnd` wiki blocks are re-rendered, everything
//! around them is kept byte for byte.

pub mod areas;
pub mod config;
pub mod mass;
pub mod renderer;
pub mod text_items;

use std::path::PathBuf;

use crate::error::ErrorCode;
use crate::template::TemplateError;
use crate::tracker::ApiError;

pub use areas::{Area, extract_areas, extract_heading_ids, remove_table_ids};
pub use config::{DocumentConfigs, DocumentInfo, DocumentInstance, FullAuthorityConfig, MixedAuthorityConfig};
pub use mass::{
    ExistingTextWorkItems, MassDocumentRenderer, ProjectDocuments, RenderOutcome, fetch_existing_documents,
    fetch_text_work_items, push_documents,
};
pub use renderer::{DocumentRenderer, NewDocument, RenderedDocument, RenderingSession};
pub use text_items::{TEXT_WORK_ITEM_ID_FIELD, TEXT_WORK_ITEM_TYPE, TextWorkItems};

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The document configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid document configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    /// Area markers of a mixed authority document do not pair up.
    #[error("document {document}: {message}")]
    AreaMismatch { document: String, message: String },

    /// A mixed authority document must exist and have content.
    #[error("document {0} does not exist or has no content")]
    MissingContent(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A `<workitem>` block or the text work items on the tracker are invalid.
    #[error("text work item: {0}")]
    TextWorkItem(String),

    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },
}

impl DocumentError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } | Self::Config(_) => ErrorCode::ConfigParseError,
            Self::AreaMismatch { .. } | Self::MissingContent(_) => ErrorCode::DocumentAreaMismatch,
            Self::Template(_) | Self::TextWorkItem(_) => ErrorCode::TemplateRenderFailed,
            Self::Api { .. } => ErrorCode::RemoteApiFailure,
        }
    }

    pub(crate) fn api(operation: &'static str) -> impl FnOnce(ApiError) -> Self {
        move |source| Self::Api { operation, source }
    }
}
