//! Configuration: type rules (YAML) and sync settings (TOML).

pub mod settings;
pub mod types;

use std::path::PathBuf;

use crate::error::ErrorCode;

pub use settings::{
    DeleteMode, PathSettings, ProjectSettings, Strategy, SyncSettings, TrackerConnection, TrackerSettings,
    UserSettings, load_project_settings, load_user_settings, resolve_connection,
};
pub use types::{
    AttributeMapping, DESCRIPTION_REFERENCE, DIAGRAM_ELEMENTS, DIAGRAM_TYPE, DiagramFilter, DiagramParams,
    ElementTraits, JinjaTemplate, LinkConfig, SerializerConfig, SerializerKind, SerializerParams, TypeConfig,
    TypeRules, WILDCARD,
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The type rules are not valid YAML or have the wrong shape.
    #[error("invalid type configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The document does not have the layer -> type -> entry shape.
    #[error("invalid configuration structure: {0}")]
    Shape(String),

    /// A single layer/type entry failed validation.
    #[error("validation error in config for {layer}/{c_type}: {message}")]
    Entry {
        layer: String,
        c_type: String,
        message: String,
    },

    /// A serializer key does not name a known serializer.
    #[error("unknown serializer {0:?}")]
    UnknownSerializer(String),

    /// Serializer parameters have the wrong shape.
    #[error("invalid parameters for serializer {serializer:?}: {message}")]
    SerializerParams { serializer: String, message: String },

    /// The settings file is not valid TOML.
    #[error("invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A settings value is out of range.
    #[error("invalid setting {key}: {message}")]
    Setting { key: &'static str, message: String },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Io { .. }
            | Self::Yaml(_)
            | Self::Shape(_)
            | Self::Entry { .. }
            | Self::SerializerParams { .. } => ErrorCode::ConfigParseError,
            Self::UnknownSerializer(_) => ErrorCode::UnknownSerializer,
            Self::Toml(_) | Self::Setting { .. } => ErrorCode::SettingsInvalid,
        }
    }
}
