//! Config loader: assembles the layered sources and deserializes the result.

use crate::config::merge::merge_policy;
use crate::config::sources::{global_file, workspace_file};
use crate::config::FramestackConfig;
use config::{ConfigError, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_PREFIX: &str = "FRAMESTACK";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence, lowest first: built-in defaults, global file, workspace
    /// `config/config.toml`, workspace `config/{FRAMESTACK_ENV}.toml`,
    /// `FRAMESTACK__SECTION__KEY` environment variables.
    pub fn load(workspace_root: &Path) -> Result<FramestackConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: FramestackConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load a single TOML file on top of the defaults, ignoring every other source
    pub fn load_from_file(path: &Path) -> Result<FramestackConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path).format(FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    pub fn defaults() -> FramestackConfig {
        FramestackConfig::default()
    }
}

/// Parse an in-memory TOML document with defaults applied
impl std::str::FromStr for FramestackConfig {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
