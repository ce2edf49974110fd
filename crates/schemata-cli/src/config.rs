//! Configuration file handling.
//!
//! Looks for `.config/schemata.toml` in the current directory or any parent
//! directory, then layers `SCHEMATA_*` environment variables and command-line
//! flags on top.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use schemata::MigrateConfig;

const CONFIG_FILE: &str = ".config/schemata.toml";

/// Values given on the command line; they win over everything else.
#[derive(Debug, Default)]
pub struct Overrides {
    pub backend: Option<String>,
    pub url: Option<String>,
    pub prefix: Option<String>,
}

/// Load configuration, searching up the tree from the current directory.
pub fn load(overrides: Overrides) -> Result<(MigrateConfig, Option<PathBuf>), config::ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;
    load_from(&cwd, overrides)
}

/// Load configuration starting from a specific directory.
pub fn load_from(
    start: &Path,
    overrides: Overrides,
) -> Result<(MigrateConfig, Option<PathBuf>), config::ConfigError> {
    let path = find_config_file(start);

    let mut builder = Config::builder().set_default("prefix", "wt_")?;
    if let Some(path) = &path {
        builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
    }
    let config = builder
        .add_source(Environment::with_prefix("SCHEMATA"))
        .set_override_option("backend", overrides.backend)?
        .set_override_option("url", overrides.url)?
        .set_override_option("prefix", overrides.prefix)?
        .build()?
        .try_deserialize::<MigrateConfig>()?;

    Ok((config, path))
}

/// Find `.config/schemata.toml` by searching up the directory tree.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}
