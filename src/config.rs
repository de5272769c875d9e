use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::debug;
use serde::Deserialize;

use crate::file_matching::MatchExpression;

#[derive(Deserialize, Debug)]
pub struct Config {
    /// Which of the supplied paths to verify. This is ANDed with whatever
    /// path set the caller feeds in. There's no need for exclude since you
    /// can just use a Not expression.
    pub include: MatchExpression,

    /// Directory that relative paths are resolved against. Defaults to the
    /// current directory.
    pub root: Option<PathBuf>,

    /// Maximum number of checks in flight at once. Defaults to the
    /// available parallelism.
    pub max_parallelism: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include: MatchExpression::Bool(true),
            root: None,
            max_parallelism: None,
        }
    }
}

/// Read JSON config. We always read in JSON5 so this works with JSONC and JSON too.
pub fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;

    serde_json5::from_str(&content).map_err(|e| {
        anyhow!(
            "Config deserialization error ({path}): {e}",
            path = path.display()
        )
    })
}

/// Find and read the config file, or fall back to the default config when
/// none exists. An explicitly supplied path must exist.
pub fn find_and_read_config(root: &Path, config: &Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config {
        return read_config(path);
    }
    for filename in &[".casecheck.json5", ".casecheck.jsonc", ".casecheck.json"] {
        let path = root.join(filename);
        if path.exists() {
            return read_config(&path);
        }
    }
    debug!("No config file found; checking every supplied path");
    Ok(Config::default())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_matching::path_matches;

    #[test]
    fn optional_fields_can_be_omitted() {
        let config: Config = serde_json5::from_str(r#"{ include: { bool: true } }"#).unwrap();
        assert!(config.root.is_none());
        assert!(config.max_parallelism.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config: Config = serde_json5::from_str(
            r#"{
                // Skip dependency trees.
                include: { not: { glob: "**/node_modules/**" } },
                root: "/repo",
                max_parallelism: 2,
            }"#,
        )
        .unwrap();
        assert_eq!(config.root.as_deref(), Some(Path::new("/repo")));
        assert_eq!(config.max_parallelism, Some(2));
        assert!(!path_matches(
            Path::new("/repo/node_modules/x.js"),
            &config.include
        ));
    }
}
