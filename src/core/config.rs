//! Build configuration loaded from `armature.json` next to the entry file.
//!
//! Every field is optional; an absent file means defaults. A present but
//! malformed file is a hard error because silently ignoring it would also
//! silently disable feature gates and extension bindings.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "armature.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub experimental_features: ExperimentalFeatures,
    /// Extension namespace to provider binary path, e.g.
    /// `"Microsoft.Network": "./bin/network-provider"`.
    pub extensions: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentalFeatures {
    pub local_deploy: bool,
}

impl BuildConfig {
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("invalid {}: {}", CONFIG_FILE_NAME, e))
    }

    /// Load the config governing `entry_file`, looking for the config file in
    /// the same directory. Absent file is defaults, unreadable or malformed
    /// file is an error.
    pub fn load_for(entry_file: &Path) -> Result<Self, String> {
        let path = config_path_for(entry_file);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        Self::parse(&text)
    }

    pub fn extension_binary(&self, namespace: &str) -> Option<&str> {
        self.extensions.get(namespace).map(String::as_str)
    }
}

fn config_path_for(entry_file: &Path) -> PathBuf {
    entry_file
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BuildConfig::parse("{}").unwrap();
        assert!(!config.experimental_features.local_deploy);
        assert!(config.extensions.is_empty());
    }

    #[test]
    fn test_config_full() {
        let config = BuildConfig::parse(
            r#"{
                "experimentalFeatures": { "localDeploy": true },
                "extensions": {
                    "Microsoft.Network": "./bin/network-provider",
                    "Custom.Thing": "/usr/local/bin/thing"
                }
            }"#,
        )
        .unwrap();
        assert!(config.experimental_features.local_deploy);
        assert_eq!(
            config.extension_binary("Microsoft.Network"),
            Some("./bin/network-provider")
        );
        assert_eq!(config.extension_binary("Unbound.Ns"), None);
    }

    #[test]
    fn test_config_unknown_fields_ignored() {
        let config = BuildConfig::parse(r#"{ "futureSetting": 42 }"#).unwrap();
        assert!(!config.experimental_features.local_deploy);
    }

    #[test]
    fn test_config_malformed_is_error() {
        let err = BuildConfig::parse("{ not json").unwrap_err();
        assert!(err.contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn test_config_load_absent_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("main.arm");
        let config = BuildConfig::load_for(&entry).unwrap();
        assert!(!config.experimental_features.local_deploy);
    }

    #[test]
    fn test_config_load_reads_sibling_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{ "experimentalFeatures": { "localDeploy": true } }"#,
        )
        .unwrap();
        let config = BuildConfig::load_for(&dir.path().join("main.arm")).unwrap();
        assert!(config.experimental_features.local_deploy);
    }

    #[test]
    fn test_config_load_malformed_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "oops").unwrap();
        assert!(BuildConfig::load_for(&dir.path().join("main.arm")).is_err());
    }
}
