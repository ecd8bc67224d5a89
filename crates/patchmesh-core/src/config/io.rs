//! YAML config files
//!
//! Missing or broken config files never stop a node from starting: the
//! lenient [`load_config`] falls back to defaults and says why in the log.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse a YAML file, failing on any I/O or syntax problem
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse config file: {:?}", path))
}

/// Load a config, using defaults when the file is absent or unusable
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("No config at {:?}, using defaults", path);
        return T::default();
    }

    match read_config(path) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Write a config as YAML, creating parent directories
pub fn save_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;
    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Probe {
        channels: u32,
        label: String,
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let probe: Probe = load_config(Path::new("/nonexistent/patchmesh/probe.yaml"));
        assert_eq!(probe, Probe::default());
        assert!(read_config::<Probe>(Path::new("/nonexistent/patchmesh/probe.yaml")).is_err());
    }

    #[test]
    fn test_broken_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.yaml");
        std::fs::write(&path, "channels: [not, a, number]").unwrap();

        let probe: Probe = load_config(&path);
        assert_eq!(probe, Probe::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("probe.yaml");
        let probe = Probe {
            channels: 8,
            label: "drums".to_string(),
        };

        save_config(&probe, &path).unwrap();
        assert_eq!(load_config::<Probe>(&path), probe);
    }
}
