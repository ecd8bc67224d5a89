//! Standard locations of patchmesh files

use std::path::PathBuf;

/// Per-user config directory: `<config dir>/patchmesh`
///
/// Falls back to the working directory when the platform has none.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patchmesh")
}

/// Path of a named config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
