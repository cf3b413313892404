use std::path::PathBuf;

use crate::error::{Error, Result};

pub const CONFIG_DIR_ENV: &str = "JCARD_CONFIG_DIR";

/// `$JCARD_CONFIG_DIR` if set, otherwise `~/.jcard`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = directories::BaseDirs::new().ok_or(Error::NoHomeDir)?;
    Ok(home.home_dir().join(".jcard"))
}
