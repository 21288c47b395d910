use std::fs;
use std::path::Path;

use log::debug;
use ticonv_nn::TIConvConfig;

use crate::error::IoResult;

/// Parse and validate a layer config from a JSON string.
pub fn config_from_str(json: &str) -> IoResult<TIConvConfig> {
    let config: TIConvConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

/// Load a layer config from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> IoResult<TIConvConfig> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)?;
    let config = config_from_str(&json)?;
    debug!("loaded TI config from {}", path.display());
    Ok(config)
}

/// Write a layer config as pretty-printed JSON.
pub fn save_config<P: AsRef<Path>>(config: &TIConvConfig, path: P) -> IoResult<()> {
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json)?;
    Ok(())
}
