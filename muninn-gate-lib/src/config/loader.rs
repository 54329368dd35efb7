use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{GateError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| GateError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| GateError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.runtime.executors == 0 {
        return Err(GateError::Config(
            "runtime.executors must be at least 1".to_string(),
        ));
    }

    if cfg.runtime.handshake_backlog == 0 {
        return Err(GateError::Config(
            "runtime.handshake_backlog must be at least 1".to_string(),
        ));
    }

    let header = cfg.transport.header.size();
    if cfg.transport.mtu < header {
        return Err(GateError::Config(format!(
            "transport.mtu ({}) is smaller than the {}-byte wire header",
            cfg.transport.mtu, header
        )));
    }

    if let Some(fec) = &cfg.transport.fec {
        if fec.data_shards == 0 {
            return Err(GateError::Config(
                "transport.fec.data_shards must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}
