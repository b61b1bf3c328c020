//! Configuration loading

use std::path::Path;

use anyhow::{bail, Context, Result};
use docgate_common::Config;

/// Settings given on the command line or through `DOCGATE_*` variables.
/// They win over the configuration file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub wire_addr: Option<String>,
    pub http_addr: Option<String>,
    pub log_level: Option<String>,
}

/// Load configuration from `path`, or defaults without one, then apply
/// `overrides`
pub async fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(addr) = &overrides.wire_addr {
        (config.wire.host, config.wire.port) = split_addr(addr)?;
    }
    if let Some(addr) = &overrides.http_addr {
        (config.data_api.host, config.data_api.port) = split_addr(addr)?;
    }
    if let Some(level) = &overrides.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn split_addr(addr: &str) -> Result<(String, u16)> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("address '{}' must be host:port", addr);
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid port in address '{}'", addr))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_overrides_win_over_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[wire]\nport = 27018\n\n[logging]\nlevel = \"warn\"").unwrap();

        let overrides = Overrides {
            wire_addr: None,
            http_addr: Some("0.0.0.0:9000".to_string()),
            log_level: Some("debug".to_string()),
        };
        let config = load(Some(file.path()), &overrides).await.unwrap();
        assert_eq!(config.wire.port, 27018);
        assert_eq!(config.data_api.host, "0.0.0.0");
        assert_eq!(config.data_api.port, 9000);
        assert_eq!(config.logging.level, "debug");
    }

    #[tokio::test]
    async fn test_bad_address_rejected() {
        let overrides = Overrides {
            wire_addr: Some("localhost".to_string()),
            ..Overrides::default()
        };
        assert!(load(None, &overrides).await.is_err());

        let overrides = Overrides {
            wire_addr: Some("localhost:http".to_string()),
            ..Overrides::default()
        };
        assert!(load(None, &overrides).await.is_err());
    }
}
