use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;
use url::Url;

use super::schema::Config;
use crate::error::{ConfigError, Result};

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        // Try to load from various config files
        .merge(Toml::file("flowlens.toml"))
        .merge(Json::file("flowlens.json"))
        .merge(Yaml::file("flowlens.yaml"))
        .merge(Yaml::file("flowlens.yml"))
        // Override with environment variables (FLOWLENS_ prefix)
        .merge(Env::prefixed("FLOWLENS_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;

    Ok(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(format!(
                "Unsupported config format: {}",
                path.display()
            ))
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed("FLOWLENS_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let upstream = Url::parse(&config.proxy.upstream)
        .map_err(|e| ConfigError::Validation(format!("Invalid upstream URL: {e}")))?;

    if !matches!(upstream.scheme(), "http" | "https") {
        return Err(ConfigError::Validation(format!(
            "Upstream must be http or https, got '{}'",
            upstream.scheme()
        ))
        .into());
    }

    if upstream.host_str().is_none() {
        return Err(ConfigError::Validation("Upstream URL has no host".into()).into());
    }

    if config.server.port == 0 {
        return Err(ConfigError::Validation("Server port must be non-zero".into()).into());
    }

    if config.capture.capacity == 0 {
        return Err(ConfigError::Validation("Capture capacity must be greater than 0".into()).into());
    }

    if config.capture.preview_limit == 0 {
        return Err(
            ConfigError::Validation("Preview limit must be greater than 0".into()).into(),
        );
    }

    if let Some(exporter) = &config.exporter {
        Url::parse(&exporter.endpoint)
            .map_err(|e| ConfigError::Validation(format!("Invalid exporter endpoint: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProxyConfig;

    fn base_config(upstream: &str) -> Config {
        Config {
            proxy: ProxyConfig {
                upstream: upstream.to_string(),
            },
            server: Default::default(),
            capture: Default::default(),
            events: Default::default(),
            exporter: None,
        }
    }

    #[test]
    fn test_validate_accepts_http_upstream() {
        assert!(validate(&base_config("http://localhost:3000")).is_ok());
        assert!(validate(&base_config("https://api.openai.com")).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_upstream() {
        assert!(validate(&base_config("not a url")).is_err());
        assert!(validate(&base_config("ftp://example.com")).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = base_config("http://localhost:3000");
        config.capture.capacity = 0;
        assert!(validate(&config).is_err());
    }
}
