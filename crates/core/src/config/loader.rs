use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment variable overrides (e.g. `CONTENTFLOW_SERVER_PORT`).
pub const ENV_PREFIX: &str = "CONTENTFLOW_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("_"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SERVICES: &str = r#"
[material]
base_url = "http://materials.local"
keyword_service_url = "http://keywords.local"

[generation]
base_url = "http://dify.local"
type_detect_token = "app-type"
single_write_token = "app-single"
combo_write_token = "app-combo"
single_image_token = "app-image"

[scoring]
base_url = "http://score.local"
token = "app-score"
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = format!("{}\n[server]\nport = 9000\n", SERVICES);
        let config = load_config_from_str(&toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.generation.single_write_token, "app-single");
    }

    #[test]
    fn test_load_config_from_str_missing_services() {
        let toml = r#"
[server]
port = 8080
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"{}
[server]
host = "127.0.0.1"
port = 3000

[pipeline]
max_concurrency = 2

[callback]
url = "http://consumer.local/results"
"#,
            SERVICES
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.pipeline.max_concurrency, 2);
        assert_eq!(
            config.callback.url.as_deref(),
            Some("http://consumer.local/results")
        );
    }
}
