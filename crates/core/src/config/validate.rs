use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Gateway and callback timeouts are non-zero
/// - Concurrency ceiling and poll intervals are non-zero
/// - Every service URL is an http(s) URL
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.gateway.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "gateway.timeout_ms cannot be 0".to_string(),
        ));
    }
    if config.callback.timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "callback.timeout_ms cannot be 0".to_string(),
        ));
    }

    let pipeline = &config.pipeline;
    if pipeline.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline.max_concurrency cannot be 0".to_string(),
        ));
    }
    if pipeline.keyword_poll_interval_ms == 0 || pipeline.material_poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "pipeline poll intervals cannot be 0".to_string(),
        ));
    }

    check_url("material.base_url", &config.material.base_url)?;
    check_url(
        "material.keyword_service_url",
        &config.material.keyword_service_url,
    )?;
    check_url("generation.base_url", &config.generation.base_url)?;
    check_url("scoring.base_url", &config.scoring.base_url)?;
    if let Some(ref analysis) = config.analysis {
        check_url("analysis.base_url", &analysis.base_url)?;
    }
    if let Some(ref url) = config.callback.url {
        check_url("callback.url", url)?;
    }

    Ok(())
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{} must be an http(s) URL, got {:?}",
            field, value
        )))
    }
}
