use crate::config::types::{ApiConfig, Config, CrawlerConfig, OutputConfig};
use crate::tenant::Tenant;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_api_config(&config.api)?;
    validate_output_config(&config.output)?;
    validate_tenants(&config.tenants)?;
    Ok(())
}

/// Validates crawler configuration
pub(crate) fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 200 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent must be between 1 and 200, got {}",
            config.max_concurrent
        )));
    }

    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.retry_max_delay_ms < config.retry_base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry-max-delay-ms ({}) must be >= retry-base-delay-ms ({})",
            config.retry_max_delay_ms, config.retry_base_delay_ms
        )));
    }

    if config.save_interval < 1 {
        return Err(ConfigError::Validation(
            "save-interval must be >= 1".to_string(),
        ));
    }

    if config.test_house_numbers.is_empty() || config.test_house_numbers.contains(&0) {
        return Err(ConfigError::Validation(
            "test-house-numbers must be a non-empty list of positive numbers".to_string(),
        ));
    }

    if config.max_house_number < 2 {
        return Err(ConfigError::Validation(format!(
            "max-house-number must be >= 2, got {}",
            config.max_house_number
        )));
    }

    Ok(())
}

/// Validates API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must be http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.app_name.is_empty() {
        return Err(ConfigError::Validation(
            "app-name cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data-dir cannot be empty".to_string(),
        ));
    }

    if config.database_name.is_empty() || config.database_name.contains('/') {
        return Err(ConfigError::Validation(format!(
            "database-name must be a plain file name, got '{}'",
            config.database_name
        )));
    }

    Ok(())
}

/// Validates configured tenants
fn validate_tenants(tenants: &[Tenant]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for tenant in tenants {
        if tenant.key.is_empty()
            || !tenant
                .key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "tenant key must be lowercase ascii letters, digits or '_', got '{}'",
                tenant.key
            )));
        }

        if !seen.insert(tenant.key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate tenant key '{}'",
                tenant.key
            )));
        }

        tenant
            .check_required()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        Url::parse(&tenant.portal_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid portal-url for tenant '{}': {}",
                tenant.key, e
            ))
        })?;
    }

    Ok(())
}
