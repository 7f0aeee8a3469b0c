use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so runs can be matched to the configuration revision
/// they used.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointBackend;
    use crate::tenant::EndpointFamily;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[crawler]
max-concurrent = 10
request-timeout-secs = 15
max-retries = 2
workers = 4
test-house-numbers = [1, 2, 3]

[api]
base-url = "https://handasi.complot.co.il/magicscripts/mgrqispi.dll"

[output]
data-dir = "./out"
checkpoint-backend = "json"

[[tenant]]
key = "testville"
name = "טסטוויל"
site-id = 99
city-code = 1234
portal-url = "https://testville.complot.co.il/"
street-range = [1, 50]
endpoint-family = "bakashot"
enrichment-blocked = true
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.max_concurrent, 10);
        assert_eq!(config.crawler.workers, 4);
        assert_eq!(config.crawler.test_house_numbers, vec![1, 2, 3]);
        // untouched fields keep their defaults
        assert_eq!(config.crawler.save_interval, 100);
        assert_eq!(config.api.app_name, "cixpa");
        assert_eq!(config.output.checkpoint_backend, CheckpointBackend::Json);

        assert_eq!(config.tenants.len(), 1);
        let tenant = &config.tenants[0];
        assert_eq!(tenant.street_range, (1, 50));
        assert_eq!(tenant.endpoint_family, EndpointFamily::Bakashot);
        assert!(tenant.enrichment_blocked);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = create_temp_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.crawler.max_concurrent, 20);
        assert_eq!(config.crawler.max_retries, 3);
        assert_eq!(config.crawler.retry_base_delay_ms, 2000);
        assert_eq!(config.crawler.request_timeout_secs, 30);
        assert_eq!(config.output.checkpoint_backend, CheckpointBackend::Sqlite);
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("crawler.example.toml");
        let config = load_config(&path).unwrap();
        let defaults = Config::default();
        assert_eq!(config.crawler.max_concurrent, defaults.crawler.max_concurrent);
        assert_eq!(config.crawler.test_house_numbers, defaults.crawler.test_house_numbers);
        assert_eq!(config.api.base_url, defaults.api.base_url);
        assert_eq!(config.output.database_name, defaults.output.database_name);
        assert_eq!(config.tenants[0].key, "ofaqim");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[crawler]
max-concurrent = 0
"#;

        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
