//! Crawler settings read from one TOML file
//!
//! `[[tenant]]` entries extend or override the built-in catalog. Every key
//! has a default, so an empty file is valid.
//!
//! # Example
//!
//! ```no_run
//! use complot_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("crawler.toml")).unwrap();
//! println!("Concurrency per worker: {}", config.crawler.max_concurrent);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{ApiConfig, CheckpointBackend, Config, CrawlerConfig, OutputConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};

pub(crate) use validation::validate_crawler_config;
