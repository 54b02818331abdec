use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::warn;

use crate::models::ButlerConfig;

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<ButlerConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    load_config_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// Parse and validate configuration from TOML text.
pub fn load_config_str(raw: &str) -> anyhow::Result<ButlerConfig> {
    let config: ButlerConfig =
        toml::from_str(raw).context("failed to parse TOML")?;
    let problems = validate(&config);
    if !problems.is_empty() {
        anyhow::bail!("configuration rejected: {}", problems.join("; "));
    }
    Ok(config)
}

/// Collect every validation problem rather than stopping at the first, so a
/// misconfigured NAS deployment gets one actionable error message.
pub fn validate(config: &ButlerConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if config.paths.watch_folders.is_empty() {
        problems.push("paths.watch_folders must name at least one directory".to_string());
    }
    for folder in &config.paths.watch_folders {
        if !folder.is_absolute() {
            problems.push(format!(
                "paths.watch_folders entry {} is not absolute",
                folder.display()
            ));
        }
    }
    if !config.paths.library_root.is_absolute() {
        problems.push(format!(
            "paths.library_root {} is not absolute",
            config.paths.library_root.display()
        ));
    }

    for (name, value) in [
        ("classification.auto_threshold", config.classification.auto_threshold),
        ("classification.suggest_threshold", config.classification.suggest_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            problems.push(format!("{name} must lie in [0, 1], got {value}"));
        }
    }
    if config.classification.suggest_threshold > config.classification.auto_threshold {
        problems.push(format!(
            "classification.suggest_threshold ({}) exceeds auto_threshold ({})",
            config.classification.suggest_threshold, config.classification.auto_threshold
        ));
    }

    for pattern in &config.discovery.exclude_patterns {
        if let Err(err) = regex::Regex::new(pattern) {
            problems.push(format!(
                "discovery.exclude_patterns entry {pattern:?} is not a valid regex: {err}"
            ));
        }
    }
    if config.discovery.file_extensions.is_empty() {
        problems.push("discovery.file_extensions must not be empty".to_string());
    }

    if config.retries.worker_count == 0 {
        problems.push("retries.worker_count must be at least 1".to_string());
    }
    if config.retries.queue_capacity == 0 {
        problems.push("retries.queue_capacity must be at least 1".to_string());
    }
    if config.retries.max_batch_size == 0 {
        problems.push("retries.max_batch_size must be at least 1".to_string());
    }
    if config.retries.retry_delays_ms.is_empty() {
        problems.push("retries.retry_delays_ms must name at least one delay".to_string());
    }

    if config.resources.auto_gc_trigger_mb > config.resources.memory_threshold_mb {
        warn!(
            trigger = config.resources.auto_gc_trigger_mb,
            threshold = config.resources.memory_threshold_mb,
            "auto_gc_trigger_mb above memory_threshold_mb; trigger will never fire first"
        );
    }

    problems
}
