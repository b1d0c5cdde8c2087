use std::path::Path;

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let raw_config: Value = toml::from_str(&content)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    if !config.catalog.models.is_empty() {
        log::debug!("Loaded {} catalog model override(s)", config.catalog.models.len());
    }

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    for (id, entry) in &config.catalog.models {
        let Some((provider, model)) = id.split_once('/') else {
            bail!(indoc! {r#"
                Catalog model ids must be namespaced as 'provider/name'.

                Example:

                  [catalog.models."openai/gpt-4o"]
                  context_window = 128000
            "#});
        };

        if provider.is_empty() || model.is_empty() {
            bail!("Catalog model id '{id}' has an empty provider or model segment");
        }

        if entry.input_price < 0.0 || entry.output_price < 0.0 {
            bail!("Catalog model '{id}' has a negative price");
        }

        for fallback in &entry.fallbacks {
            if fallback == id {
                bail!("Catalog model '{id}' lists itself as a fallback");
            }
        }
    }

    if config.batch.max_concurrent_requests == 0 {
        bail!("batch.max_concurrent_requests must be at least 1");
    }

    if config.batch.max_batch_size == 0 {
        bail!("batch.max_batch_size must be at least 1");
    }

    if config.cache.ttl.is_zero() {
        bail!("cache.ttl must be non-zero");
    }

    if config.cache.sweep_interval.is_zero() {
        bail!("cache.sweep_interval must be non-zero");
    }

    if config.analytics.default_input_price < 0.0 || config.analytics.default_output_price < 0.0 {
        bail!("analytics fallback prices must be non-negative");
    }

    Ok(())
}
