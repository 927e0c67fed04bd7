use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cost::Pricing;
use crate::document::{DEFAULT_PROTECTED_KEYS, DEFAULT_TRANSLATABLE_KEYS, KeyPolicy};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");
const HOME_DIR_NAME: &str = ".blog-translator";

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub rate_limit_retries: usize,
    pub max_chunk_size: usize,
    pub max_chunk_count: usize,
    pub batch_size: usize,
    pub max_batch_count: usize,
    pub concurrency: usize,
    pub request_timeout: Option<Duration>,
    pub pricing: Pricing,
    pub translatable_keys: Vec<String>,
    pub protected_keys: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "openai:gpt-4.1-nano".to_string(),
            temperature: 0.1,
            max_output_tokens: 4096,
            rate_limit_retries: 5,
            max_chunk_size: 500,
            max_chunk_count: 30,
            batch_size: 10,
            max_batch_count: 50,
            concurrency: num_cpus::get().saturating_mul(2).max(1),
            request_timeout: None,
            pricing: Pricing::default(),
            translatable_keys: to_strings(DEFAULT_TRANSLATABLE_KEYS),
            protected_keys: to_strings(DEFAULT_PROTECTED_KEYS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    provider: Option<ProviderSettings>,
    html: Option<HtmlSettings>,
    document: Option<DocumentSettings>,
    dispatch: Option<DispatchSettings>,
    pricing: Option<PricingSettings>,
    policy: Option<PolicySettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSettings {
    model: Option<String>,
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
    rate_limit_retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct HtmlSettings {
    max_chunk_size: Option<usize>,
    max_chunk_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DocumentSettings {
    batch_size: Option<usize>,
    max_batch_count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct DispatchSettings {
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingSettings {
    input_per_million: Option<f64>,
    output_per_million: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicySettings {
    translatable_keys: Option<Vec<String>>,
    protected_keys: Option<Vec<String>>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy::new(
            self.translatable_keys.iter().cloned(),
            self.protected_keys.iter().cloned(),
        )
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(provider) = incoming.provider {
            if let Some(model) = provider.model {
                if !model.trim().is_empty() {
                    self.model = model.trim().to_string();
                }
            }
            if let Some(temperature) = provider.temperature {
                if (0.0..=2.0).contains(&temperature) {
                    self.temperature = temperature;
                }
            }
            if let Some(max) = provider.max_output_tokens {
                if max > 0 {
                    self.max_output_tokens = max;
                }
            }
            if let Some(retries) = provider.rate_limit_retries {
                self.rate_limit_retries = retries;
            }
        }
        if let Some(html) = incoming.html {
            if let Some(size) = html.max_chunk_size {
                if size > 0 {
                    self.max_chunk_size = size;
                }
            }
            if let Some(count) = html.max_chunk_count {
                if count > 0 {
                    self.max_chunk_count = count;
                }
            }
        }
        if let Some(document) = incoming.document {
            if let Some(size) = document.batch_size {
                if size > 0 {
                    self.batch_size = size;
                }
            }
            if let Some(count) = document.max_batch_count {
                if count > 0 {
                    self.max_batch_count = count;
                }
            }
        }
        if let Some(dispatch) = incoming.dispatch {
            if let Some(concurrency) = dispatch.concurrency {
                if concurrency > 0 {
                    self.concurrency = concurrency;
                }
            }
            if let Some(secs) = dispatch.timeout_secs {
                self.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }
        if let Some(pricing) = incoming.pricing {
            if let Some(rate) = pricing.input_per_million {
                if rate >= 0.0 {
                    self.pricing.input_per_million = rate;
                }
            }
            if let Some(rate) = pricing.output_per_million {
                if rate >= 0.0 {
                    self.pricing.output_per_million = rate;
                }
            }
        }
        if let Some(policy) = incoming.policy {
            if let Some(keys) = policy.translatable_keys {
                if !keys.is_empty() {
                    self.translatable_keys = keys;
                }
            }
            if let Some(keys) = policy.protected_keys {
                if !keys.is_empty() {
                    self.protected_keys = keys;
                }
            }
        }
    }
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = home_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(HOME_DIR_NAME))
        }
    })
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn defaults_match_embedded_file() {
        with_temp_home(|home| {
            let settings = load_settings(None).unwrap();
            assert_eq!(settings.max_chunk_size, 500);
            assert_eq!(settings.max_chunk_count, 30);
            assert_eq!(settings.batch_size, 10);
            assert_eq!(settings.pricing, Pricing::default());
            assert!(settings.key_policy().is_translatable("caption"));
            assert!(settings.key_policy().is_protected("href"));
            assert!(home.join(HOME_DIR_NAME).join("settings.toml").exists());
        });
    }

    #[test]
    fn later_layers_override_and_invalid_values_are_ignored() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                r#"
[html]
max_chunk_size = 1200
max_chunk_count = 0

[dispatch]
concurrency = 3
timeout_secs = 45

[policy]
translatable_keys = ["text", "body"]
protected_keys = []
"#,
            )
            .unwrap();
            let settings = load_settings(Some(&extra)).unwrap();
            assert_eq!(settings.max_chunk_size, 1200);
            assert_eq!(settings.max_chunk_count, 30);
            assert_eq!(settings.concurrency, 3);
            assert_eq!(settings.request_timeout, Some(Duration::from_secs(45)));
            let policy = settings.key_policy();
            assert!(policy.is_translatable("body"));
            assert!(!policy.is_translatable("caption"));
            assert!(policy.is_protected("id"));
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
