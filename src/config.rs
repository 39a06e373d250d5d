use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::batch_planner::{
    BatchPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MIN_BATCH_SIZE, DEFAULT_SHRINK_FACTOR,
    DEFAULT_SINGLE_BATCH_THRESHOLD,
};

pub const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 3;
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_API_PATH: &str = "/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub api_base: &'static str,
    pub api_path: &'static str,
    pub model: &'static str,
    pub auth_header_name: &'static str,
    pub auth_scheme: &'static str,
    pub requires_key: bool,
}

pub const PROVIDER_PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        api_base: "https://api.openai.com",
        api_path: DEFAULT_API_PATH,
        model: "gpt-4o-mini",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: true,
    },
    ProviderPreset {
        name: "openrouter",
        api_base: "https://openrouter.ai/api",
        api_path: DEFAULT_API_PATH,
        model: "openai/gpt-4o-mini",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: true,
    },
    ProviderPreset {
        name: "groq",
        api_base: "https://api.groq.com/openai",
        api_path: DEFAULT_API_PATH,
        model: "llama-3.1-8b-instant",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: true,
    },
    ProviderPreset {
        name: "ollama",
        api_base: "http://localhost:11434",
        api_path: DEFAULT_API_PATH,
        model: "llama3.2",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: false,
    },
    ProviderPreset {
        name: "lmstudio",
        api_base: "http://localhost:1234",
        api_path: DEFAULT_API_PATH,
        model: "local-model",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: false,
    },
    ProviderPreset {
        name: "custom",
        api_base: "",
        api_path: DEFAULT_API_PATH,
        model: "",
        auth_header_name: "Authorization",
        auth_scheme: "Bearer",
        requires_key: false,
    },
];

pub fn find_preset(name: &str) -> Option<&'static ProviderPreset> {
    PROVIDER_PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name.trim()))
}

/// Resolved endpoint and credentials for the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_base: String,
    pub api_path: String,
    pub model: String,
    pub api_key: Option<String>,
    pub auth_header_name: String,
    pub auth_scheme: String,
}

impl ProviderConfig {
    pub fn auth_header_value(&self) -> Option<String> {
        let key = self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())?;
        if self.auth_scheme.trim().is_empty() {
            Some(key.to_string())
        } else {
            Some(format!("{} {key}", self.auth_scheme.trim()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

/// Flag values from the command line; `None` leaves lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<String>,
    pub api_base: Option<String>,
    pub api_path: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub auth_header_name: Option<String>,
    pub auth_scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider: String,
    pub api_base: Option<String>,
    pub api_path: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub auth_header_name: Option<String>,
    pub auth_scheme: Option<String>,

    pub single_batch_threshold: usize,
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub shrink_factor: f64,
    pub retry_backoff_secs: u64,

    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_base: None,
            api_path: None,
            model: None,
            api_key: None,
            auth_header_name: None,
            auth_scheme: None,
            single_batch_threshold: DEFAULT_SINGLE_BATCH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            shrink_factor: DEFAULT_SHRINK_FACTOR,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "tidyai", "tidyai")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// File, then environment, then flags; the result is validated.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, AppError> {
        let config = Self::load_layers(path, overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Layers without validation, for runs that never call the classifier.
    pub fn load_layers(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, AppError> {
        let explicit = path.is_some();
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) if explicit => {
                return Err(AppError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            _ => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = non_empty(lookup("TIDYAI_PROVIDER")) {
            self.provider = provider;
        }
        let set = |key: &str, slot: &mut Option<String>| {
            if let Some(value) = non_empty(lookup(key)) {
                *slot = Some(value);
            }
        };
        set("TIDYAI_API_BASE", &mut self.api_base);
        set("TIDYAI_API_PATH", &mut self.api_path);
        set("TIDYAI_MODEL", &mut self.model);
        set("TIDYAI_API_KEY", &mut self.api_key);
        set("TIDYAI_AUTH_HEADER", &mut self.auth_header_name);
        set("TIDYAI_AUTH_SCHEME", &mut self.auth_scheme);
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(provider) = non_empty(overrides.provider.clone()) {
            self.provider = provider;
        }
        let pairs = [
            (&overrides.api_base, &mut self.api_base),
            (&overrides.api_path, &mut self.api_path),
            (&overrides.model, &mut self.model),
            (&overrides.api_key, &mut self.api_key),
            (&overrides.auth_header_name, &mut self.auth_header_name),
        ];
        for (value, slot) in pairs {
            if let Some(value) = non_empty(value.clone()) {
                *slot = Some(value);
            }
        }
        // An empty scheme is meaningful: it sends the bare key.
        if let Some(scheme) = &overrides.auth_scheme {
            self.auth_scheme = Some(scheme.trim().to_string());
        }
    }

    pub fn provider_config(&self) -> Result<ProviderConfig, AppError> {
        let preset = find_preset(&self.provider)
            .ok_or_else(|| AppError::Config(format!("unsupported provider: {}", self.provider)))?;
        let pick = |value: &Option<String>, fallback: &str| {
            value.clone().unwrap_or_else(|| fallback.to_string())
        };
        Ok(ProviderConfig {
            provider: preset.name.to_string(),
            api_base: pick(&self.api_base, preset.api_base),
            api_path: pick(&self.api_path, preset.api_path),
            model: pick(&self.model, preset.model),
            api_key: self.api_key.clone(),
            auth_header_name: pick(&self.auth_header_name, preset.auth_header_name),
            auth_scheme: pick(&self.auth_scheme, preset.auth_scheme),
        })
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            single_batch_threshold: self.single_batch_threshold,
            batch_size: self.batch_size,
            min_batch_size: self.min_batch_size,
            shrink_factor: self.shrink_factor,
        }
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        self.validate_provider(&mut errors);
        self.validate_pipeline(&mut errors);

        if !errors.is_empty() {
            return Err(AppError::Config(errors.join(", ")));
        }
        Ok(())
    }

    fn validate_provider(&self, errors: &mut Vec<String>) {
        let Some(preset) = find_preset(&self.provider) else {
            errors.push(format!("unsupported provider: {}", self.provider));
            return;
        };
        let Ok(resolved) = self.provider_config() else {
            return;
        };

        if resolved.api_base.is_empty() {
            errors.push("api base URL is required".to_string());
        } else if !(resolved.api_base.starts_with("http://")
            || resolved.api_base.starts_with("https://"))
        {
            errors.push(format!("api base must be an http(s) URL: {}", resolved.api_base));
        }
        if resolved.api_path.is_empty() {
            errors.push("api path cannot be empty".to_string());
        }
        if resolved.model.is_empty() {
            errors.push("model is required".to_string());
        }
        if resolved.auth_header_name.trim().is_empty() {
            errors.push("auth header name cannot be empty".to_string());
        }
        if preset.requires_key && resolved.auth_header_value().is_none() {
            errors.push(format!(
                "provider {} requires an API key (set TIDYAI_API_KEY or --api-key)",
                preset.name
            ));
        }
    }

    fn validate_pipeline(&self, errors: &mut Vec<String>) {
        if self.single_batch_threshold == 0 {
            errors.push("singleBatchThreshold must be at least 1".to_string());
        }
        if self.min_batch_size == 0 {
            errors.push("minBatchSize must be at least 1".to_string());
        }
        if self.batch_size < self.min_batch_size {
            errors.push(format!(
                "batchSize ({}) must not be below minBatchSize ({})",
                self.batch_size, self.min_batch_size
            ));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            errors.push(format!(
                "shrinkFactor must be between 0 and 1, got {}",
                self.shrink_factor
            ));
        }
        if self.max_tokens == 0 {
            errors.push("maxTokens must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push(format!("temperature must be within 0..=2, got {}", self.temperature));
        }
        if self.request_timeout_secs == 0 {
            errors.push("requestTimeoutSecs must be positive".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn preset_supplies_endpoint_defaults() {
        let config = Config {
            provider: "groq".into(),
            api_key: Some("k".into()),
            ..Config::default()
        };
        let resolved = config.provider_config().unwrap();
        assert_eq!(resolved.api_base, "https://api.groq.com/openai");
        assert_eq!(resolved.api_path, "/v1/chat/completions");
        assert_eq!(resolved.auth_header_value().as_deref(), Some("Bearer k"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_file_and_flags_override_env() {
        let mut config = Config::default();
        config.apply_env_overrides(env(&[
            ("TIDYAI_PROVIDER", "ollama"),
            ("TIDYAI_MODEL", "qwen2.5"),
            ("TIDYAI_API_BASE", "http://gpu-box:11434"),
        ]));
        config.apply_overrides(&ConfigOverrides {
            model: Some("mistral".into()),
            ..ConfigOverrides::default()
        });

        let resolved = config.provider_config().unwrap();
        assert_eq!(resolved.provider, "ollama");
        assert_eq!(resolved.model, "mistral");
        assert_eq!(resolved.api_base, "http://gpu-box:11434");
        assert_eq!(resolved.auth_header_value(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn custom_auth_header_and_bare_scheme() {
        let mut config = Config {
            provider: "custom".into(),
            api_base: Some("https://llm.internal".into()),
            model: Some("m".into()),
            api_key: Some("secret".into()),
            ..Config::default()
        };
        config.apply_overrides(&ConfigOverrides {
            auth_header_name: Some("api-key".into()),
            auth_scheme: Some(String::new()),
            ..ConfigOverrides::default()
        });
        let resolved = config.provider_config().unwrap();
        assert_eq!(resolved.auth_header_name, "api-key");
        assert_eq!(resolved.auth_header_value().as_deref(), Some("secret"));
    }

    #[test]
    fn validation_collects_every_problem() {
        let config = Config {
            provider: "custom".into(),
            batch_size: 10,
            min_batch_size: 25,
            shrink_factor: 1.5,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("api base URL is required"));
        assert!(err.contains("model is required"));
        assert!(err.contains("batchSize (10)"));
        assert!(err.contains("shrinkFactor"));
    }

    #[test]
    fn missing_key_is_rejected_for_hosted_providers() {
        let err = Config::default().validate().unwrap_err().to_string();
        assert!(err.contains("requires an API key"));
        assert!(Config {
            provider: "nope".into(),
            ..Config::default()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn loads_camel_case_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"provider":"ollama","batchSize":40,"minBatchSize":20,"retryBackoffSecs":0}"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.batch_policy().batch_size, 40);
        assert_eq!(config.batch_policy().single_batch_threshold, DEFAULT_SINGLE_BATCH_THRESHOLD);
        assert_eq!(config.retry_backoff(), Duration::ZERO);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        let result = Config::load(Some(&missing), &ConfigOverrides::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
