//! Provider Factory (spec §4.6 Provider Factory & Config validation). Builds
//! and caches one [`EmbeddingProvider`] per collection, keyed by collection
//! name, so a hot search path never pays model-load or HTTP-client-build
//! cost twice. Validation happens once, here, rather than scattered across
//! call sites: a misconfigured remote provider (missing credential env var)
//! fails at collection-creation time instead of at first use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{CollectionConfig, ProviderKind};
use crate::embedding::{local::LocalProvider, remote::RemoteProvider, EmbeddingProvider};
use crate::errors::{AppError, ErrorKind};

pub struct ProviderFactory {
    cache: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    local_model_repo: String,
}

/// Structured config-validation result (spec §4.6): every check runs and
/// contributes to `errors`/`warnings`/`suggestions` rather than the first
/// failure short-circuiting the rest, so a caller with several problems at
/// once learns about all of them in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ProviderFactory {
    pub fn new(local_model_repo: impl Into<String>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            local_model_repo: local_model_repo.into(),
        }
    }

    /// Validates `cfg` and returns the provider for it, building (and
    /// caching) one if this is the first call for the collection.
    pub fn get_or_build(&self, cfg: &CollectionConfig) -> Result<Arc<dyn EmbeddingProvider>, AppError> {
        if let Some(existing) = self.cache.lock().expect("factory lock").get(&cfg.name) {
            return Ok(existing.clone());
        }

        let report = Self::validate(cfg);
        for warning in &report.warnings {
            tracing::warn!(collection = %cfg.name, warning, "collection config warning");
        }
        if !report.is_valid {
            let kind = if report.errors.iter().any(|e| e.contains("credential_env")) {
                ErrorKind::EmbeddingConfig
            } else {
                ErrorKind::Validation
            };
            return Err(AppError::new(kind, report.errors.join("; ")));
        }

        let provider: Arc<dyn EmbeddingProvider> = match cfg.provider {
            ProviderKind::Local => Arc::new(
                LocalProvider::from_hub(&self.local_model_repo, &cfg.model, cfg.dimensions)?,
            ),
            ProviderKind::Remote => {
                let credential_var = cfg.credential_env.as_deref().ok_or_else(|| {
                    AppError::new(
                        ErrorKind::EmbeddingConfig,
                        "remote provider requires credential_env to be set",
                    )
                })?;
                let api_key = std::env::var(credential_var).map_err(|_| {
                    AppError::new(
                        ErrorKind::EmbeddingConfig,
                        format!("environment variable {credential_var} is not set"),
                    )
                })?;
                let api_base = cfg.api_base.as_deref().unwrap_or("https://api.openai.com/v1");
                Arc::new(RemoteProvider::new(
                    api_base,
                    &api_key,
                    &cfg.model,
                    cfg.dimensions,
                    cfg.timeout_ms,
                    cfg.batch_size,
                )?)
            }
        };

        self.cache
            .lock()
            .expect("factory lock")
            .insert(cfg.name.clone(), provider.clone());
        Ok(provider)
    }

    pub fn invalidate(&self, collection: &str) {
        self.cache.lock().expect("factory lock").remove(collection);
    }

    /// Runs every config check and accumulates the results rather than
    /// bailing out on the first violation (spec §4.6).
    pub fn validate(cfg: &CollectionConfig) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if cfg.dimensions == 0 {
            errors.push("collection dimensions must be greater than zero".to_string());
        } else if cfg.dimensions < 32 {
            warnings.push(format!(
                "{} dimensions is unusually low for a sentence embedding model",
                cfg.dimensions
            ));
        }

        if cfg.batch_size == 0 {
            errors.push("batch_size must be greater than zero".to_string());
        }

        match cfg.provider {
            ProviderKind::Remote => {
                if cfg.credential_env.is_none() {
                    errors.push(format!(
                        "collection '{}' uses a remote provider but sets no credential_env",
                        cfg.name
                    ));
                }
                if cfg.api_base.is_none() {
                    suggestions.push(
                        "api_base not set; defaulting to https://api.openai.com/v1".to_string(),
                    );
                }
            }
            ProviderKind::Local => {
                if cfg.credential_env.is_some() {
                    warnings.push("credential_env is set but the local provider never reads it".to_string());
                }
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_provider_without_credential_env_fails_validation() {
        let cfg = CollectionConfig {
            name: "docs".into(),
            provider: ProviderKind::Remote,
            credential_env: None,
            ..Default::default()
        };
        let report = ProviderFactory::validate(&cfg);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("credential_env")));
    }

    #[test]
    fn zero_dimensions_fails_validation() {
        let cfg = CollectionConfig {
            name: "docs".into(),
            dimensions: 0,
            ..Default::default()
        };
        let report = ProviderFactory::validate(&cfg);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("dimensions")));
    }

    #[test]
    fn validate_accumulates_every_violation_instead_of_stopping_at_the_first() {
        let cfg = CollectionConfig {
            name: "docs".into(),
            provider: ProviderKind::Remote,
            dimensions: 0,
            batch_size: 0,
            credential_env: None,
            ..Default::default()
        };
        let report = ProviderFactory::validate(&cfg);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 3, "expected one error per violated check, got {:?}", report.errors);
    }

    #[test]
    fn validate_passes_clean_config_with_no_errors() {
        let cfg = CollectionConfig {
            name: "docs".into(),
            provider: ProviderKind::Local,
            dimensions: 384,
            batch_size: 8,
            ..Default::default()
        };
        let report = ProviderFactory::validate(&cfg);
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn remote_provider_missing_env_var_surfaces_config_error() {
        let factory = ProviderFactory::new("org/model");
        let cfg = CollectionConfig {
            name: "docs".into(),
            provider: ProviderKind::Remote,
            credential_env: Some("HYBRIDSTORE_TEST_MISSING_VAR_XYZ".into()),
            ..Default::default()
        };
        let err = factory.get_or_build(&cfg).unwrap_err();
        assert_eq!(err.kind, ErrorKind::EmbeddingConfig);
    }
}
