use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::generation::{GenerationPort, RetryPolicy, RetryingGenerator, RigGenerator};

/// Named generation engines, resolved once at startup.
#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn GenerationPort>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured engine, each wrapped in the retry policy.
    pub fn from_config(
        engines: &HashMap<String, EngineConfig>,
        retry: &RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (name, engine) in engines {
            let key_var = engine.api_key_env();
            let api_key = std::env::var(key_var)
                .map_err(|_| ConfigError::MissingApiKey(key_var.to_string()))?;

            let primary = Arc::new(RigGenerator::new(
                engine.backend,
                &api_key,
                &engine.model,
                engine.temperature,
                engine.max_tokens,
            ));
            let mut generator = RetryingGenerator::new(primary, retry.clone());
            if let Some(fallback_model) = &engine.fallback_model {
                generator = generator.with_fallback(Arc::new(RigGenerator::new(
                    engine.backend,
                    &api_key,
                    fallback_model,
                    engine.temperature,
                    engine.max_tokens,
                )));
            }

            info!(engine = %name, model = %engine.model, backend = ?engine.backend, "Engine registered");
            registry.insert(name.clone(), Arc::new(generator));
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, engine: Arc<dyn GenerationPort>) {
        self.engines.insert(name.into(), engine);
    }

    pub fn with_engine(mut self, name: impl Into<String>, engine: Arc<dyn GenerationPort>) -> Self {
        self.insert(name, engine);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn GenerationPort>, ConfigError> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEngine(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::BackendKind;
    use crate::testing::ScriptedGenerator;

    #[test]
    fn test_lookup() {
        let registry = EngineRegistry::new()
            .with_engine("gpt", Arc::new(ScriptedGenerator::new("gpt-4o", Vec::<String>::new())));

        assert_eq!(registry.get("gpt").unwrap().model_name(), "gpt-4o");
        assert!(matches!(registry.get("llama"), Err(ConfigError::UnknownEngine(_))));
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let mut engines = HashMap::new();
        engines.insert(
            "gpt".to_string(),
            EngineConfig {
                backend: BackendKind::OpenAi,
                model: "gpt-4o".to_string(),
                temperature: 0.0,
                max_tokens: 512,
                api_key_env: Some("COLLAB_CONSULTATION_TEST_UNSET_KEY".to_string()),
                fallback_model: None,
            },
        );
        assert!(matches!(
            EngineRegistry::from_config(&engines, &RetryPolicy::default()),
            Err(ConfigError::MissingApiKey(var)) if var == "COLLAB_CONSULTATION_TEST_UNSET_KEY"
        ));
    }
}
