use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::languages::LanguageProfile;
use crate::types::{Language, SandboxConfig};
use crate::worker::{SandboxExecutor, program_available};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time_limit: Duration,
    pub memory_limit_kb: u64,
    pub output_limit_bytes: usize,
}

impl ExecutionLimits {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            time_limit: Duration::from_millis(config.time_limit_ms),
            memory_limit_kb: config.memory_limit_kb,
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

/// Runs one program against one input. Implementations own their isolation.
#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> Language;

    /// Returns the program's stdout trimmed of surrounding whitespace.
    async fn execute(
        &self,
        code: &str,
        input: &str,
        limits: &ExecutionLimits,
    ) -> Result<String, ExecutionError>;
}

#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Language, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sandboxed executor per configured language whose interpreter is
    /// installed. Languages without one stay unregistered.
    pub fn sandboxed(config: &SandboxConfig, base_code_path: &str) -> Self {
        let mut registry = Self::new();
        for language in &config.languages {
            let profile = LanguageProfile::new(language.language, language.program.clone());
            if !program_available(&profile) {
                tracing::error!(
                    language = %language.language,
                    program = %language.program,
                    "interpreter not found, language disabled"
                );
                continue;
            }
            registry.register(Arc::new(SandboxExecutor::new(
                profile,
                PathBuf::from(base_code_path),
            )));
        }
        registry
    }

    /// Replaces any executor previously registered for the same language.
    pub fn register(&mut self, executor: Arc<dyn Executor>) -> &mut Self {
        let language = executor.language();
        if self.executors.insert(language, executor).is_some() {
            tracing::warn!(%language, "replacing registered executor");
        }
        self
    }

    pub fn get(&self, language: Language) -> Result<Arc<dyn Executor>, ExecutionError> {
        self.executors
            .get(&language)
            .cloned()
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.executors.keys().copied().collect();
        languages.sort_by_key(|l| l.as_str());
        languages
    }
}
