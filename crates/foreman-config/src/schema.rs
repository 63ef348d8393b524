use foreman_core::{ForemanError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, mapped to `foreman.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

// ── Model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// "openai" (any OpenAI-compatible endpoint) or "mock".
    pub provider: String,
    /// Model identifier sent to the provider.
    pub model: String,
    /// Override the provider base URL (Azure, vLLM, local gateways).
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens per response.
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4.1-mini".into(),
            base_url: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// History budget replayed into each model call, in `window_unit`s.
    pub context_window: usize,
    /// "messages", "chars" or "tokens".
    pub window_unit: String,
    /// Supervisor turns allowed per graph execution before the turn fails.
    pub max_cycles: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            context_window: 10,
            window_unit: "messages".into(),
            max_cycles: 25,
        }
    }
}

// ── Memory ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// "sqlite" or "memory".
    pub backend: String,
    /// Path to the SQLite database.
    pub db_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".into(),
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".foreman")
                .join("foreman.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl ForemanConfig {
    /// Check the config for problems. Returns the non-fatal warnings, or the
    /// first error-severity finding as `ConfigValidation`.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>> {
        let mut warnings = Vec::new();

        // ── Model ───
        let valid_providers = ["openai", "mock"];
        if !valid_providers.contains(&self.model.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: "model.provider".into(),
                message: format!("unknown provider '{}'", self.model.provider),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_providers.join(", "))),
            });
        }
        if self.model.model.is_empty() {
            warnings.push(ConfigWarning {
                field: "model.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'gpt-4.1-mini'".into()),
            });
        }
        if self.model.provider == "openai"
            && self.model.api_key.is_none()
            && self.model.base_url.is_none()
        {
            warnings.push(ConfigWarning {
                field: "model.api_key".into(),
                message: "no API key configured".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set model.api_key or export OPENAI_API_KEY".into()),
            });
        }
        if self.model.temperature < 0.0 || self.model.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "model.temperature".into(),
                message: format!("temperature {} is out of range", self.model.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }
        if self.model.max_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "model.max_tokens".into(),
                message: "max_tokens is 0, the model won't produce output".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 4096".into()),
            });
        }

        // ── Agent ───
        let valid_units = ["messages", "chars", "tokens"];
        if !valid_units.contains(&self.agent.window_unit.as_str()) {
            warnings.push(ConfigWarning {
                field: "agent.window_unit".into(),
                message: format!("unknown window unit '{}'", self.agent.window_unit),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_units.join(", "))),
            });
        }
        if self.agent.context_window == 0 {
            warnings.push(ConfigWarning {
                field: "agent.context_window".into(),
                message: "context window is 0, agents will see no history".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 10 messages".into()),
            });
        }
        if self.agent.max_cycles == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_cycles".into(),
                message: "max_cycles is 0, no supervisor turn can run".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 25".into()),
            });
        } else if self.agent.max_cycles > 200 {
            warnings.push(ConfigWarning {
                field: "agent.max_cycles".into(),
                message: format!("max_cycles is {}, a looping supervisor will burn tokens", self.agent.max_cycles),
                severity: WarningSeverity::Warning,
                hint: Some("Consider a lower limit".into()),
            });
        }

        // ── Memory ───
        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&self.memory.backend.as_str()) {
            warnings.push(ConfigWarning {
                field: "memory.backend".into(),
                message: format!("unknown backend '{}'", self.memory.backend),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_backends.join(", "))),
            });
        } else if self.memory.backend == "memory" {
            warnings.push(ConfigWarning {
                field: "memory.backend".into(),
                message: "in-memory backend, sessions are lost on exit".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        if let Some(err) = warnings.iter().find(|w| w.severity == WarningSeverity::Error) {
            return Err(ForemanError::ConfigValidation {
                field: err.field.clone(),
                reason: err.message.clone(),
            });
        }

        Ok(warnings)
    }
}
