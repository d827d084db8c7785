use crate::error::ConfigError;
use crate::parser::KeyPolicy;
use crate::schema::{FieldSchema, FieldSpec};
use serde::Deserialize;
use std::{fs, path::Path};
use toml_edit::{DocumentMut, value};
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = ".config/invoice_extract.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub extraction: ExtractionSection,
    #[serde(default)]
    pub export: ExportSection,
    /// Replaces the built-in Amazon registry when present.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    #[default]
    Ollama,
    Remote,
}

impl LlmBackend {
    fn table(self) -> &'static str {
        match self {
            LlmBackend::Ollama => "ollama",
            LlmBackend::Remote => "remote",
        }
    }

    fn default_endpoint(self) -> EndpointConfig {
        match self {
            LlmBackend::Ollama => default_ollama(),
            LlmBackend::Remote => default_remote(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub backend: LlmBackend,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_ollama")]
    pub ollama: EndpointConfig,
    #[serde(default = "default_remote")]
    pub remote: EndpointConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: LlmBackend::default(),
            temperature: 0.0,
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

impl LlmSection {
    /// Endpoint of the selected backend.
    pub fn endpoint(&self) -> &EndpointConfig {
        match self.backend {
            LlmBackend::Ollama => &self.ollama,
            LlmBackend::Remote => &self.remote,
        }
    }

    pub fn endpoint_mut(&mut self) -> &mut EndpointConfig {
        match self.backend {
            LlmBackend::Ollama => &mut self.ollama,
            LlmBackend::Remote => &mut self.remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

fn default_ollama() -> EndpointConfig {
    EndpointConfig {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "llama3.1".to_string(),
    }
}

fn default_remote() -> EndpointConfig {
    EndpointConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    /// 0-based page holding the invoice table. Amazon puts it on the second page.
    #[serde(default = "default_page_index")]
    pub page_index: usize,
    #[serde(default)]
    pub key_policy: KeyPolicy,
    #[serde(default = "default_true")]
    pub summary: bool,
}

impl Default for ExtractionSection {
    fn default() -> Self {
        Self {
            page_index: default_page_index(),
            key_policy: KeyPolicy::default(),
            summary: true,
        }
    }
}

fn default_page_index() -> usize {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_export_dir")]
    pub dir: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            dir: default_export_dir(),
        }
    }
}

fn default_export_dir() -> String {
    ".".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like `load`, but a missing file means defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// The configured registry, or the Amazon one when none is configured.
    pub fn schema(&self) -> Result<FieldSchema, ConfigError> {
        if self.fields.is_empty() {
            Ok(FieldSchema::amazon_invoice())
        } else {
            FieldSchema::new(self.fields.clone())
        }
    }

    /// Rewrite the model of `backend` in place, keeping the rest of the file intact.
    pub fn update_model(
        path: impl AsRef<Path>,
        backend: LlmBackend,
        new_model: &str,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            fs::read_to_string(path)?
        } else {
            String::new()
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let table = &mut doc["llm"][backend.table()];
        table["model"] = value(new_model);
        if table.get("base_url").is_none() {
            table["base_url"] = value(backend.default_endpoint().base_url);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, doc.to_string())?;
        Ok(())
    }
}
