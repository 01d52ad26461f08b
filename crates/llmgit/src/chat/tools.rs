//! Tools the model may call during a chat turn.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::client::{InstalledModel, OllamaClient, RunningModel};
use crate::error::Result;

/// A function the model can call. The returned text becomes the
/// `role: "tool"` message content.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments.
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn call(&self, client: &OllamaClient, arguments: &Value) -> Result<String>;
}

/// Lists installed models (`GET /api/tags`).
pub struct ListModels;

#[async_trait]
impl Tool for ListModels {
    fn name(&self) -> &str {
        "ollama_ls"
    }

    fn description(&self) -> &str {
        "Get the list of models"
    }

    async fn call(&self, client: &OllamaClient, _arguments: &Value) -> Result<String> {
        let models = client.list_models().await?;
        Ok(render_installed(&models))
    }
}

/// Lists models loaded in memory (`GET /api/ps`).
pub struct RunningModels;

#[async_trait]
impl Tool for RunningModels {
    fn name(&self) -> &str {
        "ollama_ps"
    }

    fn description(&self) -> &str {
        "Get the list of running models"
    }

    async fn call(&self, client: &OllamaClient, _arguments: &Value) -> Result<String> {
        let models = client.running_models().await?;
        Ok(render_running(&models))
    }
}

/// Named set of tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// `ollama_ls` and `ollama_ps`.
    pub fn builtin() -> Self {
        Self::empty().register(ListModels).register(RunningModels)
    }

    /// Add a tool, replacing any with the same name.
    pub fn register(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Box::new(tool));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions in the `tools` request format.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Run a tool by name. Failures are returned as text for the model.
    pub async fn call(&self, client: &OllamaClient, name: &str, arguments: &Value) -> String {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            tracing::warn!(tool = name, "model called an unknown tool");
            return format!("Error: unknown tool '{}'", name);
        };

        tracing::debug!(tool = name, "running tool");
        match tool.call(client, arguments).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool failed");
                format!("Error: {}", e)
            }
        }
    }
}

fn render_installed(models: &[InstalledModel]) -> String {
    let mut out = String::from("## Available Models\n\n");
    if models.is_empty() {
        out.push_str("No models installed.");
        return out;
    }
    for model in models {
        out.push_str(&format!("- **{}**\n", model.name));
        out.push_str(&format!("  - **Model Size**: {}\n", format_bytes(model.size)));
        if !model.modified_at.is_empty() {
            out.push_str(&format!("  - **Date Updated**: {}\n", model.modified_at));
        }
    }
    out
}

fn render_running(models: &[RunningModel]) -> String {
    let mut out = String::from("## Running Models\n\n");
    if models.is_empty() {
        out.push_str("No models currently running.");
        return out;
    }
    for model in models {
        out.push_str(&format!("- **{}**\n", model.name));
        out.push_str(&format!("  - **Model Size**: {}\n", format_bytes(model.size)));
        out.push_str(&format!("  - **VRAM**: {}\n", format_bytes(model.size_vram)));
        if !model.expires_at.is_empty() {
            out.push_str(&format!("  - **Expires**: {}\n", model.expires_at));
        }
    }
    out
}

/// `1536` -> `1.5 KB`
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
