// Prompt Object configuration: the YAML frontmatter recognized by the
// engine (spec §3 "Prompt Object", §6 "PO file format").

use serde::{Deserialize, Serialize};

/// `watches_env_data` accepts either a bare boolean or a list of keys to
/// watch; specced as a future "watcher PO" hook the core must parse and
/// preserve but is not required to act on (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatchesEnvData {
    Flag(bool),
    Keys(Vec<String>),
}

/// Frontmatter fields recognized by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptObjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared capability names this PO may call. Advisory only — the
    /// engine still resolves every tool call through the registry at
    /// dispatch time, so runtime additions are visible immediately even if
    /// this list wasn't updated (spec §4.1).
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watches_env_data: Option<WatchesEnvData>,
}

impl PromptObjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capabilities: Vec::new(),
            watches_env_data: None,
        }
    }
}

/// A parsed PO definition file: frontmatter plus the literal markdown body
/// that becomes the LLM system prompt (spec §3: "The body is the LLM
/// system prompt verbatim").
#[derive(Debug, Clone)]
pub struct PromptObjectFile {
    pub config: PromptObjectConfig,
    pub body: String,
}
