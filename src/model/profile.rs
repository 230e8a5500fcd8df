use serde::{Deserialize, Serialize};

use super::WorkspaceFile;

/// Declarative description of an agent's working environment.
///
/// Profiles are authored as YAML documents and are immutable after load;
/// the architecture adapter materializes them into family-specific files
/// inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    /// Main instructions markdown (CLAUDE.md / AGENTS.md body).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub subagents: Vec<SubagentSpec>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub skills: Vec<SkillSpec>,
    /// Files seeded into a fresh session's workspace.
    #[serde(default)]
    pub workspace_files: Vec<WorkspaceFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub body: String,
    /// Supporting files, paths relative to the skill's directory.
    #[serde(default)]
    pub files: Vec<SkillFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillFile {
    pub path: String,
    pub content: String,
}
