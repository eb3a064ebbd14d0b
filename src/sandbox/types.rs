use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of generated sandbox names
pub const GENERATED_NAME_LEN: usize = 20;

const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";

/// What to run inside a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// Public representation of a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sandbox {
    pub name: String,
    pub uid: String,
    pub spec: SandboxSpec,
}

/// A sandbox together with the host port its box service is published on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedSandbox {
    pub sandbox: Sandbox,
    pub box_host_port: u16,
}

impl ManagedSandbox {
    /// Base URL of the box service inside the sandbox
    pub fn box_base_url(&self) -> String {
        box_base_url(self.box_host_port)
    }
}

pub(crate) fn box_base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

/// Body of a create request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSandboxRequest {
    #[serde(default)]
    pub name: String,
    pub spec: SandboxSpec,
}

/// `(space, name)` reference produced while scanning the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxSpacedName {
    pub space: String,
    pub name: String,
}

impl std::fmt::Display for SandboxSpacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.space, self.name)
    }
}

/// Runtime-level container name for a sandbox
pub fn container_name(space: &str, name: &str) -> String {
    format!("{}.{}", space, name)
}

/// Random lowercase alphanumeric sandbox name
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_NAME_LEN)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect()
}

/// Split a `KEY=VALUE` entry at the first `=`
pub fn parse_env_entry(entry: &str) -> Option<(&str, &str)> {
    entry.split_once('=').filter(|(key, _)| !key.is_empty())
}
