mod loader;
mod schema;

pub use loader::{load_config, load_config_with_env};
pub use schema::*;

use anyhow::Result;
use std::path::Path;

impl Config {
    /// Load from defaults, an optional YAML file and `SANDBOXAID_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        loader::load_config(path)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
