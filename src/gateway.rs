//! Gateway definitions
//!
//! Gateways themselves are owned elsewhere (the creator-facing product);
//! the engine only needs a read-mostly directory answering "does this
//! gateway exist and how many stages does it have". Definitions can be
//! seeded from config or loaded from a TOML file at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{GateError, GateResult, SafeReadLock, SafeWriteLock};

/// One multi-stage gateway a visitor can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDefinition {
    pub id: String,
    pub creator_id: String,
    pub name: String,
    pub total_stages: u32,
    pub reward_url: Option<String>,
}

pub trait GatewayDirectory: Send + Sync {
    fn lookup(&self, id: &str) -> GateResult<Option<GatewayDefinition>>;
}

/// TOML shape for a gateway definitions file: a `[[gateways]]` array.
#[derive(Debug, Deserialize)]
struct GatewayFile {
    #[serde(default)]
    gateways: Vec<GatewayDefinition>,
}

/// In-process directory filled at startup.
pub struct StaticGatewayDirectory {
    gateways: RwLock<HashMap<String, GatewayDefinition>>,
}

impl StaticGatewayDirectory {
    pub fn new() -> Self {
        Self {
            gateways: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition, rejecting zero-stage gateways.
    pub fn register(&self, definition: GatewayDefinition) -> GateResult<()> {
        if definition.total_stages == 0 {
            return Err(GateError::validation(
                "totalStages",
                "a gateway needs at least one stage",
            ));
        }
        let mut gateways = self.gateways.safe_write()?;
        gateways.insert(definition.id.clone(), definition);
        Ok(())
    }

    /// Load `[[gateways]]` entries from a TOML file.
    pub fn load_from_file(&self, path: &str) -> GateResult<usize> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::io("reading gateway definitions", e))?;
        let file: GatewayFile = toml::from_str(&content)
            .map_err(|e| GateError::config(format!("invalid gateway file {path}: {e}")))?;

        let count = file.gateways.len();
        for definition in file.gateways {
            self.register(definition)?;
        }
        Ok(count)
    }

    pub fn len(&self) -> GateResult<usize> {
        Ok(self.gateways.safe_read()?.len())
    }

    pub fn is_empty(&self) -> GateResult<bool> {
        Ok(self.gateways.safe_read()?.is_empty())
    }
}

impl Default for StaticGatewayDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayDirectory for StaticGatewayDirectory {
    fn lookup(&self, id: &str) -> GateResult<Option<GatewayDefinition>> {
        Ok(self.gateways.safe_read()?.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition(id: &str, stages: u32) -> GatewayDefinition {
        GatewayDefinition {
            id: id.to_string(),
            creator_id: "creator-1".to_string(),
            name: format!("Gateway {id}"),
            total_stages: stages,
            reward_url: None,
        }
    }

    #[test]
    fn register_and_lookup() {
        let directory = StaticGatewayDirectory::new();
        directory.register(definition("gw-1", 3)).unwrap();
        let found = directory.lookup("gw-1").unwrap().unwrap();
        assert_eq!(found.total_stages, 3);
        assert!(directory.lookup("gw-2").unwrap().is_none());
    }

    #[test]
    fn zero_stage_gateways_rejected() {
        let directory = StaticGatewayDirectory::new();
        assert!(matches!(
            directory.register(definition("gw-0", 0)),
            Err(GateError::Validation { .. })
        ));
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[gateways]]
id = "gw-1"
creatorId = "creator-1"
name = "First gateway"
totalStages = 2

[[gateways]]
id = "gw-2"
creatorId = "creator-2"
name = "Second gateway"
totalStages = 5
rewardUrl = "https://example.test/reward"
"#
        )
        .unwrap();

        let directory = StaticGatewayDirectory::new();
        let loaded = directory
            .load_from_file(file.path().to_str().unwrap())
            .unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(
            directory.lookup("gw-2").unwrap().unwrap().reward_url,
            Some("https://example.test/reward".to_string())
        );
    }
}
