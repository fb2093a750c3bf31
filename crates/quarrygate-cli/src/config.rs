//! CLI-level configuration: everything `GatewayConfig` doesn't own —
//! where to bind, where the schema lives, how to reach Mongo, and the
//! role hierarchy a `JwtVerifier` needs — loaded from one TOML file.

use quarrygate_api::auth::RoleHierarchy;
use quarrygate_api::config::GatewayConfig;
use quarrygate_common::GatewayError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct RoleDef {
    pub name: String,
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub collections_dir: PathBuf,
    pub procedures_dir: PathBuf,
    pub roles: Vec<RoleDef>,
    pub http_timeout_secs: u64,
    #[serde(flatten)]
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            mongo_uri: "mongodb://localhost:27017/quarrygate".to_string(),
            collections_dir: PathBuf::from("schema/collections"),
            procedures_dir: PathBuf::from("schema/procedures"),
            roles: Vec::new(),
            http_timeout_secs: 10,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| GatewayError::internal(format!("failed to read config file {}: {err}", path.display())))?;
        toml::from_str(&raw).map_err(|err| GatewayError::internal(format!("failed to parse config file {}: {err}", path.display())))
    }

    pub fn role_hierarchy(&self) -> RoleHierarchy {
        self.roles.iter().fold(RoleHierarchy::new(), |hierarchy, role| {
            hierarchy.with_role(role.name.clone(), role.inherits.clone(), role.permissions.clone())
        })
    }

    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, GatewayError> {
        self.bind_addr
            .parse()
            .map_err(|err| GatewayError::internal(format!("invalid bind_addr '{}': {err}", self.bind_addr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_to_a_sane_address() {
        let config = ServerConfig::default();
        assert!(config.socket_addr().is_ok());
    }

    #[test]
    fn role_hierarchy_flattens_inherited_permissions() {
        let mut config = ServerConfig::default();
        config.roles.push(RoleDef { name: "viewer".into(), inherits: vec![], permissions: vec!["users:find".into()] });
        config.roles.push(RoleDef { name: "editor".into(), inherits: vec!["viewer".into()], permissions: vec!["users:updateOne".into()] });
        let hierarchy = config.role_hierarchy();
        // effective_permissions is private to quarrygate-api; exercised
        // indirectly through JwtVerifier in the integration-style tests.
        let _ = hierarchy;
    }
}
