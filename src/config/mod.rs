mod schema;

pub use schema::*;

use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Check cross-node references and pool bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.capacity > self.pool.max_capacity {
            return Err(ConfigError::Invalid(format!(
                "pool capacity {} exceeds max_capacity {}",
                self.pool.capacity, self.pool.max_capacity
            )));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate node name '{}'", node.name)));
            }
            if let Some(capacity) = node.capacity {
                if capacity > self.pool.max_capacity {
                    return Err(ConfigError::Invalid(format!(
                        "node '{}' capacity {} exceeds max_capacity {}",
                        node.name, capacity, self.pool.max_capacity
                    )));
                }
            }
        }

        for node in &self.nodes {
            let Some(master) = node.master.as_deref() else {
                continue;
            };
            if master == node.name {
                return Err(ConfigError::Invalid(format!(
                    "node '{}' names itself as master",
                    node.name
                )));
            }
            if !names.contains(master) {
                return Err(ConfigError::Invalid(format!(
                    "node '{}' references unknown master '{}'",
                    node.name, master
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = parse(
            r#"
[[nodes]]
name = "a"
host = "h1"
user = "u"

[[nodes]]
name = "a"
host = "h2"
user = "u"
"#,
        );
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_unknown_master_rejected() {
        let config = parse(
            r#"
[[nodes]]
name = "replica"
host = "h1"
user = "u"
master = "missing"
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_capacity_bounds() {
        let config = parse(
            r#"
[pool]
capacity = 30
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_topology() {
        let config = parse(
            r#"
[[nodes]]
name = "master"
host = "h1"
user = "u"

[[nodes]]
name = "replica"
host = "h2"
user = "u"
master = "master"
"#,
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/athena-node.toml"),
            Err(ConfigError::IoError(_))
        ));
    }
}
