use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::Path;
use waflock_core::{LockName, LockOptions, MAX_ID_RANGE, Owner};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    /// Defaults to the owner's name when unset.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default = "defaults::id_range")]
    pub id_range: u32,
    #[serde(default = "defaults::hash_seed")]
    pub hash_seed: u32,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    pub fn id_range() -> u32 {
        waflock_core::DEFAULT_ID_RANGE.get()
    }

    pub fn hash_seed() -> u32 {
        waflock_core::DEFAULT_HASH_SEED
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl LockConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: LockConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Config for `name` with every other field at its default.
    pub fn for_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: None,
            group: None,
            id_range: defaults::id_range(),
            hash_seed: defaults::hash_seed(),
            log_level: defaults::log_level(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains('\0') {
            return Err(ConfigError::Invalid("name must be non-empty and NUL-free"));
        }
        if self.id_range == 0 || self.id_range > MAX_ID_RANGE {
            return Err(ConfigError::Invalid("id_range must be within 1..=2147483647"));
        }
        if self.group.is_some() && self.owner.is_none() {
            return Err(ConfigError::Invalid("group requires owner"));
        }
        Ok(())
    }

    pub fn lock_name(&self) -> Result<LockName, ConfigError> {
        LockName::new(&self.name)
            .map_err(|_| ConfigError::Invalid("name must be non-empty and NUL-free"))
    }

    pub fn owner(&self) -> Option<Owner> {
        let user = self.owner.as_ref()?;
        Some(match &self.group {
            Some(group) => Owner::with_group(user, group),
            None => Owner::new(user),
        })
    }

    pub fn options(&self) -> Result<LockOptions, ConfigError> {
        let id_range = NonZeroU32::new(self.id_range)
            .ok_or(ConfigError::Invalid("id_range must be within 1..=2147483647"))?;
        Ok(LockOptions {
            id_range,
            hash_seed: self.hash_seed,
        })
    }
}
