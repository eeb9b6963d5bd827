//! Storage configuration

use commander_db::DbConfig;
use serde::{Deserialize, Serialize};

/// Storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Key-value store settings
    pub db: DbConfig,
}

impl Config {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            db: DbConfig::from_env(),
        }
    }
}
