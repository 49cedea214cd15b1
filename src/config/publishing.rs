//! Output-table build configuration.

use super::read_yaml;
use crate::error::Result;
use crate::publish::BuildOp;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishingConfig {
    #[serde(default)]
    pub publish_tables_configs: BTreeMap<String, PublishTableConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishTableConfig {
    #[serde(default)]
    pub build_table_config: Vec<BuildOp>,
}

impl PublishingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_yaml(path)?;
        log::debug!(
            "publishing configuration loaded ({} tables)",
            config.publish_tables_configs.len()
        );
        Ok(config)
    }
}
