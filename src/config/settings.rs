//! Application settings: one explicitly constructed value, loaded once and
//! passed by reference to whoever needs it.

use super::read_yaml;
use crate::error::Error;
use crate::error::Result;
use crate::hazard::ColumnSuffixes;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Connection string; falls back to the `DB_URL` environment variable.
    #[serde(default)]
    pub database_url: Option<String>,
    pub column_names: ColumnSuffixes,
    pub configs: ConfigPaths,
    #[serde(default)]
    pub run: RunPlan,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPaths {
    pub intersections: PathBuf,
    #[serde(default)]
    pub publishing: Option<PathBuf>,
    #[serde(default)]
    pub sources: Option<PathBuf>,
}

/// Per-phase run directives consumed by the `run` subcommand.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunPlan {
    #[serde(default)]
    pub collect: Option<Vec<String>>,
    #[serde(default)]
    pub intersection_tables: BTreeMap<String, TableRun>,
    #[serde(default)]
    pub build_tables: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableRun {
    #[serde(default)]
    pub update_source: bool,
    #[serde(default)]
    pub hazards: Option<Vec<String>>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Self = read_yaml(path)?;
        log::debug!("settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn database_url(&self) -> Result<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DB_URL").ok())
            .ok_or_else(|| {
                Error::Config("no database_url in settings and DB_URL is unset".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_document_parses() {
        let yaml = r#"
database_url: postgres://screener@localhost/hazards
column_names:
  intersect_col: _intersect
  haz_vals_col: _haz_vals
  max_col: _max
  max_all_col: _max_all
  bool_col: _bool
configs:
  intersections: settings/intersections.yaml
  publishing: settings/publishing.yaml
run:
  collect: [collect_all]
  intersection_tables:
    sites_intersections:
      update_source: true
      hazards: [all_hazards]
  build_tables: [published_sites]
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.database_url().unwrap(), "postgres://screener@localhost/hazards");
        assert!(settings.run.intersection_tables["sites_intersections"].update_source);
        assert!(settings.configs.sources.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = "column_names:\n  intersect_col: a\n  haz_vals_col: b\n  max_col: c\n  max_all_col: d\n  bool_col: e\nconfigs:\n  intersections: x.yaml\nsurprise: true\n";
        assert!(serde_yaml::from_str::<Settings>(yaml).is_err());
    }
}
