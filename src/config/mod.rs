//! Typed YAML configuration.
//!
//! Every document deserializes into a struct with `deny_unknown_fields`
//! and is validated at load time; nothing downstream re-checks shapes at
//! call time. Settings are an explicitly constructed value passed by
//! reference, never process-global state.

pub mod intersections;
pub mod publishing;
pub mod settings;
pub mod sources;

pub use intersections::IntersectionsConfig;
pub use publishing::PublishingConfig;
pub use settings::Settings;
pub use sources::SourcesConfig;

use crate::error::Error;
use crate::error::Result;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Read and parse one YAML document.
pub fn read_yaml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| Error::ConfigParse {
        path: path.display().to_string(),
        source,
    })
}
