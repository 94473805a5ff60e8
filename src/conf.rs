//! Storage configuration, loaded from JSON.

use std::path::Path;

use crate::common::HOM_REF;
use crate::sample_index::schema::DEFAULT_BATCH_SIZE;

/// How to react to count mismatches when reconstructing variants from rows.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    clap::ValueEnum,
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConsistencyPolicy {
    /// Log a warning and keep the best-effort result.
    #[default]
    Warn,
    /// Fail the conversion.
    Fail,
}

/// Configuration of the MongoDB variant store.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    /// Attempts of the in-place merge after the first one failed.
    pub phase2_max_retries: u32,
    /// Backoff before the first retry, doubled with each retry.
    pub phase2_retry_backoff_ms: u64,
    /// Chunk size for small region chunk ids.
    pub chunk_size_small: u32,
    /// Chunk size for big region chunk ids.
    pub chunk_size_big: u32,
    /// Number of write operations sent in one bulk command.
    pub bulk_batch_size: usize,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".into(),
            database: "opencga".into(),
            collection: "variants".into(),
            phase2_max_retries: 5,
            phase2_retry_backoff_ms: 100,
            chunk_size_small: 1_000,
            chunk_size_big: 10_000,
            bulk_batch_size: 1_000,
        }
    }
}

/// Top-level storage configuration.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub consistency_policy: ConsistencyPolicy,
    /// Genotype assumed for samples without explicit call.
    pub default_genotype: String,
    /// Number of base pairs per sample-index row.
    pub sample_index_batch_size: u32,
    pub mongo: MongoConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            consistency_policy: ConsistencyPolicy::default(),
            default_genotype: HOM_REF.into(),
            sample_index_batch_size: DEFAULT_BATCH_SIZE,
            mongo: MongoConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Load from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not read config {:?}: {}", path.as_ref(), e)
        })?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("could not parse config {:?}: {}", path.as_ref(), e))
    }

    /// Load from `path` if given, else use the defaults.
    pub fn load(path: Option<&str>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) => {
                let config = Self::from_path(path)?;
                tracing::debug!("loaded config {:?}: {:?}", path, &config);
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_uses_defaults() -> Result<(), anyhow::Error> {
        let config: StorageConfig = serde_json::from_str(
            r#"{"consistency_policy": "fail", "mongo": {"database": "test"}}"#,
        )?;
        assert_eq!(config.consistency_policy, ConsistencyPolicy::Fail);
        assert_eq!(config.default_genotype, "0/0");
        assert_eq!(config.sample_index_batch_size, 1_000_000);
        assert_eq!(config.mongo.database, "test");
        assert_eq!(config.mongo.collection, "variants");
        assert_eq!(config.mongo.phase2_max_retries, 5);
        assert_eq!(config.mongo.bulk_batch_size, 1_000);
        Ok(())
    }

    #[test]
    fn policy_tokens() -> Result<(), anyhow::Error> {
        serde_test::assert_tokens(
            &ConsistencyPolicy::Warn,
            &[serde_test::Token::UnitVariant {
                name: "ConsistencyPolicy",
                variant: "warn",
            }],
        );
        assert_eq!("fail".parse::<ConsistencyPolicy>()?, ConsistencyPolicy::Fail);
        assert_eq!(ConsistencyPolicy::Warn.to_string(), "warn");
        Ok(())
    }

    #[test]
    fn load_from_file() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path = tmpdir.join("conf.json");
        std::fs::write(&path, r#"{"sample_index_batch_size": 1000}"#)?;
        let config = StorageConfig::load(path.to_str())?;
        assert_eq!(config.sample_index_batch_size, 1000);
        assert_eq!(StorageConfig::load(None)?, StorageConfig::default());
        assert!(StorageConfig::from_path(tmpdir.join("missing.json")).is_err());
        Ok(())
    }
}
