//! # Storage Configuration
//!
//! Explicit configuration handed to the store at construction. Every field
//! has a default, so a TOML file only lists what it changes:
//!
//! ```toml
//! growth_factor = 1.5
//!
//! [map]
//! strategy = "sparse"
//!
//! [sort]
//! interval = 500
//! bin_size = 2.5
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Identifier index strategy override.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStrategy {
    /// Pick dense or sparse on every rebuild from the identifier spread.
    #[default]
    Auto,
    /// Direct array indexed by identifier.
    Dense,
    /// Chained hash table.
    Sparse,
}

/// Identifier index policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Strategy override.
    pub strategy: MapStrategy,
    /// Auto picks dense when `max_id <= dense_factor * max(tracked, 1)`.
    pub dense_factor: u64,
    /// Largest identifier the dense strategy will address.
    pub dense_limit: u64,
    /// Largest bucket count the sparse strategy may allocate.
    pub max_buckets: usize,
    /// Whether ghost copies are entered into the index.
    pub ghosts: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            strategy: MapStrategy::Auto,
            dense_factor: 4,
            dense_limit: 1_000_000,
            max_buckets: 1 << 28,
            ghosts: true,
        }
    }
}

/// Spatial reorder policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Steps between automatic reorders. 0 disables them.
    pub interval: u64,
    /// Explicit bin edge length. `None` derives it from the particle density.
    pub bin_size: Option<f64>,
    /// Average particles per bin targeted by the automatic bin size.
    pub particles_per_bin: f64,
    /// Bin count beyond which the sub-domain is considered corrupted.
    pub max_bins: u64,
    /// Spatial dimension, 2 or 3. In 2-D the z axis gets a single bin.
    pub dimension: u8,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            interval: 1000,
            bin_size: None,
            particles_per_bin: 2.0,
            max_bins: i32::MAX as u64,
            dimension: 3,
        }
    }
}

/// Complete storage configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Identifier index policy.
    pub map: MapConfig,
    /// Spatial reorder policy.
    pub sort: SortConfig,
    /// Multiplier applied to the capacity on growth.
    pub growth_factor: f64,
    /// Capacity of the first allocation.
    pub min_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            map: MapConfig::default(),
            sort: SortConfig::default(),
            growth_factor: 2.0,
            min_capacity: 64,
        }
    }
}

impl StorageConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] on syntax errors, unknown
    /// values or values that fail [`Self::validate`].
    pub fn from_toml_str(source: &str) -> StorageResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|err| StorageError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> StorageResult<String> {
        toml::to_string(self).map_err(|err| StorageError::InvalidConfig(err.to_string()))
    }

    /// Checks every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> StorageResult<()> {
        validate_growth_factor(self.growth_factor)?;
        if let Some(size) = self.sort.bin_size {
            validate_bin_size(size)?;
        }
        if !(self.sort.particles_per_bin.is_finite() && self.sort.particles_per_bin > 0.0) {
            return Err(invalid(format!(
                "sort.particles_per_bin must be positive, got {}",
                self.sort.particles_per_bin
            )));
        }
        if self.sort.max_bins == 0 {
            return Err(invalid("sort.max_bins must be at least 1".to_string()));
        }
        if !matches!(self.sort.dimension, 2 | 3) {
            return Err(invalid(format!(
                "sort.dimension must be 2 or 3, got {}",
                self.sort.dimension
            )));
        }
        if self.map.dense_factor == 0 {
            return Err(invalid("map.dense_factor must be at least 1".to_string()));
        }
        if self.map.max_buckets == 0 {
            return Err(invalid("map.max_buckets must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn invalid(message: String) -> StorageError {
    StorageError::InvalidConfig(message)
}

/// Checks a capacity growth factor.
pub(crate) fn validate_growth_factor(factor: f64) -> StorageResult<()> {
    if factor.is_finite() && factor > 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("growth_factor must be greater than 1, got {factor}")))
    }
}

/// Checks an explicit bin edge length.
pub(crate) fn validate_bin_size(size: f64) -> StorageResult<()> {
    if size.is_finite() && size > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("sort.bin_size must be positive, got {size}")))
    }
}
