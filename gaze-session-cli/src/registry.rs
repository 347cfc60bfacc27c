//! Component registries
//!
//! Maps the tags used in config.toml (`detector_type`, `mapper_type`) to
//! constructors. The pipeline resolves each tag once at startup and only
//! ever sees the resulting trait object.

use crate::config::AppConfig;
use crate::detector::{Detector, ReplayDetector};
use crate::zones::{BakeryZoneMapper, PassthroughZoneMapper, ZoneMapper};
use std::collections::BTreeMap;

/// Constructor for a zone mapper
pub type ZoneMapperFactory = fn(&AppConfig) -> Box<dyn ZoneMapper>;

/// Constructor for a detector, given the zone mapper it should use
pub type DetectorFactory = fn(&AppConfig, Box<dyn ZoneMapper>) -> Box<dyn Detector>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown {kind} '{tag}' (available: {available})")]
    UnknownTag {
        kind: &'static str,
        tag: String,
        available: String,
    },
}

/// Tag → constructor table for one kind of component
pub struct Registry<F> {
    kind: &'static str,
    entries: BTreeMap<&'static str, F>,
}

impl<F: Copy> Registry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Builder method: register a constructor under `tag`
    pub fn with(mut self, tag: &'static str, factory: F) -> Self {
        self.entries.insert(tag, factory);
        self
    }

    /// Constructor registered under `tag`
    pub fn get(&self, tag: &str) -> Result<F, RegistryError> {
        self.entries
            .get(tag)
            .copied()
            .ok_or_else(|| RegistryError::UnknownTag {
                kind: self.kind,
                tag: tag.to_string(),
                available: self.tags().join(", "),
            })
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }
}

fn bakery_mapper(_config: &AppConfig) -> Box<dyn ZoneMapper> {
    Box::new(BakeryZoneMapper::new())
}

fn passthrough_mapper(_config: &AppConfig) -> Box<dyn ZoneMapper> {
    Box::new(PassthroughZoneMapper::new())
}

fn replay_detector(config: &AppConfig, zone_mapper: Box<dyn ZoneMapper>) -> Box<dyn Detector> {
    Box::new(ReplayDetector::new(
        zone_mapper,
        config.detection.min_confidence,
        config.detection.frame_width,
        config.detection.frame_height,
    ))
}

/// Built-in zone mappers
pub fn zone_mappers() -> Registry<ZoneMapperFactory> {
    Registry::new("zone mapper")
        .with("bakery", bakery_mapper as ZoneMapperFactory)
        .with("passthrough", passthrough_mapper as ZoneMapperFactory)
}

/// Built-in detectors
pub fn detectors() -> Registry<DetectorFactory> {
    Registry::new("detector").with("replay", replay_detector as DetectorFactory)
}

/// Build the detector selected by `config`, with its zone mapper
pub fn build_detector(config: &AppConfig) -> Result<Box<dyn Detector>, RegistryError> {
    let make_mapper = zone_mappers().get(&config.zone_mapping.mapper_type)?;
    let make_detector = detectors().get(&config.detection.detector_type)?;

    log::info!(
        "Using detector '{}' with zone mapper '{}'",
        config.detection.detector_type,
        config.zone_mapping.mapper_type
    );
    Ok(make_detector(config, make_mapper(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tags() {
        assert_eq!(zone_mappers().tags(), vec!["bakery", "passthrough"]);
        assert_eq!(detectors().tags(), vec!["replay"]);
    }

    #[test]
    fn test_unknown_tag_lists_alternatives() {
        let err = zone_mappers().get("airport").err().unwrap();
        let message = err.to_string();
        assert!(message.contains("airport"));
        assert!(message.contains("bakery, passthrough"));
    }

    #[test]
    fn test_build_detector_from_config() {
        let mut config = AppConfig::default();
        assert!(build_detector(&config).is_ok());

        config.detection.detector_type = "webcam".to_string();
        assert!(build_detector(&config).is_err());
    }
}
