//! Initial-state detection for stores that carry no plan history yet.
//!
//! A legacy store only knows its product version. The detector turns that
//! version into the `{init-<version>}` state the plan starts from, and rejects
//! anything the plan cannot bridge instead of guessing.

use crate::core::{SemVersion, StateToken, VersionDetectionError};
use crate::plan::MigrationPlan;

/// Where the detector reads the store's current version from.
pub trait VersionSource: Send + Sync {
    /// The raw version string, or `None` when nothing is configured.
    fn current_version_string(&self) -> Option<String>;
}

/// A fixed version string.
#[derive(Debug, Clone)]
pub struct StaticVersion(pub String);

impl StaticVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }
}

impl VersionSource for StaticVersion {
    fn current_version_string(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the version from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvVersionSource {
    variable: String,
}

impl EnvVersionSource {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl VersionSource for EnvVersionSource {
    fn current_version_string(&self) -> Option<String> {
        std::env::var(&self.variable)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// What the detected version means for the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedVersion {
    /// A supported legacy version: start from its `{init-...}` state.
    Legacy(StateToken),
    /// Exactly the current target version: nothing to migrate.
    Current,
}

/// Maps a raw version to the state a plan starts from.
///
/// Only one legacy major line is bridged, starting at `legacy_floor`. The
/// current major line is accepted only at exactly `current`: a store on that
/// line below the target must already carry a persisted state.
#[derive(Debug, Clone)]
pub struct InitialStateDetector {
    legacy_floor: SemVersion,
    current: SemVersion,
}

impl InitialStateDetector {
    pub fn new(legacy_floor: SemVersion, current: SemVersion) -> Self {
        Self {
            legacy_floor,
            current,
        }
    }

    pub fn legacy_floor(&self) -> &SemVersion {
        &self.legacy_floor
    }

    pub fn current(&self) -> &SemVersion {
        &self.current
    }

    pub fn legacy_major(&self) -> u64 {
        self.legacy_floor.major
    }

    /// Classifies a raw version string.
    pub fn detect_version(&self, raw: Option<&str>) -> Result<DetectedVersion, VersionDetectionError> {
        let raw = raw.unwrap_or_default();
        let version = SemVersion::parse(raw)?;

        // we currently support upgrading from the legacy floor and later
        if version < self.legacy_floor {
            return Err(VersionDetectionError::UnsupportedVersion {
                version: version.to_string(),
                floor: self.legacy_floor.to_string(),
            });
        }

        if version.major != self.legacy_floor.major && version.major != self.current.major {
            return Err(VersionDetectionError::UnsupportedMajorLine(version.to_string()));
        }

        // cannot go back in time
        if version > self.current {
            return Err(VersionDetectionError::DowngradeRejected {
                version: version.to_string(),
                current: self.current.to_string(),
            });
        }

        if version == self.current {
            return Ok(DetectedVersion::Current);
        }

        if version.major == self.legacy_floor.major {
            return Ok(DetectedVersion::Legacy(StateToken::init(&version)));
        }

        Err(VersionDetectionError::UnsupportedVersion {
            version: version.to_string(),
            floor: self.current.to_string(),
        })
    }

    pub fn detect(&self, source: &dyn VersionSource) -> Result<DetectedVersion, VersionDetectionError> {
        let raw = source.current_version_string();
        let detected = self.detect_version(raw.as_deref());
        match &detected {
            Ok(found) => log::debug!("detected {:?} from version {:?}", found, raw),
            Err(err) => log::warn!("version detection failed: {}", err),
        }
        detected
    }

    /// The state `plan` should start from for the store described by `source`.
    pub fn initial_state<C>(
        &self,
        source: &dyn VersionSource,
        plan: &MigrationPlan<C>,
    ) -> Result<StateToken, VersionDetectionError> {
        Ok(match self.detect(source)? {
            DetectedVersion::Legacy(state) => state,
            DetectedVersion::Current => plan.final_state().clone(),
        })
    }
}
