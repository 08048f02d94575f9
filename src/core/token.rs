use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

use super::version::SemVersion;

const INIT_PREFIX: &str = "{init-";

// Namespace of tokens derived by `StateToken::derive`.
const DERIVED_NAMESPACE: Uuid = Uuid::from_u128(0x6d1f_2c4e_9a3b_5f70_8e21_b4c6_d9a0_3e57);

/// An opaque point in migration history.
///
/// Tokens compare by their text only. The empty token means "no prior
/// history"; `{init-<version>}` marks a legacy starting point and any other
/// `{...}` token is a checkpoint authored in a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateToken(String);

impl StateToken {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The canonical "no prior history" state.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Legacy starting point for an exact version, e.g. `{init-7.10.0}`.
    pub fn init(version: &SemVersion) -> Self {
        Self(format!("{}{}}}", INIT_PREFIX, version))
    }

    /// A fresh, never reused checkpoint such as `{7C447271-CA3F-4A6A-A913-5D77015655CB}`.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().hyphenated().to_string().to_uppercase();
        Self(format!("{{{}}}", id))
    }

    /// A checkpoint that is the same for the same `seed` on every build.
    ///
    /// Used for states the builder creates itself, which may be persisted
    /// and must still be known when the plan is built again.
    pub fn derive(seed: &str) -> Self {
        let id = Uuid::new_v5(&DERIVED_NAMESPACE, seed.as_bytes())
            .hyphenated()
            .to_string()
            .to_uppercase();
        Self(format!("{{{}}}", id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_init(&self) -> bool {
        self.init_version_text().is_some()
    }

    /// Returns the version carried by an `{init-...}` token.
    pub fn init_version(&self) -> Option<SemVersion> {
        self.init_version_text()
            .and_then(|text| SemVersion::parse(text).ok())
    }

    /// Empty, or braced with a non-empty body and no nested braces.
    pub fn is_well_formed(&self) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let Some(body) = self
            .0
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
        else {
            return false;
        };
        !body.is_empty() && !body.contains(['{', '}']) && !body.chars().any(char::is_whitespace)
    }

    fn init_version_text(&self) -> Option<&str> {
        self.0
            .strip_prefix(INIT_PREFIX)
            .and_then(|rest| rest.strip_suffix('}'))
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateToken {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for StateToken {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&StateToken> for StateToken {
    fn from(token: &StateToken) -> Self {
        token.clone()
    }
}

impl AsRef<str> for StateToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StateToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}
