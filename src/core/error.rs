use crate::core::token::StateToken;
use thiserror::Error;

/// Plan authoring mistakes, detected while the transition table is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthoringError {
    #[error("Cannot chain from nowhere: call `from` before declaring '{0}'")]
    NoCurrentState(StateToken),

    #[error("State '{0}' is malformed: expected an empty token or '{{...}}'")]
    MalformedState(String),

    #[error("Transition '{0}' -> '{0}' loops onto itself")]
    SelfTransition(StateToken),

    #[error("Transition from '{0}' is declared more than once")]
    DuplicateTransition(StateToken),

    #[error(
        "Merge conflict left unresolved at '{state}': already goes to '{existing}', redeclared to '{declared}'"
    )]
    MergeConflict {
        state: StateToken,
        existing: StateToken,
        declared: StateToken,
    },

    #[error("Cannot copy chain: no transition from '{state}' while walking from '{origin}'")]
    CopyChainBroken {
        origin: StateToken,
        state: StateToken,
    },

    #[error("Cannot copy chain: walk from '{origin}' loops at '{state}'")]
    CopyChainLoop {
        origin: StateToken,
        state: StateToken,
    },

    #[error("Cannot copy chain: span from '{origin}' crosses the merge patch out of '{state}'")]
    CopyChainThroughMergePatch {
        origin: StateToken,
        state: StateToken,
    },

    #[error("Plan declares no transitions and has no final state")]
    NoFinalState,

    #[error("Plan has multiple final states: {}", join_states(.0))]
    MultipleFinalStates(Vec<StateToken>),

    #[error("Plan loops: walking from '{origin}' revisits '{state}'")]
    Cycle {
        origin: StateToken,
        state: StateToken,
    },
}

/// Failures of the initial-state detector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionDetectionError {
    #[error("Could not parse version '{0}'")]
    UnparsableVersion(String),

    #[error("Version {version} cannot be migrated, oldest supported version is {floor}")]
    UnsupportedVersion { version: String, floor: String },

    #[error("Version {version} cannot be downgraded to {current}")]
    DowngradeRejected { version: String, current: String },

    #[error("Version {0} is not supported by the migration plan")]
    UnsupportedMajorLine(String),
}

/// Failures of the path resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Unknown state '{0}'")]
    UnknownState(StateToken),

    #[error("Plan cycle detected at '{0}'")]
    PlanCycleDetected(StateToken),

    #[error("Walk from '{origin}' ended at '{reached}' without reaching '{target}'")]
    TargetNotReached {
        origin: StateToken,
        target: StateToken,
        reached: StateToken,
    },
}

/// A migration unit reported failure.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Migration '{unit}' failed while moving '{from}' -> '{to}': {source}")]
    UnitFailed {
        unit: String,
        from: StateToken,
        to: StateToken,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Authoring error: {0}")]
    Authoring(#[from] AuthoringError),

    #[error("Version detection error: {0}")]
    VersionDetection(#[from] VersionDetectionError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Plan definition error: {0}")]
    Definition(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PlanError>;

fn join_states(states: &[StateToken]) -> String {
    states
        .iter()
        .map(|state| format!("'{}'", state))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_conflict_names_the_state() {
        let err = AuthoringError::MergeConflict {
            state: StateToken::new("{A}"),
            existing: StateToken::new("{B}"),
            declared: StateToken::new("{C}"),
        };
        let message = err.to_string();
        assert!(message.contains("'{A}'"));
        assert!(message.contains("'{B}'"));
        assert!(message.contains("'{C}'"));
    }

    #[test]
    fn test_multiple_final_states_lists_all() {
        let err = AuthoringError::MultipleFinalStates(vec![
            StateToken::new("{X}"),
            StateToken::new("{Y}"),
        ]);
        assert_eq!(
            err.to_string(),
            "Plan has multiple final states: '{X}', '{Y}'"
        );
    }

    #[test]
    fn test_unit_failure_keeps_source() {
        let err: PlanError = ExecutionError::UnitFailed {
            unit: "AddLockObjects".to_string(),
            from: StateToken::new("{A}"),
            to: StateToken::new("{B}"),
            source: anyhow::anyhow!("disk full"),
        }
        .into();
        assert!(matches!(err, PlanError::Execution(_)));
        let source = std::error::Error::source(&err).and_then(|inner| inner.source());
        assert_eq!(source.map(|s| s.to_string()), Some("disk full".to_string()));
    }
}
