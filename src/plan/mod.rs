//! Transition table of a migration plan.
//!
//! A plan is a deterministic function from a source state to exactly one
//! target state, optionally executing a migration unit on the way. Plans are
//! declared through [`PlanBuilder`], validated once, and read-only afterwards.

use crate::core::{AuthoringError, Result, StateToken};
use crate::unit::MigrationUnitRef;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

pub mod builder;
pub mod definition;
pub mod resolver;

pub use builder::PlanBuilder;
pub use definition::{Declaration, PlanDefinition};
pub use resolver::MigrationPath;

/// How a transition entered the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// Declared with `chain` / `chain_to`.
    Chain,
    /// Declared with `add`, patching a path out of a merge conflict.
    Patch,
    /// Replayed by `copy_chain`.
    Copy,
}

/// A directed edge between two states.
pub struct Transition<C> {
    pub(crate) source: StateToken,
    pub(crate) target: StateToken,
    pub(crate) unit: Option<MigrationUnitRef<C>>,
    pub(crate) origin: TransitionOrigin,
}

impl<C> Transition<C> {
    pub fn source(&self) -> &StateToken {
        &self.source
    }

    pub fn target(&self) -> &StateToken {
        &self.target
    }

    pub fn unit(&self) -> Option<&MigrationUnitRef<C>> {
        self.unit.as_ref()
    }

    pub fn origin(&self) -> TransitionOrigin {
        self.origin
    }
}

impl<C> Clone for Transition<C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            target: self.target.clone(),
            unit: self.unit.clone(),
            origin: self.origin,
        }
    }
}

impl<C> fmt::Debug for Transition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("unit", &self.unit.as_ref().map(|unit| unit.id().to_string()))
            .field("origin", &self.origin)
            .finish()
    }
}

/// A validated, immutable migration plan.
pub struct MigrationPlan<C> {
    pub(crate) name: String,
    pub(crate) initial_state: StateToken,
    pub(crate) transitions: Vec<Transition<C>>,
    pub(crate) by_source: HashMap<StateToken, usize>,
    pub(crate) terminals: BTreeSet<StateToken>,
    pub(crate) final_state: StateToken,
}

impl<C> MigrationPlan<C> {
    /// Starts declaring a plan named `name`.
    pub fn builder(name: impl Into<String>) -> PlanBuilder<C> {
        PlanBuilder::new(name)
    }

    /// Name used as the persistence key of this plan.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State assumed when the store has no recorded history.
    pub fn initial_state(&self) -> &StateToken {
        &self.initial_state
    }

    /// The single state every path ends at.
    pub fn final_state(&self) -> &StateToken {
        &self.final_state
    }

    /// States with no outgoing transition.
    pub fn terminal_states(&self) -> &BTreeSet<StateToken> {
        &self.terminals
    }

    /// Transitions in declaration order.
    pub fn transitions(&self) -> &[Transition<C>] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn transition_from(&self, state: &StateToken) -> Option<&Transition<C>> {
        self.by_source
            .get(state)
            .map(|&index| &self.transitions[index])
    }

    pub fn is_terminal(&self, state: &StateToken) -> bool {
        self.terminals.contains(state)
    }

    /// Whether `state` appears anywhere in the table.
    pub fn contains_state(&self, state: &StateToken) -> bool {
        self.by_source.contains_key(state) || self.terminals.contains(state)
    }

    /// Every state the table mentions, sorted.
    pub fn known_states(&self) -> BTreeSet<StateToken> {
        self.transitions
            .iter()
            .flat_map(|transition| [transition.source.clone(), transition.target.clone()])
            .collect()
    }

    /// Re-checks the table invariants.
    ///
    /// A built plan always passes; this exists so a plan can be checked in a
    /// dedicated validation pass, away from any real execution.
    pub fn validate(&self) -> Result<()> {
        validate_table(&self.transitions, &self.by_source)?;
        Ok(())
    }
}

impl<C> fmt::Debug for MigrationPlan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPlan")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("final_state", &self.final_state)
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

/// Checks the table and derives its terminal states.
///
/// Checks for:
/// - at most one transition per source (guaranteed by the index, re-asserted),
/// - exactly one terminal state,
/// - every source reaching that terminal without revisiting a state.
pub(crate) fn validate_table<C>(
    transitions: &[Transition<C>],
    by_source: &HashMap<StateToken, usize>,
) -> std::result::Result<(BTreeSet<StateToken>, StateToken), AuthoringError> {
    let mut seen_sources = HashSet::<&StateToken>::new();
    for transition in transitions {
        if !seen_sources.insert(&transition.source) {
            return Err(AuthoringError::DuplicateTransition(transition.source.clone()));
        }
    }

    let terminals: BTreeSet<StateToken> = transitions
        .iter()
        .filter(|transition| !by_source.contains_key(&transition.target))
        .map(|transition| transition.target.clone())
        .collect();

    let final_state = match terminals.len() {
        0 if transitions.is_empty() => return Err(AuthoringError::NoFinalState),
        1 => terminals.iter().next().cloned().ok_or(AuthoringError::NoFinalState)?,
        // every state has a way out, so the table is one big loop
        0 => {
            let origin = &transitions[0].source;
            let mut visited = HashSet::<&StateToken>::new();
            let mut state = origin;
            while visited.insert(state) {
                match by_source.get(state) {
                    Some(&index) => state = &transitions[index].target,
                    None => break,
                }
            }
            return Err(AuthoringError::Cycle {
                origin: origin.clone(),
                state: state.clone(),
            });
        }
        _ => {
            return Err(AuthoringError::MultipleFinalStates(
                terminals.into_iter().collect(),
            ));
        }
    };

    // States already known to reach the final state.
    let mut settled = HashSet::<&StateToken>::new();
    for transition in transitions {
        let origin = &transition.source;
        let mut walked = Vec::new();
        let mut visited = HashSet::<&StateToken>::new();
        let mut state = origin;
        while !settled.contains(state) {
            if !visited.insert(state) {
                return Err(AuthoringError::Cycle {
                    origin: origin.clone(),
                    state: state.clone(),
                });
            }
            walked.push(state);
            match by_source.get(state) {
                Some(&index) => state = &transitions[index].target,
                None => break,
            }
        }
        settled.extend(walked);
    }

    Ok((terminals, final_state))
}
