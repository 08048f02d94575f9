use super::{MigrationPlan, Transition};
use crate::core::{ResolutionError, StateToken};
use crate::unit::MigrationUnitRef;
use std::collections::HashSet;

/// The ordered transitions leading from a starting state to where a walk ends.
pub struct MigrationPath<'a, C> {
    origin: StateToken,
    steps: Vec<&'a Transition<C>>,
    final_state: StateToken,
}

impl<'a, C> MigrationPath<'a, C> {
    pub fn origin(&self) -> &StateToken {
        &self.origin
    }

    /// Where the walk ends; equals the origin when nothing is pending.
    pub fn final_state(&self) -> &StateToken {
        &self.final_state
    }

    pub fn steps(&self) -> &[&'a Transition<C>] {
        &self.steps
    }

    /// Units to execute, in order. Transitions without a unit are skipped.
    pub fn units(&self) -> impl Iterator<Item = &'a MigrationUnitRef<C>> + '_ {
        self.steps.iter().copied().filter_map(|step| step.unit.as_ref())
    }

    pub fn unit_ids(&self) -> Vec<&'a str> {
        self.units().map(|unit| unit.id()).collect()
    }

    pub fn unit_count(&self) -> usize {
        self.units().count()
    }

    /// No transition to traverse: the store is already up to date.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl<C> MigrationPlan<C> {
    /// Walks forward from `origin` until a state with no way out.
    ///
    /// An origin the plan never mentions is an error, which tells a corrupted
    /// persisted state apart from a store that is already up to date.
    pub fn resolve(&self, origin: &StateToken) -> Result<MigrationPath<'_, C>, ResolutionError> {
        self.walk(origin, None)
    }

    /// Walks forward from `origin` and stops once `target` is reached.
    pub fn resolve_to(
        &self,
        origin: &StateToken,
        target: &StateToken,
    ) -> Result<MigrationPath<'_, C>, ResolutionError> {
        self.walk(origin, Some(target))
    }

    fn walk(
        &self,
        origin: &StateToken,
        stop_at: Option<&StateToken>,
    ) -> Result<MigrationPath<'_, C>, ResolutionError> {
        if !self.contains_state(origin) {
            return Err(ResolutionError::UnknownState(origin.clone()));
        }

        let mut visited = HashSet::new();
        let mut steps = Vec::new();
        let mut state = origin;
        loop {
            if stop_at == Some(state) {
                break;
            }
            if !visited.insert(state) {
                return Err(ResolutionError::PlanCycleDetected(state.clone()));
            }
            match self.transition_from(state) {
                Some(transition) => {
                    steps.push(transition);
                    state = &transition.target;
                }
                None => break,
            }
        }

        if let Some(target) = stop_at {
            if state != target {
                return Err(ResolutionError::TargetNotReached {
                    origin: origin.clone(),
                    target: target.clone(),
                    reached: state.clone(),
                });
            }
        }

        log::debug!(
            "plan '{}': '{}' resolves to {} transitions ending at '{}'",
            self.name,
            origin,
            steps.len(),
            state
        );
        Ok(MigrationPath {
            origin: origin.clone(),
            final_state: state.clone(),
            steps,
        })
    }
}
