use super::{MigrationPlan, Transition, TransitionOrigin, validate_table};
use crate::core::{AuthoringError, Result, StateToken};
use crate::unit::MigrationUnitRef;
use std::collections::{HashMap, HashSet};

type CopiedEdge<C> = (StateToken, StateToken, Option<MigrationUnitRef<C>>);

/// Fluent authoring surface for a [`MigrationPlan`].
///
/// Declarations never fail on the spot: the first authoring mistake is
/// latched, later declarations are ignored, and [`PlanBuilder::build`]
/// reports it before anything can run.
///
/// ```
/// use migraplan::{MigrationPlan, unit_fn};
///
/// let plan = MigrationPlan::<()>::builder("demo")
///     .from("{init-7.10.0}")
///     .chain(unit_fn("AddLockObjects", |_: &mut ()| Ok(())), "{7C447271-CA3F-4A6A-A913-5D77015655CB}")
///     .chain(unit_fn("AddContentNuTable", |_: &mut ()| Ok(())), "{CBFF58A2-7B50-4F75-8E98-249920DB0F37}")
///     .from("{init-7.10.1}")
///     .chain_to("{init-7.10.0}")
///     .build()
///     .unwrap();
///
/// assert_eq!(plan.final_state().as_str(), "{CBFF58A2-7B50-4F75-8E98-249920DB0F37}");
/// ```
pub struct PlanBuilder<C> {
    name: String,
    initial_state: StateToken,
    transitions: Vec<Transition<C>>,
    by_source: HashMap<StateToken, usize>,
    current: Option<StateToken>,
    error: Option<AuthoringError>,
}

impl<C> PlanBuilder<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: StateToken::empty(),
            transitions: Vec::new(),
            by_source: HashMap::new(),
            current: None,
            error: None,
        }
    }

    /// Overrides the state assumed for a store with no history (empty by default).
    pub fn initial_state(mut self, state: impl Into<StateToken>) -> Self {
        let state = state.into();
        if self.check_well_formed(&state) {
            self.initial_state = state;
        }
        self
    }

    /// Moves the cursor to `state`; following `chain` calls start there.
    pub fn from(mut self, state: impl Into<StateToken>) -> Self {
        let state = state.into();
        if self.check_well_formed(&state) {
            self.current = Some(state);
        }
        self
    }

    /// Declares `current -> state` executing `unit`, then moves the cursor to `state`.
    pub fn chain(self, unit: MigrationUnitRef<C>, state: impl Into<StateToken>) -> Self {
        self.chain_edge(Some(unit), state.into())
    }

    /// Declares `current -> state` with no unit: the current state is the
    /// same as `state`, e.g. a legacy version that needs nothing extra.
    pub fn chain_to(self, state: impl Into<StateToken>) -> Self {
        self.chain_edge(None, state.into())
    }

    /// Declares a single edge without moving the cursor.
    ///
    /// Used to give a state orphaned by a merge conflict its way back onto
    /// the chosen default path.
    pub fn add(
        mut self,
        source: impl Into<StateToken>,
        target: impl Into<StateToken>,
        unit: Option<MigrationUnitRef<C>>,
    ) -> Self {
        self.insert(source.into(), target.into(), unit, TransitionOrigin::Patch);
        self
    }

    /// Replays the declared path `copy_from ..= copy_to` from the cursor.
    ///
    /// Units and their order are reproduced; intermediate states are tokens
    /// derived from the cursor and the state they stand in for, so rebuilding
    /// the plan yields the same ones. The edge that landed on `copy_to` lands
    /// on `redirect_to` instead. The cursor ends at `redirect_to`.
    pub fn copy_chain(
        mut self,
        copy_from: impl Into<StateToken>,
        copy_to: impl Into<StateToken>,
        redirect_to: impl Into<StateToken>,
    ) -> Self {
        let copy_from = copy_from.into();
        let copy_to = copy_to.into();
        let redirect_to = redirect_to.into();
        if self.error.is_some() {
            return self;
        }
        let Some(head) = self.current.clone() else {
            self.error = Some(AuthoringError::NoCurrentState(redirect_to));
            return self;
        };

        match self.copy_edges(head, &copy_from, &copy_to, &redirect_to) {
            Ok(edges) => {
                for (source, target, unit) in edges {
                    self.insert(source, target, unit, TransitionOrigin::Copy);
                }
                self.current = Some(redirect_to);
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// The state the next `chain` would start from.
    pub fn current_state(&self) -> Option<&StateToken> {
        self.current.as_ref()
    }

    /// Validates the declarations and freezes them into a plan.
    pub fn build(self) -> Result<MigrationPlan<C>> {
        if let Some(err) = self.error {
            log::debug!("plan '{}' rejected: {}", self.name, err);
            return Err(err.into());
        }

        let (terminals, final_state) = validate_table(&self.transitions, &self.by_source)?;
        log::debug!(
            "plan '{}' built: {} transitions, final state '{}'",
            self.name,
            self.transitions.len(),
            final_state
        );

        Ok(MigrationPlan {
            name: self.name,
            initial_state: self.initial_state,
            transitions: self.transitions,
            by_source: self.by_source,
            terminals,
            final_state,
        })
    }

    fn chain_edge(mut self, unit: Option<MigrationUnitRef<C>>, state: StateToken) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(source) = self.current.take() else {
            self.error = Some(AuthoringError::NoCurrentState(state));
            return self;
        };
        self.insert(source, state.clone(), unit, TransitionOrigin::Chain);
        self.current = Some(state);
        self
    }

    fn copy_edges(
        &self,
        head: StateToken,
        copy_from: &StateToken,
        copy_to: &StateToken,
        redirect_to: &StateToken,
    ) -> std::result::Result<Vec<CopiedEdge<C>>, AuthoringError> {
        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        let root = head.to_string();
        let mut previous = head;
        let mut state = copy_from.clone();

        loop {
            if !visited.insert(state.clone()) {
                return Err(AuthoringError::CopyChainLoop {
                    origin: copy_from.clone(),
                    state,
                });
            }
            let Some(transition) = self
                .by_source
                .get(&state)
                .map(|&index| &self.transitions[index])
            else {
                return Err(AuthoringError::CopyChainBroken {
                    origin: copy_from.clone(),
                    state,
                });
            };
            if transition.origin == TransitionOrigin::Patch {
                return Err(AuthoringError::CopyChainThroughMergePatch {
                    origin: copy_from.clone(),
                    state,
                });
            }

            let landed = transition.target == *copy_to;
            let target = if landed {
                redirect_to.clone()
            } else {
                StateToken::derive(&format!("{}>{}", root, transition.target))
            };
            edges.push((previous, target.clone(), transition.unit.clone()));
            if landed {
                return Ok(edges);
            }
            previous = target;
            state = transition.target.clone();
        }
    }

    fn insert(
        &mut self,
        source: StateToken,
        target: StateToken,
        unit: Option<MigrationUnitRef<C>>,
        origin: TransitionOrigin,
    ) {
        if self.error.is_some() {
            return;
        }
        if !self.check_well_formed(&source) || !self.check_well_formed(&target) {
            return;
        }
        if source == target {
            self.error = Some(AuthoringError::SelfTransition(source));
            return;
        }
        if let Some(&index) = self.by_source.get(&source) {
            let existing = &self.transitions[index].target;
            self.error = Some(if *existing == target {
                AuthoringError::DuplicateTransition(source)
            } else {
                AuthoringError::MergeConflict {
                    existing: existing.clone(),
                    declared: target,
                    state: source,
                }
            });
            return;
        }

        self.by_source.insert(source.clone(), self.transitions.len());
        self.transitions.push(Transition {
            source,
            target,
            unit,
            origin,
        });
    }

    fn check_well_formed(&mut self, state: &StateToken) -> bool {
        if self.error.is_some() {
            return false;
        }
        if state.is_well_formed() {
            return true;
        }
        self.error = Some(AuthoringError::MalformedState(state.to_string()));
        false
    }
}
