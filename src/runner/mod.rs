//! Execution of a plan against a store.
//!
//! The runner loads the last state a plan reached, resolves what is left, and
//! executes the pending units one at a time. The reached state is saved after
//! every unit, so a failed or interrupted run resumes with the remaining
//! suffix and never replays a prefix.

pub mod config;

pub use config::{DEFAULT_STATE_KEY_PREFIX, UpgradeConfig};

use crate::core::{ExecutionError, Result, StateToken};
use crate::detect::{InitialStateDetector, VersionSource};
use crate::persistence::StatePersistence;
use crate::plan::MigrationPlan;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Lifecycle of an [`Upgrader`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub plan: String,
    /// State the run started from.
    pub origin: StateToken,
    /// State the run ended at (or would end at, for a dry run).
    pub final_state: StateToken,
    /// Units executed, in order.
    pub executed: Vec<String>,
    /// Units a dry run would have executed.
    pub pending: Vec<String>,
    pub status: RunStatus,
    pub dry_run: bool,
}

impl RunReport {
    /// Nothing ran and nothing was left to run.
    pub fn was_up_to_date(&self) -> bool {
        self.executed.is_empty() && self.pending.is_empty()
    }
}

struct Detection {
    detector: InitialStateDetector,
    source: Arc<dyn VersionSource>,
}

/// Runs one named plan against a state store.
pub struct Upgrader<C> {
    plan: Arc<MigrationPlan<C>>,
    store: Arc<dyn StatePersistence>,
    config: UpgradeConfig,
    detection: Option<Detection>,
    status: RunStatus,
    current_state: Option<StateToken>,
}

impl<C: Send + 'static> Upgrader<C> {
    pub fn new(plan: Arc<MigrationPlan<C>>, store: Arc<dyn StatePersistence>) -> Self {
        Self {
            plan,
            store,
            config: UpgradeConfig::default(),
            detection: None,
            status: RunStatus::Idle,
            current_state: None,
        }
    }

    pub fn with_config(mut self, config: UpgradeConfig) -> Self {
        self.config = config;
        self
    }

    /// Derives the starting state from `source` when the store has no history.
    pub fn with_detector(
        mut self,
        detector: InitialStateDetector,
        source: Arc<dyn VersionSource>,
    ) -> Self {
        self.detection = Some(Detection { detector, source });
        self
    }

    pub fn plan(&self) -> &MigrationPlan<C> {
        &self.plan
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn state_key(&self) -> String {
        self.config.state_key(self.plan.name())
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Last state known to be persisted, as of the latest run.
    pub fn current_state(&self) -> Option<&StateToken> {
        self.current_state.as_ref()
    }

    /// State a run would start from right now.
    pub async fn origin(&self) -> Result<StateToken> {
        match self.store.load(&self.state_key()).await? {
            Some(state) => Ok(state),
            None => self.initial_state(),
        }
    }

    /// Ids of the units a run would execute, without executing them.
    pub async fn pending(&self) -> Result<Vec<String>> {
        let origin = self.origin().await?;
        let path = self.plan.resolve(&origin)?;
        Ok(path.unit_ids().into_iter().map(String::from).collect())
    }

    /// Brings the store to the plan's final state.
    ///
    /// Stops at the first failing unit; the persisted state then is the
    /// target of the last unit that succeeded, and running again resumes
    /// from there.
    pub async fn run(&mut self, ctx: &mut C) -> Result<RunReport> {
        let span = info_span!("plan.run", plan = %self.plan.name());
        self.status = RunStatus::Running;
        let result = self.execute(ctx).instrument(span).await;
        self.status = match &result {
            Ok(report) => report.status,
            Err(_) => RunStatus::Failed,
        };
        result
    }

    async fn execute(&mut self, ctx: &mut C) -> Result<RunReport> {
        self.config.validate()?;
        if self.config.validate_before_run {
            self.plan.validate()?;
        }

        let plan = Arc::clone(&self.plan);
        let key = self.state_key();
        let persisted = self.store.load(&key).await?;
        self.current_state = persisted.clone();
        let origin = match persisted {
            Some(state) => state,
            None => self.initial_state()?,
        };

        let path = plan.resolve(&origin).inspect_err(|err| {
            event!(Level::ERROR, error = %err, origin = %origin, "migration plan resolution failed");
        })?;
        event!(
            Level::INFO,
            origin = %origin,
            final_state = %path.final_state(),
            pending = path.unit_count(),
            "migration plan resolved"
        );

        if self.config.dry_run {
            return Ok(RunReport {
                plan: plan.name().to_string(),
                origin,
                final_state: path.final_state().clone(),
                executed: Vec::new(),
                pending: path.unit_ids().into_iter().map(String::from).collect(),
                status: RunStatus::Completed,
                dry_run: true,
            });
        }

        let mut executed = Vec::new();
        let mut state = origin.clone();
        for step in path.steps() {
            if let Some(unit) = step.unit() {
                event!(
                    Level::DEBUG,
                    unit = unit.id(),
                    from = %step.source(),
                    to = %step.target(),
                    "executing migration"
                );
                if let Err(source) = unit.execute(ctx).await {
                    let err = ExecutionError::UnitFailed {
                        unit: unit.id().to_string(),
                        from: step.source().clone(),
                        to: step.target().clone(),
                        source,
                    };
                    event!(Level::ERROR, error = %err, "migration failed");
                    return Err(err.into());
                }
                self.save(&key, step.target()).await?;
                executed.push(unit.id().to_string());
            }
            state = step.target().clone();
        }

        // unit-less hops at the end (or a detected origin) still move the store
        if self.current_state.as_ref() != Some(&state) {
            self.save(&key, &state).await?;
        }

        event!(
            Level::INFO,
            final_state = %state,
            executed = executed.len(),
            "migration plan completed"
        );
        Ok(RunReport {
            plan: plan.name().to_string(),
            origin,
            final_state: state,
            executed,
            pending: Vec::new(),
            status: RunStatus::Completed,
            dry_run: false,
        })
    }

    async fn save(&mut self, key: &str, state: &StateToken) -> Result<()> {
        if let Err(err) = self.store.save(key, state).await {
            event!(Level::ERROR, error = %err, state = %state, "state save failed");
            return Err(err);
        }
        event!(Level::DEBUG, state = %state, "state saved");
        self.current_state = Some(state.clone());
        Ok(())
    }

    fn initial_state(&self) -> Result<StateToken> {
        match &self.detection {
            Some(detection) => Ok(detection
                .detector
                .initial_state(detection.source.as_ref(), &self.plan)?),
            None => Ok(self.plan.initial_state().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PlanError;
    use crate::persistence::MemoryStateStore;
    use crate::unit::unit_fn;

    fn recording(id: &'static str) -> crate::unit::MigrationUnitRef<Vec<String>> {
        unit_fn(id, move |log: &mut Vec<String>| {
            log.push(id.to_string());
            Ok(())
        })
    }

    fn plan() -> Arc<MigrationPlan<Vec<String>>> {
        Arc::new(
            MigrationPlan::builder("core")
                .from("")
                .chain(recording("U1"), "{A}")
                .chain(recording("U2"), "{B}")
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_fresh_store_runs_everything() {
        let store = Arc::new(MemoryStateStore::new());
        let mut upgrader = Upgrader::new(plan(), store.clone());
        assert_eq!(upgrader.status(), RunStatus::Idle);

        let mut log = Vec::new();
        let report = upgrader.run(&mut log).await.unwrap();

        assert_eq!(log, vec!["U1", "U2"]);
        assert_eq!(report.executed, vec!["U1", "U2"]);
        assert_eq!(report.origin, StateToken::empty());
        assert_eq!(report.final_state, StateToken::new("{B}"));
        assert_eq!(upgrader.status(), RunStatus::Completed);
        assert_eq!(
            store.load("Migrations.State+core").await.unwrap(),
            Some(StateToken::new("{B}"))
        );
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let store = Arc::new(MemoryStateStore::new());
        let mut upgrader = Upgrader::new(plan(), store);
        let mut log = Vec::new();
        upgrader.run(&mut log).await.unwrap();

        let report = upgrader.run(&mut log).await.unwrap();
        assert!(report.was_up_to_date());
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_executes_and_saves_nothing() {
        let store = Arc::new(MemoryStateStore::new());
        let mut upgrader =
            Upgrader::new(plan(), store.clone()).with_config(UpgradeConfig::new().dry_run(true));

        let mut log = Vec::new();
        let report = upgrader.run(&mut log).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.pending, vec!["U1", "U2"]);
        assert!(log.is_empty());
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupted_state_fails_before_any_unit() {
        let store = Arc::new(MemoryStateStore::new());
        store.seed("Migrations.State+core", "{garbage}").await;
        let mut upgrader = Upgrader::new(plan(), store);

        let mut log = Vec::new();
        let err = upgrader.run(&mut log).await.unwrap_err();
        assert!(matches!(err, PlanError::Resolution(_)));
        assert!(log.is_empty());
        assert_eq!(upgrader.status(), RunStatus::Failed);
        assert_eq!(upgrader.current_state(), Some(&StateToken::new("{garbage}")));
    }

    #[tokio::test]
    async fn test_pending_does_not_execute() {
        let store = Arc::new(MemoryStateStore::new());
        store.seed("Migrations.State+core", "{A}").await;
        let upgrader = Upgrader::new(plan(), store);
        assert_eq!(upgrader.pending().await.unwrap(), vec!["U2"]);
        assert_eq!(upgrader.origin().await.unwrap(), StateToken::new("{A}"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let store = Arc::new(MemoryStateStore::new());
        let mut upgrader = Upgrader::new(plan(), store)
            .with_config(UpgradeConfig::new().state_key_prefix(""));
        let err = upgrader.run(&mut Vec::new()).await.unwrap_err();
        assert!(matches!(err, PlanError::Config(_)));
    }
}
