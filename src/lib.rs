// ============================================================================
// migraplan Library
// ============================================================================

//! Versioned migration plans.
//!
//! A plan maps every known state of a store to exactly one next state, each
//! step optionally running a migration unit. Given the last state a store
//! reached, the plan resolves the ordered units still to run and the
//! [`Upgrader`] executes them, saving progress after each one.
//!
//! ```
//! use migraplan::{MemoryStateStore, MigrationPlan, Upgrader, unit_fn};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = MigrationPlan::<Vec<&'static str>>::builder("core")
//!     .from("")
//!     .chain(unit_fn("CreateTables", |log: &mut Vec<&'static str>| { log.push("create"); Ok(()) }), "{7C447271-CA3F-4A6A-A913-5D77015655CB}")
//!     .chain(unit_fn("SeedData", |log: &mut Vec<&'static str>| { log.push("seed"); Ok(()) }), "{CBFF58A2-7B50-4F75-8E98-249920DB0F37}")
//!     .build()?;
//!
//! let store = Arc::new(MemoryStateStore::new());
//! let mut upgrader = Upgrader::new(Arc::new(plan), store);
//!
//! let mut log = Vec::new();
//! let report = upgrader.run(&mut log).await?;
//! assert_eq!(log, vec!["create", "seed"]);
//! assert_eq!(report.final_state.as_str(), "{CBFF58A2-7B50-4F75-8E98-249920DB0F37}");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod detect;
pub mod persistence;
pub mod plan;
pub mod runner;
pub mod unit;

// Re-export main types for convenience
pub use core::{
    AuthoringError, ExecutionError, PlanError, ResolutionError, Result, SemVersion, StateToken,
    VersionDetectionError,
};
pub use detect::{
    DetectedVersion, EnvVersionSource, InitialStateDetector, StaticVersion, VersionSource,
};
pub use persistence::{JsonFileStateStore, MemoryStateStore, PersistedState, StatePersistence};
pub use plan::definition::UnboundUnit;
pub use plan::{
    Declaration, MigrationPath, MigrationPlan, PlanBuilder, PlanDefinition, Transition,
    TransitionOrigin,
};
pub use runner::{RunReport, RunStatus, UpgradeConfig, Upgrader};
pub use unit::{FnUnit, MigrationFn, MigrationUnit, MigrationUnitRef, unit_fn};
