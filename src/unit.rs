use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// An executable migration step, opaque to the engine.
///
/// `C` is whatever the caller hands every unit of a run (a connection, a
/// transaction, a test recorder). The engine only ever asks a unit for its id
/// and to execute once its source state has been reached.
#[async_trait]
pub trait MigrationUnit<C>: Send + Sync {
    /// Stable name used in logs and failure reports.
    fn id(&self) -> &str;

    async fn execute(&self, ctx: &mut C) -> anyhow::Result<()>;
}

/// Shared handle to a unit attached to a transition.
pub type MigrationUnitRef<C> = Arc<dyn MigrationUnit<C>>;

/// Synchronous closure signature accepted by [`FnUnit`].
pub type MigrationFn<C> = Arc<dyn Fn(&mut C) -> anyhow::Result<()> + Send + Sync>;

/// Adapts a plain closure into a [`MigrationUnit`].
pub struct FnUnit<C> {
    id: String,
    migrate: MigrationFn<C>,
}

impl<C> FnUnit<C> {
    pub fn new<F>(id: impl Into<String>, migrate: F) -> Self
    where
        F: Fn(&mut C) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            migrate: Arc::new(migrate),
        }
    }
}

impl<C> fmt::Debug for FnUnit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUnit").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<C: Send + 'static> MigrationUnit<C> for FnUnit<C> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &mut C) -> anyhow::Result<()> {
        (self.migrate)(ctx)
    }
}

/// Wraps a closure as a shareable unit handle.
pub fn unit_fn<C, F>(id: impl Into<String>, migrate: F) -> MigrationUnitRef<C>
where
    C: Send + 'static,
    F: Fn(&mut C) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnUnit::new(id, migrate))
}
