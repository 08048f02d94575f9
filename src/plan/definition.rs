use super::{MigrationPlan, PlanBuilder};
use crate::core::{PlanError, Result, StateToken};
use crate::unit::{MigrationUnit, MigrationUnitRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One declaration of a plan document, mirroring the builder calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Declaration {
    From {
        state: StateToken,
    },
    Chain {
        unit: String,
        state: StateToken,
    },
    ChainTo {
        state: StateToken,
    },
    Add {
        source: StateToken,
        target: StateToken,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    CopyChain {
        copy_from: StateToken,
        copy_to: StateToken,
        redirect_to: StateToken,
    },
}

/// A plan written down as data, with units referenced by name.
///
/// ```json
/// {
///   "name": "upgrade",
///   "declarations": [
///     { "op": "from", "state": "{init-7.10.0}" },
///     { "op": "chain", "unit": "AddLockObjects", "state": "{7C447271-CA3F-4A6A-A913-5D77015655CB}" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<StateToken>,
    pub declarations: Vec<Declaration>,
}

impl PlanDefinition {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|err| PlanError::Definition(format!("Invalid plan document: {}", err)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| PlanError::Definition(format!("Cannot serialize plan: {}", err)))
    }

    /// Names of every unit the document references, in declaration order.
    pub fn unit_names(&self) -> Vec<&str> {
        self.declarations
            .iter()
            .filter_map(|declaration| match declaration {
                Declaration::Chain { unit, .. } => Some(unit.as_str()),
                Declaration::Add { unit, .. } => unit.as_deref(),
                _ => None,
            })
            .collect()
    }

    /// Replays the declarations on a builder, binding unit names through `bind`.
    ///
    /// Fails on the first name `bind` does not know.
    pub fn into_builder<C, F>(self, mut bind: F) -> Result<PlanBuilder<C>>
    where
        F: FnMut(&str) -> Option<MigrationUnitRef<C>>,
    {
        let mut lookup = |name: &str| {
            bind(name).ok_or_else(|| {
                PlanError::Definition(format!("Unknown migration unit '{}'", name))
            })
        };

        let mut builder = PlanBuilder::new(self.name);
        if let Some(state) = self.initial_state {
            builder = builder.initial_state(state);
        }
        for declaration in self.declarations {
            builder = match declaration {
                Declaration::From { state } => builder.from(state),
                Declaration::Chain { unit, state } => builder.chain(lookup(unit.as_str())?, state),
                Declaration::ChainTo { state } => builder.chain_to(state),
                Declaration::Add {
                    source,
                    target,
                    unit,
                } => {
                    let unit = unit.as_deref().map(&mut lookup).transpose()?;
                    builder.add(source, target, unit)
                }
                Declaration::CopyChain {
                    copy_from,
                    copy_to,
                    redirect_to,
                } => builder.copy_chain(copy_from, copy_to, redirect_to),
            };
        }
        Ok(builder)
    }

    /// Builds the plan shape with every unit replaced by a placeholder.
    ///
    /// Enough to validate and resolve offline; executing a placeholder fails.
    pub fn build_unbound<C: Send + 'static>(self) -> Result<MigrationPlan<C>> {
        self.into_builder(|name| {
            let unit: MigrationUnitRef<C> = Arc::new(UnboundUnit {
                id: name.to_string(),
            });
            Some(unit)
        })?
        .build()
    }
}

/// Stand-in for a unit known only by name.
#[derive(Debug, Clone)]
pub struct UnboundUnit {
    id: String,
}

#[async_trait]
impl<C: Send + 'static> MigrationUnit<C> for UnboundUnit {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, _ctx: &mut C) -> anyhow::Result<()> {
        log::warn!("migration '{}' has no implementation bound", self.id);
        anyhow::bail!("Migration '{}' is declared but has no implementation", self.id)
    }
}
