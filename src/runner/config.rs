use crate::core::{PlanError, Result};

pub const DEFAULT_STATE_KEY_PREFIX: &str = "Migrations.State+";

/// Upgrade run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// Prefix of the key a plan's state is persisted under (`prefix + plan name`)
    pub state_key_prefix: String,

    /// Re-check the plan before executing anything
    pub validate_before_run: bool,

    /// Resolve and report only; no unit runs and nothing is saved
    pub dry_run: bool,
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self {
            state_key_prefix: DEFAULT_STATE_KEY_PREFIX.to_string(),
            validate_before_run: true,
            dry_run: false,
        }
    }

    /// Set the state key prefix
    pub fn state_key_prefix(mut self, prefix: &str) -> Self {
        self.state_key_prefix = prefix.to_string();
        self
    }

    /// Enable or disable validation before each run
    pub fn validate_before_run(mut self, enabled: bool) -> Self {
        self.validate_before_run = enabled;
        self
    }

    /// Enable or disable dry runs
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Persistence key of the plan named `plan_name`
    pub fn state_key(&self, plan_name: &str) -> String {
        format!("{}{}", self.state_key_prefix, plan_name)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.state_key_prefix.trim().is_empty() {
            return Err(PlanError::Config(
                "state_key_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self::new()
    }
}
