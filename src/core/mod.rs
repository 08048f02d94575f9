pub mod error;
pub mod token;
pub mod version;

pub use error::{
    AuthoringError, ExecutionError, PlanError, ResolutionError, Result, VersionDetectionError,
};
pub use token::StateToken;
pub use version::SemVersion;
