//! KDL configuration parsing for MatrixCI.
//!
//! This crate handles parsing of:
//! - Workflow definitions (matrixci.kdl)
//! - Orchestrator settings
//! - Variable interpolation

pub mod defaults;
pub mod error;
mod kdl_ext;
pub mod settings;
pub mod variables;
pub mod workflow;

pub use defaults::{DEFAULT_WORKFLOW, default_workflow};
pub use error::{ConfigError, ConfigResult};
pub use settings::{ProviderKind, Settings, load_settings, parse_settings};
pub use variables::{VariableContext, VariableContextBuilder};
pub use workflow::{load_workflow, parse_workflow, validate_workflow};
