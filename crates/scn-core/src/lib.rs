pub mod diagnostics;
pub mod error;
pub mod types;
pub mod value;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{LowerError, ScenarioError};
pub use types::*;
pub use value::*;
