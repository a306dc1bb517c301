//! Topoplan: topology templates to lifecycle execution plans.
//!
//! Flattens single-parent type hierarchies, evaluates intrinsic functions
//! (`concat`, `get_input`, `get_property`, `get_attribute`) against component
//! templates, and builds a START/STOP-bounded lifecycle graph for an external
//! executor. Nothing here runs operations.

pub mod core;
pub mod logging;

pub use crate::core::assignment::{Assignment, Value};
pub use crate::core::attributes::ComponentKind;
pub use crate::core::error::{Result, TopologyError};
pub use crate::core::eval::{EvalContext, Evaluator, InputMode};
pub use crate::core::flatten::{flatten_model, FlattenedModel};
pub use crate::core::parser::{parse_template, parse_template_file, validate_template};
pub use crate::core::planner::{build_plan, plan_template};
pub use crate::core::types::{PlanPolicy, Playbook, ServiceTemplate};
