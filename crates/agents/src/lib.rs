//! Specialist agents, one per source system.
//!
//! Each [`Specialist`] owns a [`SourceToolkit`] (its single client handle and
//! the catalog of capability tools) and a [`ToolPlanner`] that picks one tool
//! per step until it can answer.
//!
//! ```text
//! DelegatedTask ──▶ Specialist ──▶ ToolPlanner ──▶ Call{tool, args} ──▶ SourceToolkit
//!                       ▲                                                  │
//!                       └──────────────── ToolInvocation ◀─────────────────┘
//! ```

pub mod planner;
pub mod specialist;
pub mod toolkit;
pub mod tools;

pub use planner::{LlmPlanner, PlannerContext, PlannerStep, RulePlanner, ToolPlanner, extract_json_object};
pub use specialist::{DEFAULT_MAX_STEPS, Specialist, role_prompt};
pub use toolkit::{SourceToolkit, ToolkitSettings};
pub use tools::{ToolCatalog, ToolKind, ToolSpec};
