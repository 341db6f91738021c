//! Supervisor for docrelay.
//!
//! The coordinator is the routing layer that:
//! 1. Opens a turn in the caller's session
//! 2. Picks exactly one specialist with a fixed [`RoutingPolicy`]
//! 3. Delegates the turn, one delegation at a time
//! 4. Reads the final answer back out of the transcript and persists it
//!
//! # Architecture
//!
//! ```text
//! User Request
//!      │
//!      ▼
//! ┌─────────────────┐
//! │   Supervisor    │  ◄── RoutingPolicy
//! │   (this crate)  │
//! └────────┬────────┘
//!          │ DelegatedTask
//!    ┌─────┴──────┬──────────┬───────────┬──────────┐
//!    ▼            ▼          ▼           ▼          ▼
//! [Confluence]  [Jira]  [SharePoint]  [GDrive]  [Local PDF]
//! ```

pub mod config;
pub mod factory;
pub mod routing;
pub mod session;
pub mod supervisor;
pub mod transcript;

pub use config::{CoordinatorConfig, SourceConfig, SourceMode};
pub use factory::{build_specialist, build_supervisor};
pub use routing::{Route, RouteDecision, RoutingPolicy};
pub use session::SessionStore;
pub use supervisor::{SUPERVISOR_ID, Supervisor, SupervisorResponse, extract_final_answer};
pub use transcript::TranscriptStore;
