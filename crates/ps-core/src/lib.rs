//! Shared types for the ps workflow runtime: the error taxonomy, the Plan
//! schema, policies, budgets, the event model, and quality contracts.

pub mod budget;
pub mod contract;
pub mod error;
pub mod event;
pub mod plan;
pub mod policy;

pub use budget::{BudgetConfig, BudgetSnapshot};
pub use contract::{ContractIssue, QualityContract};
pub use error::{PsError, PsResult};
pub use event::{Event, EventKind, SubworkflowResult, TokenUsage};
pub use plan::{Action, Plan, WriteMode};
pub use policy::Policy;
