//! Run bookkeeping: the append-only event logger, budget accounting, and
//! timeline replay. On-disk layout per run:
//! `.ps-runs/<runId>/{meta.json, events.jsonl, summary.json}`.

pub mod budget;
pub mod logger;
pub mod replay;

pub use budget::BudgetTracker;
pub use logger::{RUNS_DIR, RunLogger, RunSummary};
pub use replay::render_timeline;
