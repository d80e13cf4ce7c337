//! burstgrid-scheduler — batch and preparation scheduling.
//!
//! Turns thread plans into timed jobs, places them on a [`CapacityPool`],
//! launches them so their effects land in a fixed order, and waits for the
//! terminal completion signal. Every cycle starts from a fresh node
//! snapshot and a fresh target sample.
//!
//! # Architecture
//!
//! ```text
//! BatchScheduler
//!   ├── ThreadPlanner (thread counts per kind)
//!   ├── CapacityPool (first-fit placement, rebuilt per cycle)
//!   ├── LandingSchedule (anchor + stagger landing slots)
//!   ├── CompletionWatcher (bounded poll of the completion channel)
//!   │     └── LatenessTracker
//!   ├── PrepScheduler (multi-round return to optimum)
//!   ├── StatusBoard (watch channel of SchedulerStatus)
//!   └── ShutdownSignal (watch::Receiver<bool>)
//! ```
//!
//! [`CapacityPool`]: burstgrid_capacity::CapacityPool

pub mod batch;
pub mod error;
pub mod lateness;
pub mod prep;
pub mod shutdown;
pub mod signals;
pub mod status;
pub mod timing;

pub use batch::{BatchReport, BatchScheduler, CycleOutcome, INSUFFICIENT_CAPACITY};
pub use error::{FailureKind, SchedulerError, SchedulerResult};
pub use lateness::{LatenessStats, LatenessTracker};
pub use prep::{PrepOutcome, PrepReport, PrepScheduler};
pub use shutdown::ShutdownSignal;
pub use signals::{CompletionWatcher, WaitOutcome};
pub use status::{FailureRecord, SchedulerState, SchedulerStatus};
pub use timing::LandingSchedule;
