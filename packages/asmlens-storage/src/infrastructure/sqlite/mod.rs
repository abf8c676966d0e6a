//! SQLite adapter for [`StepStateStore`](crate::domain::StepStateStore)
//!
//! One connection behind a mutex; each port call runs as a single
//! transaction while the lock is held, which is what makes the step claim
//! atomic across workers.

mod step_store;

pub use step_store::SqliteStepStore;
