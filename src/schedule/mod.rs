//! Cron specifications and the timers that drive scheduler jobs.

mod cron_spec;
mod timer;

pub use cron_spec::{CronField, CronFields, CronSpec};
pub use timer::{CronTimer, FireCallback, ManualCronTimer, TokioCronTimer, TriggerHandle};
