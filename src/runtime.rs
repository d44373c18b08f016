//! Process-global default scheduler.
//!
//! The scheduler is an explicit value; this module only adds the
//! convenience of one shared instance for embedders that want a single
//! process-wide runtime.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::sched::Scheduler;
use parking_lot::RwLock;
use std::sync::Arc;

static GLOBAL_SCHEDULER: RwLock<Option<Arc<Scheduler>>> = RwLock::new(None);

/// Initialize the default scheduler with the default config.
pub fn init() -> Result<()> {
    init_with_config(Config::default())
}

/// Initialize the default scheduler.
pub fn init_with_config(config: Config) -> Result<()> {
    let mut global = GLOBAL_SCHEDULER.write();

    if global.is_some() {
        return Err(Error::Duplicated("default scheduler".to_string()));
    }

    *global = Some(Scheduler::new(config)?);
    Ok(())
}

/// The default scheduler, if initialized.
pub fn current() -> Option<Arc<Scheduler>> {
    GLOBAL_SCHEDULER.read().clone()
}

/// Shut down and drop the default scheduler. A no-op when none exists.
pub fn shutdown() {
    let sched = GLOBAL_SCHEDULER.write().take();
    if let Some(sched) = sched {
        sched.shutdown();
    }
}
