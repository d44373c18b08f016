use crate::error::{Error, Result};
use std::time::Duration;

/// Default task-slot pool capacity (power of two).
pub const DEFAULT_TASK_POOL_SIZE: usize = 256;

/// Default timer-slot pool capacity (power of two).
pub const DEFAULT_TIMER_POOL_SIZE: usize = 1024;

/// Default per-task timer table arity.
pub const DEFAULT_MAX_TIMERS_PER_TASK: usize = 32;

/// Default upper bound on task-group membership.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 64;

/// Default mailbox capacity cap.
pub const DEFAULT_MAX_MAILBOX_SIZE: usize = 1024;

/// Default watchdog sweep cycle.
pub const DEFAULT_WATCHDOG_CYCLE: Duration = Duration::from_secs(1);

/// Default bite count at which the watchdog emits a diagnostic.
pub const DEFAULT_DIE_THRESHOLD: u32 = 20;

/// Scheduler resource ceilings and thread parameters.
///
/// The defaults are the named constants above; tests shrink the pools to
/// exercise exhaustion paths.
#[derive(Debug, Clone)]
pub struct Config {
    pub task_pool_size: usize,
    pub timer_pool_size: usize,
    pub max_timers_per_task: usize,
    pub max_group_size: usize,
    pub max_mailbox_size: usize,
    pub watchdog_cycle: Duration,
    pub die_threshold: u32,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_pool_size: DEFAULT_TASK_POOL_SIZE,
            timer_pool_size: DEFAULT_TIMER_POOL_SIZE,
            max_timers_per_task: DEFAULT_MAX_TIMERS_PER_TASK,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            max_mailbox_size: DEFAULT_MAX_MAILBOX_SIZE,
            watchdog_cycle: DEFAULT_WATCHDOG_CYCLE,
            die_threshold: DEFAULT_DIE_THRESHOLD,
            thread_name_prefix: "peercore".to_string(),
            stack_size: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.task_pool_size.is_power_of_two() {
            return Err(Error::parameter("task_pool_size must be a power of two"));
        }
        if !self.timer_pool_size.is_power_of_two() {
            return Err(Error::parameter("timer_pool_size must be a power of two"));
        }
        if self.max_timers_per_task == 0 {
            return Err(Error::parameter("max_timers_per_task must be > 0"));
        }
        if self.max_group_size == 0 {
            return Err(Error::parameter("max_group_size must be > 0"));
        }
        if self.max_mailbox_size == 0 {
            return Err(Error::parameter("max_mailbox_size must be > 0"));
        }
        if self.watchdog_cycle.is_zero() {
            return Err(Error::parameter("watchdog_cycle must be > 0"));
        }
        if self.die_threshold == 0 {
            return Err(Error::parameter("die_threshold must be > 0"));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn task_pool_size(mut self, n: usize) -> Self {
        self.config.task_pool_size = n;
        self
    }

    pub fn timer_pool_size(mut self, n: usize) -> Self {
        self.config.timer_pool_size = n;
        self
    }

    pub fn max_timers_per_task(mut self, n: usize) -> Self {
        self.config.max_timers_per_task = n;
        self
    }

    pub fn max_group_size(mut self, n: usize) -> Self {
        self.config.max_group_size = n;
        self
    }

    pub fn max_mailbox_size(mut self, n: usize) -> Self {
        self.config.max_mailbox_size = n;
        self
    }

    pub fn watchdog_cycle(mut self, cycle: Duration) -> Self {
        self.config.watchdog_cycle = cycle;
        self
    }

    pub fn die_threshold(mut self, n: u32) -> Self {
        self.config.die_threshold = n;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_pool_sizes_must_be_power_of_two() {
        let err = Config::builder().task_pool_size(6).build();
        assert!(err.is_err());

        let err = Config::builder().timer_pool_size(100).build();
        assert!(err.is_err());

        let ok = Config::builder()
            .task_pool_size(8)
            .timer_pool_size(16)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_zero_ceilings_rejected() {
        assert!(Config::builder().max_timers_per_task(0).build().is_err());
        assert!(Config::builder().max_group_size(0).build().is_err());
        assert!(Config::builder().max_mailbox_size(0).build().is_err());
        assert!(Config::builder().die_threshold(0).build().is_err());
        assert!(Config::builder()
            .watchdog_cycle(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .task_pool_size(8)
            .max_timers_per_task(4)
            .thread_name_prefix("node")
            .stack_size(256 * 1024)
            .build()
            .unwrap();

        assert_eq!(config.task_pool_size, 8);
        assert_eq!(config.max_timers_per_task, 4);
        assert_eq!(config.thread_name_prefix, "node");
        assert_eq!(config.stack_size, Some(256 * 1024));
    }
}
