//! Configuration for [`Commands`](crate::commands::Commands) and
//! [`Worker`](crate::worker::Worker).

/// Configuration of a handler registry.
///
/// # Example
///
/// ```
/// use mediator_runtime::config::CommandsConfig;
///
/// let config = CommandsConfig::default().with_concurrency_limit(20);
/// assert_eq!(config.concurrency_limit, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandsConfig {
    /// Capacity of a call's shared event channel and number of concurrent
    /// invocations allowed per handler type within one call.
    ///
    /// Must be at least 1.
    pub concurrency_limit: usize,
}

impl CommandsConfig {
    /// Create a configuration with the given concurrency limit.
    #[must_use]
    pub const fn new(concurrency_limit: usize) -> Self {
        Self { concurrency_limit }
    }

    /// Set the concurrency limit
    #[must_use]
    pub const fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
        }
    }
}

/// Configuration of a [`Worker`](crate::worker::Worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum number of `Commands::handle` calls in flight, and intake capacity.
    pub limit: usize,
}

impl WorkerConfig {
    /// Create a configuration; a zero limit is raised to 1.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit: clamp_limit(limit),
        }
    }

    /// Set the in-flight limit; a zero limit is raised to 1.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = clamp_limit(limit);
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { limit: 1 }
    }
}

pub(crate) const fn clamp_limit(limit: usize) -> usize {
    if limit == 0 { 1 } else { limit }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(CommandsConfig::default().concurrency_limit, 1);
        assert_eq!(WorkerConfig::default().limit, 1);
    }

    #[test]
    fn worker_limit_is_clamped() {
        assert_eq!(WorkerConfig::new(0).limit, 1);
        assert_eq!(WorkerConfig::default().with_limit(0).limit, 1);
        assert_eq!(WorkerConfig::default().with_limit(8).limit, 8);
    }
}
