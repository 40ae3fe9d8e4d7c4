//! Fluent builder for [`Runtime`] construction.

use crate::error::Result;
use crate::reactor::ReactorConfig;
use crate::runtime::Runtime;
use crate::sched::DEFAULT_CAPACITY;

use std::time::Duration;

const DEFAULT_MAX_PARK: Duration = Duration::from_millis(100);

/// Builder for [`Runtime`] instances.
///
/// # Example
/// ```ignore
/// let rt = RuntimeBuilder::new()
///     .event_capacity(256)
///     .mailbox_capacity(64)
///     .build()?;
/// ```
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    reactor: ReactorConfig,
    mailbox_capacity: usize,
    max_park: Duration,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            reactor: ReactorConfig::default(),
            mailbox_capacity: DEFAULT_CAPACITY,
            max_park: DEFAULT_MAX_PARK,
        }
    }

    /// Number of readiness events collected per reactor wait.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.reactor.event_capacity = capacity.max(1);
        self
    }

    /// Bound of every thread mailbox created through this runtime's scheduler.
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Size of the worker pool behind the completion backend. Ignored by the
    /// readiness backends.
    pub fn completion_workers(mut self, workers: usize) -> Self {
        self.reactor.completion_workers = workers.max(1);
        self
    }

    /// Upper bound on a single reactor wait while nothing else is due.
    pub fn max_park(mut self, duration: Duration) -> Self {
        self.max_park = duration;
        self
    }

    /// Creates the reactor and returns the runtime.
    ///
    /// # Errors
    /// Fails if the kernel object backing the reactor cannot be created.
    pub fn build(self) -> Result<Runtime> {
        Runtime::from_parts(&self.reactor, self.mailbox_capacity, self.max_park)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_are_clamped() {
        let builder = RuntimeBuilder::new()
            .event_capacity(0)
            .mailbox_capacity(0)
            .completion_workers(0);

        assert_eq!(builder.reactor.event_capacity, 1);
        assert_eq!(builder.mailbox_capacity, 1);
        assert_eq!(builder.reactor.completion_workers, 1);
        assert_eq!(builder.max_park, DEFAULT_MAX_PARK);
    }
}
