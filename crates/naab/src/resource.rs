//! Resource limits and tracking.
//!
//! Every allocation and every call frame passes through a [`ResourceTracker`]
//! so the sandbox can bound memory, allocation count, and recursion. The
//! numeric caps the rest of the core relies on live here as constants.

use std::{cell::Cell, fmt, rc::Rc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::exception::{ErrorKind, RunError};

/// Maximum size of a module source file.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
/// Maximum size of a single polyglot block.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;
/// Maximum size of a source string submitted to the core.
pub const MAX_SOURCE_SIZE: usize = 100 * 1024 * 1024;
/// Maximum length of an individual source line.
pub const MAX_LINE_LEN: usize = 10_000;
/// Maximum number of list elements.
pub const MAX_LIST_LEN: usize = 10_000_000;
/// Maximum number of dict entries.
pub const MAX_DICT_LEN: usize = 1_000_000;
/// Maximum evaluator call depth.
pub const MAX_CALL_DEPTH: usize = 10_000;
/// Maximum expression nesting the evaluator will walk. The parser enforces
/// its own 1000-deep recursion limit upstream; this guard is independent.
pub const MAX_EXPR_DEPTH: usize = 1_000;
/// Maximum retained stack frames.
pub const MAX_STACK_FRAMES: usize = 10_000;
/// Maximum nesting depth when walking user data structurally (deep copy,
/// conversion to [`crate::object::Object`], structural equality).
pub const MAX_DATA_DEPTH: usize = 1_000;
/// Maximum single allocation size.
pub const MAX_ALLOC_BYTES: usize = 1024 * 1024 * 1024;
/// Allocations between automatic cycle-collector runs.
pub const DEFAULT_GC_THRESHOLD: usize = 1_000;
/// Default deadline for polyglot execution.
pub const DEFAULT_POLYGLOT_DEADLINE: Duration = Duration::from_secs(30);

/// Error returned when a resource limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of live allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum tracked memory exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum recursion depth exceeded.
    Recursion { limit: usize, depth: usize },
    /// A single allocation request above [`MAX_ALLOC_BYTES`].
    Oversize { requested: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Recursion { limit, depth } => write!(f, "call depth limit exceeded: {depth} > {limit}"),
            Self::Oversize { requested } => write!(f, "allocation of {requested} bytes exceeds the 1 GiB cap"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let kind = match err {
            ResourceError::Recursion { .. } => ErrorKind::StackOverflow,
            _ => ErrorKind::ResourceLimit,
        };
        Self::err(kind, err.to_string())
    }
}

/// Tracks heap resource usage for sandboxed execution.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation. The closure computes the
    /// approximate size only when a limit is actually configured.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when a heap slot is freed.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called before pushing a call frame.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Live allocation count, if tracked.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Approximate tracked memory in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Configurable limits for [`LimitedTracker`]. `None` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_allocations: Option<usize>,
    pub max_memory: Option<usize>,
    pub max_call_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_allocations: None,
            max_memory: None,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}

/// The tracker used by the interpreter heap.
///
/// With default limits it only enforces the call-depth bound; hosts tighten
/// it for untrusted workloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    allocation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            allocation_count: 0,
            current_memory: 0,
        }
    }

    /// A tracker with every optional limit disabled. Used by unit tests that
    /// exercise heap mechanics rather than sandboxing.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_allocations
            && self.allocation_count >= limit
        {
            return Err(ResourceError::Allocation {
                limit,
                count: self.allocation_count + 1,
            });
        }
        let size = get_size();
        if size > MAX_ALLOC_BYTES {
            return Err(ResourceError::Oversize { requested: size });
        }
        if let Some(limit) = self.limits.max_memory
            && self.current_memory + size > limit
        {
            return Err(ResourceError::Memory {
                limit,
                used: self.current_memory + size,
            });
        }
        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.allocation_count = self.allocation_count.saturating_sub(1);
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= self.limits.max_call_depth {
            return Err(ResourceError::Recursion {
                limit: self.limits.max_call_depth,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}

/// RAII increment-check-decrement guard over a shared counter.
///
/// The evaluator bounds expression-nesting recursion with it: each nesting
/// level holds a guard, and the counter unwinds on every exit path. The
/// guard owns its handle on the counter so holders can keep mutating the
/// structure the counter belongs to.
pub(crate) struct CounterGuard {
    counter: Rc<Cell<usize>>,
}

impl CounterGuard {
    pub fn enter(counter: Rc<Cell<usize>>, max: usize) -> Result<Self, ResourceError> {
        let depth = counter.get();
        if depth >= max {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: depth + 1,
            });
        }
        counter.set(depth + 1);
        Ok(Self { counter })
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter.set(self.counter.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_limit_is_enforced() {
        let mut tracker = LimitedTracker::new(ResourceLimits {
            max_allocations: Some(2),
            max_memory: None,
            max_call_depth: MAX_CALL_DEPTH,
        });
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(tracker.on_allocate(|| 8).is_ok());
        assert!(matches!(
            tracker.on_allocate(|| 8),
            Err(ResourceError::Allocation { .. })
        ));
        tracker.on_free(|| 8);
        assert!(tracker.on_allocate(|| 8).is_ok());
    }

    #[test]
    fn counter_guard_unwinds() {
        let counter = Rc::new(Cell::new(0));
        {
            let _a = CounterGuard::enter(Rc::clone(&counter), 2).unwrap();
            let _b = CounterGuard::enter(Rc::clone(&counter), 2).unwrap();
            assert!(CounterGuard::enter(Rc::clone(&counter), 2).is_err());
        }
        assert_eq!(counter.get(), 0);
    }
}
