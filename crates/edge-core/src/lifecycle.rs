//! Request lifecycle tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// States of the per-request dispatch state machine.
///
/// `Check` always comes first and every request ends in `Done`:
/// `Check -> {ServeCached, Validate, Fetch} -> Done`, with `Redirect` as the
/// fallback whenever a fetch or validation cannot complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchPhase {
    /// Looking for a local copy.
    Check,
    /// Streaming a fresh local copy.
    ServeCached,
    /// Asking the origin whether a stale copy is still valid.
    Validate,
    /// Fetching from origin and populating the cache.
    Fetch,
    /// Falling back to a redirect to the origin.
    Redirect,
    /// Response handed to the HTTP layer.
    Done,
}

impl DispatchPhase {
    /// Stable lowercase name, used as a log field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::ServeCached => "serve_cached",
            Self::Validate => "validate",
            Self::Fetch => "fetch",
            Self::Redirect => "redirect",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing context for observability.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: HashMap<String, Instant>,
    phases: Vec<DispatchPhase>,
}

impl TimingContext {
    /// Create a new timing context.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: HashMap::new(),
            phases: vec![DispatchPhase::Check],
        }
    }

    /// Record a timing mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Enter a dispatch phase and mark when it began.
    pub fn enter(&mut self, phase: DispatchPhase) {
        self.mark(phase.name());
        self.phases.push(phase);
    }

    /// Current dispatch phase.
    pub fn phase(&self) -> DispatchPhase {
        self.phases.last().copied().unwrap_or(DispatchPhase::Check)
    }

    /// Every phase visited so far, in order.
    pub fn phases(&self) -> &[DispatchPhase] {
        &self.phases
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time from start until a mark was recorded.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks.get(name).map(|t| t.duration_since(self.start))
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}
