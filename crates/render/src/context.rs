//! Process-wide engine context.
//!
//! Created once by the application before any renderer and passed to each
//! renderer at construction as an `Arc`. It is dropped after the last
//! renderer, so subsystems never depend on static initialization order.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct EngineContext {
    pub profiler: Profiler,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(capacity: usize) -> Self {
        Self {
            profiler: Profiler::new(capacity),
        }
    }
}

/// Ring buffer of recent durations for one scope.
#[derive(Debug, Clone)]
pub struct ScopeTimer {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl ScopeTimer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: vec![Duration::ZERO; capacity],
            capacity,
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn samples(&self) -> &[Duration] {
        &self.history[..self.count()]
    }

    pub fn average(&self) -> Duration {
        let samples = self.samples();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        samples.iter().sum::<Duration>() / samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.samples().iter().copied().min().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        if self.filled {
            self.capacity
        } else {
            self.index
        }
    }
}

/// Summary of one profiler scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeStats {
    pub name: String,
    pub samples: usize,
    pub average: Duration,
    pub min: Duration,
    pub max: Duration,
}

/// Named CPU timing scopes.
#[derive(Debug)]
pub struct Profiler {
    capacity: usize,
    scopes: Mutex<BTreeMap<String, ScopeTimer>>,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(120)
    }
}

impl Profiler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            scopes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Time until the returned guard drops.
    pub fn scope(&self, name: &'static str) -> ProfileScope<'_> {
        ProfileScope {
            profiler: self,
            name,
            start: Instant::now(),
        }
    }

    pub fn record(&self, name: &str, dt: Duration) {
        let mut scopes = match self.scopes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        scopes
            .entry(name.to_string())
            .or_insert_with(|| ScopeTimer::new(self.capacity))
            .record(dt);
    }

    pub fn stats(&self) -> Vec<ScopeStats> {
        let scopes = match self.scopes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        scopes
            .iter()
            .map(|(name, timer)| ScopeStats {
                name: name.clone(),
                samples: timer.count(),
                average: timer.average(),
                min: timer.min(),
                max: timer.max(),
            })
            .collect()
    }

    pub fn scope_stats(&self, name: &str) -> Option<ScopeStats> {
        self.stats().into_iter().find(|s| s.name == name)
    }
}

pub struct ProfileScope<'a> {
    profiler: &'a Profiler,
    name: &'static str,
    start: Instant,
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        self.profiler.record(self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_stats() {
        let mut timer = ScopeTimer::new(3);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.count(), 3);
        assert_eq!(timer.average(), Duration::from_millis(20));
        assert_eq!(timer.max(), Duration::from_millis(30));
        assert_eq!(timer.min(), Duration::from_millis(10));
    }

    #[test]
    fn timer_wraps_around() {
        let mut timer = ScopeTimer::new(2);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.average(), Duration::from_millis(25));
    }

    #[test]
    fn scope_guard_records_on_drop() {
        let ctx = EngineContext::with_history(4);
        {
            let _scope = ctx.profiler.scope("frame");
        }
        {
            let _scope = ctx.profiler.scope("frame");
        }
        let stats = ctx.profiler.scope_stats("frame").unwrap();
        assert_eq!(stats.samples, 2);
        assert!(ctx.profiler.scope_stats("missing").is_none());
    }
}
