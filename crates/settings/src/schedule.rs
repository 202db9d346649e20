use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 時間來源。 / Source of monotonic time for debounce and grace windows.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// 系統單調時鐘。 / Wall-clock backed implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// 手動推進的時鐘，複製品共享時間。 / Manually advanced clock; clones observe the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|_| Instant::now())
    }
}

/// Coalesces save requests into one delayed flush.
///
/// Every `schedule` call pushes the deadline out to `now + delay`
/// (latest request wins). The deadline never moves past
/// `first_request + max_delay`, so a continuous stream of mutations still
/// flushes.
#[derive(Clone)]
pub struct SaveDebouncer {
    delay: Duration,
    max_delay: Duration,
    first_request: Option<Instant>,
    deadline: Option<Instant>,
}

impl SaveDebouncer {
    pub fn new(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay: max_delay.max(delay),
            first_request: None,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 排程（或重新排程）一次儲存。 / Schedules or reschedules the pending flush.
    pub fn schedule(&mut self, now: Instant) {
        let first = *self.first_request.get_or_insert(now);
        let requested = now + self.delay;
        let hard_deadline = first + self.max_delay;
        self.deadline = Some(requested.min(hard_deadline));
    }

    pub fn cancel(&mut self) {
        self.first_request = None;
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 若期限已到則清除並回傳 `true`。 / Returns `true` (and clears) once the deadline passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.cancel();
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for SaveDebouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveDebouncer")
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("pending", &self.deadline.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_waits_for_delay() {
        let clock = ManualClock::new();
        let mut debounce = SaveDebouncer::new(Duration::from_secs(60), Duration::from_secs(300));
        debounce.schedule(clock.now());
        clock.advance(Duration::from_secs(59));
        assert!(!debounce.take_due(clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(debounce.take_due(clock.now()));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn new_request_supersedes_pending_one() {
        let clock = ManualClock::new();
        let mut debounce = SaveDebouncer::new(Duration::from_secs(60), Duration::from_secs(300));
        debounce.schedule(clock.now());
        clock.advance(Duration::from_secs(50));
        debounce.schedule(clock.now());
        clock.advance(Duration::from_secs(20));
        assert!(!debounce.take_due(clock.now()));
        clock.advance(Duration::from_secs(40));
        assert!(debounce.take_due(clock.now()));
    }

    #[test]
    fn steady_requests_hit_hard_deadline() {
        let clock = ManualClock::new();
        let mut debounce = SaveDebouncer::new(Duration::from_secs(60), Duration::from_secs(120));
        for _ in 0..4 {
            debounce.schedule(clock.now());
            clock.advance(Duration::from_secs(30));
        }
        // 120 秒後必須觸發。 / Forced at the 120s cap.
        assert!(debounce.take_due(clock.now()));
    }

    #[test]
    fn cancel_clears_pending_flush() {
        let clock = ManualClock::new();
        let mut debounce = SaveDebouncer::new(Duration::from_secs(1), Duration::from_secs(1));
        debounce.schedule(clock.now());
        debounce.cancel();
        clock.advance(Duration::from_secs(5));
        assert!(!debounce.take_due(clock.now()));
    }
}
