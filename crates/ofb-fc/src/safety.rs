use std::time::{Duration, Instant};

/// Enforces a minimum spacing between autopilot commands.
#[derive(Debug)]
pub struct RetryGate {
    last: Option<Instant>,
    min_interval: Duration,
}

impl RetryGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: None, min_interval }
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last {
            Some(t) => now.saturating_duration_since(t) >= self.min_interval,
            None => true,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }

    pub fn last(&self) -> Option<Instant> { self.last }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_until_first_mark() {
        let t0 = Instant::now();
        let mut g = RetryGate::new(Duration::from_secs(5));
        assert!(g.ready(t0));
        g.mark(t0);
        assert!(!g.ready(t0));
        assert!(!g.ready(t0 + Duration::from_millis(4_999)));
        assert!(g.ready(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn clock_going_backwards_keeps_gate_closed() {
        let t0 = Instant::now() + Duration::from_secs(10);
        let mut g = RetryGate::new(Duration::from_secs(5));
        g.mark(t0);
        assert!(!g.ready(t0 - Duration::from_secs(1)));
    }
}
