//! The per-second gate guarding the Waiting Sweeper.
//!
//! A stateful guard holding a baseline monotonic second counter; `try_enter`
//! returns whether the interval elapsed. The first call after construction
//! never fires — the baseline itself is set at construction, so there is no
//! prior second to have rolled over from.

use std::time::Instant;

pub struct SweeperGate {
    baseline: Instant,
    last_fired_second: Option<u64>,
}

impl SweeperGate {
    pub fn new() -> Self {
        Self {
            baseline: Instant::now(),
            last_fired_second: None,
        }
    }

    /// Returns `true` at most once per wall-clock second, and never on the
    /// first call.
    pub fn try_enter(&mut self) -> bool {
        let elapsed_secs = self.baseline.elapsed().as_secs();
        match self.last_fired_second {
            None => {
                self.last_fired_second = Some(elapsed_secs);
                false
            }
            Some(last) if elapsed_secs > last => {
                self.last_fired_second = Some(elapsed_secs);
                true
            }
            _ => false,
        }
    }
}

impl Default for SweeperGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn first_call_never_fires() {
        let mut gate = SweeperGate::new();
        assert!(!gate.try_enter());
    }

    #[test]
    fn repeated_calls_within_the_same_second_fire_at_most_once() {
        let mut gate = SweeperGate::new();
        assert!(!gate.try_enter());
        assert!(!gate.try_enter(), "still within the first second");
        assert!(!gate.try_enter());
    }

    #[test]
    fn fires_once_the_second_rolls_over() {
        let mut gate = SweeperGate::new();
        assert!(!gate.try_enter());
        sleep(Duration::from_millis(1100));
        assert!(gate.try_enter(), "a full second elapsed, the gate should open");
        assert!(!gate.try_enter(), "running again immediately must not re-fire");
    }
}
