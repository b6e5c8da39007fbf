use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Admission policy for per-session frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Upper bound on concurrent dispatches; values below 1 are treated as 1.
    pub max_in_flight: usize,
    /// Refuse a frame while any earlier frame is still processing.
    pub serialize: bool,
}

impl ThrottleConfig {
    /// Cap from the host's available parallelism, serialized.
    pub fn from_available_parallelism() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_in_flight: cores,
            serialize: true,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::from_available_parallelism()
    }
}

/// Drop-not-queue admission gate for one session.
///
/// A frame is either admitted now or discarded. Admission returns a
/// [`ThrottlePermit`]; the slot is released when the permit is dropped,
/// whether the dispatch succeeded or failed.
#[derive(Debug)]
pub struct Throttle {
    cap: usize,
    serialize: bool,
    in_flight: AtomicUsize,
    processing: AtomicBool,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Arc<Self> {
        Arc::new(Self {
            cap: config.max_in_flight.max(1),
            serialize: config.serialize,
            in_flight: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
        })
    }

    /// Admits one frame if both gates allow it. The processing flag is
    /// checked before the in-flight counter.
    pub fn try_admit(self: &Arc<Self>) -> Option<ThrottlePermit> {
        if self.serialize
            && self
                .processing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return None;
        }

        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.cap).then_some(n + 1)
            })
            .is_ok();

        if !admitted {
            if self.serialize {
                self.processing.store(false, Ordering::Release);
            }
            return None;
        }

        Some(ThrottlePermit {
            throttle: Arc::clone(self),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// True while any admitted frame has not released its permit.
    pub fn is_processing(&self) -> bool {
        if self.serialize {
            self.processing.load(Ordering::Acquire)
        } else {
            self.in_flight() > 0
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Held for the duration of one dispatch.
#[derive(Debug)]
pub struct ThrottlePermit {
    throttle: Arc<Throttle>,
}

impl Drop for ThrottlePermit {
    fn drop(&mut self) {
        // Decrement first so a serialized admission never sees the flag
        // clear while the counter still holds this slot.
        self.throttle.in_flight.fetch_sub(1, Ordering::AcqRel);
        if self.throttle.serialize {
            self.throttle.processing.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn throttle(max_in_flight: usize, serialize: bool) -> Arc<Throttle> {
        Throttle::new(ThrottleConfig {
            max_in_flight,
            serialize,
        })
    }

    #[test]
    fn test_serialized_blocks_second_admission_until_release() {
        let t = throttle(4, true);

        let permit = t.try_admit().expect("first frame admitted");
        assert!(t.is_processing());
        assert_eq!(t.in_flight(), 1);
        assert!(t.try_admit().is_none());

        drop(permit);
        assert!(!t.is_processing());
        assert_eq!(t.in_flight(), 0);
        assert!(t.try_admit().is_some());
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(3, 3)]
    fn test_unserialized_admits_exactly_cap(#[case] configured: usize, #[case] expected: usize) {
        let t = throttle(configured, false);

        let permits: Vec<_> = std::iter::from_fn(|| t.try_admit()).take(16).collect();
        assert_eq!(permits.len(), expected);
        assert_eq!(t.cap(), expected);
        assert!(t.try_admit().is_none());

        drop(permits);
        assert_eq!(t.in_flight(), 0);
        assert!(!t.is_processing());
    }

    #[test]
    fn test_unserialized_flag_tracks_any_in_flight() {
        let t = throttle(2, false);
        let a = t.try_admit().unwrap();
        let b = t.try_admit().unwrap();

        drop(a);
        assert!(t.is_processing());
        drop(b);
        assert!(!t.is_processing());
    }

    #[test]
    fn test_unserialized_flag_holds_while_any_permit_is_held() {
        let t = throttle(2, false);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                let t = &t;
                scope.spawn(move || {
                    for _ in 0..20_000 {
                        if let Some(permit) = t.try_admit() {
                            assert!(t.is_processing());
                            drop(permit);
                        }
                    }
                });
            }
        });
        assert_eq!(t.in_flight(), 0);
        assert!(!t.is_processing());
    }

    #[test]
    fn test_rejection_at_cap_leaves_state_untouched() {
        let t = throttle(1, true);
        let permit = t.try_admit().unwrap();
        for _ in 0..5 {
            assert!(t.try_admit().is_none());
        }
        assert_eq!(t.in_flight(), 1);
        drop(permit);
        assert_eq!(t.in_flight(), 0);
    }

    #[test]
    fn test_default_cap_is_at_least_one() {
        let config = ThrottleConfig::default();
        assert!(config.max_in_flight >= 1);
        assert!(config.serialize);
    }
}
