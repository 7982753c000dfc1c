use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use risa_core::{Result, RisaError};

/// Synchronisation point between the per-module receive threads and the
/// sinogram assembler.
///
/// Each module advances its completion state per frame; once every module
/// has completed a frame index, that index is published into a bounded
/// ready queue for the assembler to fetch. Published indices are strictly
/// monotone. Frames that were seen but never completed within the ring
/// window, late completions, and ready-queue overflow are all counted as
/// losses. Frames never acknowledged by any module are not.
pub struct FrameNotification {
    state: Mutex<State>,
    ready_cv: Condvar,
    modules: usize,
    capacity: usize,
    stale_behind: u64,
    lost: AtomicU64,
}

struct State {
    /// Frame index -> bitmask of modules that completed it.
    pending: BTreeMap<u64, u64>,
    ready: VecDeque<u64>,
    /// Highest frame index seen from any module.
    frontier: u64,
    seen_any: bool,
    last_enqueued: Option<u64>,
    finished_mask: u64,
    finished: usize,
}

impl FrameNotification {
    /// `capacity` bounds the ready queue; `stale_behind` is the ring depth
    /// in frames beyond which an incomplete frame is declared lost.
    pub fn new(modules: usize, capacity: usize, stale_behind: u64) -> Result<Self> {
        if modules == 0 || modules > 64 {
            return Err(RisaError::Receiver(format!(
                "module count {modules} outside supported range 1..=64"
            )));
        }
        if capacity == 0 {
            return Err(RisaError::Receiver("notification depth must be non-zero".into()));
        }
        Ok(Self {
            state: Mutex::new(State {
                pending: BTreeMap::new(),
                ready: VecDeque::with_capacity(capacity),
                frontier: 0,
                seen_any: false,
                last_enqueued: None,
                finished_mask: 0,
                finished: 0,
            }),
            ready_cv: Condvar::new(),
            modules,
            capacity,
            stale_behind,
            lost: AtomicU64::new(0),
        })
    }

    /// Record that `module` has received all samples of `frame`.
    pub fn notify(&self, module: usize, frame: u64) {
        let full_mask = if self.modules == 64 {
            u64::MAX
        } else {
            (1u64 << self.modules) - 1
        };
        let bit = 1u64 << module;

        let mut state = self.state.lock();
        if frame > state.frontier || !state.seen_any {
            state.frontier = frame;
            state.seen_any = true;
        }

        let complete = {
            let mask = state.pending.entry(frame).or_insert(0);
            if *mask & bit != 0 {
                return; // duplicate completion
            }
            *mask |= bit;
            *mask == full_mask
        };

        if complete {
            state.pending.remove(&frame);
            if state.last_enqueued.is_some_and(|last| frame <= last) {
                // A straggler completed behind the publication frontier;
                // emitting it would break index monotonicity.
                self.lost.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(frame, "late frame completion dropped");
            } else {
                if state.ready.len() == self.capacity {
                    let evicted = state.ready.pop_front();
                    self.lost.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?evicted, "notification queue full, evicting oldest frame");
                }
                state.ready.push_back(frame);
                state.last_enqueued = Some(frame);
                self.ready_cv.notify_one();
            }
        }

        // Incomplete frames that fell out of the ring window will never
        // assemble; account for them and let the map shrink.
        let cutoff = state.frontier.saturating_sub(self.stale_behind);
        let stale: Vec<u64> = state.pending.range(..cutoff).map(|(k, _)| *k).collect();
        if !stale.is_empty() {
            self.lost.fetch_add(stale.len() as u64, Ordering::Relaxed);
            for key in stale {
                state.pending.remove(&key);
            }
        }
    }

    /// Mark a module's stream as ended.
    pub fn finish(&self, module: usize) {
        let bit = 1u64 << module;
        let mut state = self.state.lock();
        if state.finished_mask & bit == 0 {
            state.finished_mask |= bit;
            state.finished += 1;
        }
        if state.finished == self.modules {
            self.ready_cv.notify_all();
        }
    }

    /// Block for the next completed frame index; `None` once every module
    /// has finished and the ready queue is drained.
    pub fn fetch(&self) -> Option<u64> {
        let mut state = self.state.lock();
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some(frame);
            }
            if state.finished == self.modules {
                return None;
            }
            self.ready_cv.wait(&mut state);
        }
    }

    /// Count an externally observed loss (stale slot at assembly time).
    pub fn add_lost(&self, n: u64) {
        self.lost.fetch_add(n, Ordering::Relaxed);
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Highest frame index seen from any module.
    pub fn frontier(&self) -> u64 {
        self.state.lock().frontier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_only_when_all_modules_complete() {
        let n = FrameNotification::new(3, 8, 100).unwrap();
        n.notify(0, 0);
        n.notify(1, 0);
        assert_eq!(n.state.lock().ready.len(), 0);
        n.notify(2, 0);

        assert_eq!(n.fetch(), Some(0));
        assert_eq!(n.lost(), 0);
    }

    #[test]
    fn duplicate_completions_are_ignored() {
        let n = FrameNotification::new(2, 8, 100).unwrap();
        n.notify(0, 4);
        n.notify(0, 4);
        assert!(n.state.lock().ready.is_empty());
        n.notify(1, 4);
        assert_eq!(n.fetch(), Some(4));
    }

    #[test]
    fn gaps_are_not_losses() {
        let n = FrameNotification::new(1, 8, 100).unwrap();
        for frame in [0u64, 2, 4, 6] {
            n.notify(0, frame);
        }
        let fetched: Vec<_> = (0..4).filter_map(|_| n.fetch()).collect();
        assert_eq!(fetched, vec![0, 2, 4, 6]);
        assert_eq!(n.lost(), 0);
    }

    #[test]
    fn stale_incomplete_frames_count_as_lost() {
        let n = FrameNotification::new(2, 8, 4).unwrap();
        n.notify(0, 0); // module 1 never completes frame 0
        n.notify(0, 10);
        n.notify(1, 10);
        assert_eq!(n.fetch(), Some(10));
        assert_eq!(n.lost(), 1);
    }

    #[test]
    fn overflow_evicts_the_oldest_ready_frame() {
        let n = FrameNotification::new(1, 2, 1000).unwrap();
        for frame in 0..3u64 {
            n.notify(0, frame);
        }
        assert_eq!(n.lost(), 1);
        assert_eq!(n.fetch(), Some(1));
        assert_eq!(n.fetch(), Some(2));
    }

    #[test]
    fn late_completion_cannot_regress_published_indices() {
        let n = FrameNotification::new(2, 8, 1000).unwrap();
        n.notify(0, 5);
        n.notify(1, 5);
        // Frame 3 completes after frame 5 was already published.
        n.notify(0, 3);
        n.notify(1, 3);

        assert_eq!(n.fetch(), Some(5));
        assert_eq!(n.lost(), 1);
    }

    #[test]
    fn fetch_ends_after_all_modules_finish() {
        let n = FrameNotification::new(2, 8, 100).unwrap();
        n.finish(0);
        n.finish(0); // duplicate finish is harmless
        n.finish(1);
        assert_eq!(n.fetch(), None);
    }
}
