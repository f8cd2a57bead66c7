//! Collective communication between cooperating ranks
//!
//! Ranks run the same program in lock-step. [`Communicator::barrier`] and
//! [`Communicator::all_reduce_sum`] block until every rank of the group has
//! made the matching call. A rank that never arrives hangs the others; there
//! is no timeout.

use parking_lot::Mutex;
use std::sync::{Arc, Barrier};

/// Rank that prints reports
pub const ROOT_RANK: usize = 0;

/// Collective operations over a fixed rank group
pub trait Communicator: Send + Sync {
    /// This rank's index in `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier
    fn barrier(&self);

    /// Sum `value` over all ranks; every rank receives the total
    fn all_reduce_sum(&self, value: u64) -> u64;

    /// Whether this rank reports results
    fn is_root(&self) -> bool {
        self.rank() == ROOT_RANK
    }
}

/// Single-rank group
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce_sum(&self, value: u64) -> u64 {
        value
    }
}

struct GroupState {
    barrier: Barrier,
    sum: Mutex<u64>,
}

/// One rank of a group whose ranks are threads of this process
///
/// ```
/// use femop_core::{Communicator, ThreadCommunicator};
///
/// let handles: Vec<_> = ThreadCommunicator::group(3)
///     .into_iter()
///     .map(|comm| std::thread::spawn(move || comm.all_reduce_sum(comm.rank() as u64 + 1)))
///     .collect();
/// for handle in handles {
///     assert_eq!(handle.join().unwrap(), 6);
/// }
/// ```
#[derive(Clone)]
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    state: Arc<GroupState>,
}

impl ThreadCommunicator {
    /// Create the `size` members of a new group, ordered by rank
    ///
    /// A `size` of zero is treated as one.
    pub fn group(size: usize) -> Vec<ThreadCommunicator> {
        let size = size.max(1);
        let state = Arc::new(GroupState {
            barrier: Barrier::new(size),
            sum: Mutex::new(0),
        });
        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                size,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.state.barrier.wait();
    }

    fn all_reduce_sum(&self, value: u64) -> u64 {
        *self.state.sum.lock() += value;
        // every contribution is in
        self.state.barrier.wait();
        let total = *self.state.sum.lock();
        // every rank has read; one resets for the next reduction
        if self.state.barrier.wait().is_leader() {
            *self.state.sum.lock() = 0;
        }
        // nobody contributes to the next reduction before the reset
        self.state.barrier.wait();
        total
    }
}

impl std::fmt::Debug for ThreadCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_serial_is_root() {
        let comm = SerialCommunicator;
        assert!(comm.is_root());
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_reduce_sum(7), 7);
        comm.barrier();
    }

    #[test]
    fn test_group_ranks() {
        let group = ThreadCommunicator::group(4);
        let ranks: Vec<_> = group.iter().map(Communicator::rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
        assert!(group[0].is_root());
        assert!(!group[3].is_root());
        assert_eq!(ThreadCommunicator::group(0).len(), 1);
    }

    #[test]
    fn test_repeated_reductions() {
        let handles: Vec<_> = ThreadCommunicator::group(4)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    (0..20u64)
                        .map(|round| comm.all_reduce_sum(round + comm.rank() as u64))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            let totals = handle.join().unwrap();
            let expected: Vec<u64> = (0..20u64).map(|round| 4 * round + 6).collect();
            assert_eq!(totals, expected);
        }
    }
}
