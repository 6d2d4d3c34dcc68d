//! Collective summary reducer
//!
//! Publishes the global statistics cached on every participant's list:
//! total record count, the longest path (plus NUL), and the depth range.
//! Runs collectively; every participant must call it together.

use crate::comm::{Communicator, ReduceOp};
use crate::flist::FileList;

impl FileList {
    /// Recompute the cached global summary fields
    ///
    /// When every shard is empty only `total_files` is set; the depth and
    /// name fields stay at their zero sentinels.
    pub fn compute_summary<C: Communicator>(&mut self, comm: &C) {
        self.set_summary(0, 0, 0);

        let count = self.local_size();
        let total = comm.allreduce_u64(count, ReduceOp::Sum);
        self.set_total_files(total);

        if total == 0 {
            return;
        }

        // Local extremes; -1 marks an empty shard
        let mut min_depth: i64 = -1;
        let mut max_depth: i64 = -1;
        let mut max_name: u64 = 0;
        for record in self.records() {
            max_name = max_name.max(record.path.len() as u64 + 1);
            let depth = record.depth as i64;
            if min_depth == -1 || depth < min_depth {
                min_depth = depth;
            }
            if max_depth == -1 || depth > max_depth {
                max_depth = depth;
            }
        }

        let global_max_depth = comm.allreduce_i64(max_depth, ReduceOp::Max);
        let global_max_name = comm.allreduce_u64(max_name, ReduceOp::Max);

        // An empty shard contributes the global max so the true minimum
        // wins; at least one shard has a record, so the max is real
        if count == 0 {
            min_depth = global_max_depth;
        }
        let global_min_depth = comm.allreduce_i64(min_depth, ReduceOp::Min);

        self.set_summary(
            global_max_name,
            global_min_depth as u64,
            global_max_depth as u64,
        );
    }
}
