//! 分片模块
//! 把键值序列和连接池切成连续、互不重叠的分片，每个 worker 一份

use crate::error::{AppError, Result};
use std::ops::Range;

/// 分片方案，只依赖三个计数，相同输入总是得到相同边界
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    workers: usize,
    total_keys: usize,
    total_connections: usize,
    keys_per_worker: usize,
    connections_per_worker: usize,
}

impl PartitionPlan {
    pub fn new(workers: usize, total_keys: usize, total_connections: usize) -> Result<Self> {
        if workers == 0 {
            return Err(AppError::Config("at least one worker is required".into()));
        }
        if total_connections < workers {
            return Err(AppError::Config(format!(
                "{total_connections} connections cannot serve {workers} concurrent workers"
            )));
        }
        Ok(Self {
            workers,
            total_keys,
            total_connections,
            keys_per_worker: total_keys.div_ceil(workers),
            connections_per_worker: total_connections / workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn keys_per_worker(&self) -> usize {
        self.keys_per_worker
    }

    pub fn connections_per_worker(&self) -> usize {
        self.connections_per_worker
    }

    /// 第 `worker` 个分片的键下标范围，越界的起点收缩为空范围
    pub fn key_range(&self, worker: usize) -> Range<usize> {
        let start = (worker * self.keys_per_worker).min(self.total_keys);
        let end = ((worker + 1) * self.keys_per_worker).min(self.total_keys);
        start..end
    }

    /// 第 `worker` 个分片的连接下标范围，`split` 按它切出可变切片
    pub fn connection_range(&self, worker: usize) -> Range<usize> {
        let start = (worker * self.connections_per_worker).min(self.total_connections);
        let end = ((worker + 1) * self.connections_per_worker).min(self.total_connections);
        start..end
    }

    /// 切出所有分片，连接按可变切片独占分配
    pub fn split<'a, C>(
        &self,
        keys: &'a [String],
        values: &'a [String],
        connections: &'a mut [C],
    ) -> Result<Vec<Shard<'a, C>>> {
        if keys.len() != self.total_keys || values.len() != self.total_keys {
            return Err(AppError::Config(format!(
                "key space size {}/{} does not match plan size {}",
                keys.len(),
                values.len(),
                self.total_keys
            )));
        }
        if connections.len() != self.total_connections {
            return Err(AppError::Config(format!(
                "connection pool size {} does not match plan size {}",
                connections.len(),
                self.total_connections
            )));
        }

        // 多出来的连接（不能整除时）不分配给任何 worker
        let mut rest = connections;
        let mut offset = 0;
        let mut shards = Vec::with_capacity(self.workers);
        for worker in 0..self.workers {
            let keys_range = self.key_range(worker);
            let conn_range = self.connection_range(worker);
            let remaining = std::mem::take(&mut rest);
            let (_, tail) = remaining.split_at_mut(conn_range.start - offset);
            let (connections, tail) = tail.split_at_mut(conn_range.len());
            rest = tail;
            offset = conn_range.end;
            if connections.is_empty() {
                return Err(AppError::Config(format!("worker {worker} has no connections")));
            }
            shards.push(Shard {
                worker,
                keys: &keys[keys_range.clone()],
                values: &values[keys_range],
                connections,
            });
        }
        Ok(shards)
    }
}

/// 一个 worker 在一个阶段内的分片
pub struct Shard<'a, C> {
    pub worker: usize,
    pub keys: &'a [String],
    pub values: &'a [String],
    pub connections: &'a mut [C],
}

impl<C> Shard<'_, C> {
    /// 第 `n` 次操作使用的连接下标，在分片内轮询
    pub fn connection_index(&self, n: usize) -> usize {
        n % self.connections.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{i:04}")).collect()
    }

    #[test]
    fn even_split() {
        let plan = PartitionPlan::new(5, 100, 5).unwrap();
        assert_eq!(plan.keys_per_worker(), 20);
        assert_eq!(plan.connections_per_worker(), 1);
        assert_eq!(plan.key_range(4), 80..100);
        assert_eq!(plan.connection_range(4), 4..5);
    }

    #[test]
    fn remainder_goes_short_at_the_end() {
        let plan = PartitionPlan::new(4, 10, 9).unwrap();
        assert_eq!(plan.keys_per_worker(), 3);
        assert_eq!(plan.key_range(3), 9..10);
        assert_eq!(plan.connections_per_worker(), 2);
        assert_eq!(plan.connection_range(3), 6..8);
    }

    #[test]
    fn trailing_worker_past_end_gets_empty_shard() {
        // ceil(10/7) = 2, worker 5 从 10 开始，worker 6 从 12 开始
        let plan = PartitionPlan::new(7, 10, 7).unwrap();
        assert_eq!(plan.key_range(5), 10..10);
        assert_eq!(plan.key_range(6), 10..10);

        let keys = strings(10);
        let mut conns: Vec<usize> = (0..7).collect();
        let shards = plan.split(&keys, &keys, &mut conns).unwrap();
        assert!(shards[6].is_empty());
        assert_eq!(shards[6].connections, &[6]);
    }

    #[test]
    fn fewer_connections_than_workers_rejected() {
        assert!(matches!(PartitionPlan::new(5, 100, 4), Err(AppError::Config(_))));
        assert!(PartitionPlan::new(0, 100, 4).is_err());
    }

    #[test]
    fn split_checks_pool_size() {
        let plan = PartitionPlan::new(2, 4, 2).unwrap();
        let keys = strings(4);
        let mut conns = vec![0u8; 3];
        assert!(plan.split(&keys, &keys, &mut conns).is_err());
    }

    #[test]
    fn connection_round_robin_wraps_within_shard() {
        let plan = PartitionPlan::new(2, 10, 5).unwrap();
        let keys = strings(10);
        let mut conns: Vec<usize> = (0..5).collect();
        let shards = plan.split(&keys, &keys, &mut conns).unwrap();
        assert_eq!(shards[1].connections, &[2, 3]);
        let picks: Vec<usize> = (0..shards[1].len()).map(|n| shards[1].connection_index(n)).collect();
        assert_eq!(picks, [0, 1, 0, 1, 0]);
    }

    proptest! {
        #[test]
        fn shards_cover_keys_in_order(workers in 1usize..40, extra_keys in 0usize..200, extra_conns in 0usize..40) {
            let total_keys = workers + extra_keys;
            let total_conns = workers + extra_conns;
            let plan = PartitionPlan::new(workers, total_keys, total_conns).unwrap();
            let keys = strings(total_keys);
            let mut conns: Vec<usize> = (0..total_conns).collect();
            let shards = plan.split(&keys, &keys, &mut conns).unwrap();

            prop_assert_eq!(shards.len(), workers);
            let joined: Vec<&String> = shards.iter().flat_map(|s| s.keys.iter()).collect();
            prop_assert_eq!(joined.len(), total_keys);
            prop_assert!(joined.iter().zip(keys.iter()).all(|(a, b)| *a == b));

            let mut seen = std::collections::HashSet::new();
            for (i, shard) in shards.iter().enumerate() {
                prop_assert!(!shard.connections.is_empty());
                prop_assert_eq!(shard.connections.to_vec(), plan.connection_range(i).collect::<Vec<_>>());
                prop_assert_eq!(shard.keys, &keys[plan.key_range(i)]);
                prop_assert_eq!(shard.keys, shard.values);
                for c in shard.connections.iter() {
                    prop_assert!(seen.insert(*c));
                }
            }

            let again = PartitionPlan::new(workers, total_keys, total_conns).unwrap();
            prop_assert_eq!(plan, again);
        }
    }
}
