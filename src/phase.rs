//! 阶段执行模块
//! 每个阶段为每个分片启动一个 worker，全部结束后才算阶段完成

use crate::client::KvClient;
use crate::config::{Consistency, Mode};
use crate::error::{AppError, Result};
use crate::keyspace::KeySpace;
use crate::partition::{PartitionPlan, Shard};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// 阶段类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    Put,
    /// 语义上是更新，实际与写入相同
    Update,
    Get,
}

impl PhaseKind {
    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Put => "put",
            PhaseKind::Update => "update",
            PhaseKind::Get => "get",
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(self, PhaseKind::Get)
    }
}

/// 计划中的一步；`reported` 为 false 的是预写入，不输出耗时
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseStep {
    pub kind: PhaseKind,
    pub reported: bool,
}

const fn step(kind: PhaseKind, reported: bool) -> PhaseStep {
    PhaseStep { kind, reported }
}

/// 模式对应的阶段序列
///
/// `update` 与 `get` 先静默写入一遍，使后续的更新与读取作用在已存在的键上。
pub fn phase_plan(mode: Mode) -> &'static [PhaseStep] {
    const PUT: &[PhaseStep] = &[step(PhaseKind::Put, true)];
    const UPDATE: &[PhaseStep] = &[step(PhaseKind::Put, false), step(PhaseKind::Update, true)];
    const GET: &[PhaseStep] = &[step(PhaseKind::Put, false), step(PhaseKind::Get, true)];
    const ALL: &[PhaseStep] = &[
        step(PhaseKind::Put, true),
        step(PhaseKind::Update, true),
        step(PhaseKind::Get, true),
    ];
    match mode {
        Mode::Put => PUT,
        Mode::Update => UPDATE,
        Mode::Get => GET,
        Mode::All => ALL,
    }
}

/// 读阶段参数，整个运行期间固定
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOptions {
    pub consistency: Consistency,
    pub verify: bool,
}

/// 一个阶段的结果
#[derive(Clone, Copy, Debug)]
pub struct PhaseOutcome {
    pub kind: PhaseKind,
    pub ops: usize,
    pub elapsed: Duration,
}

/// 标准输出上的一行耗时报告
#[derive(Clone, Copy, Debug)]
pub struct PhaseReport {
    pub round: usize,
    pub kind: PhaseKind,
    pub keys: usize,
    pub elapsed: Duration,
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PhaseKind::Get => write!(
                f,
                "round {}: Time taken for get for keys : {}, is : {:?}",
                self.round, self.keys, self.elapsed
            ),
            kind => write!(
                f,
                "round {}: Time taken for {} for keys: {} is : {:?}",
                self.round,
                kind.name(),
                self.keys,
                self.elapsed
            ),
        }
    }
}

/// 单个 worker：顺序处理分片内的键，在分片内轮询连接
///
/// 校验读取时，重复键读到任何一次写入的值都算正确。
async fn run_worker<C: KvClient>(
    mut shard: Shard<'_, C>,
    kind: PhaseKind,
    read: ReadOptions,
    duplicates: &HashMap<&str, Vec<&str>>,
) -> Result<usize> {
    let keys = shard.keys;
    let values = shard.values;
    for (n, (key, value)) in keys.iter().zip(values).enumerate() {
        let idx = shard.connection_index(n);
        let client = &mut shard.connections[idx];
        if kind.is_write() {
            client.put(key, value).await?;
        } else {
            let found = client.get(key, read.consistency).await?;
            if read.verify && !read_matches(found.as_deref(), key, value, duplicates) {
                return Err(AppError::ValueMismatch { key: key.clone() });
            }
        }
    }
    debug!(worker = shard.worker, phase = kind.name(), keys = keys.len(), "worker finished");
    Ok(keys.len())
}

fn read_matches(
    found: Option<&str>,
    key: &str,
    value: &str,
    duplicates: &HashMap<&str, Vec<&str>>,
) -> bool {
    match found {
        Some(found) if found == value => true,
        Some(found) => duplicates.get(key).is_some_and(|written| written.contains(&found)),
        None => false,
    }
}

/// 执行一个阶段
///
/// 所有 worker 并发运行，`join_all` 作为屏障。屏障之后再检查结果，
/// 任意一个 worker 出错则整个阶段失败。
pub async fn run_phase<C: KvClient>(
    plan: &PartitionPlan,
    space: &KeySpace,
    connections: &mut [C],
    kind: PhaseKind,
    read: ReadOptions,
) -> Result<PhaseOutcome> {
    let shards = plan.split(&space.keys, &space.values, connections)?;
    let duplicates = if read.verify && !kind.is_write() {
        space.duplicate_writes()
    } else {
        HashMap::new()
    };

    let start = Instant::now();
    let results = join_all(
        shards
            .into_iter()
            .map(|shard| run_worker(shard, kind, read, &duplicates)),
    )
    .await;
    let elapsed = start.elapsed();

    let failures = results.iter().filter(|r| r.is_err()).count();
    let mut ops = 0;
    for result in results {
        match result {
            Ok(n) => ops += n,
            Err(e) => {
                error!(phase = kind.name(), failed_workers = failures, error = %e, "phase aborted");
                return Err(e);
            }
        }
    }
    debug_assert_eq!(ops, space.len(), "{} phase must touch every key once", kind.name());

    Ok(PhaseOutcome { kind, ops, elapsed })
}
