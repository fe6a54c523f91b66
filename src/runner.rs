//! 压测主流程
//! 每一轮：生成键值 → 建立连接 → 按模式执行各阶段 → 清理

use crate::cleanup::delete_prefixes;
use crate::client::Connector;
use crate::config::{ClusterConfig, RunConfig, messages};
use crate::error::{AppError, ErrorContext, Result};
use crate::keyspace::KeySpaceGenerator;
use crate::partition::PartitionPlan;
use crate::phase::{PhaseReport, ReadOptions, phase_plan, run_phase};
use crate::pool::{open_connections, open_control};
use std::io::Write;
use tracing::info;

/// 一轮的汇总
#[derive(Clone, Debug)]
pub struct RoundSummary {
    pub round: usize,
    /// 只包含需要输出的阶段
    pub reports: Vec<PhaseReport>,
    pub deleted: u64,
}

/// 通用压测运行器
pub struct LoadRunner<'a, K> {
    connector: &'a K,
    cluster: &'a ClusterConfig,
    config: &'a RunConfig,
}

impl<'a, K: Connector> LoadRunner<'a, K> {
    /// 校验配置，失败时不会建立任何连接
    pub fn new(connector: &'a K, cluster: &'a ClusterConfig, config: &'a RunConfig) -> Result<Self> {
        cluster.validate()?;
        config.validate()?;
        Ok(Self {
            connector,
            cluster,
            config,
        })
    }

    /// 运行所有轮次，每完成一个阶段就向 `out` 写一行报告
    pub async fn run<W: Write>(&self, out: &mut W) -> Result<Vec<RoundSummary>> {
        let mut summaries = Vec::with_capacity(self.config.rounds);
        for round in 0..self.config.rounds {
            let summary = self
                .run_round(round, out)
                .await
                .with_context(&format!("{} (round {round})", messages::ROUND_FAILED))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// 单轮，不携带上一轮的任何状态
    ///
    /// 阶段失败时直接返回，不做清理。
    pub async fn run_round<W: Write>(&self, round: usize, out: &mut W) -> Result<RoundSummary> {
        let config = self.config;
        info!(
            round,
            backend = self.connector.name(),
            keys = config.total_keys,
            workers = config.total_concurrent_ops,
            connections = config.total_client,
            mode = %config.mode,
            "round started"
        );

        let space = KeySpaceGenerator::for_round(config.seed, round).generate(config)?;
        let plan = PartitionPlan::new(config.total_concurrent_ops, config.total_keys, config.total_client)?;

        let mut control = open_control(self.connector, self.cluster).await?;
        let mut pool = open_connections(self.connector, self.cluster, config.total_client).await?;

        let read = ReadOptions {
            consistency: config.consistency,
            verify: config.verify_reads,
        };
        let mut reports = Vec::new();
        for step in phase_plan(config.mode) {
            let outcome = run_phase(&plan, &space, &mut pool, step.kind, read).await?;
            info!(
                round,
                phase = step.kind.name(),
                ops = outcome.ops,
                elapsed = ?outcome.elapsed,
                reported = step.reported,
                "phase finished"
            );
            if step.reported {
                let report = PhaseReport {
                    round,
                    kind: step.kind,
                    keys: config.total_keys,
                    elapsed: outcome.elapsed,
                };
                writeln!(out, "{report}")?;
                out.flush()?;
                reports.push(report);
            }
        }
        drop(pool);

        let deleted = delete_prefixes(&mut control, &space.prefixes)
            .await
            .with_context(messages::CLEANUP_FAILED)?;
        info!(round, prefixes = space.prefixes.len(), deleted, "cleanup finished");

        Ok(RoundSummary {
            round,
            reports,
            deleted,
        })
    }
}

/// 创建 compio 运行时并阻塞执行整个压测
pub fn run_blocking<K: Connector, W: Write>(
    connector: &K,
    cluster: &ClusterConfig,
    config: &RunConfig,
    out: &mut W,
) -> Result<Vec<RoundSummary>> {
    let runner = LoadRunner::new(connector, cluster, config)?;
    let runtime = compio::runtime::Runtime::new()
        .map_err(|e| AppError::RuntimeCreate(e.to_string()))
        .with_context(messages::RUNTIME_CREATE_FAILED)?;
    runtime.block_on(runner.run(out))
}
