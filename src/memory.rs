//! 进程内键值存储
//! 所有连接共享同一份数据，可选模拟后端延迟与故障注入

use crate::client::{Connector, KvClient};
use crate::config::Consistency;
use crate::error::{AppError, Result};
use rand::prelude::*;
use rand::rngs::SmallRng;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

/// 后端延迟范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyRange {
    pub min: Duration,
    pub max: Duration,
}

impl LatencyRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self> {
        if min > max {
            return Err(AppError::Config(format!(
                "memory latency min {min:?} is greater than max {max:?}"
            )));
        }
        if u64::try_from(max.as_nanos()).is_err() {
            return Err(AppError::Config(format!("memory latency max {max:?} is too large")));
        }
        Ok(Self { min, max })
    }
}

/// 模拟后端延迟
#[inline]
pub async fn simulate_backend_latency(rng: &mut SmallRng, range: LatencyRange) {
    let min = u64::try_from(range.min.as_nanos()).unwrap_or(u64::MAX);
    let max = u64::try_from(range.max.as_nanos()).unwrap_or(u64::MAX);
    let delay_ns = rng.random_range(min..=max);
    compio::time::sleep(Duration::from_nanos(delay_ns)).await;
}

/// 存储统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub connections: u64,
    pub puts: u64,
    pub linearizable_gets: u64,
    pub serializable_gets: u64,
    pub range_deletes: u64,
}

#[derive(Default)]
struct Faults {
    /// 剩余可成功的读写次数
    op_budget: Cell<Option<u64>>,
    refused: RefCell<HashSet<String>>,
    fail_deletes: Cell<bool>,
}

#[derive(Default)]
struct Inner {
    data: RefCell<BTreeMap<String, String>>,
    stats: Cell<StoreStats>,
    faults: Faults,
    latency: Cell<Option<LatencyRange>>,
}

/// 共享的内存存储，克隆后指向同一份数据
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Rc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: LatencyRange) -> Self {
        self.inner.latency.set(Some(latency));
        self
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.stats.get()
    }

    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.borrow().is_empty()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.data.borrow().get(key).cloned()
    }

    /// 再成功 `ops` 次读写之后，后续读写全部失败
    pub fn fail_after(&self, ops: u64) {
        self.inner.faults.op_budget.set(Some(ops));
    }

    /// 拒绝到 `endpoint` 的连接
    pub fn refuse_endpoint(&self, endpoint: &str) {
        self.inner.faults.refused.borrow_mut().insert(endpoint.to_string());
    }

    /// 让所有按前缀删除失败
    pub fn fail_deletes(&self) {
        self.inner.faults.fail_deletes.set(true);
    }

    /// 按配置的延迟范围休眠，未配置时立即返回
    pub(crate) async fn simulate_latency(&self, rng: &mut SmallRng) {
        if let Some(range) = self.inner.latency.get() {
            simulate_backend_latency(rng, range).await;
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut StoreStats)) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }

    fn charge_op(&self) -> std::result::Result<(), String> {
        let budget = &self.inner.faults.op_budget;
        match budget.get() {
            Some(0) => Err("injected operation failure".to_string()),
            Some(n) => {
                budget.set(Some(n - 1));
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub(crate) fn apply_put(&self, key: &str, value: &str) -> std::result::Result<(), String> {
        self.charge_op()?;
        self.inner
            .data
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.update_stats(|s| s.puts += 1);
        Ok(())
    }

    pub(crate) fn apply_get(
        &self,
        key: &str,
        consistency: Consistency,
    ) -> std::result::Result<Option<String>, String> {
        self.charge_op()?;
        self.update_stats(|s| match consistency {
            Consistency::Linearizable => s.linearizable_gets += 1,
            Consistency::Serializable => s.serializable_gets += 1,
        });
        Ok(self.inner.data.borrow().get(key).cloned())
    }

    pub(crate) fn apply_delete_prefix(&self, prefix: &str) -> std::result::Result<u64, String> {
        if self.inner.faults.fail_deletes.get() {
            return Err("injected delete failure".to_string());
        }
        let mut data = self.inner.data.borrow_mut();
        let doomed: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            data.remove(key);
        }
        drop(data);
        self.update_stats(|s| s.range_deletes += 1);
        Ok(doomed.len() as u64)
    }
}

/// 内存存储的连接工厂
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

impl Connector for MemoryConnector {
    type Client = MemoryClient;

    async fn connect(&self, endpoint: &str) -> Result<MemoryClient> {
        if self.store.inner.faults.refused.borrow().contains(endpoint) {
            return Err(AppError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.store.update_stats(|s| s.connections += 1);
        Ok(MemoryClient {
            store: self.store.clone(),
            endpoint: endpoint.to_string(),
            rng: SmallRng::from_rng(&mut rand::rng()),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// 内存存储上的一个“连接”
pub struct MemoryClient {
    store: MemoryStore,
    endpoint: String,
    rng: SmallRng,
}

impl MemoryClient {
    async fn pause(&mut self) {
        self.store.simulate_latency(&mut self.rng).await;
    }
}

impl KvClient for MemoryClient {
    async fn put(&mut self, key: &str, value: &str) -> Result<()> {
        self.pause().await;
        self.store.apply_put(key, value).map_err(|reason| AppError::Operation {
            op: "put",
            key: key.to_string(),
            reason,
        })
    }

    async fn get(&mut self, key: &str, consistency: Consistency) -> Result<Option<String>> {
        self.pause().await;
        self.store
            .apply_get(key, consistency)
            .map_err(|reason| AppError::Operation {
                op: "get",
                key: key.to_string(),
                reason,
            })
    }

    async fn delete_prefix(&mut self, prefix: &str) -> Result<u64> {
        self.pause().await;
        self.store
            .apply_delete_prefix(prefix)
            .map_err(|reason| AppError::Cleanup {
                prefix: prefix.to_string(),
                reason,
            })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
