//! 远端键值服务抽象
//! 定义压测引擎依赖的最小接口：写入、读取、按前缀删除

use crate::config::Consistency;
use crate::error::Result;

/// 单个连接上的键值操作，统一接口
///
/// 连接不可重入：同一时刻只允许一个 worker 持有 `&mut` 引用。
#[allow(async_fn_in_trait)]
pub trait KvClient {
    /// 写入键值对
    async fn put(&mut self, key: &str, value: &str) -> Result<()>;

    /// 读取键，键不存在时返回 `None`
    async fn get(&mut self, key: &str, consistency: Consistency) -> Result<Option<String>>;

    /// 删除所有以 `prefix` 开头的键，返回删除数量
    async fn delete_prefix(&mut self, prefix: &str) -> Result<u64>;

    /// 连接对应的端点（用于日志）
    fn endpoint(&self) -> &str;
}

/// 连接工厂
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Client: KvClient;

    /// 与单个端点建立连接
    async fn connect(&self, endpoint: &str) -> Result<Self::Client>;

    /// 后端名称（用于日志）
    fn name(&self) -> &'static str;
}
