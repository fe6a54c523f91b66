//! 连接池管理
//! 按端点轮询建立连接，任何一条失败都视为致命错误

use crate::client::{Connector, KvClient};
use crate::config::ClusterConfig;
use crate::error::{AppError, Result};
use tracing::debug;

/// 建立单条连接，使用集群统一的拨号超时
pub async fn dial<K: Connector>(connector: &K, endpoint: &str, cluster: &ClusterConfig) -> Result<K::Client> {
    match compio::time::timeout(cluster.dial_timeout, connector.connect(endpoint)).await {
        Ok(client) => client,
        Err(_) => Err(AppError::Connect {
            endpoint: endpoint.to_string(),
            reason: format!("dial timeout after {:?}", cluster.dial_timeout),
        }),
    }
}

/// 建立 `count` 条连接，第 i 条连到 `endpoints[i % len]`
///
/// 不接受部分成功的连接池：第一条失败的连接即返回错误，已建立的连接随之释放。
pub async fn open_connections<K: Connector>(
    connector: &K,
    cluster: &ClusterConfig,
    count: usize,
) -> Result<Vec<K::Client>> {
    let mut clients = Vec::with_capacity(count);
    for i in 0..count {
        let endpoint = cluster.endpoint_for(i);
        let client = dial(connector, endpoint, cluster).await?;
        debug!(index = i, endpoint = client.endpoint(), backend = connector.name(), "connection opened");
        clients.push(client);
    }
    Ok(clients)
}

/// 清理专用的控制连接，独立于 worker 连接池
pub async fn open_control<K: Connector>(connector: &K, cluster: &ClusterConfig) -> Result<K::Client> {
    dial(connector, cluster.endpoint_for(0), cluster).await
}
