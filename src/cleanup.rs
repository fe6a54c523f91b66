//! 清理模块
//! 一轮结束后通过控制连接按前缀删除所有测试数据

use crate::client::KvClient;
use crate::error::{AppError, Result};
use tracing::{debug, error};

/// 逐个前缀执行范围删除，返回删除的键总数
///
/// 任何一次删除失败都直接返回错误：残留的数据会污染下一轮。
pub async fn delete_prefixes<C: KvClient>(control: &mut C, prefixes: &[String]) -> Result<u64> {
    let mut deleted = 0;
    for prefix in prefixes {
        match control.delete_prefix(prefix).await {
            Ok(n) => {
                debug!(prefix = %prefix, deleted = n, "prefix removed");
                deleted += n;
            }
            Err(e) => {
                error!(prefix = %prefix, error = %e, "cleanup failed");
                return Err(match e {
                    AppError::Cleanup { .. } => e,
                    other => AppError::Cleanup {
                        prefix: prefix.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        }
    }
    Ok(deleted)
}
