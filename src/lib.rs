//! 键值存储压测库
//!
//! 面向远端键值服务的客户端压测工具：把键空间切分给固定数量的并发
//! worker 和固定数量的连接，按模式依次执行写入、更新、读取阶段，
//! 记录每个阶段的耗时，最后按前缀清理测试数据。
//!
//! 特性：
//! - 使用Compio异步运行时
//! - 前缀分组的随机键空间，可用种子复现
//! - 分片与连接轮询为纯函数，连接按可变切片独占分配
//! - 内存后端与 TCP 后端，以及用于联调的开发服务器

pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod keyspace;
pub mod memory;
pub mod net;
pub mod partition;
pub mod phase;
pub mod pool;
pub mod runner;
pub mod wire;
