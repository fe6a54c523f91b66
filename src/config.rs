//! 配置模块
//! 定义运行参数、默认值以及校验规则

use crate::error::{AppError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 默认端点
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:2379";

/// 默认拨号超时
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);

/// 默认参数，与命令行默认值保持一致
pub mod defaults {
    pub const ROUNDS: usize = 1;
    pub const TOTAL_CONCURRENT_OPS: usize = 10;
    pub const TOTAL_CLIENT: usize = 10;
    pub const TOTAL_PREFIXES: usize = 10;
    pub const TOTAL_KEYS: usize = 1000;
    pub const KEY_LENGTH: usize = 64;
    pub const VALUE_LENGTH: usize = 64;
    pub const MODE: &str = "all";
    pub const CONSISTENCY: &str = "l";
}

/// 进程退出码
pub mod exit {
    pub const SUCCESS: u8 = 0;
    /// 运行期错误（连接、读写、清理失败）
    pub const ERROR: u8 = 1;
    /// 配置错误，发生在任何网络活动之前
    pub const BAD_CONFIG: u8 = 4;
}

/// 随机字符串使用的字母表大小（字母与数字）
pub const ALPHABET_SIZE: usize = 62;

/// 错误消息常量
pub mod messages {
    pub const RUNTIME_CREATE_FAILED: &str = "Failed to create Compio runtime";
    pub const ROUND_FAILED: &str = "Load round failed";
    pub const CLEANUP_FAILED: &str = "failed to clean up keys after test";
    pub const SERVE_FAILED: &str = "Development server failed";
}

/// 运行模式，决定每一轮执行哪些阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    All,
    Put,
    Update,
    Get,
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Mode::All),
            "put" => Ok(Mode::Put),
            "update" => Ok(Mode::Update),
            "get" => Ok(Mode::Get),
            other => Err(AppError::Config(format!("invalid mode {other:?}"))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::All => "all",
            Mode::Put => "put",
            Mode::Update => "update",
            Mode::Get => "get",
        };
        f.write_str(name)
    }
}

/// 读一致性级别，整个运行期间只选择一次
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Consistency {
    /// 线性一致读（默认）
    #[default]
    Linearizable,
    /// 可串行化读，可能读到旧值
    Serializable,
}

impl FromStr for Consistency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l" => Ok(Consistency::Linearizable),
            "s" => Ok(Consistency::Serializable),
            other => Err(AppError::Config(format!("unknown consistency flag {other:?}"))),
        }
    }
}

impl Consistency {
    /// 命令行与协议中使用的单字符标记
    pub fn flag(self) -> &'static str {
        match self {
            Consistency::Linearizable => "l",
            Consistency::Serializable => "s",
        }
    }
}

/// 集群连接参数
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() || self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(AppError::Config("endpoints should not be empty.".into()));
        }
        Ok(())
    }

    /// 第 `index` 个连接对应的端点（轮询）
    pub fn endpoint_for(&self, index: usize) -> &str {
        &self.endpoints[index % self.endpoints.len()]
    }
}

/// 一次运行的全部参数，构造后不再修改
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub rounds: usize,
    pub total_concurrent_ops: usize,
    pub total_client: usize,
    pub total_prefixes: usize,
    pub total_keys: usize,
    pub key_length: usize,
    pub value_length: usize,
    pub consistency: Consistency,
    pub mode: Mode,
    /// 固定种子时第 r 轮使用 seed + r
    pub seed: Option<u64>,
    /// 读阶段校验返回值是否等于写入值
    pub verify_reads: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rounds: defaults::ROUNDS,
            total_concurrent_ops: defaults::TOTAL_CONCURRENT_OPS,
            total_client: defaults::TOTAL_CLIENT,
            total_prefixes: defaults::TOTAL_PREFIXES,
            total_keys: defaults::TOTAL_KEYS,
            key_length: defaults::KEY_LENGTH,
            value_length: defaults::VALUE_LENGTH,
            consistency: Consistency::Linearizable,
            mode: Mode::All,
            seed: None,
            verify_reads: false,
        }
    }
}

impl RunConfig {
    /// 前缀长度为键长的一半
    pub fn prefix_length(&self) -> usize {
        self.key_length / 2
    }

    pub fn suffix_length(&self) -> usize {
        self.key_length - self.prefix_length()
    }

    pub fn keys_per_prefix(&self) -> usize {
        self.total_keys / self.total_prefixes
    }

    /// 在建立任何连接之前检查所有参数
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AppError::Config(msg.to_string()));

        if self.rounds < 1 {
            return fail("rounds should be greater than 0.");
        }
        if self.total_concurrent_ops < 1 {
            return fail("total-concurrent-ops should be greater than 0.");
        }
        if self.total_concurrent_ops > self.total_keys {
            return fail("total-concurrent-ops should be less than or equal to total-keys.");
        }
        if self.key_length < 1 || self.value_length < 1 {
            return fail("key-length and value-length should greater than 0.");
        }
        if self.total_prefixes < 1 {
            return fail("total-prefixes should be greater than 0.");
        }
        if self.total_keys % self.total_prefixes != 0 {
            return fail("total-keys should be a multiple of total-prefixes.");
        }
        if self.total_client < self.total_concurrent_ops {
            return fail("total-client should be greater than or equal to total-concurrent-ops.");
        }
        if !prefix_space_fits(self.prefix_length(), self.total_prefixes) {
            return Err(AppError::Config(format!(
                "cannot generate {} unique prefixes of length {}",
                self.total_prefixes,
                self.prefix_length()
            )));
        }
        Ok(())
    }
}

/// `ALPHABET_SIZE^len >= count`
fn prefix_space_fits(len: usize, count: usize) -> bool {
    let Ok(exp) = u32::try_from(len) else {
        return true;
    };
    match ALPHABET_SIZE.checked_pow(exp) {
        Some(space) => space >= count,
        None => true,
    }
}
