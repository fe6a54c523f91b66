//! 键值生成模块
//! 生成一轮测试使用的前缀、键序列和值序列

use crate::config::RunConfig;
use crate::error::{AppError, Result};
use rand::distr::Alphanumeric;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};

/// 一轮测试的键空间
///
/// `keys[i]` 与 `values[i]` 按下标配对。键按前缀分组：前缀在外层、
/// 后缀在内层，相邻的键共享同一个前缀。
#[derive(Clone, Debug)]
pub struct KeySpace {
    pub prefixes: Vec<String>,
    pub keys: Vec<String>,
    pub values: Vec<String>,
}

impl KeySpace {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 出现不止一次的键，以及写入过它的全部值
    ///
    /// 后缀可以重复，同一个键会被不同 worker 并发写入，最终留下哪个值不确定。
    pub fn duplicate_writes(&self) -> HashMap<&str, Vec<&str>> {
        let mut writes: HashMap<&str, Vec<&str>> = HashMap::with_capacity(self.keys.len());
        for (key, value) in self.keys.iter().zip(&self.values) {
            writes.entry(key.as_str()).or_default().push(value.as_str());
        }
        writes.retain(|_, values| values.len() > 1);
        writes
    }
}

/// 键值生成器
pub struct KeySpaceGenerator {
    rng: ChaCha8Rng,
}

impl KeySpaceGenerator {
    /// 使用固定种子创建生成器
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// 第 `round` 轮的生成器；没有种子时随机选择
    pub fn for_round(seed: Option<u64>, round: usize) -> Self {
        let seed = match seed {
            Some(seed) => seed.wrapping_add(round as u64),
            None => rand::random(),
        };
        Self::new(seed)
    }

    /// 长度为 `len` 的随机字母数字串
    pub fn random_string(&mut self, len: usize) -> String {
        (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    /// `count` 个随机串，允许重复
    pub fn random_strings(&mut self, len: usize, count: usize) -> Vec<String> {
        (0..count).map(|_| self.random_string(len)).collect()
    }

    /// `count` 个互不相同的随机串（不放回抽样）
    pub fn unique_strings(&mut self, len: usize, count: usize) -> Result<Vec<String>> {
        let space = u32::try_from(len)
            .ok()
            .and_then(|exp| crate::config::ALPHABET_SIZE.checked_pow(exp));
        if matches!(space, Some(space) if space < count) {
            return Err(AppError::Config(format!(
                "cannot generate {count} unique strings of length {len}"
            )));
        }

        let mut seen = HashSet::with_capacity(count);
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let candidate = self.random_string(len);
            if seen.insert(candidate.clone()) {
                out.push(candidate);
            }
        }
        Ok(out)
    }

    /// 按配置生成完整键空间
    pub fn generate(&mut self, config: &RunConfig) -> Result<KeySpace> {
        let prefixes = self.unique_strings(config.prefix_length(), config.total_prefixes)?;
        let suffixes = self.random_strings(config.suffix_length(), config.keys_per_prefix());
        let values = self.random_strings(config.value_length, config.total_keys);

        let mut keys = Vec::with_capacity(config.total_keys);
        for prefix in &prefixes {
            for suffix in &suffixes {
                keys.push(format!("{prefix}{suffix}"));
            }
        }

        Ok(KeySpace {
            prefixes,
            keys,
            values,
        })
    }
}
