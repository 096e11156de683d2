//! 进程级设置，全部来自环境变量。

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::warn;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_CONFIG: &str = "judge.toml";
const DEFAULT_PROBLEMS: &str = "problems.toml";
const BCRYPT_COST_RANGE: std::ops::RangeInclusive<u32> = 4..=31;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub bind: SocketAddr,
    /// 缺省时若工作目录下存在 `judge.toml` 则使用它，否则使用内置默认配置。
    pub judge_config: Option<PathBuf>,
    pub problems: PathBuf,
    pub secret_key: String,
    pub bcrypt_cost: u32,
    pub cors_origins: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 便于测试注入变量来源。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = read("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL is not set"))?;

        let bind = read("OPENJUDGE_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .context("OPENJUDGE_BIND must be a socket address such as 0.0.0.0:8080")?;

        let judge_config = match read("OPENJUDGE_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Path::new(DEFAULT_CONFIG)
                .exists()
                .then(|| PathBuf::from(DEFAULT_CONFIG)),
        };

        let problems = PathBuf::from(
            read("OPENJUDGE_PROBLEMS").unwrap_or_else(|| DEFAULT_PROBLEMS.to_string()),
        );

        let secret_key = match read("OPENJUDGE_SECRET_KEY") {
            Some(key) => key,
            None => {
                warn!("OPENJUDGE_SECRET_KEY is not set, generated a random key; sessions will not survive a restart");
                hex::encode(rand::random::<[u8; 32]>())
            }
        };

        let bcrypt_cost = match read("OPENJUDGE_BCRYPT_COST") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|cost| BCRYPT_COST_RANGE.contains(cost))
                .ok_or_else(|| anyhow!("OPENJUDGE_BCRYPT_COST must be an integer in 4..=31"))?,
            None => bcrypt::DEFAULT_COST,
        };

        let cors_origins = read("OPENJUDGE_CORS_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url,
            bind,
            judge_config,
            problems,
            secret_key,
            bcrypt_cost,
            cors_origins,
        })
    }
}
