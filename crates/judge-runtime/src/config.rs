use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use openjudge_core::domain::Language;
use serde::Deserialize;
type Result<T> = anyhow::Result<T>;

/// 评测运行时配置，对应 `judge.toml`。
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub limits: SubmissionLimits,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default = "default_toolchains")]
    pub toolchains: Vec<Toolchain>,
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            pool: PoolConfig::default(),
            limits: SubmissionLimits::default(),
            sandbox: SandboxConfig::default(),
            toolchains: default_toolchains(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl JudgeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("failed to deserialize judge config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            bail!("queue.capacity must be greater than zero");
        }
        if self.pool.workers == 0 {
            bail!("pool.workers must be greater than zero");
        }
        if !(1..=2).contains(&self.pool.max_attempts) {
            bail!(
                "pool.max_attempts must be 1 or 2, got {}",
                self.pool.max_attempts
            );
        }
        if self.limits.max_source_bytes == 0 {
            bail!("limits.max_source_bytes must be greater than zero");
        }
        self.sandbox.validate()?;

        let mut seen = HashSet::new();
        for toolchain in &self.toolchains {
            if !seen.insert(toolchain.language) {
                bail!("duplicate toolchain for {}", toolchain.language);
            }
            toolchain
                .validate()
                .with_context(|| format!("invalid toolchain for {}", toolchain.language))?;
        }
        if self.toolchain(self.limits.default_language).is_none() {
            bail!(
                "default language {} has no configured toolchain",
                self.limits.default_language
            );
        }
        Ok(())
    }

    pub fn toolchain(&self, language: Language) -> Option<&Toolchain> {
        self.toolchains
            .iter()
            .find(|toolchain| toolchain.language == language)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// 排队与运行中的提交总数上限。
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 内部错误时最多执行的次数（含首次）。
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionLimits {
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default)]
    pub default_language: Language,
    /// 源码中出现即拒绝的片段。
    #[serde(default)]
    pub rejected_patterns: Vec<String>,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_source_bytes: default_max_source_bytes(),
            default_language: Language::default(),
            rejected_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// 临时工作目录的父目录，缺省为系统临时目录。
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_compile_time_limit_ms")]
    pub compile_time_limit_ms: u64,
    #[serde(default = "default_compile_memory_limit_mb")]
    pub compile_memory_limit_mb: u64,
    #[serde(default = "default_file_size_limit_mb")]
    pub file_size_limit_mb: u64,
    /// 可选的 RLIMIT_AS；多数解释器在地址空间受限时无法启动，默认关闭。
    #[serde(default)]
    pub address_space_limit_mb: Option<u64>,
    /// 在独立的网络命名空间中运行，只剩一个未启用的回环设备。
    #[serde(default = "default_true")]
    pub deny_network: bool,
    /// 在私有挂载命名空间中运行：只能看到工作目录和 `readonly_paths`。
    #[serde(default = "default_true")]
    pub isolate_filesystem: bool,
    /// 以只读方式挂进沙箱的宿主路径（解释器、编译器、共享库）。
    #[serde(default = "default_readonly_paths")]
    pub readonly_paths: Vec<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            path: default_path(),
            max_output_bytes: default_max_output_bytes(),
            compile_time_limit_ms: default_compile_time_limit_ms(),
            compile_memory_limit_mb: default_compile_memory_limit_mb(),
            file_size_limit_mb: default_file_size_limit_mb(),
            address_space_limit_mb: None,
            deny_network: true,
            isolate_filesystem: true,
            readonly_paths: default_readonly_paths(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SandboxConfig {
    pub fn compile_time_limit(&self) -> Duration {
        Duration::from_millis(self.compile_time_limit_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 任一隔离开启时都需要非特权用户命名空间，并会额外获得独立的 PID 命名空间。
    pub fn uses_namespaces(&self) -> bool {
        self.deny_network || self.isolate_filesystem
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("sandbox.poll_interval_ms must be greater than zero");
        }
        for path in &self.readonly_paths {
            if !path.is_absolute() || path.parent().is_none() {
                bail!(
                    "sandbox.readonly_paths entries must be absolute and not the root: {}",
                    path.display()
                );
            }
        }
        Ok(())
    }
}

/// 一种语言的编译与运行命令，均在工作目录中执行。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Toolchain {
    pub language: Language,
    pub source_file: String,
    #[serde(default)]
    pub compile: Vec<String>,
    pub run: Vec<String>,
}

impl Toolchain {
    pub fn needs_compile(&self) -> bool {
        !self.compile.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let plain_name = !self.source_file.is_empty()
            && !self.source_file.contains(['/', '\\'])
            && self.source_file != "."
            && self.source_file != "..";
        if !plain_name {
            bail!("source_file must be a plain file name: {:?}", self.source_file);
        }
        if self.run.is_empty() {
            bail!("run command must not be empty");
        }
        Ok(())
    }
}

fn default_toolchains() -> Vec<Toolchain> {
    vec![Toolchain {
        language: Language::Python,
        source_file: "main.py".to_string(),
        compile: vec![
            "python3".to_string(),
            "-m".to_string(),
            "py_compile".to_string(),
            "main.py".to_string(),
        ],
        run: vec!["python3".to_string(), "main.py".to_string()],
    }]
}

fn default_queue_capacity() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    2
}

fn default_max_source_bytes() -> usize {
    50_000
}

fn default_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".to_string()
}

fn default_max_output_bytes() -> usize {
    1 << 20
}

fn default_compile_time_limit_ms() -> u64 {
    10_000
}

fn default_compile_memory_limit_mb() -> u64 {
    1_024
}

fn default_file_size_limit_mb() -> u64 {
    16
}

fn default_true() -> bool {
    true
}

fn default_readonly_paths() -> Vec<PathBuf> {
    ["/usr", "/bin", "/lib", "/lib64"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_event_buffer_size() -> usize {
    1_000
}
