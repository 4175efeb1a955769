// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::downloader::DownloadJob;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 默认下载目录（输出参数为纯文件名时使用）
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 最大并发分片数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 单分片最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试前等待时间（毫秒，固定间隔）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_chunk_size_mb() -> u64 {
    2
}

fn default_max_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            chunk_size_mb: default_chunk_size_mb(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DownloadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }

    /// 由配置生成任务描述
    pub fn to_job(&self, source_url: &str, destination_path: PathBuf) -> DownloadJob {
        let mut job = DownloadJob::new(source_url, destination_path);
        job.chunk_size_bytes = self.chunk_size_bytes();
        job.max_concurrency = self.max_concurrency;
        job.request_timeout = Duration::from_secs(self.timeout_secs);
        job.max_retries_per_chunk = self.max_retries;
        job.retry_delay = Duration::from_millis(self.retry_delay_ms);
        job
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 从指定路径加载配置；文件不存在时写出默认配置并返回默认值
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path).await?;
            info!("配置文件不存在，已生成默认配置: {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        Ok(config)
    }

    /// 把当前配置写回磁盘
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("创建配置目录失败: {}", parent.display()))?;
            }
        }
        fs::write(path, content)
            .await
            .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.download.chunk_size_mb, 2);
        assert_eq!(config.download.max_concurrency, 4);
        assert_eq!(config.download.timeout_secs, 60);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.download.retry_delay_ms, 1000);
        assert_eq!(config.log.level, "info");
        assert!(!config.log.enabled);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [download]
            max_concurrency = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.download.max_concurrency, 8);
        assert_eq!(config.download.chunk_size_mb, 2);
        assert_eq!(config.log.retention_days, 7);
    }

    #[test]
    fn test_to_job_mapping() {
        let mut config = DownloadConfig::default();
        config.chunk_size_mb = 4;
        config.timeout_secs = 30;
        config.retry_delay_ms = 500;

        let job = config.to_job("https://example.com/model.gguf", PathBuf::from("out.gguf"));
        assert_eq!(job.chunk_size_bytes, 4 * 1024 * 1024);
        assert_eq!(job.request_timeout, Duration::from_secs(30));
        assert_eq!(job.retry_delay, Duration::from_millis(500));
        assert_eq!(job.max_retries_per_chunk, 3);
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = AppConfig::load(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.download.chunk_size_mb, 2);

        // 再次加载读取同一份内容
        let reloaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.download.max_concurrency, 4);
    }
}
