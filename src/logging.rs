//! 日志系统配置
//!
//! 控制台输出始终开启；启用文件持久化时按天滚动，并在启动时清理过期日志。

use crate::config::LogConfig;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 初始化日志系统
///
/// 返回的 guard 在进程退出前必须存活，否则文件日志会丢尾。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());
    let console = fmt::layer().with_target(false).with_timer(timer.clone());

    if !config.enabled {
        tracing_subscriber::registry().with(filter).with(console).init();
        return Ok(None);
    }

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("创建日志目录失败: {}", config.log_dir.display()))?;
    cleanup_old_logs(&config.log_dir, config.retention_days);

    let appender = tracing_appender::rolling::daily(&config.log_dir, "model-downloader.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    info!("日志文件输出已启用: {}", config.log_dir.display());
    Ok(Some(guard))
}

/// 删除超过保留天数的日志文件
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) {
    let max_age = Duration::from_secs(u64::from(retention_days) * 24 * 3600);
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };

    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("model-downloader.log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|age| age > max_age)
            .unwrap_or(false);

        if expired && std::fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        info!("清理过期日志 {} 个 (保留 {} 天)", removed, retention_days);
    }
}
