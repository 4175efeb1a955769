use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use model_downloader::config::{AppConfig, DownloadConfig};
use model_downloader::downloader::{DownloadError, DownloadManager};
use model_downloader::logging;

/// 并行分片模型文件下载器
#[derive(Debug, Parser)]
#[command(name = "model-downloader", version, about = "并行分片模型文件下载器")]
struct Cli {
    /// 模型文件下载地址
    url: String,

    /// 输出文件路径（纯文件名时保存到配置的下载目录）
    output: PathBuf,

    /// 分片大小 (MB)
    #[arg(long)]
    chunk_size_mb: Option<u64>,

    /// 最大并发分片数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 单次请求超时（秒）
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// 单分片最大重试次数
    #[arg(long)]
    max_retries: Option<u32>,

    /// 配置文件路径
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// 以 JSON 行格式输出进度（供外部 UI 集成）
    #[arg(long)]
    progress_json: bool,
}

/// 纯文件名落到配置的下载目录，带路径的输出原样使用
fn resolve_output(config: &DownloadConfig, output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => output.to_path_buf(),
        _ => config.download_dir.join(output),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config).await?;
    if let Some(v) = cli.chunk_size_mb {
        config.download.chunk_size_mb = v;
    }
    if let Some(v) = cli.concurrency {
        config.download.max_concurrency = v;
    }
    if let Some(v) = cli.timeout_secs {
        config.download.timeout_secs = v;
    }
    if let Some(v) = cli.max_retries {
        config.download.max_retries = v;
    }

    let guard = logging::init_logging(&config.log)?;

    let destination = resolve_output(&config.download, &cli.output);
    let job = config.download.to_job(&cli.url, destination.clone());
    info!(
        "开始下载: {} -> {} (分片 {}MB, 并发 {})",
        cli.url,
        destination.display(),
        config.download.chunk_size_mb,
        config.download.max_concurrency
    );

    let manager = DownloadManager::new(job)?;

    // Ctrl-C 触发取消
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到 Ctrl-C，正在取消下载...");
                manager.cancel();
            }
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run_handle = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.run(Some(tx)).await })
    };

    if cli.progress_json {
        while let Some(snapshot) = rx.recv().await {
            println!("{}", serde_json::to_string(&snapshot)?);
        }
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%) {msg}",
            )
            .context("进度条模板无效")?,
        );
        while let Some(snapshot) = rx.recv().await {
            if bar.length() != Some(snapshot.total_bytes) {
                bar.set_length(snapshot.total_bytes);
            }
            bar.set_position(snapshot.downloaded_bytes);
            let eta = snapshot
                .eta_seconds
                .map(|s| format!("剩余 {:.0}s", s))
                .unwrap_or_else(|| "计算中...".to_string());
            bar.set_message(format!(
                "{:.2} MB/s | {}",
                snapshot.throughput_bytes_per_sec / 1024.0 / 1024.0,
                eta
            ));
        }
        bar.finish_and_clear();
    }

    let exit_code = match run_handle.await.context("下载任务异常退出")? {
        Ok(report) => {
            info!(
                "下载完成: {} ({} bytes, 耗时 {:.1}s, 平均 {:.2} MB/s)",
                destination.display(),
                report.total_bytes,
                report.elapsed_seconds,
                report.average_bytes_per_sec / 1024.0 / 1024.0
            );
            0
        }
        Err(DownloadError::Cancelled) => {
            warn!("下载已取消");
            130
        }
        Err(e) => {
            error!("下载失败: {}", e);
            1
        }
    };

    drop(guard);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
