use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::chunk::ChunkManager;

/// 进度采样间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// ETA 开始计算的最低进度
const ETA_MIN_PROGRESS: f64 = 0.01;

/// 某一时刻的下载进度快照，创建后不再修改
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProgressSnapshot {
    /// 已下载字节数（只含已完成分片）
    pub downloaded_bytes: u64,
    /// 文件总字节数
    pub total_bytes: u64,
    /// 任务开始以来的秒数
    pub elapsed_seconds: f64,
    /// 累计平均速度 (bytes/s)
    pub throughput_bytes_per_sec: f64,
    /// 预计剩余秒数；进度不足 1% 或速度为 0 时为 None，由调用方渲染为"计算中"
    pub eta_seconds: Option<f64>,
}

impl ProgressSnapshot {
    /// 由累计值推导一帧快照
    pub fn compute(downloaded_bytes: u64, total_bytes: u64, elapsed_seconds: f64) -> Self {
        let throughput = if elapsed_seconds > 0.0 {
            downloaded_bytes as f64 / elapsed_seconds
        } else {
            0.0
        };

        let progress = if total_bytes > 0 {
            downloaded_bytes as f64 / total_bytes as f64
        } else {
            0.0
        };

        let eta_seconds = if progress >= ETA_MIN_PROGRESS && throughput > 0.0 {
            Some((total_bytes - downloaded_bytes) as f64 / throughput)
        } else {
            None
        };

        Self {
            downloaded_bytes,
            total_bytes,
            elapsed_seconds,
            throughput_bytes_per_sec: throughput,
            eta_seconds,
        }
    }

    /// 进度百分比 (0-100)
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// 进度跟踪器
///
/// 独立于下载 worker 运行：固定间隔扫描分片仓库，把快照推给调用方的
/// 接收端。只读不写，不会阻塞调度。
pub struct ProgressTracker {
    store: Arc<Mutex<ChunkManager>>,
    sink: mpsc::UnboundedSender<ProgressSnapshot>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(
        store: Arc<Mutex<ChunkManager>>,
        sink: mpsc::UnboundedSender<ProgressSnapshot>,
    ) -> Self {
        Self {
            store,
            sink,
            started: Instant::now(),
        }
    }

    /// 启动采样循环
    ///
    /// - `cancel` 触发：立即退出，不再推送任何快照
    /// - `stop` 触发（下载自然结束）：推送一帧最终快照后退出
    pub fn spawn(
        self,
        cancel: CancellationToken,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                // 取消优先于自然结束：取消后不再推送任何快照
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("进度跟踪因取消而停止");
                        return;
                    }
                    _ = stop.cancelled() => {
                        self.emit().await;
                        debug!("进度跟踪结束");
                        return;
                    }
                    _ = ticker.tick() => {
                        self.emit().await;
                    }
                }
            }
        })
    }

    async fn emit(&self) {
        let (downloaded, total) = {
            let store = self.store.lock().await;
            (store.downloaded_bytes(), store.total_size())
        };
        let snapshot =
            ProgressSnapshot::compute(downloaded, total, self.started.elapsed().as_secs_f64());
        // 接收端关闭说明调用方不再关心进度，静默丢弃即可
        let _ = self.sink.send(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_basic_math() {
        let snap = ProgressSnapshot::compute(5_000_000, 10_000_000, 10.0);
        assert_eq!(snap.downloaded_bytes, 5_000_000);
        assert_eq!(snap.throughput_bytes_per_sec, 500_000.0);
        // 剩余 5MB / 500KB/s = 10s
        assert_eq!(snap.eta_seconds, Some(10.0));
        assert_eq!(snap.percent(), 50.0);
    }

    #[test]
    fn test_eta_none_below_one_percent() {
        let snap = ProgressSnapshot::compute(50_000, 10_000_000, 1.0);
        assert!(snap.percent() < 1.0);
        assert!(snap.eta_seconds.is_none());
    }

    #[test]
    fn test_eta_none_without_throughput() {
        let snap = ProgressSnapshot::compute(0, 10_000_000, 0.0);
        assert_eq!(snap.throughput_bytes_per_sec, 0.0);
        assert!(snap.eta_seconds.is_none());
    }

    #[test]
    fn test_eta_exactly_one_percent() {
        let snap = ProgressSnapshot::compute(100_000, 10_000_000, 2.0);
        assert!(snap.eta_seconds.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = ProgressSnapshot::compute(1024, 4096, 1.0);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"downloaded_bytes\":1024"));
        assert!(json.contains("\"total_bytes\":4096"));
    }
}
