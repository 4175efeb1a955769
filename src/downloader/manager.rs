use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::chunk::ChunkManager;
use super::engine::DownloadEngine;
use super::error::DownloadError;
use super::merge;
use super::probe;
use super::progress::{ProgressSnapshot, ProgressTracker};
use super::task::{DownloadJob, DownloadReport, DownloadTask};

/// 下载管理器
///
/// 每个任务构造一个实例，不持有任何全局状态；进度通过调用方提供的
/// channel 或回调交付，终态通过返回值或回调交付。克隆共享同一个任务，
/// 任意一份克隆上的 `cancel` 都会中止整个任务。
#[derive(Clone)]
pub struct DownloadManager {
    job: Arc<DownloadJob>,
    client: Client,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    task: Arc<Mutex<DownloadTask>>,
}

impl DownloadManager {
    pub fn new(job: DownloadJob) -> Result<Self, DownloadError> {
        let client = Client::builder().build()?;
        let task = DownloadTask::new(job.source_url.clone());
        Ok(Self {
            job: Arc::new(job),
            client,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(task)),
        })
    }

    /// 任务描述
    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    /// 当前任务状态的副本
    pub async fn task(&self) -> DownloadTask {
        self.task.lock().await.clone()
    }

    /// 取消下载
    ///
    /// 幂等，任何时刻调用都安全，包括任务已结束之后。
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 运行完整下载流程: 探测 → 分片 → worker 池 → 合并
    ///
    /// `progress` 为 None 时跳过进度跟踪。同一实例只服务一次调用，
    /// 重复启动返回 `AlreadyRunning`。
    pub async fn run(
        &self,
        progress: Option<mpsc::UnboundedSender<ProgressSnapshot>>,
    ) -> Result<DownloadReport, DownloadError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DownloadError::AlreadyRunning);
        }

        let result = self.run_inner(progress).await;

        {
            let mut task = self.task.lock().await;
            match &result {
                Ok(report) => {
                    task.mark_completed();
                    info!(
                        "✅ 下载完成: {} bytes, 耗时 {:.1}s, 平均 {:.2} MB/s",
                        report.total_bytes,
                        report.elapsed_seconds,
                        report.average_bytes_per_sec / 1024.0 / 1024.0
                    );
                }
                Err(DownloadError::Cancelled) => {
                    task.mark_cancelled();
                    warn!("任务 {} 已取消", task.id);
                }
                Err(e) => {
                    task.mark_failed(e.to_string());
                    warn!("任务 {} 失败: {}", task.id, e);
                }
            }
        }

        result
    }

    /// 启动下载并通过回调交付进度与终态
    ///
    /// 与 `run` 等价的回调形式，便于嵌入 UI 场景；返回的句柄可用于
    /// 等待整个流程结束。
    pub fn start_download<P, C>(&self, on_progress: P, on_complete: C) -> tokio::task::JoinHandle<()>
    where
        P: Fn(ProgressSnapshot) + Send + 'static,
        C: FnOnce(Result<DownloadReport, DownloadError>) + Send + 'static,
    {
        let manager = self.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let run_fut = manager.run(Some(tx));
            tokio::pin!(run_fut);

            let mut rx_open = true;
            let result = loop {
                tokio::select! {
                    snapshot = rx.recv(), if rx_open => {
                        match snapshot {
                            Some(s) => on_progress(s),
                            None => rx_open = false,
                        }
                    }
                    result = &mut run_fut => break result,
                }
            };

            // 下载结束后冲掉 channel 里残留的快照
            while let Ok(s) = rx.try_recv() {
                on_progress(s);
            }

            on_complete(result);
        })
    }

    async fn run_inner(
        &self,
        progress: Option<mpsc::UnboundedSender<ProgressSnapshot>>,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        // 1. 探测总大小
        let total_size = probe::probe_size(
            &self.client,
            &self.job.source_url,
            self.job.request_timeout,
        )
        .await?;

        // 2. 分片计划
        let store = ChunkManager::plan(total_size, self.job.chunk_size_bytes)?;
        let chunk_count = store.chunk_count();
        {
            let mut task = self.task.lock().await;
            task.mark_downloading(total_size);
            info!(
                "任务 {} 开始: {} bytes / {} 个分片, 并发 {}",
                task.id, total_size, chunk_count, self.job.max_concurrency
            );
        }
        let store = Arc::new(Mutex::new(store));

        // 3. 进度跟踪（独立任务，只读扫描）
        let tracker_stop = CancellationToken::new();
        let tracker_handle = progress.map(|sink| {
            ProgressTracker::new(store.clone(), sink)
                .spawn(self.cancel.clone(), tracker_stop.clone())
        });

        // 4. worker 池下载
        let engine = DownloadEngine::new(self.client.clone(), &self.job);
        let engine_result = engine.run(store.clone(), self.cancel.clone()).await;

        // 5. 停止进度跟踪；自然结束时会推送最终一帧快照
        tracker_stop.cancel();
        if let Some(handle) = tracker_handle {
            let _ = handle.await;
        }

        engine_result?;

        if self.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        // 6. 合并
        {
            let mut task = self.task.lock().await;
            task.mark_merging();
        }
        {
            let store = store.lock().await;
            merge::merge_chunks(&store, &self.job.destination_path).await?;
        }

        let elapsed = started.elapsed().as_secs_f64();
        Ok(DownloadReport {
            total_bytes: total_size,
            elapsed_seconds: elapsed,
            average_bytes_per_sec: if elapsed > 0.0 {
                total_size as f64 / elapsed
            } else {
                0.0
            },
            chunk_count,
        })
    }
}
