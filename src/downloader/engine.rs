use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{header, Client};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chunk::ChunkManager;
use super::error::{ChunkAttemptError, DownloadError};
use super::task::DownloadJob;

/// worker 共享的不变参数
struct WorkerContext {
    client: Client,
    url: String,
    request_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

/// 下载引擎
///
/// 固定数量的长驻 worker 从共享 FIFO 队列拉取分片索引，下载完一个分片
/// 立即拉取下一个，空闲槽位自动补满，直到队列清空。并发上限由 worker
/// 数量从结构上保证。
pub struct DownloadEngine {
    ctx: Arc<WorkerContext>,
    max_concurrency: usize,
}

impl DownloadEngine {
    pub fn new(client: Client, job: &DownloadJob) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                client,
                url: job.source_url.clone(),
                request_timeout: job.request_timeout,
                max_retries: job.max_retries_per_chunk,
                retry_delay: job.retry_delay,
            }),
            max_concurrency: job.max_concurrency,
        }
    }

    /// 运行 worker 池直到队列清空且所有 worker 退出
    ///
    /// 单个分片重试耗尽只会把该分片标记为 Failed，不会中断其余分片；
    /// 整体成败由调用方检查仓库状态决定。
    pub async fn run(
        &self,
        store: Arc<Mutex<ChunkManager>>,
        cancel: CancellationToken,
    ) -> Result<(), DownloadError> {
        let chunk_count = {
            let store = store.lock().await;
            store.chunk_count()
        };
        let worker_count = self.max_concurrency.min(chunk_count).max(1);
        let queue: Arc<Mutex<VecDeque<usize>>> =
            Arc::new(Mutex::new((0..chunk_count).collect()));

        info!(
            "启动下载 worker 池: 分片数={}, 并发数={}",
            chunk_count, worker_count
        );

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            let ctx = self.ctx.clone();
            let queue = queue.clone();
            let store = store.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, ctx, queue, store, cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker 任务异常退出: {}", e);
            }
        }

        if cancel.is_cancelled() {
            warn!("下载在完成前被取消");
            return Err(DownloadError::Cancelled);
        }

        Ok(())
    }
}

/// 单个 worker 的拉取循环
///
/// 队列弹出是唯一需要互斥的共享操作；弹出后该分片只属于当前 worker，
/// 重试始终在同一个槽位内进行，不会归还队列。
async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    queue: Arc<Mutex<VecDeque<usize>>>,
    store: Arc<Mutex<ChunkManager>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("[worker {}] 收到取消信号，退出", worker_id);
            return;
        }

        let index = {
            let mut queue = queue.lock().await;
            queue.pop_front()
        };
        let Some(index) = index else {
            debug!("[worker {}] 队列已空，退出", worker_id);
            return;
        };

        let (start, end) = {
            let mut store = store.lock().await;
            store.mark_in_flight(index);
            let chunk = store.chunk(index);
            (chunk.start, chunk.end)
        };

        debug!(
            "[worker {}] 开始下载分片 #{}: bytes={}-{}",
            worker_id, index, start, end
        );

        // 同一分片的重试循环，不释放 worker 槽位
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[worker {}] 分片 #{} 下载被取消", worker_id, index);
                    return;
                }
                result = fetch_range(&ctx, start, end) => result,
            };

            match attempt {
                Ok(bytes) => {
                    let (completed, total) = {
                        let mut store = store.lock().await;
                        store.complete(index, bytes);
                        (store.completed_count(), store.chunk_count())
                    };
                    info!(
                        "[worker {}] ✓ 分片 #{} 下载完成 ({}/{})",
                        worker_id, index, completed, total
                    );
                    break;
                }
                Err(e) => {
                    let retries = {
                        let mut store = store.lock().await;
                        store.record_retry(index)
                    };

                    if retries <= ctx.max_retries {
                        warn!(
                            "[worker {}] ⚠ 分片 #{} 第 {}/{} 次重试 ({}ms 后): {}",
                            worker_id,
                            index,
                            retries,
                            ctx.max_retries,
                            ctx.retry_delay.as_millis(),
                            e
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(ctx.retry_delay) => {}
                        }
                    } else {
                        error!(
                            "[worker {}] ✗ 分片 #{} 重试耗尽，标记失败: {}",
                            worker_id, index, e
                        );
                        let mut store = store.lock().await;
                        store.mark_failed(index);
                        // 继续处理队列中的下一个分片
                        break;
                    }
                }
            }
        }
    }
}

/// 对 `[start, end]` 闭区间发起一次 Range 请求
///
/// 响应体长度必须恰好等于区间长度，短读与非 2xx 一样按瞬态失败处理。
async fn fetch_range(
    ctx: &WorkerContext,
    start: u64,
    end: u64,
) -> Result<Bytes, ChunkAttemptError> {
    let expected = end - start + 1;

    let resp = ctx
        .client
        .get(&ctx.url)
        .header(header::RANGE, format!("bytes={}-{}", start, end))
        .timeout(ctx.request_timeout)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ChunkAttemptError::BadStatus(status));
    }

    let mut buf = BytesMut::with_capacity(expected as usize);
    let mut stream = resp.bytes_stream();
    while let Some(piece) = stream.next().await {
        buf.extend_from_slice(&piece?);
    }

    if buf.len() as u64 != expected {
        return Err(ChunkAttemptError::BadLength {
            expected,
            actual: buf.len() as u64,
        });
    }

    Ok(buf.freeze())
}
