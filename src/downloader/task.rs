use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// 默认分片大小: 2MB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// 默认并发下载数
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// 默认单次请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 默认单分片最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认重试前的等待时间（固定间隔）
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 一次下载任务的完整描述，由调用方提供，创建后不再修改
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// 源文件地址
    pub source_url: String,
    /// 本地保存路径
    pub destination_path: PathBuf,
    /// 分片大小（字节）
    pub chunk_size_bytes: u64,
    /// 最大并发分片数
    pub max_concurrency: usize,
    /// 单次请求超时
    pub request_timeout: Duration,
    /// 单分片最大重试次数（首次尝试之外的额外次数）
    pub max_retries_per_chunk: u32,
    /// 重试前的等待时间
    pub retry_delay: Duration,
}

impl DownloadJob {
    pub fn new(source_url: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination_path: destination_path.into(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries_per_chunk: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// 下载任务状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// 等待中
    Pending,
    /// 下载中
    Downloading,
    /// 合并中
    Merging,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

/// 下载任务的运行时状态记录
///
/// 仅在进程内存活，不做持久化；一次任务对应一条记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    /// 任务ID
    pub id: String,
    /// 源文件地址
    pub source_url: String,
    /// 文件总大小（探测成功后填入）
    pub total_size: u64,
    /// 任务状态
    pub status: TaskStatus,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 结束时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl DownloadTask {
    pub fn new(source_url: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_url,
            total_size: 0,
            status: TaskStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 标记为下载中
    pub fn mark_downloading(&mut self, total_size: u64) {
        self.status = TaskStatus::Downloading;
        self.total_size = total_size;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为合并中
    pub fn mark_merging(&mut self) {
        self.status = TaskStatus::Merging;
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为已取消
    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }
}

/// 任务完成后的统计报告
#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    /// 文件总大小（字节）
    pub total_bytes: u64,
    /// 总耗时（秒）
    pub elapsed_seconds: f64,
    /// 平均速度 (bytes/s)
    pub average_bytes_per_sec: f64,
    /// 分片数量
    pub chunk_count: usize,
}
