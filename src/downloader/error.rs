use thiserror::Error;

/// 下载任务的终态错误
///
/// 分片级的瞬态失败（单次请求超时、非 2xx 状态码等）在引擎内部通过重试消化，
/// 不会以这个类型暴露给调用方；只有重试耗尽后才汇总为 `IncompleteDownload`。
#[derive(Debug, Error)]
pub enum DownloadError {
    /// HEAD 响应缺少可用的 Content-Length，或其值为 0
    #[error("无法确定文件大小")]
    SizeUnknown,

    /// 分片计划参数非法
    #[error("无效的分片计划: total_size={total_size}, chunk_size={chunk_size}")]
    InvalidPlan { total_size: u64, chunk_size: u64 },

    /// 存在重试耗尽的分片，合并被中止
    #[error("下载不完整: 已下载 {downloaded_bytes}/{expected_bytes} 字节, 缺失分片 {missing_indices:?}")]
    IncompleteDownload {
        missing_indices: Vec<usize>,
        downloaded_bytes: u64,
        expected_bytes: u64,
    },

    /// 合并后的文件长度与探测到的总大小不符
    #[error("合并文件长度校验失败: 期望 {expected} 字节, 实际 {actual} 字节")]
    MergeIntegrity { expected: u64, actual: u64 },

    /// 合并阶段的文件系统错误
    #[error("合并文件写入失败: {0}")]
    MergeIo(#[from] std::io::Error),

    /// 调用方主动取消，区别于失败，不携带重试语义
    #[error("任务已被取消")]
    Cancelled,

    /// 同一个任务实例被重复启动
    #[error("任务已在运行中")]
    AlreadyRunning,

    /// 探测阶段的网络传输错误（分片级网络错误走内部重试，不在此列）
    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),
}

/// 单次分片请求的失败原因
///
/// 全部视为瞬态，由 worker 的重试循环处理。
#[derive(Debug, Error)]
pub(crate) enum ChunkAttemptError {
    #[error("HTTP 状态码异常: {0}")]
    BadStatus(reqwest::StatusCode),

    #[error("响应体长度不符: 期望 {expected} 字节, 实际 {actual} 字节")]
    BadLength { expected: u64, actual: u64 },

    #[error("请求失败: {0}")]
    Request(#[from] reqwest::Error),
}
