// Model Downloader Rust Library
// 模型文件并行分片下载核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 下载引擎模块
pub mod downloader;

// 导出常用类型
pub use config::{AppConfig, DownloadConfig, LogConfig};
pub use downloader::{
    Chunk, ChunkManager, ChunkState, DownloadEngine, DownloadError, DownloadJob, DownloadManager,
    DownloadReport, DownloadTask, ProgressSnapshot, ProgressTracker, TaskStatus,
};
