use bytes::Bytes;
use tracing::info;

use super::error::DownloadError;

/// 分片状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// 等待下载
    Pending,
    /// 下载中
    InFlight,
    /// 已完成（终态）
    Completed,
    /// 重试耗尽（终态）
    Failed,
}

/// 分片信息
///
/// `start`/`end` 为闭区间字节范围，`index` 决定合并顺序。
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 分片索引
    pub index: usize,
    /// 起始字节（含）
    pub start: u64,
    /// 结束字节（含）
    pub end: u64,
    /// 分片状态
    pub state: ChunkState,
    /// 已重试次数
    pub retry_count: u32,
    /// 下载完成的数据，仅在 Completed 后存在
    pub bytes: Option<Bytes>,
}

impl Chunk {
    fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            state: ChunkState::Pending,
            retry_count: 0,
            bytes: None,
        }
    }

    /// 分片大小（字节）
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// 分片管理器
///
/// 既是分片计划的产物，也是下载过程中的共享仓库：每个分片槽位只由
/// 持有该索引的 worker 写入，进度跟踪只读扫描。
#[derive(Debug)]
pub struct ChunkManager {
    /// 所有分片，按索引升序
    chunks: Vec<Chunk>,
    /// 文件总大小
    total_size: u64,
}

impl ChunkManager {
    /// 把 `[0, total_size)` 切分为连续不重叠的分片
    ///
    /// 最后一个分片在 `total_size` 不是 `chunk_size` 整数倍时较短。
    pub fn plan(total_size: u64, chunk_size: u64) -> Result<Self, DownloadError> {
        if total_size == 0 || chunk_size == 0 {
            return Err(DownloadError::InvalidPlan {
                total_size,
                chunk_size,
            });
        }

        let mut chunks = Vec::new();
        let mut offset = 0u64;
        while offset < total_size {
            let end = std::cmp::min(offset + chunk_size - 1, total_size - 1);
            chunks.push(Chunk::new(chunks.len(), offset, end));
            offset = end + 1;
        }

        info!(
            "创建分片计划: 文件大小={} bytes, 分片数量={}",
            total_size,
            chunks.len()
        );

        Ok(Self { chunks, total_size })
    }

    /// 文件总大小
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// 分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 获取所有分片
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// 获取单个分片
    pub fn chunk(&self, index: usize) -> &Chunk {
        &self.chunks[index]
    }

    /// 标记分片开始下载
    pub fn mark_in_flight(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.state = ChunkState::InFlight;
        }
    }

    /// 写入分片数据并标记完成
    pub fn complete(&mut self, index: usize, bytes: Bytes) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.bytes = Some(bytes);
            chunk.state = ChunkState::Completed;
        }
    }

    /// 记录一次重试，返回累计重试次数
    pub fn record_retry(&mut self, index: usize) -> u32 {
        match self.chunks.get_mut(index) {
            Some(chunk) => {
                chunk.retry_count += 1;
                chunk.retry_count
            }
            None => 0,
        }
    }

    /// 标记分片为永久失败
    pub fn mark_failed(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.state = ChunkState::Failed;
            chunk.bytes = None;
        }
    }

    /// 已下载的字节数（只统计 Completed 分片，单调不减）
    pub fn downloaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .filter_map(|c| c.bytes.as_ref())
            .map(|b| b.len() as u64)
            .sum()
    }

    /// 已完成的分片数量
    pub fn completed_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::Completed)
            .count()
    }

    /// 当前下载中的分片数量
    pub fn in_flight_count(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.state == ChunkState::InFlight)
            .count()
    }

    /// 是否全部完成
    pub fn is_completed(&self) -> bool {
        self.chunks.iter().all(|c| c.state == ChunkState::Completed)
    }

    /// 是否存在永久失败的分片
    pub fn has_failed(&self) -> bool {
        self.chunks.iter().any(|c| c.state == ChunkState::Failed)
    }

    /// 未完成分片的索引（合并前检查用）
    pub fn missing_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.state != ChunkState::Completed)
            .map(|c| c.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plan_exact_multiple() {
        let manager = ChunkManager::plan(10_000_000, 2_000_000).unwrap();
        assert_eq!(manager.chunk_count(), 5);
        for chunk in manager.chunks() {
            assert_eq!(chunk.size(), 2_000_000);
        }
        assert_eq!(manager.chunk(0).start, 0);
        assert_eq!(manager.chunk(0).end, 1_999_999);
        assert_eq!(manager.chunk(4).end, 9_999_999);
    }

    #[test]
    fn test_plan_one_byte_tail() {
        let manager = ChunkManager::plan(5_000_001, 2_000_000).unwrap();
        assert_eq!(manager.chunk_count(), 3);
        assert_eq!(manager.chunk(0).size(), 2_000_000);
        assert_eq!(manager.chunk(1).size(), 2_000_000);
        assert_eq!(manager.chunk(2).size(), 1);
        assert_eq!(manager.chunk(2).start, 5_000_000);
        assert_eq!(manager.chunk(2).end, 5_000_000);
    }

    #[test]
    fn test_plan_single_chunk() {
        let manager = ChunkManager::plan(100, 2_000_000).unwrap();
        assert_eq!(manager.chunk_count(), 1);
        assert_eq!(manager.chunk(0).start, 0);
        assert_eq!(manager.chunk(0).end, 99);
    }

    #[test]
    fn test_plan_invalid_input() {
        assert!(matches!(
            ChunkManager::plan(0, 1024),
            Err(DownloadError::InvalidPlan { .. })
        ));
        assert!(matches!(
            ChunkManager::plan(1024, 0),
            Err(DownloadError::InvalidPlan { .. })
        ));
    }

    #[test]
    fn test_state_accounting() {
        let mut manager = ChunkManager::plan(300, 100).unwrap();
        assert_eq!(manager.downloaded_bytes(), 0);
        assert!(!manager.is_completed());

        manager.mark_in_flight(0);
        assert_eq!(manager.in_flight_count(), 1);

        manager.complete(0, Bytes::from(vec![0u8; 100]));
        assert_eq!(manager.in_flight_count(), 0);
        assert_eq!(manager.completed_count(), 1);
        assert_eq!(manager.downloaded_bytes(), 100);

        manager.complete(2, Bytes::from(vec![0u8; 100]));
        assert_eq!(manager.downloaded_bytes(), 200);
        assert_eq!(manager.missing_indices(), vec![1]);
        assert!(!manager.is_completed());

        manager.complete(1, Bytes::from(vec![0u8; 100]));
        assert!(manager.is_completed());
        assert!(manager.missing_indices().is_empty());
    }

    #[test]
    fn test_failed_chunk_drops_bytes() {
        let mut manager = ChunkManager::plan(200, 100).unwrap();
        manager.record_retry(1);
        assert_eq!(manager.record_retry(1), 2);
        manager.mark_failed(1);
        assert!(manager.has_failed());
        assert!(manager.chunk(1).bytes.is_none());
        assert_eq!(manager.missing_indices(), vec![1]);
    }

    proptest! {
        /// 任意输入下分片恰好覆盖 [0, total) 一次：升序、连续、不重叠
        #[test]
        fn test_partition_property(total in 1u64..20_000_000, chunk in 1024u64..5_000_000) {
            let manager = ChunkManager::plan(total, chunk).unwrap();
            let chunks = manager.chunks();

            prop_assert_eq!(chunks[0].start, 0);
            prop_assert_eq!(chunks[chunks.len() - 1].end, total - 1);
            for pair in chunks.windows(2) {
                prop_assert_eq!(pair[0].end + 1, pair[1].start);
                prop_assert!(pair[0].index < pair[1].index);
            }
            let covered: u64 = chunks.iter().map(|c| c.size()).sum();
            prop_assert_eq!(covered, total);
        }
    }
}
