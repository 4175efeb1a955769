use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::chunk::ChunkManager;
use super::error::DownloadError;

/// 把全部已完成分片按索引升序合并写入目标文件
///
/// 写入前复查仓库状态：存在任何未完成分片时不碰文件系统，直接返回
/// `IncompleteDownload` 并列出缺失索引。写入后按实际文件长度做最终校验。
pub async fn merge_chunks(
    store: &ChunkManager,
    destination: &Path,
) -> Result<u64, DownloadError> {
    let missing = store.missing_indices();
    if !missing.is_empty() {
        warn!(
            "合并中止: {} 个分片未完成 {:?}",
            missing.len(),
            missing
        );
        return Err(DownloadError::IncompleteDownload {
            missing_indices: missing,
            downloaded_bytes: store.downloaded_bytes(),
            expected_bytes: store.total_size(),
        });
    }

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    info!(
        "开始合并 {} 个分片到 {}",
        store.chunk_count(),
        destination.display()
    );

    let mut file = File::create(destination).await?;
    for chunk in store.chunks() {
        let Some(bytes) = chunk.bytes.as_ref() else {
            // missing_indices 复查之后不应出现，出现即视为下载不完整
            return Err(DownloadError::IncompleteDownload {
                missing_indices: vec![chunk.index],
                downloaded_bytes: store.downloaded_bytes(),
                expected_bytes: store.total_size(),
            });
        };
        file.write_all(bytes).await?;
    }
    file.flush().await?;
    drop(file);

    let actual = fs::metadata(destination).await?.len();
    if actual != store.total_size() {
        warn!(
            "合并结果长度不符: 期望 {} 实际 {}",
            store.total_size(),
            actual
        );
        return Err(DownloadError::MergeIntegrity {
            expected: store.total_size(),
            actual,
        });
    }

    info!("合并完成: {} ({} bytes)", destination.display(), actual);
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn filled_store(total: u64, chunk_size: u64, pattern: impl Fn(u64) -> u8) -> ChunkManager {
        let mut store = ChunkManager::plan(total, chunk_size).unwrap();
        let ranges: Vec<(usize, u64, u64)> = store
            .chunks()
            .iter()
            .map(|c| (c.index, c.start, c.end))
            .collect();
        for (index, start, end) in ranges {
            let data: Vec<u8> = (start..=end).map(&pattern).collect();
            store.complete(index, Bytes::from(data));
        }
        store
    }

    #[tokio::test]
    async fn test_merge_writes_bytes_in_index_order() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.bin");

        let mut store = ChunkManager::plan(1000, 300).unwrap();
        // 乱序完成，合并结果仍按索引顺序
        for index in [3, 0, 2, 1] {
            let chunk = store.chunk(index).clone();
            let data: Vec<u8> = (chunk.start..=chunk.end).map(|b| (b % 256) as u8).collect();
            store.complete(index, Bytes::from(data));
        }

        let written = merge_chunks(&store, &dest).await.unwrap();
        assert_eq!(written, 1000);

        let merged = std::fs::read(&dest).unwrap();
        let expected: Vec<u8> = (0u64..1000).map(|b| (b % 256) as u8).collect();
        assert_eq!(merged, expected);
    }

    #[tokio::test]
    async fn test_merge_refuses_incomplete_store() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.bin");

        let mut store = ChunkManager::plan(1000, 300).unwrap();
        store.complete(0, Bytes::from(vec![1u8; 300]));
        store.complete(1, Bytes::from(vec![2u8; 300]));
        store.mark_failed(2);

        let err = merge_chunks(&store, &dest).await.unwrap_err();
        match err {
            DownloadError::IncompleteDownload {
                missing_indices,
                downloaded_bytes,
                expected_bytes,
            } => {
                assert_eq!(missing_indices, vec![2, 3]);
                assert_eq!(downloaded_bytes, 600);
                assert_eq!(expected_bytes, 1000);
            }
            other => panic!("意外的错误类型: {:?}", other),
        }
        // 合并中止时不应创建目标文件
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_merge_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("deep").join("model.bin");

        let store = filled_store(256, 64, |b| (b % 256) as u8);
        merge_chunks(&store, &dest).await.unwrap();
        assert!(dest.exists());
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 256);
    }

    #[tokio::test]
    async fn test_merge_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.bin");
        std::fs::write(&dest, vec![0xFFu8; 9999]).unwrap();

        let store = filled_store(512, 128, |_| 7u8);
        let written = merge_chunks(&store, &dest).await.unwrap();
        assert_eq!(written, 512);
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 512]);
    }
}
