use reqwest::{header, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::DownloadError;

/// 通过 HEAD 请求探测文件总大小
///
/// Content-Length 缺失、无法解析或为 0 时返回 `SizeUnknown`，
/// 此时无法生成分片计划，整个任务终止。
pub async fn probe_size(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<u64, DownloadError> {
    debug!("探测文件大小: {}", url);

    let resp = client.head(url).timeout(timeout).send().await?;

    if !resp.status().is_success() {
        warn!("HEAD 请求状态异常: {} ({})", resp.status(), url);
        return Err(DownloadError::SizeUnknown);
    }

    let size = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);

    if size == 0 {
        warn!("HEAD 响应缺少有效的 Content-Length: {}", url);
        return Err(DownloadError::SizeUnknown);
    }

    info!("探测到文件大小: {} bytes", size);
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testutil::{StubOptions, StubServer};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_size_success() {
        let server = StubServer::start(vec![7u8; 4096], StubOptions::default()).await;
        let client = Client::new();
        let size = probe_size(&client, &server.url(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(size, 4096);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_size_missing_length() {
        let opts = StubOptions {
            head_no_length: true,
            ..Default::default()
        };
        let server = StubServer::start(vec![7u8; 4096], opts).await;
        let client = Client::new();
        let err = probe_size(&client, &server.url(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::SizeUnknown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_size_head_error_status() {
        let opts = StubOptions {
            head_status: Some(503),
            ..Default::default()
        };
        let server = StubServer::start(vec![7u8; 4096], opts).await;
        let client = Client::new();
        let err = probe_size(&client, &server.url(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::SizeUnknown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probe_size_connection_refused() {
        let client = Client::new();
        // 未监听的端口，连接直接失败
        let err = probe_size(
            &client,
            "http://127.0.0.1:9/model.bin",
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DownloadError::Http(_)));
    }
}
