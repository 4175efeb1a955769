//! 测试用的本地 HTTP 文件服务器
//!
//! 支持 HEAD 探测与 Range 请求，可注入失败、截断、延迟等故障，
//! 并记录每个分片的请求次数和并发高水位。

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct StubOptions {
    /// 起始字节 -> 先返回 500 的次数
    pub fail_times: HashMap<u64, u32>,
    /// 永远返回 500 的分片起始字节
    pub always_fail: Vec<u64>,
    /// 响应体只返回前一半的分片起始字节（短读场景）
    pub truncate: Vec<u64>,
    /// 每个 Range 响应前的延迟
    pub delay: Option<Duration>,
    /// HEAD 响应省略 Content-Length
    pub head_no_length: bool,
    /// HEAD 响应改用指定状态码
    pub head_status: Option<u16>,
}

struct StubState {
    data: Vec<u8>,
    opts: StubOptions,
    fail_remaining: Mutex<HashMap<u64, u32>>,
    attempts: Mutex<HashMap<u64, u32>>,
    inflight: AtomicUsize,
    max_inflight: AtomicUsize,
}

pub(crate) struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl StubServer {
    pub async fn start(data: Vec<u8>, opts: StubOptions) -> Self {
        let fail_remaining = Mutex::new(opts.fail_times.clone());
        let state = Arc::new(StubState {
            data,
            opts,
            fail_remaining,
            attempts: Mutex::new(HashMap::new()),
            inflight: AtomicUsize::new(0),
            max_inflight: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/model.bin", get(serve_file))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/model.bin", self.addr)
    }

    /// 指定起始字节的 Range 请求总次数
    pub fn attempts(&self, start: u64) -> u32 {
        self.state
            .attempts
            .lock()
            .unwrap()
            .get(&start)
            .copied()
            .unwrap_or(0)
    }

    /// 服务端观察到的 Range 请求并发高水位
    pub fn max_inflight(&self) -> usize {
        self.state.max_inflight.load(Ordering::SeqCst)
    }
}

async fn serve_file(
    State(state): State<Arc<StubState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if method == Method::HEAD {
        let status = state
            .opts
            .head_status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);
        if !state.opts.head_no_length {
            builder = builder.header(header::CONTENT_LENGTH, state.data.len());
        }
        return builder.body(Body::empty()).unwrap();
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range);

    let Some((start, end)) = range else {
        return Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(state.data.clone()))
            .unwrap();
    };

    *state.attempts.lock().unwrap().entry(start).or_insert(0) += 1;

    if state.opts.always_fail.contains(&start) {
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .unwrap();
    }

    {
        let mut remaining = state.fail_remaining.lock().unwrap();
        if let Some(n) = remaining.get_mut(&start) {
            if *n > 0 {
                *n -= 1;
                return Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::empty())
                    .unwrap();
            }
        }
    }

    let current = state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_inflight.fetch_max(current, Ordering::SeqCst);

    if let Some(delay) = state.opts.delay {
        tokio::time::sleep(delay).await;
    }

    let end = (end as usize).min(state.data.len().saturating_sub(1));
    let mut body = state.data[start as usize..=end].to_vec();
    if state.opts.truncate.contains(&start) {
        body.truncate(body.len() / 2);
    }

    state.inflight.fetch_sub(1, Ordering::SeqCst);

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .body(Body::from(body))
        .unwrap()
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let rest = value.strip_prefix("bytes=")?;
    let (start, end) = rest.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
