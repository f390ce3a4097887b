use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use httpexec::ExecuterOptions;
use httpexec::executer::HttpExecuter;
use httpexec::generator::{PayloadGenerator, RequestSettings, RequestTemplate};
use httpexec::operators::{RegexExtractor, StatusMatcher};
use httpexec::output::MemoryWriter;
use httpexec::ratelimit::RateLimiter;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// 读取一个完整请求: 请求头 + Content-Length 指定的 body
async fn read_request<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Option<(String, Vec<u8>)> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        head.push_str(&line);
        if line == "\r\n" {
            break;
        }
    }

    let content_length = head
        .lines()
        .find_map(|l| {
            l.to_ascii_lowercase()
                .strip_prefix("content-length:")
                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
        })
        .unwrap_or(0);
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    Some((head, body))
}

#[tokio::test]
async fn test_raw_request_bytes_on_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (captured_tx, captured_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let captured = read_request(&mut reader).await.unwrap();
        write_half
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await
            .unwrap();
        let _ = captured_tx.send(captured);
    });

    let raw = "POST /submit HTTP/1.1\nX-Test: v\n\na=1\nb=2\r\nc=3";
    let generator = PayloadGenerator::new(
        vec![RequestTemplate::raw(raw).unsafe_raw(true)],
        RequestSettings {
            matchers: vec![Arc::new(StatusMatcher::new("ok", vec![200]))],
            ..Default::default()
        },
    );
    let executer = HttpExecuter::builder(Arc::new(generator))
        .writer(Arc::new(MemoryWriter::new()))
        .build()
        .unwrap();

    let result = executer.execute(&format!("http://{}", addr)).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert!(result.got_results);

    let (head, body) = captured_rx.await.unwrap();
    assert!(head.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(head.contains(&format!("Host: {}\r\n", addr)));
    assert!(head.contains("X-Test: v\r\n"));
    assert!(head.contains("Content-Length: 13\r\n"));
    // 裸 LF 变为 CRLF，已有的 CRLF 不变
    assert_eq!(body, b"a=1\r\nb=2\r\nc=3");
}

#[tokio::test]
async fn test_raw_request_without_auto_headers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (captured_tx, captured_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let captured = read_request(&mut reader).await.unwrap();
        write_half
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        let _ = captured_tx.send(captured);
    });

    let mut template = RequestTemplate::raw("GET /x HTTP/1.1\nx-lower: keep-case\n\n").unsafe_raw(true);
    template.auto_content_length = false;
    template.auto_host_header = false;
    let generator = PayloadGenerator::new(vec![template], RequestSettings::default());
    let executer = HttpExecuter::builder(Arc::new(generator))
        .writer(Arc::new(MemoryWriter::new()))
        .build()
        .unwrap();

    let result = executer.execute(&format!("http://{}", addr)).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let (head, _) = captured_rx.await.unwrap();
    assert_eq!(head, "GET /x HTTP/1.1\r\nx-lower: keep-case\r\n\r\n");
}

/// 按顺序回写请求路径的 pipelining 服务端
async fn echo_path_server() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                while let Some((head, _)) = read_request(&mut reader).await {
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        path.len(),
                        path
                    );
                    if write_half.write_all(response.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (format!("http://{}", addr), connections)
}

#[tokio::test]
async fn test_pipelined_execution() {
    let (target, connections) = echo_path_server().await;

    let generator = PayloadGenerator::new(
        ["/p1", "/p2", "/p3", "/p4", "/p5"]
            .iter()
            .map(|p| RequestTemplate::get(*p))
            .collect(),
        RequestSettings {
            pipeline: true,
            pipeline_max_workers: 2,
            extractors: vec![Arc::new(
                RegexExtractor::new("page", &[r"^/p(\d)$"]).unwrap().group(1),
            )],
            ..Default::default()
        },
    );
    let writer = Arc::new(MemoryWriter::new());
    let executer = HttpExecuter::builder(Arc::new(generator))
        .options(ExecuterOptions::default())
        .writer(writer.clone())
        .build()
        .unwrap();

    let result = executer.execute(&target).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let mut pages = result.extractions["page"].clone();
    pages.sort();
    assert_eq!(pages, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(writer.len(), 5);
    // 连接数不超过 pipeline_max_workers
    assert!(connections.load(std::sync::atomic::Ordering::SeqCst) <= 2);
}

#[derive(Default)]
struct CountingLimiter {
    takes: AtomicUsize,
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    async fn take(&self, _target: &str) {
        self.takes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_pipelined_requests_bypass_rate_limiter() {
    let (target, _connections) = echo_path_server().await;

    let generator = PayloadGenerator::new(
        ["/p1", "/p2", "/p3"]
            .iter()
            .map(|p| RequestTemplate::get(*p))
            .collect(),
        RequestSettings {
            pipeline: true,
            pipeline_max_workers: 2,
            matchers: vec![Arc::new(StatusMatcher::new("ok", vec![200]))],
            ..Default::default()
        },
    );
    let limiter = Arc::new(CountingLimiter::default());
    let writer = Arc::new(MemoryWriter::new());
    let executer = HttpExecuter::builder(Arc::new(generator))
        .writer(writer.clone())
        .rate_limiter(limiter.clone())
        .build()
        .unwrap();

    let result = executer.execute(&target).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert_eq!(writer.len(), 3);
    assert_eq!(limiter.takes.load(Ordering::SeqCst), 0);
}

/// 每条连接只应答一个请求并带 `Connection: close`
async fn one_shot_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                if let Some((head, _)) = read_request(&mut reader).await {
                    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                        path.len(),
                        path
                    );
                    let _ = write_half.write_all(response.as_bytes()).await;
                    let _ = write_half.shutdown().await;
                }
            });
        }
    });

    (format!("http://{}", addr), connections)
}

#[tokio::test]
async fn test_pipeline_reconnects_after_connection_close() {
    let (target, connections) = one_shot_server().await;

    let generator = PayloadGenerator::new(
        ["/p1", "/p2", "/p3"]
            .iter()
            .map(|p| RequestTemplate::get(*p))
            .collect(),
        RequestSettings {
            pipeline: true,
            pipeline_max_workers: 1,
            extractors: vec![Arc::new(
                RegexExtractor::new("page", &[r"^/p(\d)$"]).unwrap().group(1),
            )],
            ..Default::default()
        },
    );
    let executer = HttpExecuter::builder(Arc::new(generator))
        .writer(Arc::new(MemoryWriter::new()))
        .build()
        .unwrap();

    let result = executer.execute(&target).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let mut pages = result.extractions["page"].clone();
    pages.sort();
    assert_eq!(pages, vec!["1", "2", "3"]);
    assert_eq!(connections.load(Ordering::SeqCst), 3);
}
