use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use httpexec::executer::HttpExecuter;
use httpexec::generator::{PayloadGenerator, RequestSettings, RequestTemplate};
use httpexec::operators::{MatchCondition, Matcher, RegexExtractor, StatusMatcher, WordMatcher};
use httpexec::output::MemoryWriter;
use httpexec::progress::ProgressCounter;
use httpexec::ratelimit::RateLimiter;
use httpexec::{ExecError, ExecuterOptions};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn templates(paths: &[&str]) -> Vec<RequestTemplate> {
    paths.iter().map(|p| RequestTemplate::get(*p)).collect()
}

fn word(name: &str, w: &str) -> Arc<dyn Matcher> {
    Arc::new(WordMatcher::new(name, vec![w.to_string()]))
}

fn status(name: &str, code: u16) -> Arc<dyn Matcher> {
    Arc::new(StatusMatcher::new(name, vec![code]))
}

fn build(
    generator: PayloadGenerator,
    options: ExecuterOptions,
) -> (HttpExecuter, Arc<MemoryWriter>, Arc<ProgressCounter>) {
    let writer = Arc::new(MemoryWriter::new());
    let progress = Arc::new(ProgressCounter::new());
    let executer = HttpExecuter::builder(Arc::new(generator))
        .options(options)
        .writer(writer.clone())
        .progress(progress.clone())
        .build()
        .unwrap();
    (executer, writer, progress)
}

/// 记录 `take` 调用次数的限速器
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

async fn mount_hit_on_second(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/r2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hit"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("miss"))
        .mount(server)
        .await;
}

/// 串行模式下首次匹配后停止
#[tokio::test]
async fn test_serial_stop_at_first_match() {
    let server = MockServer::start().await;
    mount_hit_on_second(&server).await;

    let generator = PayloadGenerator::new(
        templates(&["/r1", "/r2", "/r3", "/r4", "/r5"]),
        RequestSettings {
            matchers: vec![word("hit", "hit")],
            ..Default::default()
        },
    );
    let options = ExecuterOptions {
        stop_at_first_match: true,
        ..Default::default()
    };
    let (executer, writer, progress) = build(generator, options);

    let result = executer.execute(&server.uri()).await;

    assert!(result.got_results);
    assert!(result.done);
    assert!(result.matches.contains("hit"));
    let received = server.received_requests().await.unwrap();
    assert!(received.len() <= 2);
    assert_eq!(writer.len(), 1);
    assert!(progress.dropped() > 0);
}

/// 并发模式不会提前结束
#[tokio::test]
async fn test_parallel_does_not_stop_early() {
    let server = MockServer::start().await;
    mount_hit_on_second(&server).await;

    let generator = PayloadGenerator::new(
        templates(&["/r1", "/r2", "/r3", "/r4", "/r5"]),
        RequestSettings {
            threads: 2,
            matchers: vec![word("hit", "hit")],
            ..Default::default()
        },
    );
    let options = ExecuterOptions {
        stop_at_first_match: true,
        ..Default::default()
    };
    let (executer, _writer, _progress) = build(generator, options);

    let result = executer.execute(&server.uri()).await;

    assert!(result.got_results);
    assert!(!result.done);
    assert_eq!(server.received_requests().await.unwrap().len(), 5);
}

/// 同一目标正在执行时，第二个调用直接返回空结果
#[tokio::test]
async fn test_concurrent_execute_same_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/a", "/b"]),
        RequestSettings {
            matchers: vec![word("ok", "ok")],
            ..Default::default()
        },
    );
    let (executer, _writer, _progress) = build(generator, ExecuterOptions::default());
    let target = server.uri();

    let (first, second) = tokio::join!(executer.execute(&target), executer.execute(&target));

    assert!(first.got_results);
    assert!(second.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    // 执行结束后状态被销毁，可以再次执行
    let third = executer.execute(&target).await;
    assert!(third.got_results);
}

#[tokio::test]
async fn test_or_condition_writes_each_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            matchers_condition: MatchCondition::Or,
            matchers: vec![status("a", 404), status("b", 200), word("c", "hello")],
            ..Default::default()
        },
    );
    let (executer, writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert!(result.got_results);
    let matches: Vec<_> = result.matches.iter().map(String::as_str).collect();
    assert_eq!(matches, vec!["b", "c"]);
    let events = writer.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].matcher.as_deref(), Some("b"));
    assert_eq!(events[1].matcher.as_deref(), Some("c"));
}

#[tokio::test]
async fn test_and_condition_failure_skips_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            matchers_condition: MatchCondition::And,
            matchers: vec![status("a", 200), status("b", 404), word("c", "hello")],
            extractors: vec![Arc::new(
                RegexExtractor::new("greeting", &["(hello)"]).unwrap().group(1),
            )],
            ..Default::default()
        },
    );
    let (executer, writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert!(!result.got_results);
    assert!(result.matches.is_empty());
    assert!(result.extractions.is_empty());
    assert!(writer.is_empty());
}

#[tokio::test]
async fn test_and_condition_success_writes_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello world"))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            matchers_condition: MatchCondition::And,
            matchers: vec![status("a", 200), word("c", "hello")],
            ..Default::default()
        },
    );
    let (executer, writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert!(result.got_results);
    // AND 模式不记录单个匹配器名
    assert!(result.matches.is_empty());
    let events = writer.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].matcher.is_none());
}

/// 提取的第一个值进入动态值，所有值都进入 extractions
#[tokio::test]
async fn test_extractor_first_write_wins() {
    let server = MockServer::start().await;
    Mock::given(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token=x"))
        .mount(&server)
        .await;
    Mock::given(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("token=y"))
        .mount(&server)
        .await;
    Mock::given(path("/use"))
        .and(query_param("t", "x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("used"))
        .expect(1)
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/a", "/b", "/use?t={{token}}"]),
        RequestSettings {
            extractors: vec![Arc::new(
                RegexExtractor::new("token", &["token=([a-z]+)"]).unwrap().group(1),
            )],
            ..Default::default()
        },
    );
    let (executer, writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert!(result.error.is_none());
    assert_eq!(result.extractions["token"], vec!["x", "y"]);
    assert!(result.got_results);
    assert_eq!(writer.len(), 2);
    server.verify().await;
}

#[tokio::test]
async fn test_internal_extractor_hidden_from_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("csrf=abc"))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            extractors: vec![Arc::new(
                RegexExtractor::new("csrf", &["csrf=([a-z]+)"])
                    .unwrap()
                    .group(1)
                    .internal(true),
            )],
            ..Default::default()
        },
    );
    let (executer, writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert_eq!(result.extractions["csrf"], vec!["abc"]);
    assert!(!result.got_results);
    assert!(writer.is_empty());
}

#[tokio::test]
async fn test_custom_headers_applied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-bug-bounty", "hacker1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        vec![RequestTemplate::get("/").with_header("X-Bug-Bounty", "overridden")],
        RequestSettings {
            matchers: vec![status("ok", 200)],
            ..Default::default()
        },
    );
    let options = ExecuterOptions {
        custom_headers: vec!["X-Bug-Bounty: hacker1".to_string()],
        ..Default::default()
    };
    let (executer, _writer, _progress) = build(generator, options);

    let result = executer.execute(&server.uri()).await;
    assert!(result.got_results);
}

#[tokio::test]
async fn test_gzip_body_decompressed_before_matching() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"compressed secret").unwrap();
    let gz = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(gz),
        )
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            matchers: vec![word("secret", "secret")],
            ..Default::default()
        },
    );
    let (executer, _writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;
    assert!(result.error.is_none());
    assert!(result.matches.contains("secret"));
}

#[tokio::test]
async fn test_payloads_recorded_in_meta() {
    let server = MockServer::start().await;
    Mock::given(path("/login"))
        .and(query_param("user", "root"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/login?user={{user}}"]),
        RequestSettings {
            matchers: vec![word("welcome", "welcome")],
            ..Default::default()
        },
    )
    .with_payloads(
        [(
            "user".to_string(),
            vec!["admin".to_string(), "root".to_string(), "guest".to_string()],
        )]
        .into_iter()
        .collect(),
        Default::default(),
    );
    let (executer, _writer, progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    assert!(result.got_results);
    assert_eq!(result.meta["user"], "root");
    assert_eq!(progress.completed(), 3);
}

#[tokio::test]
async fn test_empty_target_is_error() {
    let generator = PayloadGenerator::new(templates(&["/"]), RequestSettings::default());
    let (executer, _writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute("  ").await;
    assert!(matches!(result.error, Some(ExecError::InvalidTarget(_))));
    assert!(!result.got_results);
}

#[tokio::test]
async fn test_transport_error_recorded() {
    // 绑定后立即释放，得到一个没有监听者的端口
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let target = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let generator = PayloadGenerator::new(templates(&["/a", "/b"]), RequestSettings::default());
    let options = ExecuterOptions {
        retries: 0,
        ..Default::default()
    };
    let (executer, _writer, progress) = build(generator, options);

    let result = executer.execute(&target).await;

    let error = result.error.expect("error recorded");
    assert!(error.to_string().starts_with("could not handle http request"));
    assert_eq!(result.error_count, 2);
    assert!(!result.got_results);
    assert!(progress.dropped() > 0);
}

#[tokio::test]
async fn test_build_error_recorded() {
    let server = MockServer::start().await;
    let generator = PayloadGenerator::new(
        vec![RequestTemplate::get("/").with_method("NOT VALID")],
        RequestSettings::default(),
    );
    let (executer, _writer, _progress) = build(generator, ExecuterOptions::default());

    let result = executer.execute(&server.uri()).await;

    let error = result.error.expect("error recorded");
    assert!(matches!(error.root(), ExecError::Build(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

async fn takes_for(settings: RequestSettings) -> (usize, usize) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let limiter = Arc::new(CountingLimiter::default());
    let generator = PayloadGenerator::new(templates(&["/a", "/b", "/c", "/d"]), settings);
    let executer = HttpExecuter::builder(Arc::new(generator))
        .writer(Arc::new(MemoryWriter::new()))
        .rate_limiter(limiter.clone())
        .build()
        .unwrap();

    let result = executer.execute(&server.uri()).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);

    let received = server.received_requests().await.unwrap().len();
    (limiter.takes.load(Ordering::SeqCst), received)
}

#[tokio::test]
async fn test_serial_requests_are_rate_limited() {
    let (takes, received) = takes_for(RequestSettings::default()).await;
    assert_eq!(received, 4);
    assert_eq!(takes, received);
}

#[tokio::test]
async fn test_parallel_requests_are_rate_limited() {
    let (takes, received) = takes_for(RequestSettings {
        threads: 3,
        ..Default::default()
    })
    .await;
    assert_eq!(received, 4);
    assert_eq!(takes, received);
}

/// timeout = 0 不限时，慢响应也能完成
#[tokio::test]
async fn test_zero_timeout_disables_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let generator = PayloadGenerator::new(
        templates(&["/"]),
        RequestSettings {
            matchers: vec![word("slow", "slow")],
            ..Default::default()
        },
    );
    let options = ExecuterOptions {
        timeout: 0,
        retries: 0,
        ..Default::default()
    };
    let (executer, writer, _progress) = build(generator, options);

    let result = executer.execute(&server.uri()).await;
    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert!(result.got_results);
    assert_eq!(writer.len(), 1);
}
