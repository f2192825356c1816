//! OpenAI-compatible provider against a local fake endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ankiai::config::EmbeddingConfig;
use ankiai::embedding::ProviderError;
use ankiai::{EmbeddingGenerator, RagError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Clone)]
struct Fake {
    calls: Arc<AtomicUsize>,
    /// Number of leading calls answered with `fail_status`.
    failures: usize,
    fail_status: StatusCode,
    delay: Duration,
}

impl Fake {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failures: 0,
            fail_status: StatusCode::INTERNAL_SERVER_ERROR,
            delay: Duration::ZERO,
        }
    }
}

/// Answers with one 3-dimensional vector per input, `[i, len, 1]`, listed in
/// reverse index order.
async fn embeddings(State(fake): State<Fake>, Json(body): Json<Value>) -> impl IntoResponse {
    let call = fake.calls.fetch_add(1, Ordering::SeqCst);
    if !fake.delay.is_zero() {
        tokio::time::sleep(fake.delay).await;
    }
    if call < fake.failures {
        return (fake.fail_status, Json(json!({"error": {"message": "nope"}})));
    }

    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(i, text)| {
            let len = text.as_str().map(str::len).unwrap_or(0);
            json!({"object": "embedding", "index": i, "embedding": [i as f32, len as f32, 1.0]})
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({"object": "list", "data": data, "model": body["model"]})),
    )
}

async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .with_state(fake);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn config(base_url: String) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        dims: Some(3),
        batch_size: 2,
        max_retries: 2,
        retry_base_ms: 10,
        url: Some(base_url),
        api_key: Some("test-key".to_string()),
        ..EmbeddingConfig::default()
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_vectors_realigned_by_index() {
    let fake = Fake::new();
    let calls = fake.calls.clone();
    let generator = EmbeddingGenerator::from_config(&config(serve(fake).await)).unwrap();

    let vectors = generator
        .embed_texts(&texts(&["a", "bb", "ccc", "dddd", "eeeee"]))
        .await
        .unwrap();

    // Batches of two: [a, bb], [ccc, dddd], [eeeee].
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let lengths: Vec<f32> = vectors.iter().map(|v| v[1]).collect();
    assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(vectors[1], vec![1.0, 2.0, 1.0]);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let fake = Fake {
        failures: 2,
        ..Fake::new()
    };
    let calls = fake.calls.clone();
    let generator = EmbeddingGenerator::from_config(&config(serve(fake).await)).unwrap();

    let vector = generator.embed_query("leader election").await.unwrap();
    assert_eq!(vector, vec![0.0, 15.0, 1.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let fake = Fake {
        failures: usize::MAX,
        fail_status: StatusCode::TOO_MANY_REQUESTS,
        ..Fake::new()
    };
    let calls = fake.calls.clone();
    let generator = EmbeddingGenerator::from_config(&config(serve(fake).await)).unwrap();

    let err = generator.embed_query("query").await.unwrap_err();
    match err {
        RagError::EmbeddingService { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(source, ProviderError::Http { status: 429, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let fake = Fake {
        failures: usize::MAX,
        fail_status: StatusCode::BAD_REQUEST,
        ..Fake::new()
    };
    let calls = fake.calls.clone();
    let generator = EmbeddingGenerator::from_config(&config(serve(fake).await)).unwrap();

    let err = generator.embed_query("query").await.unwrap_err();
    assert!(matches!(
        err,
        RagError::EmbeddingService {
            attempts: 1,
            source: ProviderError::Http { status: 400, .. }
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let fake = Fake {
        delay: Duration::from_secs(2),
        ..Fake::new()
    };
    let cfg = EmbeddingConfig {
        max_retries: 0,
        ..config(serve(fake).await)
    };
    let generator = EmbeddingGenerator::from_config(&cfg)
        .unwrap()
        .with_timeout(Duration::from_millis(200));

    let err = generator.embed_query("query").await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
}
