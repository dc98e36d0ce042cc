use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use usi_spectrum_service::app::{Origin, SpectrumOutcome, SpectrumSource};
use usi_spectrum_service::domain::Usi;
use usi_spectrum_service::error::UsiError;
use usi_spectrum_service::server::{self, AppState, build_router};

/// Parses like the real pipeline, then answers from a fixed spectrum or a
/// scripted failure.
#[derive(Default)]
struct StubSource {
    failure: Mutex<Option<UsiError>>,
    requests: Mutex<Vec<String>>,
}

impl StubSource {
    fn failing(err: UsiError) -> Self {
        Self {
            failure: Mutex::new(Some(err)),
            requests: Mutex::default(),
        }
    }
}

impl SpectrumSource for StubSource {
    fn lookup(&self, usi: &str, _cancel: &CancellationToken) -> Result<SpectrumOutcome, UsiError> {
        self.requests.lock().unwrap().push(usi.to_string());
        let parsed: Usi = usi.parse()?;
        if let Some(err) = self.failure.lock().unwrap().take() {
            return Err(err);
        }
        Ok(SpectrumOutcome {
            canonical_usi: parsed.canonical(),
            origin: Origin::Extracted,
            spectrum: json!({
                "scan": parsed.scan_number(),
                "mzs": [110.07, 126.13],
                "intensities": [1520.5, 88.0]
            }),
        })
    }
}

fn router(source: Arc<StubSource>) -> axum::Router {
    build_router(AppState::new(source, 2))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const EXAMPLE: &str =
    "mzspec:PXD000966:CPTAC_CompRef_00_iTRAQ_05_2Feb12_Cougar_11-10-09.mzML:scan:12298";

#[tokio::test]
async fn spectrum_is_returned_as_json() {
    let source = Arc::new(StubSource::default());
    let response = router(source.clone())
        .oneshot(get(&format!("/spectrum?usi={EXAMPLE}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["scan"], "12298");
    assert_eq!(body["mzs"][0], 110.07);
    assert_eq!(*source.requests.lock().unwrap(), vec![EXAMPLE.to_string()]);
}

#[tokio::test]
async fn trailing_slash_route_is_served() {
    let source = Arc::new(StubSource::default());
    let response = router(source)
        .oneshot(get(&format!("/spectrum/?usi={EXAMPLE}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_usi_is_bad_request() {
    let source = Arc::new(StubSource::default());
    let response = router(source)
        .oneshot(get("/spectrum?usi=mzspec:PXD1:scan:5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].as_str().unwrap().contains("mzspec:PXD1:scan:5"));
}

#[tokio::test]
async fn usi_without_scan_is_not_found() {
    let source = Arc::new(StubSource::default());
    let response = router(source)
        .oneshot(get("/spectrum?usi=mzspec:PXD1:run:index:5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unresolved_file_is_not_found() {
    let source = Arc::new(StubSource::failing(UsiError::FileNotResolved {
        project: "PXD1".to_string(),
        collection: "missing".to_string(),
    }));
    let response = router(source)
        .oneshot(get("/spectrum?usi=mzspec:PXD1:missing:scan:5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn pipeline_failure_is_internal_error_with_detail() {
    let source = Arc::new(StubSource::failing(UsiError::ExtractionFailed(
        "scan 5 not in file".to_string(),
    )));
    let response = router(source)
        .oneshot(get("/spectrum?usi=mzspec:PXD1:run:scan:5"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].as_str().unwrap().contains("scan 5 not in file"));
}

#[tokio::test]
async fn missing_usi_parameter_is_bad_request() {
    let source = Arc::new(StubSource::default());
    let response = router(source.clone()).oneshot(get("/spectrum")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["detail"].is_string());
    assert!(source.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_alive() {
    let source = Arc::new(StubSource::default());
    let response = router(source).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"alive");
}

#[tokio::test]
async fn root_and_docs_describe_the_service() {
    for path in ["/", "/docs"] {
        let source = Arc::new(StubSource::default());
        let response = router(source).oneshot(get(path)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = extract_json(response.into_body()).await;
        assert_eq!(body["name"], "usi-spectrum-service");
        assert_eq!(body["routes"][0]["path"], "/spectrum");
    }
}

#[tokio::test]
async fn occupied_port_is_a_server_error() {
    let occupied = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let state = AppState::new(Arc::new(StubSource::default()), 1);

    let err = server::serve(state, port).await.unwrap_err();
    assert!(matches!(err, UsiError::Server(message) if message.contains(&port.to_string())));
}
