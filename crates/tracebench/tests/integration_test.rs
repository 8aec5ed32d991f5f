//! Integration tests for tracebench

use std::fs;
use std::io::{Cursor, Write};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use opentelemetry::trace::{SpanId, TracerProvider};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use tempfile::TempDir;
use tower::ServiceExt;
use tracebench::config::{ConfigPath, ExporterKind};
use tracebench::ingress::{self, Row};
use tracebench::{Config, ConfigError, UploadResponse};
use tracebench_core::{AdmissionPolicy, Pipeline, PipelineOptions, TopologyConfig};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const PIPELINE: &str = r#"
pipeline:
  Type: Standard
  Latency: 10
  FailRate: 0.01
  StageCount: 4
"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

mod config_tests {
    use super::*;

    #[test]
    fn test_single_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.yaml", PIPELINE);

        let config = Config::from_paths(&[ConfigPath::File(path)]).unwrap();
        assert_eq!(config.pipeline.stage_count(), 4);
        assert_eq!(config.pipeline.latency_ms(), 10);
        assert_eq!(config.ingress.address, "0.0.0.0:3000");
        assert_eq!(config.tracing.exporter, ExporterKind::Otlp);
    }

    #[test]
    fn test_later_file_overrides_section() {
        let dir = TempDir::new().unwrap();
        let base = write(&dir, "base.yaml", PIPELINE);
        let overlay = write(
            &dir,
            "overlay.yml",
            r#"
pipeline:
  type: standard
  latency: 0
  failrate: 0
  stagecount: 2
mailbox:
  capacity: 8
  admission: reject
tracing:
  exporter: none
"#,
        );

        let config =
            Config::from_paths(&[ConfigPath::File(base), ConfigPath::File(overlay)]).unwrap();
        assert_eq!(config.pipeline.stage_count(), 2);
        assert_eq!(config.pipeline.latency_ms(), 0);
        assert_eq!(config.mailbox.capacity, Some(8));
        assert_eq!(config.mailbox.admission, AdmissionPolicy::Reject);
        assert_eq!(config.tracing.exporter, ExporterKind::Disabled);
    }

    #[test]
    fn test_directory_loads_sorted_yaml_only() {
        let dir = TempDir::new().unwrap();
        write(&dir, "10-pipeline.yaml", PIPELINE);
        write(&dir, "20-ingress.yaml", "ingress:\n  address: 127.0.0.1:3100\n");
        write(&dir, "notes.txt", "not config");

        let config = Config::from_paths(&[ConfigPath::Dir(dir.path().to_path_buf())]).unwrap();
        assert_eq!(config.ingress.address, "127.0.0.1:3100");
        assert_eq!(config.pipeline.stage_count(), 4);
    }

    #[test]
    fn test_env_default_interpolated() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "bench.yaml",
            r#"
pipeline:
  Type: Standard
  Latency: ${TRACEBENCH_IT_UNSET_LATENCY:-25}
  FailRate: 0
  StageCount: ${TRACEBENCH_IT_UNSET_STAGES:-3}
"#,
        );

        let config = Config::from_paths(&[ConfigPath::File(path)]).unwrap();
        assert_eq!(config.pipeline.latency_ms(), 25);
        assert_eq!(config.pipeline.stage_count(), 3);
    }

    #[test]
    fn test_errors_from_every_file_are_collected() {
        let dir = TempDir::new().unwrap();
        let bad_yaml = write(&dir, "a.yaml", "pipeline: [unclosed");
        let missing_var = write(&dir, "b.yaml", "ingress:\n  address: $TRACEBENCH_IT_UNSET_ADDR\n");

        let err = Config::from_paths(&[ConfigPath::File(bad_yaml), ConfigPath::File(missing_var)])
            .unwrap_err();
        match err {
            ConfigError::MultipleErrors { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("a.yaml"));
                assert!(errors[1].contains("TRACEBENCH_IT_UNSET_ADDR"));
            }
            other => panic!("expected MultipleErrors, got {other}"),
        }
    }

    #[test]
    fn test_custom_topology_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "bench.yaml",
            "pipeline:\n  Type: Custom\n  Latency: 1\n  FailRate: 0\n  StageCount: 1\n",
        );

        let err = Config::from_paths(&[ConfigPath::File(path)]).unwrap_err();
        let display = err.to_string();
        assert!(display.contains("custom"), "{display}");
    }

    #[test]
    fn test_non_yaml_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bench.json", "{}");
        assert!(Config::from_paths(&[ConfigPath::File(path)]).is_err());
    }
}

mod ingress_tests {
    use super::*;

    const BOUNDARY: &str = "tracebench-upload-boundary";

    /// A running pipeline whose spans are kept in memory.
    struct Harness {
        pipeline: Arc<Pipeline<Row>>,
        _provider: SdkTracerProvider,
        exporter: InMemorySpanExporter,
    }

    impl Harness {
        fn spans(&self) -> Vec<SpanData> {
            self.exporter.get_finished_spans().unwrap()
        }
    }

    fn start(stage_count: usize) -> Harness {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let config = TopologyConfig::standard(0, 0.0, stage_count).unwrap();
        let pipeline = Pipeline::start(
            &config,
            PipelineOptions::default(),
            provider.tracer("ingress-test"),
        )
        .unwrap();
        Harness {
            pipeline: Arc::new(pipeline),
            _provider: provider,
            exporter,
        }
    }

    fn upload(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .body(body.into())
            .unwrap()
    }

    fn archive(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, contents) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn multipart_upload(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn response_json(response: axum::response::Response) -> UploadResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_submits_every_row() {
        let harness = start(2);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let response = app
            .oneshot(upload("id,name\n1,alpha\n2,beta\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body.status, "Success!");
        assert_eq!(body.code, 200);
        assert_eq!(body.accepted, Some(3));

        let stats = harness.pipeline.shutdown().await;
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.completed(), 3);
        assert_eq!(harness.spans().len(), 6);
    }

    #[tokio::test]
    async fn test_zip_body_submits_csv_members() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));
        let data = archive(&[
            ("first.csv", "1,\"Doe, Jane\",ok\n2,alpha,ok\n"),
            ("skip.txt", "not,a,row\n"),
            ("second.csv", "3,beta,ok\n"),
        ]);

        let response = app.oneshot(upload(data)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.accepted, Some(3));
        assert_eq!(harness.pipeline.shutdown().await.completed(), 3);
    }

    #[tokio::test]
    async fn test_multipart_zip_upload() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));
        let data = archive(&[("rows.csv", "a,b\nc,d\n")]);

        let response = app
            .oneshot(multipart_upload("file", "rows.zip", &data))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.accepted, Some(2));
        assert_eq!(harness.pipeline.shutdown().await.submitted, 2);
    }

    #[tokio::test]
    async fn test_multipart_plain_csv_upload() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let response = app
            .oneshot(multipart_upload("file", "rows.csv", b"x,1\ny,2\nz,3\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.accepted, Some(3));
        harness.pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_multipart_without_file_field_fails() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let response = app
            .oneshot(multipart_upload("attachment", "rows.csv", b"x,1\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response_json(response).await.status, "Failed to upload!");
        assert_eq!(harness.pipeline.shutdown().await.submitted, 0);
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails_whole_upload() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let response = app
            .oneshot(upload(b"PK\x03\x04truncated".to_vec()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(harness.pipeline.shutdown().await.submitted, 0);
    }

    #[tokio::test]
    async fn test_upload_continues_caller_trace() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(Body::from("a\nb\n"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        harness.pipeline.shutdown().await;
        let spans = harness.spans();
        assert_eq!(spans.len(), 2);
        for span in spans {
            assert_eq!(
                span.span_context.trace_id().to_string(),
                "4bf92f3577b34da6a3ce929d0e0e4736"
            );
            assert_eq!(span.parent_span_id.to_string(), "00f067aa0ba902b7");
        }
    }

    #[tokio::test]
    async fn test_rows_without_header_get_separate_traces() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        app.oneshot(upload("a\nb\n")).await.unwrap();
        harness.pipeline.shutdown().await;

        let spans = harness.spans();
        assert_eq!(spans.len(), 2);
        assert_ne!(
            spans[0].span_context.trace_id(),
            spans[1].span_context.trace_id()
        );
        assert!(spans.iter().all(|s| s.parent_span_id == SpanId::INVALID));
    }

    #[tokio::test]
    async fn test_empty_upload_succeeds() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));

        let response = app.oneshot(upload("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await.accepted, Some(0));
        assert_eq!(harness.pipeline.shutdown().await.submitted, 0);
    }

    #[tokio::test]
    async fn test_upload_after_shutdown_fails() {
        let harness = start(1);
        harness.pipeline.shutdown().await;

        let app = ingress::router(Arc::clone(&harness.pipeline));
        let response = app.oneshot(upload("a\n")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_json(response).await;
        assert_eq!(body.status, "Failed to upload!");
        assert_eq!(body.code, 500);
        assert_eq!(body.accepted, None);
    }

    #[tokio::test]
    async fn test_health() {
        let harness = start(1);
        let app = ingress::router(Arc::clone(&harness.pipeline));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        harness.pipeline.shutdown().await;
    }
}
