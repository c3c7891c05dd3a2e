//! End-to-end tests for `POST /api/smartplanmark/process` against a real
//! worker subprocess (a bash script).

mod common;

use std::io::{Cursor, Read};

use axum::http::{header, StatusCode};
use common::{body_bytes, body_json, post_process, Part, WRITING_WORKER};

fn unzip(bytes: Vec<u8>) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries.sort();
    entries
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn valid_upload_returns_archive_of_worker_output() {
    let test = common::build_test_app(WRITING_WORKER);

    let response = post_process(
        test.app.clone(),
        &[Part::pdf(b"%PDF-1.4 plan"), Part::csv(b"sheet,code\nA1,42\n")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"planos_marcados.zip\""
    );
    let declared_len: usize = headers[header::CONTENT_LENGTH]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let bytes = body_bytes(response).await;
    assert_eq!(bytes.len(), declared_len);
    assert_eq!(
        unzip(bytes),
        vec![
            ("a.txt".to_string(), "alpha".to_string()),
            ("sub/b.txt".to_string(), "bravo".to_string()),
        ]
    );

    assert!(test.sessions_cleaned().await, "session must be removed after delivery");
}

#[tokio::test]
async fn worker_receives_stored_uploads() {
    let test = common::build_test_app(
        r#"
        [ "$(basename "$2")" = plano_maestro.pdf ]
        [ "$(basename "$4")" = asignaciones.csv ]
        cp "$2" "$6/document.pdf"
        cp "$4" "$6/table.csv"
        "#,
    );

    let response = post_process(
        test.app.clone(),
        &[Part::csv(b"x,y\n"), Part::pdf(b"%PDF-doc")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        unzip(body_bytes(response).await),
        vec![
            ("document.pdf".to_string(), "%PDF-doc".to_string()),
            ("table.csv".to_string(), "x,y\n".to_string()),
        ]
    );
}

#[tokio::test]
async fn content_type_parameters_and_missing_type_are_accepted() {
    let test = common::build_test_app(WRITING_WORKER);

    let mut csv = Part::csv(b"a,b\n");
    csv.content_type = Some("text/csv; charset=utf-8");
    let mut pdf = Part::pdf(b"%PDF");
    pdf.content_type = None;

    let response = post_process(test.app.clone(), &[pdf, csv]).await;

    assert_eq!(response.status(), StatusCode::OK);
    body_bytes(response).await;
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn unknown_fields_are_ignored() {
    let test = common::build_test_app(WRITING_WORKER);

    let extra = Part {
        name: "comment",
        file_name: None,
        content_type: None,
        data: b"hello".to_vec(),
    };
    let response = post_process(
        test.app.clone(),
        &[extra, Part::pdf(b"%PDF"), Part::csv(b"a,b\n")],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Validation failures never launch the worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_pdf_document_is_rejected_before_worker() {
    let test = common::build_test_app("touch invoked\n");

    let mut document = Part::pdf(b"not a pdf");
    document.file_name = Some("plan.docx");
    document.content_type = Some("application/vnd.openxmlformats-officedocument");

    let response = post_process(test.app.clone(), &[document, Part::csv(b"a,b\n")]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["error"].as_str().unwrap().contains("primary-document"));

    assert!(!test.marker_exists("invoked"), "worker must not run");
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn missing_table_is_rejected() {
    let test = common::build_test_app("touch invoked\n");

    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF")]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("mapping-table"));
    assert!(!test.marker_exists("invoked"));
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn oversized_table_is_rejected_naming_its_role() {
    let test = common::build_test_app_with("touch invoked\n", |config| {
        config.pipeline.max_table_bytes = 1024;
    });

    let response = post_process(
        test.app.clone(),
        &[Part::pdf(b"%PDF"), Part::csv(&vec![b'x'; 1025])],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["error"].as_str().unwrap().contains("mapping-table"));
    assert!(!test.marker_exists("invoked"));
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn empty_document_is_rejected() {
    let test = common::build_test_app("touch invoked\n");

    let response = post_process(test.app.clone(), &[Part::pdf(b""), Part::csv(b"a,b\n")]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!test.marker_exists("invoked"));
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn non_multipart_request_is_rejected_without_session() {
    let test = common::build_test_app("touch invoked\n");

    let request = axum::http::Request::builder()
        .method(axum::http::Method::POST)
        .uri("/api/smartplanmark/process")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let response = tower::ServiceExt::oneshot(test.app.clone(), request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    assert!(test.sessions_cleaned().await);
}

// ---------------------------------------------------------------------------
// Worker and packaging failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_worker_reports_stderr() {
    let test = common::build_test_app("echo boom >&2\nexit 1\n");

    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF"), Part::csv(b"a,b\n")]).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "WORKER_ERROR");
    assert!(json["error"].as_str().unwrap().contains("boom"));
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn worker_without_output_is_packaging_error() {
    let test = common::build_test_app("echo 'nothing to do'\n");

    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF"), Part::csv(b"a,b\n")]).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "PACKAGING_ERROR");
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn hung_worker_is_killed_after_timeout() {
    let test = common::build_test_app_with("sleep 30\n", |config| {
        config.pipeline.worker_timeout_secs = 1;
    });

    let started = std::time::Instant::now();
    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF"), Part::csv(b"a,b\n")]).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "WORKER_ERROR");
    assert!(json["error"].as_str().unwrap().contains("timed out"));
    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn request_timeout_returns_json_and_kills_worker_group() {
    let test = common::build_test_app_with(
        "sleep 60 &\necho $! > grandchild.pid\nwait\n",
        |config| {
            config.request_timeout_secs = 1;
            config.pipeline.worker_timeout_secs = 0;
        },
    );

    let started = std::time::Instant::now();
    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF"), Part::csv(b"a,b\n")]).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    let json = body_json(response).await;
    assert_eq!(json["code"], "REQUEST_TIMEOUT");
    assert!(json["error"].is_string());
    assert!(test.sessions_cleaned().await);

    #[cfg(target_os = "linux")]
    {
        let pid: u32 = std::fs::read_to_string(test.project_root.path().join("grandchild.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = common::process_alive(pid);
        for _ in 0..250 {
            if !alive {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            alive = common::process_alive(pid);
        }
        assert!(!alive, "background child of the worker must be killed");
    }
}

// ---------------------------------------------------------------------------
// Cleanup and isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abandoned_download_still_removes_session() {
    let test = common::build_test_app(WRITING_WORKER);

    let response = post_process(test.app.clone(), &[Part::pdf(b"%PDF"), Part::csv(b"a,b\n")]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.sessions().len(), 1, "session lives while streaming");

    drop(response);

    assert!(test.sessions_cleaned().await);
}

#[tokio::test]
async fn concurrent_requests_are_isolated() {
    let test = common::build_test_app("cp \"$4\" \"$6/table.csv\"\n");

    let first_parts = [Part::pdf(b"%PDF"), Part::csv(b"first\n")];
    let second_parts = [Part::pdf(b"%PDF"), Part::csv(b"second\n")];
    let (first, second) = tokio::join!(
        post_process(test.app.clone(), &first_parts),
        post_process(test.app.clone(), &second_parts),
    );

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(test.sessions().len(), 2);

    let first = unzip(body_bytes(first).await);
    let second = unzip(body_bytes(second).await);
    assert_eq!(first, vec![("table.csv".to_string(), "first\n".to_string())]);
    assert_eq!(second, vec![("table.csv".to_string(), "second\n".to_string())]);

    assert!(test.sessions_cleaned().await);
}
