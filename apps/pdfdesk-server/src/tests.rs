//! Router tests driven in-process with a stub translator

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use lopdf::{content::Content, content::Operation, dictionary, Document, Object, Stream};
use pdfdesk_core::{SourceDocument, TextTranslator, TranslationOutcome};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

use crate::{build_router, AppState};

const BOUNDARY: &str = "pdfdesk-test-boundary";

/// Records target languages and answers with upper-cased strings
#[derive(Default)]
struct StubTranslator {
    languages: Mutex<Vec<String>>,
}

#[async_trait]
impl TextTranslator for StubTranslator {
    async fn translate(&self, texts: &[String], target_lang: &str) -> TranslationOutcome {
        self.languages.lock().unwrap().push(target_lang.to_string());
        TranslationOutcome::Translated(texts.iter().map(|t| t.to_uppercase()).collect())
    }
}

fn app(translator: Arc<StubTranslator>) -> Router {
    build_router(AppState {
        translator,
        font: None,
        max_upload_bytes: 10 * 1024 * 1024,
    })
}

fn sample_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("Hello world")]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/pdf\r\n\r\n",
                        name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/translate")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn error_message(response: axum::response::Response) -> String {
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let response = app(Arc::default())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "pdfdesk-server");
}

#[tokio::test]
async fn test_translate_without_file_is_bad_request() {
    let response = app(Arc::default())
        .oneshot(multipart_request(&[Part::Text("targetLang", "Spanish")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(response).await, "No file uploaded");
}

#[tokio::test]
async fn test_translate_returns_pdf_attachment() {
    let translator = Arc::new(StubTranslator::default());
    let pdf = sample_pdf();

    let response = app(translator.clone())
        .oneshot(multipart_request(&[Part::File("report.pdf", &pdf)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"translated_report.pdf\""
    );

    let output = body_bytes(response).await;
    assert_eq!(SourceDocument::load(&output).unwrap().page_count(), 1);
    assert_eq!(*translator.languages.lock().unwrap(), vec!["Hindi".to_string()]);
}

#[tokio::test]
async fn test_translate_passes_target_language() {
    let translator = Arc::new(StubTranslator::default());
    let pdf = sample_pdf();

    let response = app(translator.clone())
        .oneshot(multipart_request(&[
            Part::Text("targetLang", "Spanish"),
            Part::File("a.pdf", &pdf),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*translator.languages.lock().unwrap(), vec!["Spanish".to_string()]);
}

#[tokio::test]
async fn test_translate_corrupt_file_is_server_error() {
    let translator = Arc::new(StubTranslator::default());
    let response = app(translator.clone())
        .oneshot(multipart_request(&[Part::File("bad.pdf", b"not a pdf")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(response).await.contains("Failed to load PDF"));
    assert!(translator.languages.lock().unwrap().is_empty());
}
