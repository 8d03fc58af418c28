use std::path::{Path, PathBuf};
use std::time::Duration;

use formfill_core::{CheckboxEntry, FillEntry, PlaceholderPattern};
use formfill_engine::{
    CallContext, FailureKind, FieldResolver, HttpResolver, Priority, ResolverSettings,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DOC: &str = "/forms/visa.pdf";

fn resolver_for(server: &MockServer) -> HttpResolver {
    HttpResolver::new(ResolverSettings {
        base_url: server.uri(),
        ..ResolverSettings::default()
    })
    .unwrap()
}

fn cx() -> CallContext {
    CallContext::new(Path::new(DOC), Priority::Normal)
}

async fn respond(server: &MockServer, endpoint: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path(endpoint))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn extracts_form_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/form/text"))
        .and(body_partial_json(json!({ "form_path": DOC })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "text": "Name: _____", "is_interactive": true })),
        )
        .mount(&server)
        .await;

    let text = resolver_for(&server)
        .extract_text(&cx(), Path::new(DOC))
        .await
        .unwrap();

    assert_eq!(text.text, "Name: _____");
    assert!(text.has_interactive_fields);
}

#[tokio::test]
async fn conflict_status_means_cancelled() {
    let server = MockServer::start().await;
    respond(&server, "/form/text", ResponseTemplate::new(409)).await;

    let err = resolver_for(&server)
        .extract_text(&cx(), Path::new(DOC))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

#[tokio::test]
async fn cancelled_body_means_cancelled() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/pattern/detect",
        ResponseTemplate::new(200).set_body_json(json!({ "cancelled": true })),
    )
    .await;

    let err = resolver_for(&server)
        .detect_pattern(&cx(), "Name: _____", false)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Cancelled);
}

#[tokio::test]
async fn server_errors_carry_the_status() {
    let server = MockServer::start().await;
    respond(&server, "/context/read", ResponseTemplate::new(500)).await;

    let err = resolver_for(&server)
        .resolve_context(&cx(), Path::new("/store"))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(500));
}

#[tokio::test]
async fn undecodable_bodies_are_malformed() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/fill-entries/detect",
        ResponseTemplate::new(200).set_body_string("the model rambled instead of answering"),
    )
    .await;
    let pattern = PlaceholderPattern::new("(_____)").unwrap();

    let err = resolver_for(&server)
        .detect_fill_entries(&cx(), &["Name: _____".to_string()], Some(&pattern))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::MalformedResponse);
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/form/text",
        ResponseTemplate::new(200)
            .set_delay(Duration::from_millis(250))
            .set_body_json(json!({ "text": "late" })),
    )
    .await;
    let resolver = HttpResolver::new(ResolverSettings {
        base_url: server.uri(),
        request_timeout: Duration::from_millis(50),
        ..ResolverSettings::default()
    })
    .unwrap();

    let err = resolver
        .extract_text(&cx(), Path::new(DOC))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn context_keeps_only_string_values() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/context/read"))
        .and(body_partial_json(json!({ "context_dir": "/store" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "context": { "name": "Ada", "read_files": ["cv.pdf"] }
        })))
        .mount(&server)
        .await;

    let snapshot = resolver_for(&server)
        .resolve_context(&cx(), Path::new("/store"))
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get("name").map(String::as_str), Some("Ada"));
}

#[tokio::test]
async fn processed_entries_map_back_to_fill_entries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fill-entries/process"))
        .and(body_partial_json(json!({
            "context_dir": "/store",
            "form_path": DOC,
            "pattern": "(_____)",
            "provider": "openai",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [
                {
                    "lines": "Name: _____",
                    "number_of_fill_spots": 1,
                    "context_keys": ["name"],
                    "filled_lines": "Name: Ada"
                },
                {
                    "lines": "Phone: _____",
                    "number_of_fill_spots": 1,
                    "context_keys": ["phone"],
                    "filled_lines": ""
                }
            ],
            "missing_keys": ["phone"]
        })))
        .mount(&server)
        .await;
    let pattern = PlaceholderPattern::new("(_____)").unwrap();
    let entries = vec![
        FillEntry::new("Name: _____", &pattern),
        FillEntry::new("Phone: _____", &pattern),
    ];

    let processed = resolver_for(&server)
        .process_fill_entries(&cx(), &entries, Path::new("/store"), Some(&pattern))
        .await
        .unwrap();

    assert_eq!(processed.missing_keys, vec!["phone".to_string()]);
    assert_eq!(processed.entries[0].filled_lines, "Name: Ada");
    assert_eq!(processed.entries[0].context_keys, vec![Some("name".to_string())]);
    assert_eq!(processed.entries[1].filled_lines, "Phone: _____");
}

#[tokio::test]
async fn docx_forms_are_filled_by_the_docx_filler() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/docx/fill"))
        .and(body_partial_json(json!({
            "form_path": "/forms/lease.docx",
            "output_path": "/forms/lease_filled.docx",
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "output_path": "/forms/lease_filled.docx" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let written = resolver_for(&server)
        .fill_output(
            &CallContext::new(Path::new("/forms/lease.docx"), Priority::Urgent),
            Path::new("/forms/lease.docx"),
            &[],
            &[],
            Path::new("/forms/lease_filled.docx"),
        )
        .await
        .unwrap();

    assert_eq!(written, PathBuf::from("/forms/lease_filled.docx"));
}

#[tokio::test]
async fn no_checkboxes_means_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkbox-entries/process"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let processed = resolver_for(&server)
        .process_checkbox_entries(&cx(), &[], Path::new("/store"))
        .await
        .unwrap();

    assert_eq!(processed, Vec::<CheckboxEntry>::new());
}

#[tokio::test]
async fn checkbox_entries_use_the_wire_field_names() {
    let server = MockServer::start().await;
    respond(
        &server,
        "/checkbox-entries/detect",
        ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{
                "lines": "[ ] Yes [ ] No",
                "checkbox_positions": [[0, 3], [8, 11]],
                "checkbox_values": ["Yes", "No"],
                "context_key": "married"
            }]
        })),
    )
    .await;

    let detected = resolver_for(&server)
        .detect_checkbox_entries(&cx(), &["[ ] Yes [ ] No".to_string()])
        .await
        .unwrap();

    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].positions, vec![(0, 3), (8, 11)]);
    assert_eq!(detected[0].labels, vec!["Yes".to_string(), "No".to_string()]);
    assert_eq!(detected[0].context_key.as_deref(), Some("married"));
    assert!(detected[0].checked_indices.is_empty());
}

#[tokio::test]
async fn calls_for_a_cancelled_document_never_leave_the_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let flag = formfill_engine::CancelFlag::new();
    flag.cancel();

    let err = resolver_for(&server)
        .extract_text(&cx().with_cancel(flag), Path::new(DOC))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}
