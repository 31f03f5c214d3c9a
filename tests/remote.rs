//! RemoteProvider against a local mock of the feature-extraction endpoint.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use semsim::embed::{EmbedOptions, EmbeddingProvider, RemoteProvider};
use semsim::{EmbedError, compare, similarity};

const MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
const PATH: &str = "/models/all-MiniLM-L6-v2/pipeline/feature-extraction";

fn provider(server: &ServerGuard) -> RemoteProvider {
    RemoteProvider::new(MODEL)
        .with_url(&format!("{}{PATH}", server.url()))
        .with_token("test-token")
}

fn assert_close(got: &[f32], want: &[f32]) {
    assert_eq!(got.len(), want.len(), "got {got:?}");
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < 1e-6, "got {got:?}, want {want:?}");
    }
}

#[test]
fn token_matrix_is_mean_pooled_and_normalized() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", PATH)
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::Json(json!({ "inputs": "hello world" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[[3.0, 0.0], [3.0, 8.0]]"#)
        .create();

    let embedding = provider(&server)
        .embed("hello world", &EmbedOptions::default())
        .unwrap();
    mock.assert();
    assert!(embedding.is_normalized());
    assert_close(embedding.values(), &[0.6, 0.8]);
}

#[test]
fn token_matrix_stays_raw_without_normalization() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"[[[3.0, 0.0], [3.0, 8.0]]]"#)
        .create();

    let options = EmbedOptions {
        normalize: false,
        ..EmbedOptions::default()
    };
    let embedding = provider(&server).embed("hello", &options).unwrap();
    assert!(!embedding.is_normalized());
    assert_close(embedding.values(), &[3.0, 4.0]);
}

#[test]
fn pooled_vector_is_normalized() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"[1.0, 1.0]"#)
        .create();

    let embedding = provider(&server)
        .embed("hello", &EmbedOptions::default())
        .unwrap();
    let half = std::f32::consts::FRAC_1_SQRT_2;
    assert_close(embedding.values(), &[half, half]);
    assert!((embedding.norm() - 1.0).abs() < 1e-6);
}

#[test]
fn first_response_fixes_width() {
    let mut server = Server::new();
    let _first = server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({ "inputs": "first" })))
        .with_status(200)
        .with_body(r#"[0.0, 2.0]"#)
        .create();
    let _second = server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({ "inputs": "second" })))
        .with_status(200)
        .with_body(r#"[1.0, 2.0, 2.0]"#)
        .create();

    let p = provider(&server);
    let options = EmbedOptions::default();
    assert_eq!(p.embed("first", &options).unwrap().dimension(), 2);
    assert_eq!(p.dimensions().unwrap(), 2);
    assert_eq!(
        p.embed("second", &options).unwrap_err(),
        EmbedError::Inference("endpoint returned 3 dimensions, earlier responses had 2".into())
    );
    assert_eq!(p.dimensions().unwrap(), 2);
}

#[test]
fn dimensions_asks_the_endpoint_once() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"[0.1, 0.2, 0.3, 0.4]"#)
        .expect(1)
        .create();

    let p = provider(&server);
    assert_eq!(p.dimensions().unwrap(), 4);
    assert_eq!(p.dimensions().unwrap(), 4);
    mock.assert();
}

#[test]
fn unavailable_statuses_map_to_model_unavailable() {
    for status in [401, 403, 404, 429, 500, 503] {
        let mut server = Server::new();
        let _m = server
            .mock("POST", PATH)
            .with_status(status)
            .with_body(r#"{"error": "nope"}"#)
            .create();

        let err = provider(&server)
            .embed("hello", &EmbedOptions::default())
            .unwrap_err();
        assert!(
            matches!(err, EmbedError::ModelUnavailable(_)),
            "HTTP {status} gave {err:?}"
        );
    }
}

#[test]
fn bad_request_is_invalid_input() {
    let mut server = Server::new();
    let _m = server.mock("POST", PATH).with_status(400).create();

    let err = provider(&server)
        .embed("hello", &EmbedOptions::default())
        .unwrap_err();
    assert!(matches!(err, EmbedError::InvalidInput(_)), "got {err:?}");
}

#[test]
fn malformed_body_is_inference_error() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"{"error": "Model is loading"}"#)
        .create();

    let err = provider(&server)
        .embed("hello", &EmbedOptions::default())
        .unwrap_err();
    assert!(matches!(err, EmbedError::Inference(_)), "got {err:?}");
}

#[test]
fn repeated_text_is_deterministic_and_unit_norm() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", PATH)
        .with_status(200)
        .with_body(r#"[[0.2, -0.4, 1.0], [0.6, 0.0, -0.2]]"#)
        .expect(2)
        .create();

    let p = provider(&server);
    let options = EmbedOptions::default();
    let a = p.embed("That is a happy person", &options).unwrap();
    let b = p.embed("That is a happy person", &options).unwrap();
    mock.assert();
    assert_eq!(a, b);
    assert!((a.norm() - 1.0).abs() < 1e-5);
    assert!((similarity(&a, &b).unwrap() - 1.0).abs() < 1e-5);
}

#[test]
fn compare_scores_two_remote_embeddings() {
    let mut server = Server::new();
    let _a = server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({ "inputs": "north" })))
        .with_status(200)
        .with_body(r#"[0.0, 5.0]"#)
        .create();
    let _b = server
        .mock("POST", PATH)
        .match_body(Matcher::PartialJson(json!({ "inputs": "east" })))
        .with_status(200)
        .with_body(r#"[3.0, 4.0]"#)
        .create();

    let p = provider(&server);
    let result = compare(&p, "north", "east", &EmbedOptions::default()).unwrap();
    assert_eq!(result.backend, "remote");
    assert_eq!(result.dimensions, 2);
    assert!((result.score - 0.8).abs() < 1e-6);
}
