use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use pinhole_gateway::model::{BatchShortenResult, ShortenResponse, UserUrl};
use pinhole_gateway::{App, AppState, SignedTokenProvider};
use pinhole_generator::SeqGenerator;
use pinhole_shortener::ShortenerService;
use pinhole_storage::{FileRepository, StoragePaths};
use tempfile::TempDir;
use tower::ServiceExt;

const BASE_URL: &str = "http://pin.test";

struct TestApp {
    _dir: TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let repository =
            FileRepository::open(StoragePaths::from_records_path(dir.path().join("urls.json")))
                .unwrap();
        let shortener = ShortenerService::new(repository, SeqGenerator::with_prefix("pn"));
        let identity = SignedTokenProvider::new("router-test-secret").unwrap();
        let state = AppState::new(Arc::new(shortener), Arc::new(identity), BASE_URL);

        Self {
            _dir: dir,
            router: App::router(state),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Makes an anonymous request and returns the token issued with it.
    async fn login(&self) -> String {
        let response = self
            .send(request(Method::GET, "/api/user/urls", None, Body::empty()))
            .await;
        bearer_of(&response)
    }
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(body).unwrap()
}

fn json_request(method: Method, uri: &str, token: Option<&str>, json: &str) -> Request<Body> {
    let mut request = request(method, uri, token, Body::from(json.to_string()));
    request
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    request
}

fn bearer_of(response: &Response) -> String {
    response
        .headers()
        .get(AUTHORIZATION)
        .expect("issued token")
        .to_str()
        .unwrap()
        .strip_prefix("Bearer ")
        .unwrap()
        .to_string()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn plain_text_shorten_issues_identity() {
    let app = TestApp::new();

    let response = app
        .send(request(
            Method::POST,
            "/",
            None,
            Body::from("https://example.com"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    let token = bearer_of(&response);
    assert_eq!(body_string(response).await, "http://pin.test/pn000000");

    // same url again is a conflict carrying the existing short url
    let response = app
        .send(request(
            Method::POST,
            "/",
            Some(&token),
            Body::from("https://example.com"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_eq!(body_string(response).await, "http://pin.test/pn000000");
}

#[tokio::test]
async fn plain_text_rejects_invalid_url() {
    let app = TestApp::new();

    let response = app
        .send(request(Method::POST, "/", None, Body::from("not a url")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirect_known_unknown_and_gone() {
    let app = TestApp::new();
    let token = app.login().await;

    app.send(json_request(
        Method::POST,
        "/api/shorten",
        Some(&token),
        r#"{"url":"https://example.com/landing"}"#,
    ))
    .await;

    let response = app
        .send(request(Method::GET, "/pn000000", None, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "https://example.com/landing"
    );

    let response = app
        .send(request(Method::GET, "/missing", None, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            Method::DELETE,
            "/api/user/urls",
            Some(&token),
            r#"["pn000000"]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // deletion runs in the background
    for _ in 0..100 {
        let response = app
            .send(request(Method::GET, "/pn000000", None, Body::empty()))
            .await;
        if response.status() == StatusCode::BAD_REQUEST {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("deleted key still redirects");
}

#[tokio::test]
async fn json_shorten_and_duplicate() {
    let app = TestApp::new();
    let token = app.login().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten",
            Some(&token),
            r#"{"url":"https://example.com"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: ShortenResponse = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.result, "http://pin.test/pn000000");

    let other = app.login().await;
    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten",
            Some(&other),
            r#"{"url":"https://example.com"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ShortenResponse = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body.result, "http://pin.test/pn000000");
}

#[tokio::test]
async fn json_shorten_rejects_bad_input() {
    let app = TestApp::new();
    let token = app.login().await;

    let malformed = app
        .send(json_request(Method::POST, "/api/shorten", Some(&token), "{\"url\":"))
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let invalid_url = app
        .send(json_request(
            Method::POST,
            "/api/shorten",
            Some(&token),
            r#"{"url":"ftp://example.com"}"#,
        ))
        .await;
    assert_eq!(invalid_url.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn custom_key_conflict_has_no_body() {
    let app = TestApp::new();
    let token = app.login().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten",
            Some(&token),
            r#"{"url":"https://a.example","custom_key":"promo"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten",
            Some(&token),
            r#"{"url":"https://b.example","custom_key":"promo"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(body_string(response).await.is_empty());
}

#[tokio::test]
async fn batch_shorten() {
    let app = TestApp::new();
    let token = app.login().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten/batch",
            Some(&token),
            r#"[
                {"correlation_id":"a","original_url":"https://a.example"},
                {"correlation_id":"b","original_url":"https://b.example"}
            ]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let results: Vec<BatchShortenResult> =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].correlation_id, "a");
    assert_eq!(results[0].short_url, "http://pin.test/pn000000");
    assert_eq!(results[1].correlation_id, "b");
    assert_eq!(results[1].short_url, "http://pin.test/pn000001");

    // a reused correlation id is rejected
    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten/batch",
            Some(&token),
            r#"[{"correlation_id":"a","original_url":"https://c.example"}]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_is_validated_before_storing() {
    let app = TestApp::new();
    let token = app.login().await;

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten/batch",
            Some(&token),
            r#"[
                {"correlation_id":"a","original_url":"https://a.example"},
                {"correlation_id":"b","original_url":"nope"}
            ]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            Method::POST,
            "/api/shorten/batch",
            Some(&token),
            r#"[
                {"correlation_id":"x","original_url":"https://a.example"},
                {"correlation_id":"x","original_url":"https://b.example"}
            ]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(request(Method::GET, "/api/user/urls", Some(&token), Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn user_urls_require_identity() {
    let app = TestApp::new();

    let response = app
        .send(request(Method::GET, "/api/user/urls", None, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(request(
            Method::GET,
            "/api/user/urls",
            Some("forged.token"),
            Body::empty(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_urls_lists_own_and_deduplicated() {
    let app = TestApp::new();
    let alice = app.login().await;
    let bob = app.login().await;

    for (token, url) in [
        (&alice, "https://a.example"),
        (&bob, "https://b.example"),
        (&bob, "https://a.example"),
    ] {
        app.send(json_request(
            Method::POST,
            "/api/shorten",
            Some(token.as_str()),
            &format!(r#"{{"url":"{url}"}}"#),
        ))
        .await;
    }

    let response = app
        .send(request(Method::GET, "/api/user/urls", Some(&alice), Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let urls: Vec<UserUrl> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].original_url, "https://a.example");

    let response = app
        .send(request(Method::GET, "/api/user/urls", Some(&bob), Body::empty()))
        .await;
    let urls: Vec<UserUrl> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(urls.len(), 2);
}

#[tokio::test]
async fn delete_rejects_malformed_json() {
    let app = TestApp::new();
    let token = app.login().await;

    let response = app
        .send(json_request(
            Method::DELETE,
            "/api/user/urls",
            Some(&token),
            r#"{"keys":1}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_owner_delete_is_accepted_but_ignored() {
    let app = TestApp::new();
    let alice = app.login().await;
    let mallory = app.login().await;

    app.send(json_request(
        Method::POST,
        "/api/shorten",
        Some(&alice),
        r#"{"url":"https://a.example"}"#,
    ))
    .await;

    let response = app
        .send(json_request(
            Method::DELETE,
            "/api/user/urls",
            Some(&mallory),
            r#"["pn000000"]"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = app
        .send(request(Method::GET, "/pn000000", None, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn ping() {
    let app = TestApp::new();

    let response = app
        .send(request(Method::GET, "/ping", None, Body::empty()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}
