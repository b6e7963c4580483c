#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use speakup_api::attachments::{BlobStore, MemoryStore};
use speakup_api::notify::{Notifier, TransportError};
use speakup_api::{AppContext, AppState, Settings};
use speakup_db::Database;
use speakup_types::Redacted;

pub const FRONTEND_URL: &str = "http://frontend.test";

/// Records every verification link instead of sending it.
#[derive(Default)]
pub struct CapturingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl CapturingNotifier {
    /// Verification URL most recently sent to `email`.
    pub fn url_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, url)| url.clone())
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_verification_email(
        &self,
        to: &str,
        _name: &str,
        verification_url: &Redacted<String>,
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), verification_url.expose().clone()));
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send_verification_email(
        &self,
        _to: &str,
        _name: &str,
        _verification_url: &Redacted<String>,
    ) -> Result<(), TransportError> {
        Err(TransportError("relay unreachable".into()))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db: Arc<Database>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<CapturingNotifier>,
    pub router: Router,
}

/// Rejects every write, as a full disk would.
pub struct FullDisk;

#[async_trait]
impl BlobStore for FullDisk {
    async fn put(&self, _name: &str, _data: Bytes) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }

    async fn delete(&self, _name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn exists(&self, _name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    build_app(store.clone(), store, Settings::default())
}

/// An app whose attachment writes always fail. `store` stays empty.
pub fn full_disk_app(settings: Settings) -> TestApp {
    build_app(Arc::new(FullDisk), Arc::new(MemoryStore::new()), settings)
}

fn build_app(blobs: Arc<dyn BlobStore>, store: Arc<MemoryStore>, settings: Settings) -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let notifier = Arc::new(CapturingNotifier::default());

    let state = AppContext::new(
        db.clone(),
        &Redacted::new("integration-test-secret".into()),
        blobs,
        notifier.clone() as Arc<dyn Notifier>,
        FRONTEND_URL,
        settings,
    );
    let router = speakup_api::router(state.clone());

    TestApp {
        state,
        db,
        store,
        notifier,
        router,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse { status, headers, body }
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
        self.send(json_request("POST", uri, None, body)).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Run register -> verify -> set-password and return the bearer token and
    /// user id.
    pub async fn activate(&self, name: &str, email: &str, password: &str) -> (String, String) {
        let res = self
            .post_json("/api/auth/register", serde_json::json!({ "name": name, "email": email }))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);

        let url = self.notifier.url_for(email).expect("verification mail captured");
        let token = url.rsplit('/').next().unwrap().to_string();

        let res = self.get(&format!("/api/auth/verify-email/{}", token), None).await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        let user_id = res.body["user"]["id"].as_str().unwrap().to_string();

        let res = self
            .post_json(
                "/api/auth/set-password",
                serde_json::json!({ "userId": user_id, "password": password }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);

        (res.body["token"].as_str().unwrap().to_string(), user_id)
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub struct FilePart<'a> {
    pub field: &'a str,
    pub file_name: &'a str,
    pub content_type: &'a str,
    pub data: Vec<u8>,
}

pub fn file<'a>(file_name: &'a str, content_type: &'a str, size: usize) -> FilePart<'a> {
    FilePart {
        field: "files",
        file_name,
        content_type,
        data: vec![0x25; size],
    }
}

const BOUNDARY: &str = "speakup-test-boundary";

pub fn multipart_request(
    method: &str,
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
    files: &[FilePart<'_>],
) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for part in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, part.field, part.file_name, part.content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(body))
        .unwrap()
}

pub const COMPLAINT_FIELDS: &[(&str, &str)] = &[
    ("type", "COMPLAINT"),
    ("department", "Transport"),
    ("agency", "LTA"),
    ("subject", "Broken traffic light"),
    ("description", "The light at 5th and Main has been out for a week."),
];
