//! Shared harness for the HTTP integration tests.
//!
//! Builds the production router over the in-memory stores and a fixed clock, so
//! every request exercises the same middleware stack the binary serves.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use api_lib::config::Config;
use api_lib::web::{router, AppState, Stores};
use checkin_core::memory::{InMemoryBlobStore, InMemoryStore};
use checkin_core::FixedClock;

pub const SERVICE_KEY: &str = "test-service-key";
const BOUNDARY: &str = "checkin-test-boundary";

pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn test_config(service_key: Option<&str>) -> Config {
    let mut vars: HashMap<&str, String> = HashMap::new();
    vars.insert("DATABASE_URL", "postgres://unused".to_string());
    vars.insert("BLOB_SIGNING_KEY", "signing-key".to_string());
    if let Some(key) = service_key {
        vars.insert("SERVICE_KEY", key.to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub clock: Arc<FixedClock>,
    pub store: Arc<InMemoryStore>,
    pub blobs: Arc<InMemoryBlobStore>,
}

pub struct Reply {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub json: Value,
}

impl TestApp {
    pub fn new(now: &str) -> Self {
        Self::with_config(now, test_config(Some(SERVICE_KEY)))
    }

    pub fn with_config(now: &str, config: Config) -> Self {
        let clock = Arc::new(FixedClock::new(at(now)));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let state = Arc::new(AppState::new(
            Stores::in_memory(store.clone(), blobs.clone()),
            clock.clone(),
            Arc::new(config),
        ));
        Self {
            router: router(state).unwrap(),
            clock,
            store,
            blobs,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            set_cookie,
            json,
        }
    }

    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    /// Signs up a user and returns `(user_id, cookie)`.
    pub async fn sign_up(&self, email: &str, display_name: &str) -> (String, String) {
        let reply = self
            .json(
                Method::POST,
                "/auth/signup",
                None,
                Some(json!({
                    "email": email,
                    "password": "correct horse",
                    "display_name": display_name,
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.json);
        let cookie = reply
            .set_cookie
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        (reply.json["user_id"].as_str().unwrap().to_string(), cookie)
    }

    /// Creates a January 2024 challenge with a 22:00 UTC deadline.
    pub async fn create_challenge(&self, cookie: &str, screenshot_required: bool) -> Value {
        let reply = self
            .json(
                Method::POST,
                "/challenges",
                Some(cookie),
                Some(json!({
                    "title": "Run every day",
                    "start_date": "2024-01-01",
                    "end_date": "2024-01-31",
                    "checkin_time": "22:00",
                    "screenshot_required": screenshot_required,
                    "stake_description": "Coffee",
                    "stake_amount": 5,
                    "stake_rule": "per-missed-day",
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.json);
        reply.json
    }

    pub async fn join(&self, cookie: &str, join_code: &str) -> Reply {
        self.json(
            Method::POST,
            "/challenges/join",
            Some(cookie),
            Some(json!({ "join_code": join_code })),
        )
        .await
    }

    pub async fn check_in(
        &self,
        cookie: &str,
        challenge_id: &str,
        status: &str,
        proof: Option<(&str, &str)>,
    ) -> Reply {
        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"status\"\r\n\r\n{status}\r\n"
            )
            .as_bytes(),
        );
        if let Some((file_name, contents)) = proof {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"proof\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(contents.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/challenges/{}/check-ins", challenge_id))
            .header(header::COOKIE, cookie)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    pub async fn evaluate(&self, key: Option<&str>) -> Reply {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/internal/evaluate");
        if let Some(key) = key {
            builder = builder.header("x-service-key", key);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// POSTs JSON to an `/internal` route with the given service key.
    pub async fn internal(&self, uri: &str, key: Option<&str>, body: Value) -> Reply {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header("x-service-key", key);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }
}
