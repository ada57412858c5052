//! Shared helpers: a fake Telegram Bot API, free ports, temp dirs, signed messages.

#![allow(dead_code)]

use axum::{extract::State, http::Uri, Json, Router};
use bridge::config::Config;
use bridge::gateway::InboundMessage;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GROUP_ID: i64 = -1001234567890;
pub const HTTP_SECRET: &str = "http-secret";
pub const WS_SECRET: &str = "ws-secret";

/// Records every Bot API call the bridge makes.
#[derive(Default)]
pub struct FakeTelegram {
    pub creates: AtomicUsize,
    pub sent: Mutex<Vec<(i64, i64, String)>>,
    pub topic_names: Mutex<Vec<String>>,
    next_thread: AtomicI64,
}

impl FakeTelegram {
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(i64, i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

async fn fake_api(State(fake): State<Arc<FakeTelegram>>, uri: Uri, Json(body): Json<Value>) -> Json<Value> {
    let path = uri.path();
    if path.starts_with("/botbad") {
        return Json(json!({ "ok": false, "error_code": 401, "description": "Unauthorized" }));
    }
    let method = path.rsplit('/').next().unwrap_or("");
    match method {
        "getMe" => Json(json!({
            "ok": true,
            "result": { "id": 42, "is_bot": true, "username": "bridge_test_bot" }
        })),
        "createForumTopic" => {
            fake.creates.fetch_add(1, Ordering::SeqCst);
            let id = 100 + fake.next_thread.fetch_add(1, Ordering::SeqCst);
            let name = body["name"].as_str().unwrap_or("").to_string();
            fake.topic_names.lock().unwrap().push(name.clone());
            Json(json!({ "ok": true, "result": { "message_thread_id": id, "name": name } }))
        }
        "sendMessage" => {
            fake.sent.lock().unwrap().push((
                body["chat_id"].as_i64().unwrap_or(0),
                body["message_thread_id"].as_i64().unwrap_or(0),
                body["text"].as_str().unwrap_or("").to_string(),
            ));
            Json(json!({ "ok": true, "result": { "message_id": 1 } }))
        }
        "getUpdates" => {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Json(json!({ "ok": true, "result": [] }))
        }
        _ => Json(json!({ "ok": false, "description": format!("unknown method {}", method) })),
    }
}

/// Start the fake Bot API; returns its state and base URL.
pub async fn start_fake_telegram() -> (Arc<FakeTelegram>, String) {
    let fake = Arc::new(FakeTelegram::default());
    let app = Router::new().fallback(fake_api).with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (fake, format!("http://{}", addr))
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bridge-{}-{}", tag, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Config with both transports on `port`, pointed at the fake API.
pub fn config(api_base: &str, port: u16) -> Config {
    let mut config = Config::default();
    config.bind = "127.0.0.1".to_string();
    config.http.port = port;
    config.http.secret_key = HTTP_SECRET.to_string();
    config.ws.port = port;
    config.ws.secret_key = WS_SECRET.to_string();
    config.telegram.bot_token = "123:abc".to_string();
    config.telegram.target_group_id = GROUP_ID;
    config.telegram.api_base = api_base.to_string();
    config
}

pub fn signed(sender: &str, text: &str, secret: &str) -> InboundMessage {
    let timestamp = bridge::signature::now_millis().to_string();
    InboundMessage {
        sender: sender.to_string(),
        text: text.to_string(),
        signature: bridge::signature::sign(&timestamp, secret),
        timestamp,
    }
}

/// Poll `GET url` until it answers with JSON.
pub async fn wait_ready(url: &str) -> Value {
    let client = reqwest::Client::new();
    let mut last_err = None;
    for _ in 0..100 {
        match client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => return resp.json().await.expect("parse JSON"),
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("GET {} did not become ready within 5s; last error: {:?}", url, last_err);
}
