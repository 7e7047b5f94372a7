//! Upstream HTTP server the proxy tests talk to.
//!
//! Each route exercises one response shape the tunnel has to carry: JSON,
//! text, raw bytes, empty bodies, falsy JSON, redirects and slow replies.

use std::{collections::BTreeMap, collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect},
    routing::{any, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateItem {
    pub name: String,
}

/// What `/echo` saw.
#[derive(Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub const TEXT_BODY: &str = "hello from upstream";
pub const BINARY_BODY: [u8; 4] = [0, 1, 2, 255];

pub type Db = Arc<RwLock<HashMap<Uuid, Item>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/api/items", get(list_items).post(create_item))
        .route("/api/items/{id}", get(get_item).delete(delete_item))
        .route("/echo", any(echo))
        .route("/text", get(text))
        .route("/bytes", get(binary))
        .route("/form", post(form))
        .route("/empty", get(|| async { StatusCode::NO_CONTENT }))
        .route("/redirect", get(|| async { Redirect::temporary("/text") }))
        .route("/slow", get(slow))
        .route("/falsy", get(|| async { Json(false) }))
        .route("/zero", get(|| async { Json(0) }))
        .route("/status/{code}", get(status))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_items(State(db): State<Db>) -> Json<Vec<Item>> {
    let items = db.read().await;
    Json(items.values().cloned().collect())
}

async fn create_item(State(db): State<Db>, Json(input): Json<CreateItem>) -> (StatusCode, Json<Item>) {
    let item = Item {
        id: Uuid::new_v4(),
        name: input.name,
    };
    db.write().await.insert(item.id, item.clone());
    tracing::debug!(id = %item.id, "created item");
    (StatusCode::CREATED, Json(item))
}

async fn get_item(State(db): State<Db>, Path(id): Path<Uuid>) -> Result<Json<Item>, StatusCode> {
    let items = db.read().await;
    items.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_item(State(db): State<Db>, Path(id): Path<Uuid>) -> StatusCode {
    match db.write().await.remove(&id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn text() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], TEXT_BODY)
}

async fn binary() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/octet-stream")], BINARY_BODY.to_vec())
}

async fn form(Form(fields): Form<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(fields)
}

async fn slow(Query(params): Query<HashMap<String, u64>>) -> &'static str {
    let ms = params.get("ms").copied().unwrap_or(1_000);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_serializes_to_json() {
        let item = Item {
            id: Uuid::nil(),
            name: "Widget".to_string(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["name"], "Widget");
    }

    #[test]
    fn create_item_requires_a_name() {
        let result: Result<CreateItem, _> = serde_json::from_str(r#"{"title":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn echo_query_is_optional() {
        let echo: Echo = serde_json::from_str(r#"{"method":"GET","path":"/echo","headers":{},"body":""}"#).unwrap();
        assert!(echo.query.is_none());
    }
}
