//! Live upstream and a capturing client for the proxy tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tunnel_core::{Fetch, HttpRequest, HttpResponse, Result};

/// Starts the mock upstream on an ephemeral port and returns its base URL.
pub async fn spawn_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));
    format!("http://{addr}")
}

/// Records outbound requests instead of sending them.
#[derive(Default)]
pub struct CapturingFetch {
    seen: Mutex<Vec<HttpRequest>>,
}

impl CapturingFetch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> HttpRequest {
        let mut seen = self.seen.lock();
        seen.pop().unwrap()
    }
}

#[async_trait]
impl Fetch for CapturingFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.seen.lock().push(request);
        Ok(HttpResponse::new(204))
    }
}
