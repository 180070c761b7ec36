//! Small axum server for exercising the downloader against canned replies.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct Reply {
    status: u16,
    body: Vec<u8>,
}

impl Reply {
    pub(crate) fn ok(body: &str) -> Self {
        Self::bytes(200, body.as_bytes().to_vec())
    }

    pub(crate) fn status(status: u16) -> Self {
        Self::bytes(status, format!("status {}", status).into_bytes())
    }

    pub(crate) fn bytes(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }
}

#[derive(Clone, Default)]
struct Script {
    routes: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// Each path answers its replies in order, repeating the last one forever.
pub(crate) struct TestServer {
    base: Url,
    script: Script,
    task: JoinHandle<()>,
}

impl TestServer {
    pub(crate) async fn start(routes: Vec<(&str, Vec<Reply>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let script = Script {
            routes: Arc::new(Mutex::new(
                routes
                    .into_iter()
                    .map(|(path, replies)| (path.to_string(), replies.into()))
                    .collect(),
            )),
            hits: Arc::default(),
        };

        let app = Router::new().fallback(answer).with_state(script.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base, script, task }
    }

    pub(crate) fn url(&self, path: &str) -> Url {
        self.base.join(path).unwrap()
    }

    pub(crate) fn hits(&self, path: &str) -> usize {
        self.script.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(State(script): State<Script>, uri: Uri) -> (StatusCode, Vec<u8>) {
    let path = uri.path().to_string();
    *script.hits.lock().unwrap().entry(path.clone()).or_default() += 1;

    let reply = {
        let mut routes = script.routes.lock().unwrap();
        match routes.get_mut(&path) {
            Some(replies) if replies.len() > 1 => replies.pop_front(),
            Some(replies) => replies.front().cloned(),
            None => None,
        }
    };
    let reply = reply.unwrap_or_else(|| Reply::status(404));
    let status = StatusCode::from_u16(reply.status).unwrap();
    (status, reply.body)
}
