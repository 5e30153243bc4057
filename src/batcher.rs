//! Outbound message batching.
//!
//! IRC clients send one line per message; Slack users would rather see one
//! post. The batcher coalesces messages to the same target over a one-second
//! window (reset on every new message) and issues a single `chat.postMessage`
//! per target when the window closes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::slack::Client;

/// One message headed for Slack.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Conversation id, channel name, or `@nick`.
    pub target: String,
    /// Thread timestamp when replying into a thread.
    pub thread_ts: Option<String>,
    pub text: String,
}

const BATCH_WINDOW: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Buffer {
    text: String,
    /// Thread timestamp of the last message queued for this target.
    thread_ts: Option<String>,
}

/// Drain `rx`, coalescing per-target text until the window closes. Returns
/// when the channel closes; text still buffered at that point is dropped.
pub async fn run(client: Arc<Client>, mut rx: mpsc::Receiver<OutboundMessage>) {
    let mut buffers: HashMap<String, Buffer> = HashMap::new();
    let timer = tokio::time::sleep(BATCH_WINDOW);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(msg) => {
                    tracing::debug!(target = %msg.target, "queued outbound message");
                    let buf = buffers.entry(msg.target).or_default();
                    buf.text.push_str(&msg.text);
                    buf.text.push('\n');
                    buf.thread_ts = msg.thread_ts;
                    timer.as_mut().reset(Instant::now() + BATCH_WINDOW);
                }
                None => return,
            },
            () = &mut timer, if !buffers.is_empty() => {
                for (target, buf) in buffers.drain() {
                    let text = buf.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Err(e) = client
                        .post_message(&target, text, buf.thread_ts.as_deref())
                        .await
                    {
                        tracing::warn!(%target, error = %e, "failed to post message to Slack");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, State};
    use axum::routing::post;
    use axum::Router;
    use std::sync::Mutex;

    type Posts = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn record_post(
        State(posts): State<Posts>,
        Form(params): Form<HashMap<String, String>>,
    ) -> ([(axum::http::HeaderName, &'static str); 1], &'static str) {
        posts.lock().unwrap().push(params);
        (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            r#"{"ok": true}"#,
        )
    }

    async fn start_stub(posts: Posts) -> String {
        let app = Router::new()
            .route("/api/chat.postMessage", post(record_post))
            .with_state(posts);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }

    #[tokio::test]
    async fn coalesces_same_target_in_order() {
        let posts: Posts = Arc::new(Mutex::new(Vec::new()));
        let base = start_stub(posts.clone()).await;
        let client = Arc::new(Client::with_base_url("tok", "", false, &base).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(client, rx));

        for text in ["first", "second"] {
            tx.send(OutboundMessage {
                target: "C1".to_string(),
                thread_ts: None,
                text: text.to_string(),
            })
            .await
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(1600)).await;

        let recorded = posts.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["channel"], "C1");
        assert_eq!(recorded[0]["text"], "first\nsecond");
        assert!(!recorded[0].contains_key("thread_ts"));

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn carries_thread_ts_of_last_message() {
        let posts: Posts = Arc::new(Mutex::new(Vec::new()));
        let base = start_stub(posts.clone()).await;
        let client = Arc::new(Client::with_base_url("tok", "", false, &base).unwrap());
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(client, rx));

        tx.send(OutboundMessage {
            target: "C1".to_string(),
            thread_ts: Some("1.2".to_string()),
            text: "threaded".to_string(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;

        let recorded = posts.lock().unwrap().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["thread_ts"], "1.2");

        drop(tx);
        task.await.unwrap();
    }
}
