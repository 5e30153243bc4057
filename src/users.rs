//! Thread-safe cache of the Slack team's users, keyed by Slack id.
//!
//! Populated lazily on the first channel join and kept current from
//! `team_join` / `user_change` events.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::slack::{self, retry_rate_limited, Client, User};

/// `users.info` accepts at most this many ids per call.
const FETCH_CHUNK_SIZE: usize = 1000;

pub struct Users {
    users: Mutex<HashMap<String, User>>,
    pagination: usize,
}

impl Users {
    pub fn new(pagination: usize) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            pagination,
        }
    }

    /// Number of cached users.
    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.users.lock().unwrap().clear();
    }

    /// Fetch the users with the given ids, serving from the cache unless
    /// `skip_cache` is set, and update the cache in place. Fetches run in
    /// chunks of at most [`FETCH_CHUNK_SIZE`] ids with bounded rate-limit
    /// retries per chunk. A final count mismatch is an error; whatever was
    /// fetched stays reachable through the cache.
    pub async fn fetch_by_ids(
        &self,
        client: &Client,
        skip_cache: bool,
        ids: &[String],
    ) -> Result<Vec<User>, slack::Error> {
        let mut to_retrieve: Vec<String> = Vec::new();
        let mut already_retrieved: Vec<User> = Vec::new();
        if skip_cache {
            to_retrieve = ids.to_vec();
        } else {
            let users = self.users.lock().unwrap();
            for id in ids {
                match users.get(id) {
                    Some(u) => already_retrieved.push(u.clone()),
                    None => to_retrieve.push(id.clone()),
                }
            }
            drop(users);
            tracing::debug!(
                fetching = to_retrieve.len(),
                requested = ids.len(),
                cached = already_retrieved.len(),
                "fetching user information"
            );
        }

        let mut fetched: Vec<User> = Vec::with_capacity(to_retrieve.len());
        for chunk in to_retrieve.chunks(FETCH_CHUNK_SIZE) {
            let users =
                retry_rate_limited("Users.fetch_by_ids", || client.users_info(chunk)).await?;
            if users.len() != chunk.len() {
                tracing::warn!(
                    want = chunk.len(),
                    got = users.len(),
                    "user fetch returned fewer records than requested"
                );
            }
            let mut cache = self.users.lock().unwrap();
            for user in &users {
                cache.insert(user.id.clone(), user.clone());
            }
            drop(cache);
            fetched.extend(users);
        }

        let mut all = already_retrieved;
        all.extend(fetched);
        if all.len() != ids.len() {
            return Err(slack::Error::Incomplete {
                got: all.len(),
                want: ids.len(),
            });
        }
        Ok(all)
    }

    /// Fetch the whole team, replacing the cache. Rate-limit sleeps surrender
    /// to `cancel`. Returns the number of users retrieved.
    pub async fn fetch(
        &self,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<usize, slack::Error> {
        tracing::info!("fetching all users, might take a while on large Slack teams");
        let start = std::time::Instant::now();
        let mut users: HashMap<String, User> = HashMap::new();
        let mut cursor = String::new();
        loop {
            match client.users_list(&cursor, self.pagination).await {
                Ok(page) => {
                    tracing::debug!(
                        retrieved = page.items.len(),
                        total = users.len(),
                        "retrieved users page"
                    );
                    for user in page.items {
                        users.insert(user.id.clone(), user);
                    }
                    if page.next_cursor.is_empty() {
                        break;
                    }
                    cursor = page.next_cursor;
                }
                Err(slack::Error::RateLimited(delay)) => {
                    tracing::warn!(?delay, "hit Slack API rate limiter, waiting");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(slack::Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
        let count = users.len();
        tracing::info!(count, elapsed = ?start.elapsed(), "retrieved users");
        *self.users.lock().unwrap() = users;
        Ok(count)
    }

    /// Look up a user by Slack id.
    pub fn by_id(&self, id: &str) -> Option<User> {
        let user = self.users.lock().unwrap().get(id).cloned();
        if user.is_none() {
            tracing::warn!(%id, "unknown user ID");
        }
        user
    }

    /// Look up a user by Slack name.
    pub fn by_name(&self, name: &str) -> Option<User> {
        let user = self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.name == name)
            .cloned();
        if user.is_none() {
            tracing::warn!(%name, "unknown user name");
        }
        user
    }

    /// Map user ids to names, preserving order. Unknown ids are dropped, so
    /// the result may be shorter than the input; acceptable for NAMES lists.
    pub fn ids_to_names(&self, ids: &[String]) -> Vec<String> {
        let users = self.users.lock().unwrap();
        let mut names = Vec::with_capacity(ids.len());
        for id in ids {
            match users.get(id) {
                Some(u) => names.push(u.name.clone()),
                None => tracing::warn!(%id, "ids_to_names: unknown user ID"),
            }
        }
        names
    }

    #[cfg(test)]
    fn seed(&self, seed_users: Vec<User>) {
        let mut users = self.users.lock().unwrap();
        for user in seed_users {
            users.insert(user.id.clone(), user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn lookups_on_empty_cache() {
        let users = Users::new(0);
        assert_eq!(users.count(), 0);
        assert!(users.by_id("UNOPE").is_none());
        assert!(users.by_name("nope").is_none());
    }

    #[test]
    fn ids_to_names_preserves_order_and_drops_unknown() {
        let users = Users::new(0);
        users.seed(vec![user("U1", "alice"), user("U2", "bob")]);
        let names = users.ids_to_names(&[
            "U2".to_string(),
            "UX".to_string(),
            "U1".to_string(),
        ]);
        assert_eq!(names, vec!["bob", "alice"]);
    }

    async fn stub_users_list() -> ([(axum::http::HeaderName, &'static str); 1], &'static str) {
        (
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            r#"{"ok": true, "members": [{"id": "UABCD", "name": "insomniac"}], "response_metadata": {"next_cursor": ""}}"#,
        )
    }

    async fn start_stub() -> String {
        let app = Router::new().route("/api/users.list", post(stub_users_list));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api")
    }

    #[tokio::test]
    async fn fetch_populates_cache_and_lookups() {
        let base = start_stub().await;
        let client = Client::with_base_url("test-token", "", false, &base).unwrap();
        let users = Users::new(10);
        let count = users
            .fetch(&client, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(users.count(), 1);

        let by_id = users.by_id("UABCD").unwrap();
        assert_eq!(by_id.name, "insomniac");
        let by_name = users.by_name("insomniac").unwrap();
        assert_eq!(by_name.id, "UABCD");
        assert_eq!(users.ids_to_names(&["UABCD".to_string()]), vec!["insomniac"]);
    }

    #[tokio::test]
    async fn fetch_twice_is_idempotent() {
        let base = start_stub().await;
        let client = Client::with_base_url("test-token", "", false, &base).unwrap();
        let users = Users::new(10);
        users.fetch(&client, &CancellationToken::new()).await.unwrap();
        users.fetch(&client, &CancellationToken::new()).await.unwrap();
        assert_eq!(users.count(), 1);
        assert_eq!(users.by_id("UABCD").unwrap().name, "insomniac");
    }
}
