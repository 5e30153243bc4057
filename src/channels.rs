//! Channel naming and the thread-safe conversation cache.
//!
//! Conversations are cached by Slack name (users are cached by id); an id
//! index keeps lookups by conversation id coherent with the name keying.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::slack::{self, retry_rate_limited, Client, Conversation, User};
use crate::users::Users;

// Channel threads are prefixed with "+" but they are not a conversation
// type: a thread is a message whose destination is within another message
// in a public, private, or multi-party conversation.
pub const CHANNEL_PREFIX_PUBLIC: char = '#';
pub const CHANNEL_PREFIX_PRIVATE: char = '@';
pub const CHANNEL_PREFIX_MPIM: char = '&';
pub const CHANNEL_PREFIX_THREAD: char = '+';

/// Channel type prefixes advertised in ISUPPORT, thread prefix included.
pub const SUPPORTED_CHANNEL_PREFIXES: &str = "#@&+";

/// MPIM IRC names longer than this are cut to 29 chars plus an ellipsis.
const MAX_MPIM_NAME_LEN: usize = 30;

/// Page size for `conversations.members`.
const MEMBERS_PAGE_SIZE: usize = 1000;

pub fn has_channel_prefix(name: &str) -> bool {
    name.starts_with([
        CHANNEL_PREFIX_PUBLIC,
        CHANNEL_PREFIX_PRIVATE,
        CHANNEL_PREFIX_MPIM,
        CHANNEL_PREFIX_THREAD,
    ])
}

/// Strip the IRC channel prefix, if any.
pub fn strip_channel_prefix(name: &str) -> &str {
    if has_channel_prefix(name) {
        &name[1..]
    } else {
        name
    }
}

/// A Slack conversation with the bookkeeping the IRC side needs: the cached
/// member-id list and, for thread pseudo-channels, the thread timestamp.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub conversation: Conversation,
    pub members: Vec<String>,
    pub thread_ts: Option<String>,
}

impl Channel {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            members: Vec::new(),
            thread_ts: None,
        }
    }

    /// A thread pseudo-channel rooted in `parent` at `thread_ts`. It shares
    /// the parent's conversation id; its name carries the timestamp.
    pub fn thread(parent: &Conversation, thread_ts: &str) -> Self {
        let mut conversation = parent.clone();
        conversation.name = format!("{}-{}", parent.name, thread_ts);
        Self {
            conversation,
            members: Vec::new(),
            thread_ts: Some(thread_ts.to_string()),
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation.id
    }

    /// The Slack-side name, which is also the cache key.
    pub fn slack_name(&self) -> &str {
        &self.conversation.name
    }

    pub fn is_public_channel(&self) -> bool {
        self.conversation.is_channel && !self.conversation.is_private
    }

    pub fn is_private_channel(&self) -> bool {
        (self.conversation.is_group || self.conversation.is_channel) && self.conversation.is_private
    }

    pub fn is_mpim(&self) -> bool {
        self.conversation.is_mpim
    }

    pub fn is_thread(&self) -> bool {
        self.thread_ts.is_some()
    }

    pub fn is_member(&self) -> bool {
        self.conversation.is_member
    }

    pub fn purpose(&self) -> &str {
        &self.conversation.purpose.value
    }

    /// The channel name as it appears on IRC:
    /// `#channel` for public channels, `@channel` for private ones,
    /// `&Gxxxx|nick1-nick2-nick3` for multi-party IMs, `+channel-ts` for
    /// thread pseudo-channels.
    pub fn irc_name(&self) -> String {
        if self.is_thread() {
            return format!("{CHANNEL_PREFIX_THREAD}{}", self.slack_name());
        }
        if self.is_public_channel() {
            return format!("{CHANNEL_PREFIX_PUBLIC}{}", self.slack_name());
        }
        if self.is_private_channel() {
            return format!("{CHANNEL_PREFIX_PRIVATE}{}", self.slack_name());
        }
        if self.is_mpim() {
            let name = format!("{CHANNEL_PREFIX_MPIM}{}|{}", self.id(), self.slack_name())
                .replace("mpdm-", "")
                .replace("--", "-");
            if name.chars().count() >= MAX_MPIM_NAME_LEN {
                let mut cut: String = name.chars().take(MAX_MPIM_NAME_LEN - 1).collect();
                cut.push('…');
                return cut;
            }
            return name;
        }
        tracing::warn!(id = %self.id(), "unknown channel type");
        "<unknown-channel-type>".to_string()
    }

    /// Compare the cached member list against `other_members`; returns the
    /// ids that joined and the ids that left.
    pub fn members_diff(&self, other_members: &[String]) -> (Vec<String>, Vec<String>) {
        let added = other_members
            .iter()
            .filter(|m| !self.members.contains(m))
            .cloned()
            .collect();
        let removed = self
            .members
            .iter()
            .filter(|m| !other_members.contains(m))
            .cloned()
            .collect();
        (added, removed)
    }
}

#[derive(Default)]
struct Inner {
    by_name: HashMap<String, Channel>,
    /// Conversation id -> cache key.
    id_index: HashMap<String, String>,
}

/// Cache of the team's conversations, fully prefetched once after login.
pub struct Channels {
    inner: Mutex<Inner>,
    pagination: usize,
}

impl Channels {
    pub fn new(pagination: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pagination,
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().by_name.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_name.clear();
        inner.id_index.clear();
    }

    /// Copy of the cache as name -> channel, to keep lock scopes short.
    pub fn as_map(&self) -> HashMap<String, Channel> {
        self.inner.lock().unwrap().by_name.clone()
    }

    /// Insert or update a channel. An id already cached under another name
    /// is updated in place (one cache entry per conversation id).
    pub fn insert(&self, channel: Channel) {
        let mut inner = self.inner.lock().unwrap();
        let name = channel.slack_name().to_string();
        let id = channel.id().to_string();
        if let Some(old_name) = inner.id_index.get(&id).cloned() {
            // Thread pseudo-channels share the parent's conversation id and
            // coexist with it; real conversations are re-keyed on rename.
            if old_name != name && !channel.is_thread() {
                let old_is_thread = inner
                    .by_name
                    .get(&old_name)
                    .is_some_and(|c| c.is_thread());
                if !old_is_thread {
                    inner.by_name.remove(&old_name);
                }
            }
        }
        if !channel.is_thread() {
            inner.id_index.insert(id, name.clone());
        }
        inner.by_name.insert(name, channel);
    }

    /// Look up by conversation id.
    pub fn by_id(&self, id: &str) -> Option<Channel> {
        let inner = self.inner.lock().unwrap();
        let name = inner.id_index.get(id)?;
        inner.by_name.get(name).cloned()
    }

    /// Look up by Slack or IRC name; IRC channel prefixes are stripped. MPIM
    /// IRC names (`&<id>|<names>`) resolve through the id index.
    pub fn by_name(&self, name: &str) -> Option<Channel> {
        let is_mpim_form = name.starts_with(CHANNEL_PREFIX_MPIM);
        let stripped = strip_channel_prefix(name);
        if is_mpim_form {
            if let Some((id, _)) = stripped.split_once('|') {
                return self.by_id(id);
            }
        }
        self.inner.lock().unwrap().by_name.get(stripped).cloned()
    }

    /// Replace the cached member list of a channel.
    pub fn update_members(&self, channel_id: &str, members: Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(name) = inner.id_index.get(channel_id).cloned() else {
            return;
        };
        if let Some(ch) = inner.by_name.get_mut(&name) {
            ch.members = members;
        }
    }

    /// Fetch the conversations with the given ids and update the cache in
    /// place. The conversations API has no batch lookup, so this is one call
    /// per id, each with bounded rate-limit retries.
    pub async fn fetch_by_ids(
        &self,
        client: &Client,
        skip_cache: bool,
        ids: &[String],
    ) -> Result<Vec<Channel>, slack::Error> {
        let mut to_retrieve: Vec<String> = Vec::new();
        let mut channels: Vec<Channel> = Vec::new();
        if skip_cache {
            to_retrieve = ids.to_vec();
        } else {
            for id in ids {
                match self.by_id(id) {
                    Some(ch) => channels.push(ch),
                    None => to_retrieve.push(id.clone()),
                }
            }
            tracing::debug!(
                fetching = to_retrieve.len(),
                requested = ids.len(),
                "fetching channel information"
            );
        }
        for id in &to_retrieve {
            let conversation =
                retry_rate_limited("Channels.fetch_by_ids", || client.conversation_info(id, true))
                    .await?;
            let ch = Channel::new(conversation);
            self.insert(ch.clone());
            channels.push(ch);
        }
        Ok(channels)
    }

    /// Fetch all public and private channels, replacing the cache. Thread
    /// pseudo-channels survive the replacement; they have no upstream
    /// counterpart to refetch.
    pub async fn fetch(
        &self,
        client: &Client,
        cancel: &CancellationToken,
    ) -> Result<usize, slack::Error> {
        tracing::info!("fetching all channels, might take a while on large Slack teams");
        let start = std::time::Instant::now();
        let mut fetched: Vec<Channel> = Vec::new();
        let mut cursor = String::new();
        loop {
            match client
                .conversations_list("public_channel,private_channel", &cursor, self.pagination)
                .await
            {
                Ok(page) => {
                    tracing::debug!(
                        retrieved = page.items.len(),
                        total = fetched.len(),
                        "retrieved channels page"
                    );
                    fetched.extend(page.items.into_iter().map(Channel::new));
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
        let count = fetched.len();
        let mut inner = self.inner.lock().unwrap();
        inner.by_name.retain(|_, ch| ch.is_thread());
        inner.id_index.clear();
        for ch in fetched {
            inner
                .id_index
                .insert(ch.id().to_string(), ch.slack_name().to_string());
            inner.by_name.insert(ch.slack_name().to_string(), ch);
        }
        drop(inner);
        tracing::info!(count, elapsed = ?start.elapsed(), "retrieved channels");
        Ok(count)
    }
}

/// Fetch the full member list of a conversation, paginated at
/// [`MEMBERS_PAGE_SIZE`] per call with bounded rate-limit retries, then
/// materialise the user records through the users cache.
pub async fn channel_members(
    client: &Client,
    users: &Users,
    channel_id: &str,
) -> Result<Vec<User>, slack::Error> {
    let mut member_ids: Vec<String> = Vec::new();
    let mut cursor = String::new();
    let mut page = 0usize;
    loop {
        let result = retry_rate_limited("channel_members", || {
            client.conversation_members(channel_id, &cursor, MEMBERS_PAGE_SIZE)
        })
        .await?;
        tracing::debug!(
            %channel_id,
            page,
            fetched = result.items.len(),
            total = member_ids.len() + result.items.len(),
            "fetched member ids"
        );
        member_ids.extend(result.items);
        if result.next_cursor.is_empty() {
            break;
        }
        cursor = result.next_cursor;
        page += 1;
    }
    tracing::debug!(count = member_ids.len(), "retrieving user records for members");
    users.fetch_by_ids(client, false, &member_ids).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str, name: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn public(id: &str, name: &str) -> Channel {
        let mut c = conversation(id, name);
        c.is_channel = true;
        Channel::new(c)
    }

    fn private(id: &str, name: &str) -> Channel {
        let mut c = conversation(id, name);
        c.is_group = true;
        c.is_private = true;
        Channel::new(c)
    }

    fn mpim(id: &str, name: &str) -> Channel {
        let mut c = conversation(id, name);
        c.is_mpim = true;
        Channel::new(c)
    }

    #[test]
    fn prefix_helpers() {
        assert!(has_channel_prefix("#general"));
        assert!(has_channel_prefix("@secret"));
        assert!(has_channel_prefix("&G1|a-b"));
        assert!(has_channel_prefix("+general-1.2"));
        assert!(!has_channel_prefix("general"));
        assert!(!has_channel_prefix(""));
        assert_eq!(strip_channel_prefix("#general"), "general");
        assert_eq!(strip_channel_prefix("general"), "general");
    }

    #[test]
    fn irc_name_public_and_private() {
        assert_eq!(public("C1", "general").irc_name(), "#general");
        assert_eq!(private("G1", "secret").irc_name(), "@secret");
    }

    #[test]
    fn irc_name_mpim_collapses_and_truncates() {
        let ch = mpim("G123", "mpdm-alice--bob--carol-1");
        let name = ch.irc_name();
        assert!(name.starts_with("&G123|"));
        assert!(!name.contains("mpdm-"));
        assert!(!name.contains("--"));

        let long = mpim(
            "G0ABCDEF1",
            "mpdm-somebody--someoneelse--anotherperson--yetanother-1",
        );
        let name = long.irc_name();
        assert_eq!(name.chars().count(), 30);
        assert_eq!(name.chars().last(), Some('…'));
    }

    #[test]
    fn irc_name_thread() {
        let parent = {
            let mut c = conversation("C1", "general");
            c.is_channel = true;
            c
        };
        let thread = Channel::thread(&parent, "1530000000.000100");
        assert_eq!(thread.irc_name(), "+general-1530000000.000100");
        assert_eq!(thread.id(), "C1");
        assert_eq!(thread.thread_ts.as_deref(), Some("1530000000.000100"));
    }

    #[test]
    fn members_diff_empty() {
        let ch = public("C1", "general");
        let (added, removed) = ch.members_diff(&[]);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn members_diff_non_empty() {
        let mut ch = public("C1", "general");
        ch.members = vec!["u1".to_string(), "removed1".to_string()];
        let (added, removed) =
            ch.members_diff(&["u1".to_string(), "added1".to_string()]);
        assert_eq!(added, vec!["added1"]);
        assert_eq!(removed, vec!["removed1"]);
    }

    #[test]
    fn cache_round_trips_irc_names() {
        let channels = Channels::new(0);
        channels.insert(public("C1", "general"));
        channels.insert(private("G1", "secret"));
        channels.insert(mpim("G2", "mpdm-a--b-1"));

        for name in ["#general", "@secret"] {
            let ch = channels.by_name(name).unwrap();
            assert_eq!(ch.irc_name(), name);
        }
        let m = channels.by_name("&G2|a-b-1").unwrap();
        assert_eq!(m.id(), "G2");
        // IRC-prefix-free lookup also works
        assert!(channels.by_name("general").is_some());
    }

    #[test]
    fn insert_same_id_updates_in_place() {
        let channels = Channels::new(0);
        channels.insert(public("C1", "oldname"));
        channels.insert(public("C1", "newname"));
        assert_eq!(channels.count(), 1);
        assert_eq!(channels.by_id("C1").unwrap().slack_name(), "newname");
        assert!(channels.by_name("#oldname").is_none());
    }

    #[test]
    fn thread_coexists_with_parent() {
        let channels = Channels::new(0);
        let parent = public("C1", "general");
        channels.insert(parent.clone());
        channels.insert(Channel::thread(&parent.conversation, "1.2"));
        assert_eq!(channels.count(), 2);
        // id lookups keep resolving to the parent
        assert_eq!(channels.by_id("C1").unwrap().slack_name(), "general");
        let th = channels.by_name("+general-1.2").unwrap();
        assert!(th.is_thread());
    }

    #[test]
    fn update_members_stores_list() {
        let channels = Channels::new(0);
        channels.insert(public("C1", "general"));
        channels.update_members("C1", vec!["U1".to_string(), "U2".to_string()]);
        assert_eq!(channels.by_id("C1").unwrap().members.len(), 2);
    }
}
