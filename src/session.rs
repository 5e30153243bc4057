//! Per-connection context for a logged-in client.
//!
//! A `Session` is created by the login sequence once Slack accepted the
//! credentials. It is shared between the command handlers, the event
//! projector and the batcher; everything it references is owned by this one
//! connection. The session must not outlive its socket: the cancellation
//! token ties every task spawned for the connection to the socket lifetime.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::batcher::OutboundMessage;
use crate::channels::Channels;
use crate::expand;
use crate::files::FileHandler;
use crate::irc;
use crate::slack::{self, Client, Conversation, MessageItem, User};
use crate::users::Users;

pub struct Session {
    pub server_name: String,
    pub chunk_size: usize,
    pub peer_ip: IpAddr,
    /// Nick the client asked for before login; the Slack nick wins.
    pub orig_nick: String,
    /// Our own Slack user record.
    pub me: User,
    pub team_name: String,
    /// True when the password was a bare legacy token.
    pub legacy_token: bool,
    pub client: Arc<Client>,
    pub users: Arc<Users>,
    pub channels: Arc<Channels>,
    pub files: Arc<FileHandler>,
    pub slack_connected: AtomicBool,
    /// Cancelled when either side of the gateway goes away.
    pub cancel: CancellationToken,
    tx: mpsc::Sender<String>,
    post_tx: mpsc::Sender<OutboundMessage>,
    conversation_cache: tokio::sync::Mutex<HashMap<String, Conversation>>,
    /// Conversations already announced to the client with a JOIN burst.
    announced: Mutex<HashSet<String>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_name: String,
        chunk_size: usize,
        peer_ip: IpAddr,
        orig_nick: String,
        me: User,
        team_name: String,
        legacy_token: bool,
        client: Arc<Client>,
        users: Arc<Users>,
        channels: Arc<Channels>,
        files: Arc<FileHandler>,
        cancel: CancellationToken,
        tx: mpsc::Sender<String>,
        post_tx: mpsc::Sender<OutboundMessage>,
    ) -> Self {
        Self {
            server_name,
            chunk_size,
            peer_ip,
            orig_nick,
            me,
            team_name,
            legacy_token,
            client,
            users,
            channels,
            files,
            slack_connected: AtomicBool::new(false),
            cancel,
            tx,
            post_tx,
            conversation_cache: tokio::sync::Mutex::new(HashMap::new()),
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// Our IRC nick, which is the Slack user name.
    pub fn nick(&self) -> &str {
        &self.me.name
    }

    pub fn user_id(&self) -> &str {
        &self.me.id
    }

    /// IRC source mask for server-originated messages about ourselves.
    pub fn mask(&self) -> String {
        format!("{}!{}@{}", self.nick(), self.user_id(), self.peer_ip)
    }

    /// Source mask for another user.
    pub fn mask_for(&self, nick: &str, user_id: &str) -> String {
        format!("{}!{}@{}", nick, user_id, self.server_name)
    }

    pub fn set_connected(&self, connected: bool) {
        self.slack_connected.store(connected, Ordering::SeqCst);
    }

    /// Send one raw IRC line; CRLF is appended.
    pub async fn send_line(&self, line: &str) {
        if self.tx.send(format!("{line}\r\n")).await.is_err() {
            tracing::warn!("failed to send IRC line: connection writer is gone");
        }
    }

    /// Send a numeric reply, chunking the description when it exceeds the
    /// configured chunk size.
    pub async fn send_numeric(&self, code: u16, args: &str, desc: &str) {
        let preamble = irc::numeric_preamble(&self.server_name, code, args);
        for chunk in irc::split_reply(&preamble, desc, self.chunk_size) {
            tracing::debug!(reply = %chunk.trim_end(), "sending numeric reply");
            if self.tx.send(chunk).await.is_err() {
                tracing::warn!("failed to send numeric reply: connection writer is gone");
                return;
            }
        }
    }

    /// Send an ERR_UNKNOWNERROR (400) to the client and log it.
    pub async fn send_unknown_error(&self, msg: &str) {
        tracing::warn!(%msg, "sending ERR_UNKNOWNERROR (400) to client");
        self.send_numeric(irc::ERR_UNKNOWNERROR, self.nick(), msg).await;
    }

    /// JOIN burst for a channel: JOIN, RPL_TOPIC, RPL_NAMREPLY (when there
    /// are members to list) and RPL_ENDOFNAMES.
    pub async fn send_chan_info(&self, chan_name: &str, topic: &str, member_names: &[String]) {
        self.send_line(&format!(":{} JOIN {}", self.mask(), chan_name))
            .await;
        self.send_numeric(
            irc::RPL_TOPIC,
            &format!("{} {}", self.nick(), chan_name),
            topic,
        )
        .await;
        if !member_names.is_empty() {
            self.send_numeric(
                irc::RPL_NAMREPLY,
                &format!("{} = {}", self.nick(), chan_name),
                &member_names.join(" "),
            )
            .await;
        }
        self.send_numeric(
            irc::RPL_ENDOFNAMES,
            &format!("{} {}", self.nick(), chan_name),
            "End of NAMES list",
        )
        .await;
        tracing::info!(%chan_name, "joined channel");
    }

    /// Queue a message for the outbound batcher.
    pub async fn post_text_message(&self, target: &str, text: &str, thread_ts: Option<&str>) {
        let msg = OutboundMessage {
            target: target.to_string(),
            thread_ts: thread_ts.map(|s| s.to_string()),
            text: text.to_string(),
        };
        if self.post_tx.send(msg).await.is_err() {
            tracing::warn!(%target, "outbound batcher is gone, dropping message");
        }
    }

    /// User record by Slack id, from the cache.
    pub fn get_user_info(&self, user_id: &str) -> Option<User> {
        self.users.by_id(user_id)
    }

    /// Replace `<@UID>` tags with `@nickname` using the users cache.
    pub fn expand_user_ids(&self, text: &str) -> String {
        expand::expand_user_ids(text, |id| self.users.by_id(id).map(|u| u.name))
    }

    /// Memoised `conversations.info`.
    pub async fn get_conversation_info(&self, conversation: &str) -> Result<Conversation, slack::Error> {
        let mut cache = self.conversation_cache.lock().await;
        if let Some(c) = cache.get(conversation) {
            return Ok(c.clone());
        }
        let info = self.client.conversation_info(conversation, false).await?;
        cache.insert(conversation.to_string(), info.clone());
        Ok(info)
    }

    /// First message of the thread `thread_ts` in `channel`.
    pub async fn get_thread_opener(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<MessageItem, slack::Error> {
        let msgs = self.client.conversation_replies(channel, thread_ts).await?;
        msgs.into_iter()
            .next()
            .ok_or_else(|| slack::Error::Api("thread_not_found".to_string()))
    }

    /// True the first time `key` is announced; later calls return false.
    pub fn announce_once(&self, key: &str) -> bool {
        self.announced.lock().unwrap().insert(key.to_string())
    }
}
