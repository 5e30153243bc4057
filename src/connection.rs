//! Per-client connection handler.
//!
//! Each accepted socket gets a read loop that validates IRC frames and
//! dispatches commands. Login is a small state machine: once PASS, NICK and
//! USER have all been seen (in any order), one connection attempt against
//! Slack is made; success produces the [`Session`] every later command is
//! served from, failure closes the socket.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::auth;
use crate::batcher;
use crate::channels::{self, channel_members, strip_channel_prefix, Channel};
use crate::channels::{CHANNEL_PREFIX_MPIM, CHANNEL_PREFIX_THREAD, SUPPORTED_CHANNEL_PREFIXES};
use crate::config::ServerConfig;
use crate::events;
use crate::expand::parse_mentions;
use crate::files::FileHandler;
use crate::irc;
use crate::session::Session;
use crate::slack::{self, rtm};
use crate::users::Users;

/// Hard deadline on the whole Slack login sequence handshake.
const SLACK_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pre-login registration state.
#[derive(Default)]
struct Registration {
    password: Option<String>,
    nick: Option<String>,
    realname: Option<String>,
    /// Set once the single allowed connection attempt has been made.
    attempted: bool,
}

impl Registration {
    fn ready(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
            && self.nick.as_deref().is_some_and(|n| !n.is_empty())
            && self.realname.as_deref().is_some_and(|r| !r.is_empty())
    }
}

/// Handle a plain TCP connection.
pub async fn handle(stream: TcpStream, config: Arc<ServerConfig>) -> Result<()> {
    let peer = stream.peer_addr()?;
    tracing::info!(%peer, "new connection");
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, peer.ip(), config).await
}

/// Handle a generic async stream (for TLS or other wrappers).
pub async fn handle_generic<S>(stream: S, peer_ip: IpAddr, config: Arc<ServerConfig>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    handle_io(BufReader::new(reader), writer, peer_ip, config).await
}

async fn handle_io<R, W>(
    mut reader: BufReader<R>,
    mut writer: W,
    peer_ip: IpAddr,
    config: Arc<ServerConfig>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    // All IRC output funnels through this channel; the writer task is the
    // serialising boundary between the command handlers and the event
    // projector.
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let write_handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::warn!("write error: {e}");
                break;
            }
        }
    });

    let mut conn = Conn {
        tx,
        peer_ip,
        config,
        cancel: CancellationToken::new(),
        reg: Registration::default(),
        session: None,
    };

    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = conn.cancel.cancelled() => break,
            r = reader.read_line(&mut line) => r,
        };
        match read {
            Ok(0) => {
                tracing::info!(%peer_ip, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(%peer_ip, "read error: {e}");
                break;
            }
            Ok(_) => {}
        }
        if !line.ends_with("\r\n") {
            tracing::warn!("invalid frame: not terminated with CRLF");
            continue;
        }
        tracing::debug!(line = %line.trim_end(), "<- client");
        let Some(msg) = irc::Message::parse(&line) else {
            continue;
        };
        if msg.command == "QUIT" {
            break;
        }
        conn.dispatch(msg).await;
    }

    // Cancelling tears down the RTM pump, the projector and the batcher.
    conn.cancel.cancel();
    write_handle.abort();
    tracing::info!(%peer_ip, "connection closed");
    Ok(())
}

struct Conn {
    tx: mpsc::Sender<String>,
    peer_ip: IpAddr,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
    reg: Registration,
    session: Option<Arc<Session>>,
}

impl Conn {
    fn nick_or_star(&self) -> String {
        match &self.session {
            Some(s) => s.nick().to_string(),
            None => self.reg.nick.clone().unwrap_or_else(|| "*".to_string()),
        }
    }

    async fn send_line(&self, line: &str) {
        if self.tx.send(format!("{line}\r\n")).await.is_err() {
            tracing::warn!("failed to send IRC line: writer is gone");
        }
    }

    async fn send_numeric(&self, code: u16, args: &str, desc: &str) {
        let preamble = irc::numeric_preamble(&self.config.server_name, code, args);
        for chunk in irc::split_reply(&preamble, desc, self.config.chunk_size) {
            if self.tx.send(chunk).await.is_err() {
                tracing::warn!("failed to send numeric reply: writer is gone");
                return;
            }
        }
    }

    async fn send_unknown_error(&self, msg: &str) {
        tracing::warn!(%msg, "sending ERR_UNKNOWNERROR (400) to client");
        self.send_numeric(irc::ERR_UNKNOWNERROR, &self.nick_or_star(), msg)
            .await;
    }

    async fn dispatch(&mut self, msg: irc::Message) {
        match msg.command.as_str() {
            "CAP" => self.handle_cap(&msg).await,
            "NICK" => self.handle_nick(&msg).await,
            "USER" => self.handle_user(&msg).await,
            "PASS" => self.handle_pass(&msg).await,
            "PING" => self.handle_ping(&msg).await,
            "MODE" => self.handle_mode(&msg).await,
            "JOIN" => self.handle_join(&msg).await,
            "PART" => self.handle_part(&msg).await,
            "PRIVMSG" => self.handle_privmsg(&msg).await,
            "TOPIC" => self.handle_topic(&msg).await,
            "WHO" => self.handle_who(&msg).await,
            "WHOIS" => self.handle_whois(&msg).await,
            "NAMES" => self.handle_names(&msg).await,
            _ => {
                tracing::debug!(command = %msg.command, "no handler for command, ignoring");
            }
        }
    }

    /// Attempt the Slack connection once all credentials are known. Each of
    /// the NICK/USER/PASS handlers calls this; the `attempted` flag makes
    /// sure only the first complete set triggers it.
    async fn try_connect(&mut self) {
        if self.session.is_some() || self.reg.attempted || !self.reg.ready() {
            return;
        }
        self.reg.attempted = true;
        match self.connect_to_slack().await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                tracing::warn!("cannot connect to Slack: {e:#}");
                // Login failure closes the IRC connection.
                self.cancel.cancel();
            }
        }
    }

    async fn connect_to_slack(&self) -> Result<Arc<Session>> {
        let password = self.reg.password.clone().unwrap_or_default();
        let creds = auth::parse_credentials(&password)?;
        let client = Arc::new(slack::Client::new(
            &creds.token,
            &creds.cookie,
            self.config.slack_debug,
        )?);

        tracing::info!("starting Slack client");
        let rtm = tokio::time::timeout(
            SLACK_CONNECT_TIMEOUT,
            rtm::connect(&client, self.cancel.clone()),
        )
        .await
        .map_err(|_| anyhow!("connection to Slack timed out after {SLACK_CONNECT_TIMEOUT:?}"))??;
        tracing::info!(
            url = %rtm.info.url,
            user = %rtm.info.me.name,
            team = %rtm.info.team.name,
            "client info"
        );

        // The users cache is not populated yet at this point, so ask the API
        // directly for our own record.
        let me = client.user_info(&rtm.info.me.id).await.with_context(|| {
            format!(
                "cannot get info for user {} (ID: {})",
                rtm.info.me.name, rtm.info.me.id
            )
        })?;

        let users = Arc::new(Users::new(self.config.pagination));
        let channels_cache = Arc::new(channels::Channels::new(self.config.pagination));
        // Users are fetched lazily upon joining channels.
        channels_cache
            .fetch(&client, &self.cancel)
            .await
            .context("failed to fetch channels")?;

        let files = Arc::new(FileHandler::new(
            &creds.token,
            self.config.download_location.clone(),
            self.config.file_prefix.clone(),
        ));

        let (post_tx, post_rx) = mpsc::channel(64);
        let session = Arc::new(Session::new(
            self.config.server_name.clone(),
            self.config.chunk_size,
            self.peer_ip,
            self.reg.nick.clone().unwrap_or_default(),
            me,
            rtm.info.team.name.clone(),
            creds.is_legacy(),
            client.clone(),
            users,
            channels_cache,
            files,
            self.cancel.clone(),
            self.tx.clone(),
            post_tx,
        ));
        session.set_connected(true);

        tokio::spawn(batcher::run(client, post_rx));
        after_logging_in(&session).await?;
        // The event listener starts only once login has fully completed.
        tokio::spawn(events::run(session.clone(), rtm.events));
        Ok(session)
    }

    async fn handle_cap(&self, msg: &irc::Message) {
        match msg.params.first().map(|s| s.as_str()) {
            Some("LS") => {
                // No capabilities advertised.
                self.send_line(&format!(":{} CAP * LS :", self.config.server_name))
                    .await;
            }
            _ => tracing::debug!(params = ?msg.params, "ignoring CAP subcommand"),
        }
    }

    async fn handle_nick(&mut self, msg: &irc::Message) {
        let nick = msg
            .params
            .first()
            .cloned()
            .or_else(|| msg.trailing.clone())
            .unwrap_or_default();
        if nick.is_empty() {
            tracing::warn!("invalid NICK command: no nickname");
            return;
        }
        if let Some(session) = &self.session {
            // The nick is bound to the Slack identity; force it back.
            if nick != session.nick() {
                self.send_line(&format!(":{} NICK {}", nick, session.nick()))
                    .await;
            }
            return;
        }
        self.reg.nick = Some(nick);
        self.try_connect().await;
    }

    async fn handle_user(&mut self, msg: &irc::Message) {
        // The username is ignored; the Slack ID takes its place. Only the
        // real name is kept.
        let realname = msg
            .trailing
            .clone()
            .or_else(|| msg.params.get(3).cloned())
            .unwrap_or_default();
        self.reg.realname = Some(realname);
        self.try_connect().await;
    }

    async fn handle_pass(&mut self, msg: &irc::Message) {
        if msg.params.len() != 1 {
            // Arguments deliberately not logged: they may contain tokens.
            tracing::warn!("invalid PASS arguments");
            self.send_numeric(irc::ERR_PASSWDMISMATCH, &self.nick_or_star(), "Invalid password")
                .await;
            return;
        }
        let password = msg.params[0].clone();
        if let Err(e) = auth::parse_credentials(&password) {
            tracing::warn!("rejecting PASS credentials: {e}");
            self.send_numeric(irc::ERR_PASSWDMISMATCH, &self.nick_or_star(), "Invalid password")
                .await;
            return;
        }
        self.reg.password = Some(password);
        self.try_connect().await;
    }

    async fn handle_ping(&self, msg: &irc::Message) {
        let mut reply = format!("PONG {}", msg.params.join(" "));
        if let Some(trailing) = &msg.trailing {
            reply.push_str(&format!(" :{trailing}"));
        }
        self.send_line(&reply).await;
    }

    async fn handle_mode(&self, msg: &irc::Message) {
        match msg.params.len() {
            0 => tracing::warn!("invalid MODE command: no arguments"),
            1 => {
                // Get-mode request; there are no modes.
                self.send_numeric(
                    irc::RPL_CHANNELMODEIS,
                    &format!("{} {} +", self.nick_or_star(), msg.params[0]),
                    "",
                )
                .await;
            }
            _ => {
                self.send_numeric(
                    irc::ERR_UMODEUNKNOWNFLAG,
                    &msg.params[0],
                    &format!("Unknown MODE flags {}", msg.params[1..].join(" ")),
                )
                .await;
            }
        }
    }

    async fn handle_join(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring JOIN before login");
            return;
        };
        if msg.params.len() != 1 {
            self.send_unknown_error("Invalid JOIN command").await;
            return;
        }
        // A multi-join (/join #chan1,#chan2) is joined one channel at a time.
        for channame in msg.params[0].split(',') {
            if channame.starts_with(CHANNEL_PREFIX_MPIM)
                || channame.starts_with(CHANNEL_PREFIX_THREAD)
            {
                tracing::debug!(%channame, "ignoring JOIN, cannot join multi-party IMs or threads");
                continue;
            }
            let conversation = match session
                .client
                .conversations_join(strip_channel_prefix(channame))
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(%channame, "cannot join channel: {e}");
                    continue;
                }
            };
            let ch = Channel::new(conversation);
            session.channels.insert(ch.clone());
            if let Err(e) = join_channel(&session, &ch).await {
                tracing::warn!(channel = %ch.slack_name(), "failed to join channel: {e}");
            }
        }
    }

    async fn handle_part(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring PART before login");
            return;
        };
        if msg.params.len() != 1 {
            self.send_unknown_error("Invalid PART command").await;
            return;
        }
        let channame = strip_channel_prefix(&msg.params[0]);
        // Slack wants the conversation id, not the name.
        let mut channel = session.channels.by_name(channame);
        if channel.is_none() {
            if let Err(e) = session.channels.fetch(&session.client, &session.cancel).await {
                tracing::warn!(%channame, "cannot refresh channels: {e}");
                self.send_unknown_error(&format!("Cannot leave channel: {e}"))
                    .await;
                return;
            }
            channel = session.channels.by_name(channame);
        }
        let Some(channel) = channel else {
            self.send_numeric(
                irc::ERR_USERNOTINCHANNEL,
                session.nick(),
                &format!("User is not in channel {channame}"),
            )
            .await;
            return;
        };
        match session.client.conversations_leave(channel.id()).await {
            Ok(true) => {
                // We were not a member after all.
                self.send_numeric(
                    irc::ERR_USERNOTINCHANNEL,
                    session.nick(),
                    &format!("User is not in channel {channame}"),
                )
                .await;
            }
            Ok(false) => {
                tracing::debug!(%channame, "left channel");
                self.send_line(&format!(":{} PART {}", session.mask(), channel.irc_name()))
                    .await;
            }
            Err(e) => {
                tracing::warn!(%channame, id = %channel.id(), "cannot leave channel: {e}");
            }
        }
    }

    async fn handle_privmsg(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring PRIVMSG before login");
            return;
        };
        let (target_param, text) = match (msg.params.len(), &msg.trailing) {
            (1, Some(trailing)) => (msg.params[0].clone(), trailing.clone()),
            (2, None) => (msg.params[0].clone(), msg.params[1].clone()),
            _ => {
                tracing::warn!(params = ?msg.params, "invalid PRIVMSG command args");
                return;
            }
        };
        if target_param.is_empty() || text.is_empty() {
            tracing::warn!("invalid PRIVMSG command: empty target or text");
            return;
        }

        let channel = session.channels.by_name(&target_param);
        let (target, thread_ts) = match &channel {
            // Thread pseudo-channels carry the parent conversation id and
            // the thread timestamp to reply into.
            Some(ch) => (ch.id().to_string(), ch.thread_ts.clone()),
            None => 'fallback: {
                // An unmaterialised +<channel>-<ts> target still names a
                // thread; the timestamp is the part after the last dash.
                if let Some(stripped) = target_param.strip_prefix(CHANNEL_PREFIX_THREAD) {
                    if let Some((base, ts)) = stripped.rsplit_once('-') {
                        if let Some(base_ch) = session.channels.by_name(base) {
                            break 'fallback (base_ch.id().to_string(), Some(ts.to_string()));
                        }
                    }
                }
                // Not a known channel: assume a private message to a nick.
                (format!("@{target_param}"), None)
            }
        };

        let mut text = text;
        if text.starts_with("\x01ACTION ") && text.ends_with('\x01') {
            if channel.is_none() {
                tracing::warn!(%target_param, "unknown channel for ACTION message");
                return;
            }
            // chat.meMessage is unreliable upstream; emulate a /me with
            // italics instead.
            text = format!("_{}_", &text["\x01ACTION ".len()..text.len() - 1]);
        }

        session
            .post_text_message(&target, &parse_mentions(&text), thread_ts.as_deref())
            .await;
    }

    async fn handle_topic(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring TOPIC before login");
            return;
        };
        if msg.params.is_empty() {
            self.send_numeric(
                irc::ERR_NEEDMOREPARAMS,
                session.nick(),
                "TOPIC :Not enough parameters",
            )
            .await;
            return;
        }
        let channame = &msg.params[0];
        let topic = msg.trailing.clone().unwrap_or_default();
        let Some(channel) = session.channels.by_name(channame) else {
            tracing::warn!(%channame, "TOPIC for unknown channel");
            return;
        };
        // Sets the conversation purpose, matching longstanding behaviour.
        match session.client.set_purpose(channel.id(), &topic).await {
            Ok(updated) => {
                self.send_numeric(
                    irc::RPL_TOPIC,
                    &format!("{} {}", session.nick(), channame),
                    &updated.purpose.value,
                )
                .await;
            }
            Err(e) => {
                self.send_unknown_error(&format!("{channame} :Cannot set topic: {e}"))
                    .await;
            }
        }
    }

    async fn handle_who(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring WHO before login");
            return;
        };
        if msg.params.is_empty() || msg.params.len() > 2 {
            self.send_unknown_error("Invalid WHO command. Syntax: WHO <nickname|channel>")
                .await;
            return;
        }
        let target = &msg.params[0];
        if channels::has_channel_prefix(target) {
            let Some(ch) = session.channels.by_name(target) else {
                self.send_numeric(
                    irc::ERR_NOSUCHCHANNEL,
                    session.nick(),
                    &format!("No such channel {target}"),
                )
                .await;
                return;
            };
            for member in &ch.members {
                let Some(user) = session.users.by_id(member) else {
                    tracing::warn!(%member, "failed to get info for channel member");
                    continue;
                };
                self.send_numeric(
                    irc::RPL_WHOREPLY,
                    &format!(
                        "{} {} {} {} {} {} *",
                        session.nick(),
                        target,
                        user.id,
                        session.server_name,
                        session.server_name,
                        user.name
                    ),
                    &format!("0 {}", user.real_name),
                )
                .await;
            }
            self.send_numeric(
                irc::RPL_ENDOFWHO,
                &format!("{} {}", session.nick(), target),
                "End of WHO list",
            )
            .await;
            return;
        }
        let Some(user) = session.users.by_name(target) else {
            self.send_numeric(
                irc::ERR_NOSUCHNICK,
                session.nick(),
                &format!("No such nick {target}"),
            )
            .await;
            return;
        };
        self.send_numeric(
            irc::RPL_WHOREPLY,
            &format!(
                "{} #general {} {} {} {} *",
                session.nick(),
                user.id,
                session.server_name,
                session.server_name,
                user.name
            ),
            &format!("0 {}", user.real_name),
        )
        .await;
        self.send_numeric(
            irc::RPL_ENDOFWHO,
            &format!("{} {}", session.nick(), target),
            "End of WHO list",
        )
        .await;
    }

    async fn handle_whois(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring WHOIS before login");
            return;
        };
        if msg.params.is_empty() || msg.params.len() > 2 {
            self.send_unknown_error("Invalid WHOIS command. Syntax: WHOIS <username>")
                .await;
            return;
        }
        let username = &msg.params[0];
        // A repeated argument asks for idle time as well.
        let with_idle_time = msg.params.len() == 2 && msg.params[0] == msg.params[1];
        let Some(user) = session.users.by_name(username) else {
            self.send_numeric(
                irc::ERR_NOSUCHNICK,
                session.nick(),
                &format!("No such nick {username}"),
            )
            .await;
            return;
        };
        self.send_numeric(
            irc::RPL_WHOISUSER,
            &format!(
                "{} {} {} {} *",
                session.nick(),
                username,
                user.id,
                session.server_name
            ),
            &user.real_name,
        )
        .await;
        self.send_numeric(
            irc::RPL_WHOISSERVER,
            &format!("{} {} {}", session.nick(), username, session.server_name),
            "IRC gateway to Slack",
        )
        .await;
        // Slack user status rides on an extra RPL_WHOISSERVER; there is no
        // dedicated numeric for it.
        if !user.profile.status_text.is_empty() || !user.profile.status_emoji.is_empty() {
            let mut status = format!(
                "user status: '{}' {}",
                user.profile.status_text, user.profile.status_emoji
            );
            if user.profile.status_expiration != 0 {
                if let Some(until) =
                    chrono::DateTime::<chrono::Utc>::from_timestamp(user.profile.status_expiration, 0)
                {
                    status.push_str(&format!(" until {until}"));
                }
            }
            self.send_numeric(
                irc::RPL_WHOISSERVER,
                &format!("{} {} {}", session.nick(), username, session.server_name),
                &status,
            )
            .await;
        }
        let mut in_channels = Vec::new();
        for (_, ch) in session.channels.as_map() {
            if ch.members.iter().any(|m| m == &user.id) {
                in_channels.push(ch.irc_name());
            }
        }
        self.send_numeric(
            irc::RPL_WHOISCHANNELS,
            &format!("{} {}", session.nick(), username),
            &in_channels.join(" "),
        )
        .await;
        if with_idle_time {
            // RPL_WHOISIDLE (317) is not emitted yet.
        }
        self.send_numeric(
            irc::RPL_ENDOFWHOIS,
            &format!("{} {}", session.nick(), username),
            "End of /WHOIS list",
        )
        .await;
    }

    async fn handle_names(&self, msg: &irc::Message) {
        let Some(session) = self.session.clone() else {
            tracing::debug!("ignoring NAMES before login");
            return;
        };
        if msg.params.is_empty() {
            self.send_numeric(
                irc::ERR_NEEDMOREPARAMS,
                session.nick(),
                "NAMES :Not enough parameters",
            )
            .await;
            return;
        }
        let Some(ch) = session.channels.by_name(&msg.params[0]) else {
            self.send_unknown_error(&format!("Channel '{}' not found", msg.params[0]))
                .await;
            return;
        };
        let members = match channel_members(&session.client, &session.users, ch.id()).await {
            Ok(m) => m,
            Err(e) => {
                self.send_unknown_error(&format!(
                    "Failed to fetch users in channel '{}' (channel ID: {}): {e}",
                    ch.slack_name(),
                    ch.id()
                ))
                .await;
                return;
            }
        };
        let ids: Vec<String> = members.iter().map(|u| u.id.clone()).collect();
        session.channels.update_members(ch.id(), ids);
        let names: Vec<String> = members.into_iter().map(|u| u.name).collect();
        tracing::debug!(count = names.len(), channel = %ch.irc_name(), "found members");
        if !names.is_empty() {
            self.send_numeric(
                irc::RPL_NAMREPLY,
                &format!("{} = {}", session.nick(), ch.irc_name()),
                &names.join(" "),
            )
            .await;
        }
        self.send_numeric(
            irc::RPL_ENDOFNAMES,
            &format!("{} {}", session.nick(), ch.irc_name()),
            "End of NAMES list",
        )
        .await;
    }
}

/// Announce one joined channel to the client: fetch its members, remember
/// them, and send the JOIN/TOPIC/NAMES burst.
pub async fn join_channel(session: &Arc<Session>, channel: &Channel) -> Result<()> {
    tracing::info!(
        channel = %channel.irc_name(),
        topic = %channel.purpose(),
        members = channel.conversation.num_members,
        "announcing channel"
    );
    let members = match channel_members(&session.client, &session.users, channel.id()).await {
        Ok(m) => m,
        Err(e) => {
            let msg = format!(
                "Failed to fetch users in channel '{}' (channel ID: {}): {e}",
                channel.slack_name(),
                channel.id()
            );
            session.send_unknown_error(&msg).await;
            return Err(anyhow!(msg));
        }
    };
    let ids: Vec<String> = members.iter().map(|u| u.id.clone()).collect();
    session.channels.update_members(channel.id(), ids);
    let names: Vec<String> = members.into_iter().map(|u| u.name).collect();
    session
        .send_chan_info(&channel.irc_name(), channel.purpose(), &names)
        .await;
    Ok(())
}

/// Announce every Slack channel we are a member of.
async fn join_channels(session: &Arc<Session>) -> Result<()> {
    for (_, ch) in session.channels.as_map() {
        if !ch.is_public_channel() && !ch.is_private_channel() {
            continue;
        }
        if ch.is_member() {
            join_channel(session, &ch).await?;
        }
    }
    Ok(())
}

/// Post-login bootstrap: forced nick, welcome, ISUPPORT, the join bursts for
/// member channels, then the MOTD block.
pub async fn after_logging_in(session: &Arc<Session>) -> Result<()> {
    if session.orig_nick != session.nick() {
        // The client keeps whatever nick Slack says it has.
        session
            .send_line(&format!(":{} NICK {}", session.orig_nick, session.nick()))
            .await;
    }
    session
        .send_numeric(
            irc::RPL_WELCOME,
            session.nick(),
            &format!(
                "Welcome to the {} IRC chat, {}!",
                session.server_name,
                session.nick()
            ),
        )
        .await;
    session
        .send_numeric(
            irc::RPL_ISUPPORT,
            session.nick(),
            &format!("CHANTYPES={SUPPORTED_CHANNEL_PREFIXES}"),
        )
        .await;

    join_channels(session).await?;

    session
        .send_numeric(irc::RPL_MOTDSTART, session.nick(), "")
        .await;
    let motd_lines = [
        "This is an IRC gateway to a Slack workspace.".to_string(),
        format!("Slack team name: {}", session.team_name),
        "Your user info: ".to_string(),
        format!("  Name     : {}", session.me.name),
        format!("  ID       : {}", session.me.id),
        format!("  RealName : {}", session.me.real_name),
    ];
    for line in &motd_lines {
        session.send_numeric(irc::RPL_MOTD, session.nick(), line).await;
    }
    session
        .send_numeric(irc::RPL_ENDOFMOTD, session.nick(), "")
        .await;
    Ok(())
}
