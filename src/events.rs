//! Projection of Slack RTM events onto the IRC connection.
//!
//! One projector task per connection consumes the RTM event channel in
//! delivery order and writes IRC lines through the session. On Slack
//! disconnect it clears the caches and cancels the connection.

use std::sync::Arc;

use crate::channels::{self, Channel};
use crate::expand;
use crate::session::Session;
use crate::slack::rtm::SessionEvent;
use crate::slack::{self, MessageItem, RtmEvent, RtmMessage};

/// Consume the RTM stream until it disconnects or the channel closes.
pub async fn run(session: Arc<Session>, mut rx: tokio::sync::mpsc::Receiver<SessionEvent>) {
    tracing::info!("started Slack event listener");
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Connected => {
                tracing::info!("connected to Slack");
                session.set_connected(true);
            }
            SessionEvent::Disconnected(reason) => {
                tracing::warn!(%reason, "disconnected from Slack");
                session.set_connected(false);
                // Flush state before the socket goes away.
                session.users.clear();
                session.channels.clear();
                session.cancel.cancel();
                return;
            }
            SessionEvent::Event(ev) => handle_event(&session, ev).await,
        }
    }
}

async fn handle_event(session: &Arc<Session>, ev: RtmEvent) {
    match ev {
        RtmEvent::Message(msg) => handle_message(session, msg).await,
        RtmEvent::MemberJoinedChannel { user, channel } => {
            let Some(ch) = session.channels.by_id(&channel) else {
                tracing::warn!(%channel, "member joined unknown channel");
                return;
            };
            let mask = member_mask(session, &user).await;
            let mut members = ch.members.clone();
            if !members.contains(&user) {
                members.push(user);
                session.channels.update_members(&channel, members);
            }
            session
                .send_line(&format!(":{} JOIN {}", mask, ch.irc_name()))
                .await;
        }
        RtmEvent::MemberLeftChannel { user, channel } => {
            let Some(ch) = session.channels.by_id(&channel) else {
                tracing::warn!(%channel, "member left unknown channel");
                return;
            };
            let mask = member_mask(session, &user).await;
            let members: Vec<String> = ch.members.iter().filter(|m| **m != user).cloned().collect();
            session.channels.update_members(&channel, members);
            session
                .send_line(&format!(":{} PART {}", mask, ch.irc_name()))
                .await;
        }
        RtmEvent::TeamJoin { user } | RtmEvent::UserChange { user } => {
            if let Err(e) = session
                .users
                .fetch_by_ids(&session.client, true, &[user.id.clone()])
                .await
            {
                tracing::warn!(user = %user.id, error = %e, "failed to refresh user");
            }
        }
        RtmEvent::ReactionAdded {
            user,
            reaction,
            item,
        } => {
            let name = session
                .get_user_info(&user)
                .map(|u| u.name)
                .unwrap_or_else(|| user.clone());
            let (msg, channame) =
                match get_conversation_details(session, &item.channel, &item.ts).await {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not get reaction target details");
                        return;
                    }
                };
            if channame.is_empty() {
                return;
            }
            let mut text = session.expand_user_ids(&msg.text);
            text = expand::expand_text(&text);
            let snippet: String = text
                .split('\n')
                .next()
                .unwrap_or("")
                .chars()
                .take(100)
                .collect();
            session
                .send_line(&format!(
                    ":{} PRIVMSG {} :\x01ACTION reacted with {} to: \x0315{}\x03\x01",
                    session.mask_for(&name, &user),
                    channame,
                    reaction,
                    snippet
                ))
                .await;
        }
        RtmEvent::UserTyping { user, channel } => {
            let username = session
                .get_user_info(&user)
                .map(|u| u.name)
                .unwrap_or_else(|| "<unknown>".to_string());
            let channame = match session.get_conversation_info(&channel).await {
                Ok(c) => c.name,
                Err(_) => "<unknown or IM chat>".to_string(),
            };
            tracing::info!(%user, %username, %channel, %channame, "user is typing");
        }
        RtmEvent::Error { error } => {
            tracing::warn!(code = error.code, msg = %error.msg, "Slack RTM error");
        }
        RtmEvent::Hello | RtmEvent::Goodbye | RtmEvent::Other => {
            tracing::debug!("unhandled RTM event");
        }
    }
}

/// Source mask for a member event: our own mask for ourselves, otherwise the
/// member's nick resolved through the cache (fetching on miss).
async fn member_mask(session: &Session, user_id: &str) -> String {
    if user_id == session.user_id() {
        return session.mask();
    }
    let nick = session
        .users
        .fetch_by_ids(&session.client, false, &[user_id.to_string()])
        .await
        .ok()
        .and_then(|users| users.into_iter().next())
        .map(|u| u.name)
        .unwrap_or_else(|| user_id.to_string());
    session.mask_for(&nick, user_id)
}

async fn handle_message(session: &Arc<Session>, msg: RtmMessage) {
    match msg.subtype.as_str() {
        "message_changed" => {
            // Refetch so we print the new text.
            match get_conversation_details(session, &msg.channel, &msg.ts).await {
                Ok((item, _)) => print_message(session, item, &msg.channel, "(edited)").await,
                Err(e) => {
                    tracing::warn!(error = %e, "could not get changed conversation details");
                }
            }
        }
        "channel_topic" => match session.channels.by_id(&msg.channel) {
            Some(ch) => {
                tracing::info!(channel = %ch.irc_name(), topic = %msg.topic, "got new topic");
                session
                    .send_line(&format!(
                        ":{} TOPIC {} :{}",
                        session.mask(),
                        ch.irc_name(),
                        msg.topic
                    ))
                    .await;
            }
            None => tracing::warn!(channel = %msg.channel, "cannot get channel name for topic"),
        },
        // Covered by member_joined_channel / member_left_channel.
        "channel_join" | "channel_leave" => {}
        _ => {
            if msg.hidden {
                return;
            }
            let channel = msg.channel.clone();
            print_message(session, msg.as_item(), &channel, "").await;
        }
    }
}

fn join_text(first: &str, second: &str, separator: &str) -> String {
    if first.is_empty() {
        return second.to_string();
    }
    if second.is_empty() {
        return first.to_string();
    }
    format!("{first}{separator}{second}")
}

async fn print_message(session: &Arc<Session>, item: MessageItem, channel_id: &str, prefix: &str) {
    let user = if item.user.is_empty() {
        None
    } else {
        session.get_user_info(&item.user)
    };
    let name = match &user {
        Some(u) => u.name.clone(),
        None if !item.user.is_empty() => {
            tracing::warn!(user = %item.user, username = %item.username, "failed to get user info");
            item.user.clone()
        }
        None => item.username.replace(' ', "_"),
    };

    let channame = resolve_channel_name(session, channel_id, &item.thread_ts).await;
    if channame.is_empty() {
        return;
    }

    let mut text = item.text.clone();
    for attachment in &item.attachments {
        text = join_text(&text, &attachment.pretext, "\n");
        text = join_text(&text, &attachment.title, "\n");
        if !attachment.text.is_empty() {
            text = join_text(&text, &attachment.text, "\n");
        } else {
            text = join_text(&text, &attachment.fallback, "\n");
        }
        text = join_text(&text, &attachment.image_url, "\n");
    }
    for file in &item.files {
        text = join_text(&text, &session.files.download(file), " ");
    }

    tracing::debug!(user = %item.user, %name, channel = %channel_id, %text, "SLACK message");
    if name.is_empty() && text.is_empty() {
        tracing::warn!("empty username and message");
        return;
    }

    text = replace_permalink_with_text(session, &text).await;
    text = session.expand_user_ids(&text);
    text = expand::expand_text(&text);
    text = join_text(prefix, &text, " ");

    if name == session.nick() {
        // Our own messages are local echo, except when they came from
        // another client of the same user: with a legacy token that shows as
        // a differing bot id, with a modern token as a client message id.
        let from_other_client = if session.legacy_token {
            item.bot_id != session.me.profile.bot_id
        } else {
            !item.client_msg_id.is_empty()
        };
        if !from_other_client {
            tracing::debug!("skipping message sent by me");
            return;
        }
    }

    let (line_prefix, line_suffix) = if item.subtype == "me_message" {
        ("\x01ACTION ", "\x01")
    } else {
        ("", "")
    };
    for line in text.split('\n') {
        session
            .send_line(&format!(
                ":{} PRIVMSG {} :{}{}{}",
                session.mask_for(&name, &item.user),
                channame,
                line_prefix,
                line,
                line_suffix
            ))
            .await;
    }
}

/// IRC-visible name for a Slack conversation id, or empty with an
/// ERR_UNKNOWNERROR side-effect when unresolvable.
///
/// The first reference to a thread materialises its pseudo-channel with a
/// JOIN/TOPIC/NAMES burst and forwards the thread opener; the first
/// reference to an MPIM announces it with its member list.
pub async fn resolve_channel_name(
    session: &Arc<Session>,
    conversation_id: &str,
    thread_ts: &str,
) -> String {
    if conversation_id.starts_with('C') || conversation_id.starts_with('G') {
        let channel = match lookup_or_fetch(session, conversation_id).await {
            Some(ch) => ch,
            None => return String::new(),
        };

        if !thread_ts.is_empty() {
            let thread_name = format!("+{}-{}", channel.slack_name(), thread_ts);
            if session.channels.by_name(&thread_name).is_none() {
                let opener = match session.get_thread_opener(conversation_id, thread_ts).await {
                    Ok(m) => m,
                    Err(e) => {
                        session
                            .send_unknown_error(&format!(
                                "Failed to get thread opener for '{conversation_id}': {e}"
                            ))
                            .await;
                        return String::new();
                    }
                };
                session
                    .channels
                    .insert(Channel::thread(&channel.conversation, thread_ts));
                session.send_chan_info(&thread_name, &opener.text, &[]).await;
                let author = session
                    .get_user_info(&opener.user)
                    .map(|u| u.name)
                    .unwrap_or_else(|| opener.user.clone());
                session
                    .send_line(&format!(
                        ":{} PRIVMSG {} :{}",
                        session.mask_for(&author, &opener.user),
                        thread_name,
                        opener.text
                    ))
                    .await;
            }
            return thread_name;
        }

        if channel.is_mpim() && session.announce_once(channel.id()) {
            match channels::channel_members(&session.client, &session.users, channel.id()).await {
                Ok(members) => {
                    let ids: Vec<String> = members.iter().map(|u| u.id.clone()).collect();
                    session.channels.update_members(channel.id(), ids);
                    let names: Vec<String> = members.into_iter().map(|u| u.name).collect();
                    session
                        .send_chan_info(&channel.irc_name(), channel.purpose(), &names)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(channel = %channel.slack_name(), error = %e,
                        "failed to fetch MPIM members");
                }
            }
        }
        return channel.irc_name();
    }

    if conversation_id.starts_with('D') {
        // Direct message: the IRC name is the other party's nick.
        let members =
            match channels::channel_members(&session.client, &session.users, conversation_id).await
            {
                Ok(m) => m,
                Err(e) => {
                    session
                        .send_unknown_error(&format!(
                            "Failed to fetch members of IM chat '{conversation_id}': {e}"
                        ))
                        .await;
                    return String::new();
                }
            };
        if members.is_empty() || members.len() > 2 {
            session
                .send_unknown_error(&format!(
                    "Want 1 or 2 users in conversation, got {} (conversation ID: {conversation_id})",
                    members.len()
                ))
                .await;
            return String::new();
        }
        let my_id = session.user_id();
        let user1 = &members[0];
        // A single member means a message to ourselves.
        let user2 = members.get(1).unwrap_or(user1);
        if user1.id != my_id && user2.id != my_id {
            session
                .send_unknown_error(&format!(
                    "Got a direct message where I am not part of the members list \
                     (conversation: {conversation_id})"
                ))
                .await;
            return String::new();
        }
        let recipient = if user1.id == my_id { user2 } else { user1 };
        return recipient.name.clone();
    }

    tracing::warn!(%conversation_id, "unknown recipient ID");
    String::new()
}

async fn lookup_or_fetch(session: &Arc<Session>, conversation_id: &str) -> Option<Channel> {
    if let Some(ch) = session.channels.by_id(conversation_id) {
        return Some(ch);
    }
    // Might be a channel created after login; try fetching it.
    match session
        .channels
        .fetch_by_ids(&session.client, false, &[conversation_id.to_string()])
        .await
    {
        Ok(mut chans) if !chans.is_empty() => Some(chans.remove(0)),
        Ok(_) => {
            session
                .send_unknown_error(&format!(
                    "Unknown channel ID '{conversation_id}' when resolving channel name"
                ))
                .await;
            None
        }
        Err(e) => {
            session
                .send_unknown_error(&format!(
                    "Failed to fetch channel with ID '{conversation_id}': {e}"
                ))
                .await;
            None
        }
    }
}

/// Look up the message a timestamp points at, descending into thread replies
/// when the timestamp belongs to a threaded message. Returns the message and
/// the resolved IRC channel name.
async fn get_conversation_details(
    session: &Arc<Session>,
    channel_id: &str,
    timestamp: &str,
) -> Result<(MessageItem, String), slack::Error> {
    let messages = session
        .client
        .conversation_history(channel_id, timestamp, 1, true)
        .await?;
    let Some(parent) = messages.into_iter().next() else {
        return Err(slack::Error::Api("no such message found".to_string()));
    };
    if parent.ts != timestamp {
        // The timestamps differ, so we are looking at a threaded message.
        if let Ok(replies) = session
            .client
            .conversation_replies(channel_id, &parent.ts)
            .await
        {
            for msg in replies {
                if msg.ts == timestamp {
                    let channame = resolve_channel_name(session, channel_id, &parent.ts).await;
                    return Ok((msg, channame));
                }
            }
        }
        tracing::warn!(%timestamp, parent = %parent.ts, "did not find threaded message");
    }
    let channame = resolve_channel_name(session, channel_id, "").await;
    Ok((parent, channame))
}

/// Inline the message a Slack archive permalink points at, quoted below the
/// original text.
async fn replace_permalink_with_text(session: &Arc<Session>, text: &str) -> String {
    let Some(archive) = expand::find_archive_ref(text) else {
        return text.to_string();
    };
    match get_conversation_details(session, &archive.conversation, &archive.timestamp).await {
        Ok((msg, _)) => format!("{text}\n> {}", msg.text),
        Err(e) => {
            tracing::debug!(error = %e, "could not get message details from permalink");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_text_handles_empty_sides() {
        assert_eq!(join_text("", "b", "\n"), "b");
        assert_eq!(join_text("a", "", "\n"), "a");
        assert_eq!(join_text("a", "b", "\n"), "a\nb");
    }
}
