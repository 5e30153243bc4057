//! Serde data model for the subset of the Slack API the gateway speaks.

use serde::Deserialize;

/// A Slack user record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    /// Slack nickname, reused as the IRC nick.
    pub name: String,
    pub real_name: String,
    pub profile: UserProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub bot_id: String,
    pub status_text: String,
    pub status_emoji: String,
    pub status_expiration: i64,
}

/// A Slack conversation: public/private channel, group, IM or MPIM.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub is_channel: bool,
    pub is_group: bool,
    pub is_im: bool,
    pub is_mpim: bool,
    pub is_private: bool,
    pub is_member: bool,
    pub num_members: u64,
    pub purpose: Description,
    pub topic: Description,
}

/// Purpose/topic wrapper as the conversations API returns it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Description {
    pub value: String,
}

/// A message as returned by `conversations.history` / `conversations.replies`
/// and carried inside RTM message events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageItem {
    pub ts: String,
    pub thread_ts: String,
    pub user: String,
    /// Display name for messages with no user id (e.g. some bot posts).
    pub username: String,
    pub text: String,
    pub subtype: String,
    pub hidden: bool,
    pub bot_id: String,
    pub client_msg_id: String,
    pub attachments: Vec<Attachment>,
    pub files: Vec<File>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub pretext: String,
    pub title: String,
    pub text: String,
    pub fallback: String,
    pub image_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct File {
    pub id: String,
    pub title: String,
    pub filetype: String,
    pub url_private: String,
    pub is_external: bool,
}

/// Identity and team info from `rtm.connect`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtmConnectInfo {
    pub url: String,
    #[serde(rename = "self")]
    pub me: RtmSelf,
    pub team: RtmTeam,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtmSelf {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtmTeam {
    pub name: String,
}

/// Decoded RTM frames. Unknown frame types land in `Other`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RtmEvent {
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "goodbye")]
    Goodbye,
    #[serde(rename = "message")]
    Message(RtmMessage),
    #[serde(rename = "member_joined_channel")]
    MemberJoinedChannel { user: String, channel: String },
    #[serde(rename = "member_left_channel")]
    MemberLeftChannel { user: String, channel: String },
    #[serde(rename = "team_join")]
    TeamJoin { user: User },
    #[serde(rename = "user_change")]
    UserChange { user: User },
    #[serde(rename = "reaction_added")]
    ReactionAdded {
        user: String,
        reaction: String,
        item: ReactionItem,
    },
    #[serde(rename = "user_typing")]
    UserTyping { user: String, channel: String },
    #[serde(rename = "error")]
    Error { error: RtmError },
    #[serde(other)]
    Other,
}

/// An RTM `message` event. The channel id decides routing; the embedded
/// fields mirror [`MessageItem`] plus event-only extras.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtmMessage {
    pub channel: String,
    pub ts: String,
    pub thread_ts: String,
    pub user: String,
    pub username: String,
    pub text: String,
    pub subtype: String,
    pub hidden: bool,
    pub bot_id: String,
    pub client_msg_id: String,
    pub attachments: Vec<Attachment>,
    pub files: Vec<File>,
    /// New topic, set on `channel_topic` subtype events.
    pub topic: String,
}

impl RtmMessage {
    /// View the event payload as a plain message record.
    pub fn as_item(&self) -> MessageItem {
        MessageItem {
            ts: self.ts.clone(),
            thread_ts: self.thread_ts.clone(),
            user: self.user.clone(),
            username: self.username.clone(),
            text: self.text.clone(),
            subtype: self.subtype.clone(),
            hidden: self.hidden,
            bot_id: self.bot_id.clone(),
            client_msg_id: self.client_msg_id.clone(),
            attachments: self.attachments.clone(),
            files: self.files.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReactionItem {
    pub channel: String,
    pub ts: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtmError {
    pub code: i64,
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_message_event() {
        let ev: RtmEvent = serde_json::from_str(
            r#"{"type":"message","channel":"C1","user":"U1","text":"hi","ts":"1.2"}"#,
        )
        .unwrap();
        match ev {
            RtmEvent::Message(m) => {
                assert_eq!(m.channel, "C1");
                assert_eq!(m.text, "hi");
                assert!(m.thread_ts.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_event_type() {
        let ev: RtmEvent =
            serde_json::from_str(r#"{"type":"emoji_changed","subtype":"add"}"#).unwrap();
        assert!(matches!(ev, RtmEvent::Other));
    }

    #[test]
    fn decode_reaction_added() {
        let ev: RtmEvent = serde_json::from_str(
            r#"{"type":"reaction_added","user":"U1","reaction":"+1","item":{"type":"message","channel":"C1","ts":"1.2"}}"#,
        )
        .unwrap();
        match ev {
            RtmEvent::ReactionAdded { reaction, item, .. } => {
                assert_eq!(reaction, "+1");
                assert_eq!(item.channel, "C1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_conversation_flags() {
        let c: Conversation = serde_json::from_str(
            r#"{"id":"G1","name":"mpdm-a--b-1","is_mpim":true,"is_group":true,"purpose":{"value":"p"}}"#,
        )
        .unwrap();
        assert!(c.is_mpim);
        assert_eq!(c.purpose.value, "p");
        assert!(!c.is_member);
    }
}
