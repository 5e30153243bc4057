//! IRC message types and reply framing.
//!
//! This is a minimal parser/formatter for the IRC protocol lines the gateway
//! speaks. No IRCv3 tags: the gateway advertises an empty capability set.

use std::fmt;

use crate::wordwrap::word_wrap;

/// Replies below are the numerics the gateway emits. As per RFC2812 the
/// conventional maximum message size is 512 bytes including CRLF; replies
/// that can grow past that (WHO and NAMES lists) are split, see
/// [`split_reply`].
pub const RPL_WELCOME: u16 = 1;
pub const RPL_ISUPPORT: u16 = 5;
pub const RPL_WHOISUSER: u16 = 311;
pub const RPL_WHOISSERVER: u16 = 312;
pub const RPL_ENDOFWHO: u16 = 315;
pub const RPL_ENDOFWHOIS: u16 = 318;
pub const RPL_WHOISCHANNELS: u16 = 319;
pub const RPL_CHANNELMODEIS: u16 = 324;
pub const RPL_TOPIC: u16 = 332;
pub const RPL_WHOREPLY: u16 = 352;
pub const RPL_NAMREPLY: u16 = 353;
pub const RPL_ENDOFNAMES: u16 = 366;
pub const RPL_MOTD: u16 = 372;
pub const RPL_MOTDSTART: u16 = 375;
pub const RPL_ENDOFMOTD: u16 = 376;
pub const ERR_UNKNOWNERROR: u16 = 400;
pub const ERR_NOSUCHNICK: u16 = 401;
pub const ERR_NOSUCHCHANNEL: u16 = 403;
pub const ERR_USERNOTINCHANNEL: u16 = 441;
pub const ERR_NEEDMOREPARAMS: u16 = 461;
pub const ERR_PASSWDMISMATCH: u16 = 464;
pub const ERR_UMODEUNKNOWNFLAG: u16 = 501;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    /// Command token, ASCII-uppercased at parse time.
    pub command: String,
    /// Space-separated arguments, not including the trailing parameter.
    pub params: Vec<String>,
    /// The `:trailing` parameter, spanning the rest of the line.
    pub trailing: Option<String>,
}

impl Message {
    /// Parse one raw IRC line. Returns `None` for empty lines.
    ///
    /// Tokens are split on single spaces; the first space-prefixed `:`
    /// argument starts the trailing parameter.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }

        let mut rest = line;

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let end = stripped.find(' ')?;
            let pfx = stripped[..end].to_string();
            rest = &stripped[end + 1..];
            Some(pfx)
        } else {
            None
        };

        let command;
        let mut params = Vec::new();
        let mut trailing = None;

        if let Some(space) = rest.find(' ') {
            command = rest[..space].to_ascii_uppercase();
            rest = &rest[space + 1..];

            while !rest.is_empty() {
                if let Some(t) = rest.strip_prefix(':') {
                    trailing = Some(t.to_string());
                    break;
                }
                if let Some(space) = rest.find(' ') {
                    params.push(rest[..space].to_string());
                    rest = &rest[space + 1..];
                } else {
                    params.push(rest.to_string());
                    break;
                }
            }
        } else {
            command = rest.to_ascii_uppercase();
        }

        Some(Message {
            prefix,
            command,
            params,
            trailing,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{prefix} ")?;
        }
        write!(f, "{}", self.command)?;
        for param in &self.params {
            write!(f, " {param}")?;
        }
        if let Some(ref trailing) = self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

/// Split a numeric reply into CRLF-terminated chunks.
///
/// `preamble` is the fixed `:<server> NNN <args> :` part repeated on every
/// chunk; `desc` is the description to wrap. A chunk size below 512, or one
/// the whole reply already fits in, yields a single line. Splitting ignores
/// contiguous whitespace in the description.
pub fn split_reply(preamble: &str, desc: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size < 512 || chunk_size >= preamble.len() + desc.len() + 2 {
        return vec![format!("{preamble}{desc}\r\n")];
    }
    let max_len = chunk_size.saturating_sub(preamble.len() + 2).max(1);
    let words: Vec<&str> = desc.split_whitespace().collect();
    word_wrap(&words, max_len)
        .into_iter()
        .map(|line| format!("{preamble}{line}\r\n"))
        .collect()
}

/// Format the fixed part of a numeric reply: `:<server> NNN <args> :`.
pub fn numeric_preamble(server_name: &str, code: u16, args: &str) -> String {
    format!(":{server_name} {code:03} {args} :")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let msg = Message::parse("NICK alice\r\n").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "NICK");
        assert_eq!(msg.params, vec!["alice"]);
        assert_eq!(msg.trailing, None);
    }

    #[test]
    fn parse_lowercase_command() {
        let msg = Message::parse("ping 12345").unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn parse_with_prefix_and_trailing() {
        let msg = Message::parse(":nick!user@host PRIVMSG #chan :hello world\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("nick!user@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan"]);
        assert_eq!(msg.trailing.as_deref(), Some("hello world"));
    }

    #[test]
    fn parse_user_command() {
        let msg = Message::parse("USER guest 0 * :Real Name").unwrap();
        assert_eq!(msg.params, vec!["guest", "0", "*"]);
        assert_eq!(msg.trailing.as_deref(), Some("Real Name"));
    }

    #[test]
    fn parse_empty_line() {
        assert!(Message::parse("\r\n").is_none());
        assert!(Message::parse("").is_none());
    }

    #[test]
    fn parse_empty_trailing() {
        let msg = Message::parse("QUIT :").unwrap();
        assert_eq!(msg.command, "QUIT");
        assert_eq!(msg.trailing.as_deref(), Some(""));
    }

    #[test]
    fn display_round_trip() {
        let msg = Message {
            prefix: Some("server".into()),
            command: "001".into(),
            params: vec!["alice".into()],
            trailing: Some("Welcome".into()),
        };
        assert_eq!(msg.to_string(), ":server 001 alice :Welcome");
    }

    #[test]
    fn split_reply_small_chunk_is_single_line() {
        let chunks = split_reply(":srv 353 n = #c :", "a b c", 100);
        assert_eq!(chunks, vec![":srv 353 n = #c :a b c\r\n"]);
    }

    #[test]
    fn split_reply_fitting_is_single_line() {
        let chunks = split_reply(":srv 353 n = #c :", "a b c", 512);
        assert_eq!(chunks, vec![":srv 353 n = #c :a b c\r\n"]);
    }

    #[test]
    fn split_reply_chunks_long_description() {
        let preamble = ":srv 353 nick = #chan :";
        let names = (0..200).map(|i| format!("user{i}")).collect::<Vec<_>>();
        let desc = names.join(" ");
        let chunks = split_reply(preamble, &desc, 512);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 512);
            assert!(chunk.starts_with(preamble));
            assert!(chunk.ends_with("\r\n"));
        }
        let rejoined = chunks
            .iter()
            .map(|c| &c[preamble.len()..c.len() - 2])
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(rejoined, desc);
    }

    #[test]
    fn numeric_preamble_pads_code() {
        assert_eq!(numeric_preamble("srv", 1, "alice"), ":srv 001 alice :");
        assert_eq!(numeric_preamble("srv", 353, "a = #c"), ":srv 353 a = #c :");
    }
}
