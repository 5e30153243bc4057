//! Text rewriting between Slack's message syntax and plain IRC text.
//!
//! Slack wraps URLs and mentions in angle brackets (`<http://...|label>`,
//! `<@U123>`) and HTML-escapes the message body. IRC clients want the plain
//! rendition, and the reverse direction must produce the syntax Slack parses.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static RX_SLACK_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]+>").expect("invalid bracket regex"));

static RX_SLACK_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([UW][A-Z0-9]+)>").expect("invalid user regex"));

static RX_SLACK_ARCHIVE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[a-z0-9-]+\.slack\.com/archives/([a-zA-Z0-9]+)/p([0-9]{10})([0-9]{6})")
        .expect("invalid archive regex")
});

/// A parsed Slack archive permalink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRef {
    pub conversation: String,
    /// Message timestamp in Slack's `seconds.fraction` form.
    pub timestamp: String,
}

/// Find the first Slack archive URL in `text`.
pub fn find_archive_ref(text: &str) -> Option<ArchiveRef> {
    let caps = RX_SLACK_ARCHIVE_URL.captures(text)?;
    Some(ArchiveRef {
        conversation: caps[1].to_string(),
        timestamp: format!("{}.{}", &caps[2], &caps[3]),
    })
}

/// Expand and unquote Slack text for IRC display.
///
/// `<url|label>` becomes `label (url)`, `<url>` becomes `url`, and the HTML
/// entities Slack escapes are undone. Bracketed fragments that do not parse
/// as URLs are left untouched.
pub fn expand_text(text: &str) -> String {
    let expanded = RX_SLACK_BRACKET.replace_all(text, |caps: &Captures<'_>| {
        let whole = &caps[0];
        let inner = &whole[1..whole.len() - 1];

        // An URL may be followed by a "|" and the original label; only the
        // part before the last pipe is the URL.
        let (url_part, label) = match inner.rfind('|') {
            Some(idx) => (&inner[..idx], &inner[idx + 1..]),
            None => (inner, ""),
        };

        // Validate only; the URL is reproduced verbatim.
        if url::Url::parse(url_part).is_err() {
            return whole.to_string();
        }
        if label.is_empty() {
            url_part.to_string()
        } else {
            format!("{label} ({url_part})")
        }
    });
    unescape_entities(&expanded)
}

/// Undo the HTML escaping Slack applies to message bodies.
fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Replace `<@UID>` tags with `@nickname`, resolving ids through `lookup`.
/// Unresolvable ids are left as-is.
pub fn expand_user_ids(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    RX_SLACK_USER
        .replace_all(text, |caps: &Captures<'_>| match lookup(&caps[1]) {
            Some(name) => format!("@{name}"),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Translate IRC-style mentions into the syntax Slack parses: `@here`,
/// `@channel` and `@everyone` become `<!...>` broadcasts, any other `@word`
/// becomes a `<@word>` mention.
pub fn parse_mentions(text: &str) -> String {
    text.split(' ')
        .map(|token| match token {
            "@here" => "<!here>".to_string(),
            "@channel" => "<!channel>".to_string(),
            "@everyone" => "<!everyone>".to_string(),
            t if t.starts_with('@') => format!("<{t}>"),
            t => t.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_labelled_url() {
        assert_eq!(
            expand_text("Visit <http://example.com|the site> now"),
            "Visit the site (http://example.com) now"
        );
    }

    #[test]
    fn expand_plain_url() {
        assert_eq!(
            expand_text("Plain <http://example.com>"),
            "Plain http://example.com"
        );
    }

    #[test]
    fn expand_leaves_non_urls_alone() {
        assert_eq!(expand_text("a <b c"), "a <b c");
        assert_eq!(expand_text("emoji <3 you"), "emoji <3 you");
    }

    #[test]
    fn expand_unescapes_entities() {
        assert_eq!(expand_text("1 &lt; 2 &amp;&amp; 3 &gt; 2"), "1 < 2 && 3 > 2");
    }

    #[test]
    fn expand_user_ids_resolves_known() {
        let out = expand_user_ids("hi <@UABCD> and <@UZZZZ>", |id| {
            (id == "UABCD").then(|| "insomniac".to_string())
        });
        assert_eq!(out, "hi @insomniac and <@UZZZZ>");
    }

    #[test]
    fn mentions_to_slack_syntax() {
        assert_eq!(
            parse_mentions("@here ping @alice and @channel"),
            "<!here> ping <@alice> and <!channel>"
        );
        assert_eq!(parse_mentions("no mentions"), "no mentions");
    }

    #[test]
    fn archive_ref_parsing() {
        let r =
            find_archive_ref("see https://team.slack.com/archives/C024BE91L/p1234567890123456 ok")
                .unwrap();
        assert_eq!(r.conversation, "C024BE91L");
        assert_eq!(r.timestamp, "1234567890.123456");
        assert!(find_archive_ref("no link here").is_none());
    }
}
