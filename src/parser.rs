//! Stateless IRCv3 message parsing for the Twitch flavor of IRC.
//!
//! `parse` never fails: a malformed line yields an [`IrcLine`] with
//! whichever fields could be recovered. The caller (the event classifier)
//! is responsible for deciding whether what it got is usable.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::event::{Badge, Emote};

/// One parsed IRC line, before it has been classified into a [`crate::event::DomainEvent`].
///
/// Transient: constructed by [`parse`], consumed by the classifier, then
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcLine {
    pub raw: String,
    pub tags: HashMap<String, String>,
    pub prefix: String,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: String,
}

impl IrcLine {
    /// The login name portion of `nick!user@host`, or the whole prefix if
    /// there's no `!`.
    pub fn prefix_nick(&self) -> &str {
        match self.prefix.split_once('!') {
            Some((nick, _)) => nick,
            None => &self.prefix,
        }
    }

    /// `params[0]` with a leading `#` stripped, if present. This is the
    /// channel parameter convention Twitch uses on almost every command.
    pub fn channel(&self) -> Option<&str> {
        self.params.first().map(|p| p.strip_prefix('#').unwrap_or(p))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Parse one IRC line (CR/LF already stripped by the caller's frame
/// splitting). Pure and total: never panics, never returns an error.
pub fn parse(line: &str) -> IrcLine {
    let raw = line.to_string();
    let mut rest = line;

    let mut tags = HashMap::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        match stripped.split_once(' ') {
            Some((tag_str, remainder)) => {
                tags = parse_tags(tag_str);
                rest = remainder.trim_start();
            }
            None => {
                tags = parse_tags(stripped);
                rest = stripped;
            }
        }
    }

    let mut prefix = String::new();
    if let Some(stripped) = rest.strip_prefix(':') {
        match stripped.split_once(' ') {
            Some((p, remainder)) => {
                prefix = p.to_string();
                rest = remainder.trim_start();
            }
            None => {
                prefix = stripped.to_string();
                rest = "";
            }
        }
    }

    let (command, mut tail) = match rest.split_once(' ') {
        Some((c, p)) => (c.to_string(), p),
        None => (rest.to_string(), ""),
    };

    let mut params = Vec::new();
    let mut trailing = String::new();
    loop {
        let trimmed = tail.trim_start();
        if trimmed.is_empty() {
            break;
        }
        if let Some(t) = trimmed.strip_prefix(':') {
            trailing = t.to_string();
            break;
        }
        match trimmed.split_once(' ') {
            Some((p, remainder)) => {
                params.push(p.to_string());
                tail = remainder;
            }
            None => {
                params.push(trimmed.to_string());
                break;
            }
        }
    }

    IrcLine {
        raw,
        tags,
        prefix,
        command,
        params,
        trailing,
    }
}

/// Decode a `key1=val1;key2=val2` tag string into a map, applying the
/// IRCv3 escape convention to values.
fn parse_tags(raw: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for tag in raw.split(';') {
        if tag.is_empty() {
            continue;
        }
        match tag.split_once('=') {
            Some((key, val)) => {
                tags.insert(key.to_string(), unescape_tag_value(val));
            }
            None => {
                tags.insert(tag.to_string(), String::new());
            }
        }
    }
    tags
}

/// `\:`→`;`, `\s`→space, `\\`→`\`, `\r`→CR, `\n`→LF, otherwise the
/// backslash is dropped and the next byte kept. A trailing backslash with
/// nothing after it is simply dropped.
fn unescape_tag_value(val: &str) -> String {
    let mut out = String::with_capacity(val.len());
    let mut chars = val.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Decode an `emotes` tag value: `id:start-end(,start-end)*(/id:start-end...)*`.
/// Invalid segments are skipped, never fatal. `count` on each returned
/// [`Emote`] is the number of positions that share its id.
pub fn parse_emotes(tag_value: &str) -> Vec<Emote> {
    if tag_value.is_empty() {
        return Vec::new();
    }

    let mut positions: Vec<(String, usize, usize)> = Vec::new();
    for chunk in tag_value.split('/') {
        let Some((id, ranges)) = chunk.split_once(':') else {
            continue;
        };
        for range in ranges.split(',') {
            let Some((start_s, end_s)) = range.split_once('-') else {
                continue;
            };
            let (Ok(start), Ok(end)) = (start_s.parse::<usize>(), end_s.parse::<usize>()) else {
                continue;
            };
            positions.push((id.to_string(), start, end));
        }
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (id, _, _) in &positions {
        *counts.entry(id.as_str()).or_insert(0) += 1;
    }

    positions
        .into_iter()
        .map(|(id, start, end)| {
            let count = counts[id.as_str()];
            Emote {
                id,
                name: None,
                start,
                end,
                count,
            }
        })
        .collect()
}

/// Decode a `badges` or `badge-info` tag value: `name/version(,name/version)*`.
/// A name with no `/` maps to an empty version string.
pub fn parse_badges(tag_value: &str) -> Vec<Badge> {
    if tag_value.is_empty() {
        return Vec::new();
    }
    tag_value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| match s.split_once('/') {
            Some((name, version)) => Badge {
                name: name.to_string(),
                version: version.to_string(),
            },
            None => Badge {
                name: s.to_string(),
                version: String::new(),
            },
        })
        .collect()
}

/// Decode `tmi-sent-ts` (integer milliseconds since epoch). Falls back to
/// now on a missing tag or parse failure, per spec.
pub fn parse_timestamp(tags: &HashMap<String, String>) -> DateTime<Utc> {
    tags.get("tmi-sent-ts")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Decode a `msg-param-*`/`msg-param-` style tag map: every tag beginning
/// with `msg-param-` has that prefix stripped and the rest used as the key.
/// Used for `USERNOTICE`'s open-ended `msg_params`.
pub fn msg_params(tags: &HashMap<String, String>) -> HashMap<String, String> {
    const PREFIX: &str = "msg-param-";
    tags.iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(PREFIX)
                .map(|stripped| (stripped.to_string(), v.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_tagged_message() {
        let line = parse(
            "@id=abc;user-id=7;display-name=U;mod=1;tmi-sent-ts=1700000000000 :u!u@u.tmi.twitch.tv PRIVMSG #chan :hi",
        );
        assert_eq!(line.tag("id"), Some("abc"));
        assert_eq!(line.tag("user-id"), Some("7"));
        assert_eq!(line.prefix_nick(), "u");
        assert_eq!(line.command, "PRIVMSG");
        assert_eq!(line.channel(), Some("chan"));
        assert_eq!(line.trailing, "hi");
    }

    #[test]
    fn parses_without_tags_or_prefix() {
        let line = parse("PING :tmi.twitch.tv");
        assert!(line.tags.is_empty());
        assert!(line.prefix.is_empty());
        assert_eq!(line.command, "PING");
        assert_eq!(line.trailing, "tmi.twitch.tv");
    }

    #[test]
    fn parses_multiple_params_without_trailing() {
        let line = parse(":tmi.twitch.tv 001 someuser");
        assert_eq!(line.command, "001");
        assert_eq!(line.params, vec!["someuser".to_string()]);
        assert!(line.trailing.is_empty());
    }

    #[test]
    fn tag_escape_decoding() {
        let line = parse(r"@a=b\:c;b=x\sy;c=a\\b;d=x\ry;e=x\ny :p CMD :t");
        assert_eq!(line.tag("a"), Some("b;c"));
        assert_eq!(line.tag("b"), Some("x y"));
        assert_eq!(line.tag("c"), Some(r"a\b"));
        assert_eq!(line.tag("d"), Some("x\ry"));
        assert_eq!(line.tag("e"), Some("x\ny"));
    }

    #[test]
    fn tag_escape_trailing_backslash_is_dropped() {
        let decoded = unescape_tag_value(r"abc\");
        assert_eq!(decoded, "abc");
    }

    #[test]
    fn malformed_line_does_not_panic() {
        let line = parse("@tags-only-no-rest");
        assert_eq!(line.command, "tags-only-no-rest");
        assert!(line.params.is_empty());

        let line = parse("");
        assert_eq!(line.command, "");
    }

    #[test]
    fn emotes_single_position() {
        let emotes = parse_emotes("25:0-4");
        assert_eq!(emotes.len(), 1);
        assert_eq!(emotes[0].id, "25");
        assert_eq!(emotes[0].start, 0);
        assert_eq!(emotes[0].end, 4);
        assert_eq!(emotes[0].count, 1);
    }

    #[test]
    fn emotes_multiple_positions_same_id_get_shared_count() {
        let emotes = parse_emotes("25:0-4,12-16");
        assert_eq!(emotes.len(), 2);
        assert!(emotes.iter().all(|e| e.id == "25" && e.count == 2));
    }

    #[test]
    fn emotes_multiple_ids() {
        let emotes = parse_emotes("25:0-4/1902:6-10");
        assert_eq!(emotes.len(), 2);
        assert_eq!(emotes[0].id, "25");
        assert_eq!(emotes[1].id, "1902");
    }

    #[test]
    fn emotes_invalid_segment_is_skipped_not_fatal() {
        let emotes = parse_emotes("25:0-4,garbage/1902:6-10");
        assert_eq!(emotes.len(), 2);
    }

    #[test]
    fn emotes_empty_tag_is_empty_vec() {
        assert!(parse_emotes("").is_empty());
    }

    #[test]
    fn badges_basic() {
        let badges = parse_badges("broadcaster/1,subscriber/12");
        assert_eq!(badges.len(), 2);
        assert_eq!(badges[0].name, "broadcaster");
        assert_eq!(badges[0].version, "1");
        assert_eq!(badges[1].version, "12");
    }

    #[test]
    fn badge_without_version_maps_to_empty_version() {
        let badges = parse_badges("staff");
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].name, "staff");
        assert_eq!(badges[0].version, "");
    }

    #[test]
    fn timestamp_valid() {
        let mut tags = HashMap::new();
        tags.insert("tmi-sent-ts".to_string(), "1700000000000".to_string());
        let ts = parse_timestamp(&tags);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn timestamp_missing_falls_back_to_now() {
        let tags = HashMap::new();
        let ts = parse_timestamp(&tags);
        assert!((Utc::now() - ts).num_seconds() < 5);
    }

    #[test]
    fn timestamp_unparseable_falls_back_to_now() {
        let mut tags = HashMap::new();
        tags.insert("tmi-sent-ts".to_string(), "not-a-number".to_string());
        let ts = parse_timestamp(&tags);
        assert!((Utc::now() - ts).num_seconds() < 5);
    }

    #[test]
    fn msg_params_strips_prefix() {
        let mut tags = HashMap::new();
        tags.insert(
            "msg-param-recipient-user-name".to_string(),
            "target".to_string(),
        );
        tags.insert("msg-param-sub-plan".to_string(), "1000".to_string());
        tags.insert("msg-id".to_string(), "subgift".to_string());
        let params = msg_params(&tags);
        assert_eq!(params.get("recipient-user-name").unwrap(), "target");
        assert_eq!(params.get("sub-plan").unwrap(), "1000");
        assert_eq!(params.len(), 2);
    }
}
