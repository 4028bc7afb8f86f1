//! The domain event model and the classifier that turns a parsed
//! [`IrcLine`] into one.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::parser::{self, IrcLine};

/// A single emote occurrence inside a message.
///
/// `start`/`end` are inclusive indices into the message string, in the
/// same unit Twitch sent them in on the wire (commonly documented as
/// UTF-16 code units, sometimes as code points — see [`Emote::slice`]).
/// `count` is how many times this emote id occurs in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emote {
    pub id: String,
    pub name: Option<String>,
    pub start: usize,
    pub end: usize,
    pub count: usize,
}

impl Emote {
    /// Slice `message` using `start`/`end` treated as Unicode scalar value
    /// (`char`) offsets, the interpretation this crate parses the wire
    /// value as. If the message was produced under the UTF-16 code-unit
    /// convention instead, callers must re-index accordingly; that
    /// ambiguity is inherent to the protocol, not this helper.
    pub fn slice<'a>(&self, message: &'a str) -> Option<&'a str> {
        let indices: Vec<usize> = message
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(message.len()))
            .collect();
        let start_byte = *indices.get(self.start)?;
        let end_byte = *indices.get(self.end + 1)?;
        message.get(start_byte..end_byte)
    }
}

/// One badge entry, e.g. `subscriber/12`. A bare name (no `/version`) maps
/// to an empty version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub name: String,
    pub version: String,
}

impl Badge {
    pub fn has(badges: &[Badge], name: &str) -> bool {
        badges.iter().any(|b| b.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub channel: String,
    pub user: String,
    pub user_id: String,
    pub message: String,
    pub emotes: Vec<Emote>,
    pub badges: Vec<Badge>,
    pub badge_info: Vec<Badge>,
    pub color: Option<String>,
    pub display_name: String,
    pub is_mod: bool,
    pub is_vip: bool,
    pub is_subscriber: bool,
    pub is_broadcaster: bool,
    pub bits: Option<u64>,
    pub first_message: bool,
    pub returning_chatter: bool,
    pub reply_parent_msg_id: Option<String>,
    pub reply_parent_user_login: Option<String>,
    pub reply_parent_display_name: Option<String>,
    pub reply_parent_msg_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub notice_type: String,
    pub channel: String,
    pub user: String,
    pub user_id: String,
    pub display_name: String,
    pub message: String,
    pub system_message: String,
    pub msg_params: HashMap<String, String>,
    pub badges: Vec<Badge>,
    pub badge_info: Vec<Badge>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub channel: String,
    pub emote_only: bool,
    /// Seconds required between messages to count as a follower; `-1` means off.
    pub followers_only: i64,
    pub r9k: bool,
    pub slow: u64,
    pub subs_only: bool,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub channel: String,
    pub message: String,
    pub msg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearChat {
    pub channel: String,
    pub target_user: Option<String>,
    /// `0` means a permanent ban.
    pub ban_duration_seconds: u64,
    pub room_id: String,
    pub target_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearMessage {
    pub channel: String,
    pub user: String,
    pub message: String,
    pub target_msg_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whisper {
    pub from: String,
    pub from_id: String,
    pub to: String,
    pub message: String,
    pub display_name: String,
    pub color: Option<String>,
    pub badges: Vec<Badge>,
    pub message_id: String,
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalUserState {
    pub user_id: String,
    pub display_name: String,
    pub color: Option<String>,
    pub badges: Vec<Badge>,
    pub badge_info: Vec<Badge>,
    pub emote_sets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserState {
    pub channel: String,
    pub display_name: String,
    pub color: Option<String>,
    pub badges: Vec<Badge>,
    pub badge_info: Vec<Badge>,
    pub emote_sets: Vec<String>,
    pub is_mod: bool,
    pub is_subscriber: bool,
}

/// A tagged variant covering every observable event kind described in the
/// data model. `Reconnect` is included for completeness of the classifier;
/// the connection FSM intercepts `RECONNECT` directly rather than routing
/// it through a handler (there is no `on_reconnect_event` slot, only the
/// lifecycle `on_reconnect()` hook fired by the reconnect controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    ChatMessage(ChatMessage),
    UserNotice(UserNotice),
    RoomState(RoomState),
    Notice(Notice),
    ClearChat(ClearChat),
    ClearMessage(ClearMessage),
    Whisper(Whisper),
    GlobalUserState(GlobalUserState),
    UserState(UserState),
    Join { channel: String, user: String },
    Part { channel: String, user: String },
    Reconnect,
}

/// What a classified line means to the read pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A server-initiated PING; the caller must reply with a PONG echoing
    /// this token and emit no domain event.
    Ping(String),
    /// A server PONG; signals whoever is waiting on `ping()`.
    Pong,
    /// A recognized command, decoded into a domain event.
    Event(DomainEvent),
    /// Unrecognized command, or a recognized one that carried no usable
    /// payload (e.g. `CAP`, `001` outside the auth phase).
    Ignored,
}

fn tag_flag(line: &IrcLine, key: &str) -> bool {
    line.tag(key) == Some("1")
}

fn tag_string(line: &IrcLine, key: &str) -> String {
    line.tag(key).unwrap_or_default().to_string()
}

fn tag_color(line: &IrcLine) -> Option<String> {
    line.tag("color").filter(|c| !c.is_empty()).map(str::to_string)
}

fn tag_badges(line: &IrcLine, key: &str) -> Vec<Badge> {
    line.tag(key).map(parser::parse_badges).unwrap_or_default()
}

fn display_name_or_login(line: &IrcLine) -> String {
    line.tag("display-name")
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| line.prefix_nick().to_string())
}

fn classify_privmsg(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    let message = line.trailing.clone();
    let badges = tag_badges(line, "badges");
    let badge_info = tag_badges(line, "badge-info");
    let emotes = line.tag("emotes").map(parser::parse_emotes).unwrap_or_default();

    let is_mod = tag_flag(line, "mod") || Badge::has(&badges, "moderator");
    let is_vip = Badge::has(&badges, "vip");
    let is_broadcaster = Badge::has(&badges, "broadcaster");
    let is_subscriber = tag_flag(line, "subscriber") || Badge::has(&badges, "subscriber");

    Some(DomainEvent::ChatMessage(ChatMessage {
        id: tag_string(line, "id"),
        channel,
        user: line.prefix_nick().to_string(),
        user_id: tag_string(line, "user-id"),
        message,
        emotes,
        badges,
        badge_info,
        color: tag_color(line),
        display_name: display_name_or_login(line),
        is_mod,
        is_vip,
        is_subscriber,
        is_broadcaster,
        bits: line.tag("bits").and_then(|b| b.parse().ok()),
        first_message: tag_flag(line, "first-msg"),
        returning_chatter: tag_flag(line, "returning-chatter"),
        reply_parent_msg_id: line.tag("reply-parent-msg-id").map(str::to_string),
        reply_parent_user_login: line.tag("reply-parent-user-login").map(str::to_string),
        reply_parent_display_name: line.tag("reply-parent-display-name").map(str::to_string),
        reply_parent_msg_body: line.tag("reply-parent-msg-body").map(str::to_string),
        timestamp: parser::parse_timestamp(&line.tags),
    }))
}

fn classify_whisper(line: &IrcLine) -> Option<DomainEvent> {
    let to = line.params.first()?.to_string();
    Some(DomainEvent::Whisper(Whisper {
        from: line.prefix_nick().to_string(),
        from_id: tag_string(line, "user-id"),
        to,
        message: line.trailing.clone(),
        display_name: display_name_or_login(line),
        color: tag_color(line),
        badges: tag_badges(line, "badges"),
        message_id: tag_string(line, "message-id"),
        thread_id: tag_string(line, "thread-id"),
    }))
}

fn classify_usernotice(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    Some(DomainEvent::UserNotice(UserNotice {
        notice_type: tag_string(line, "msg-id"),
        channel,
        user: line.prefix_nick().to_string(),
        user_id: tag_string(line, "user-id"),
        display_name: display_name_or_login(line),
        message: line.trailing.clone(),
        system_message: tag_string(line, "system-msg"),
        msg_params: parser::msg_params(&line.tags),
        badges: tag_badges(line, "badges"),
        badge_info: tag_badges(line, "badge-info"),
        timestamp: parser::parse_timestamp(&line.tags),
    }))
}

fn classify_notice(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel().unwrap_or_default().to_string();
    Some(DomainEvent::Notice(Notice {
        channel,
        message: line.trailing.clone(),
        msg_id: line.tag("msg-id").map(str::to_string),
    }))
}

fn classify_roomstate(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    Some(DomainEvent::RoomState(RoomState {
        channel,
        emote_only: tag_flag(line, "emote-only"),
        followers_only: line
            .tag("followers-only")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(-1),
        r9k: tag_flag(line, "r9k"),
        slow: line.tag("slow").and_then(|v| v.parse().ok()).unwrap_or(0),
        subs_only: tag_flag(line, "subs-only"),
        room_id: tag_string(line, "room-id"),
    }))
}

fn classify_clearchat(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    Some(DomainEvent::ClearChat(ClearChat {
        channel,
        target_user: (!line.trailing.is_empty()).then(|| line.trailing.clone()),
        ban_duration_seconds: line.tag("ban-duration").and_then(|v| v.parse().ok()).unwrap_or(0),
        room_id: tag_string(line, "room-id"),
        target_user_id: line.tag("target-user-id").map(str::to_string),
        timestamp: parser::parse_timestamp(&line.tags),
    }))
}

fn classify_clearmsg(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    Some(DomainEvent::ClearMessage(ClearMessage {
        channel,
        user: tag_string(line, "login"),
        message: line.trailing.clone(),
        target_msg_id: tag_string(line, "target-msg-id"),
        timestamp: parser::parse_timestamp(&line.tags),
    }))
}

fn classify_globaluserstate(line: &IrcLine) -> Option<DomainEvent> {
    Some(DomainEvent::GlobalUserState(GlobalUserState {
        user_id: tag_string(line, "user-id"),
        display_name: display_name_or_login(line),
        color: tag_color(line),
        badges: tag_badges(line, "badges"),
        badge_info: tag_badges(line, "badge-info"),
        emote_sets: line
            .tag("emote-sets")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    }))
}

fn classify_userstate(line: &IrcLine) -> Option<DomainEvent> {
    let channel = line.channel()?.to_string();
    Some(DomainEvent::UserState(UserState {
        channel,
        display_name: display_name_or_login(line),
        color: tag_color(line),
        badges: tag_badges(line, "badges"),
        badge_info: tag_badges(line, "badge-info"),
        emote_sets: line
            .tag("emote-sets")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        is_mod: tag_flag(line, "mod"),
        is_subscriber: tag_flag(line, "subscriber"),
    }))
}

fn classify_join_part(line: &IrcLine) -> Option<(String, String)> {
    let channel = line.channel()?.to_string();
    let user = line.prefix_nick().to_string();
    Some((channel, user))
}

/// Classify a parsed line. Stateless; never panics. Unrecognized commands
/// map to [`Classification::Ignored`].
pub fn classify(line: &IrcLine) -> Classification {
    match line.command.as_str() {
        "PING" => Classification::Ping(line.trailing.clone()),
        "PONG" => Classification::Pong,
        "PRIVMSG" => classify_privmsg(line).map_or(Classification::Ignored, Classification::Event),
        "WHISPER" => classify_whisper(line).map_or(Classification::Ignored, Classification::Event),
        "USERNOTICE" => {
            classify_usernotice(line).map_or(Classification::Ignored, Classification::Event)
        }
        "NOTICE" => classify_notice(line).map_or(Classification::Ignored, Classification::Event),
        "ROOMSTATE" => {
            classify_roomstate(line).map_or(Classification::Ignored, Classification::Event)
        }
        "CLEARCHAT" => {
            classify_clearchat(line).map_or(Classification::Ignored, Classification::Event)
        }
        "CLEARMSG" => classify_clearmsg(line).map_or(Classification::Ignored, Classification::Event),
        "GLOBALUSERSTATE" => Classification::Event(
            classify_globaluserstate(line).expect("globaluserstate always decodes"),
        ),
        "USERSTATE" => {
            classify_userstate(line).map_or(Classification::Ignored, Classification::Event)
        }
        "JOIN" => classify_join_part(line)
            .map(|(channel, user)| Classification::Event(DomainEvent::Join { channel, user }))
            .unwrap_or(Classification::Ignored),
        "PART" => classify_join_part(line)
            .map(|(channel, user)| Classification::Event(DomainEvent::Part { channel, user }))
            .unwrap_or(Classification::Ignored),
        "RECONNECT" => Classification::Event(DomainEvent::Reconnect),
        _ => Classification::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn emote_slice_extracts_substring_by_inclusive_range() {
        let emote = Emote {
            id: "25".into(),
            name: None,
            start: 0,
            end: 4,
            count: 1,
        };
        assert_eq!(emote.slice("Kappa is great"), Some("Kappa"));
    }

    #[test]
    fn classifies_ping() {
        let line = parse("PING :tmi.twitch.tv");
        assert_eq!(classify(&line), Classification::Ping("tmi.twitch.tv".into()));
    }

    #[test]
    fn classifies_pong() {
        let line = parse(":tmi.twitch.tv PONG tmi.twitch.tv :tmi.twitch.tv");
        assert_eq!(classify(&line), Classification::Pong);
    }

    #[test]
    fn classifies_welcome_and_privmsg_scenario() {
        let line = parse(
            "@id=abc;user-id=7;display-name=U;mod=1;tmi-sent-ts=1700000000000 :u!u@u.tmi.twitch.tv PRIVMSG #chan :hi",
        );
        match classify(&line) {
            Classification::Event(DomainEvent::ChatMessage(msg)) => {
                assert_eq!(msg.id, "abc");
                assert_eq!(msg.channel, "chan");
                assert_eq!(msg.user_id, "7");
                assert_eq!(msg.display_name, "U");
                assert!(msg.is_mod);
                assert_eq!(msg.message, "hi");
                assert_eq!(msg.timestamp.to_rfc3339(), "2023-11-14T22:13:20+00:00");
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }

    #[test]
    fn classifies_timeout_clearchat() {
        let line = parse("@ban-duration=600;target-user-id=9 :tmi.twitch.tv CLEARCHAT #chan :baduser");
        match classify(&line) {
            Classification::Event(DomainEvent::ClearChat(cc)) => {
                assert_eq!(cc.channel, "chan");
                assert_eq!(cc.target_user.as_deref(), Some("baduser"));
                assert_eq!(cc.ban_duration_seconds, 600);
                assert_eq!(cc.target_user_id.as_deref(), Some("9"));
            }
            other => panic!("expected ClearChat, got {other:?}"),
        }
    }

    #[test]
    fn clearchat_ban_duration_absent_is_permanent() {
        let line = parse(":tmi.twitch.tv CLEARCHAT #chan :baduser");
        match classify(&line) {
            Classification::Event(DomainEvent::ClearChat(cc)) => {
                assert_eq!(cc.ban_duration_seconds, 0);
            }
            other => panic!("expected ClearChat, got {other:?}"),
        }
    }

    #[test]
    fn classifies_subgift_usernotice() {
        let line = parse(
            "@msg-id=subgift;msg-param-recipient-user-name=target;msg-param-sub-plan=1000 :tmi.twitch.tv USERNOTICE #chan :",
        );
        match classify(&line) {
            Classification::Event(DomainEvent::UserNotice(un)) => {
                assert_eq!(un.notice_type, "subgift");
                assert_eq!(un.msg_params.get("recipient-user-name").unwrap(), "target");
                assert_eq!(un.msg_params.get("sub-plan").unwrap(), "1000");
            }
            other => panic!("expected UserNotice, got {other:?}"),
        }
    }

    #[test]
    fn followers_only_absent_defaults_to_off() {
        let line = parse(":tmi.twitch.tv ROOMSTATE #chan");
        match classify(&line) {
            Classification::Event(DomainEvent::RoomState(rs)) => {
                assert_eq!(rs.followers_only, -1);
            }
            other => panic!("expected RoomState, got {other:?}"),
        }
    }

    #[test]
    fn followers_only_zero_means_any_follower() {
        let line = parse("@followers-only=0 :tmi.twitch.tv ROOMSTATE #chan");
        match classify(&line) {
            Classification::Event(DomainEvent::RoomState(rs)) => {
                assert_eq!(rs.followers_only, 0);
            }
            other => panic!("expected RoomState, got {other:?}"),
        }
    }

    #[test]
    fn classifies_reconnect() {
        let line = parse("RECONNECT");
        assert_eq!(classify(&line), Classification::Event(DomainEvent::Reconnect));
    }

    #[test]
    fn unrecognized_command_is_ignored() {
        let line = parse("CAP * ACK :twitch.tv/tags");
        assert_eq!(classify(&line), Classification::Ignored);
    }

    #[test]
    fn classifies_join_and_part() {
        let join = parse(":user!user@user.tmi.twitch.tv JOIN #channel");
        assert_eq!(
            classify(&join),
            Classification::Event(DomainEvent::Join {
                channel: "channel".into(),
                user: "user".into()
            })
        );

        let part = parse(":user!user@user.tmi.twitch.tv PART #channel");
        assert_eq!(
            classify(&part),
            Classification::Event(DomainEvent::Part {
                channel: "channel".into(),
                user: "user".into()
            })
        );
    }
}
