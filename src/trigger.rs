// prompt-toggle/src/trigger.rs

//! Keyword and permission gate for inbound chat messages.
//!
//! Checks run in a fixed order and stop at the first failure; the order only
//! decides which reason gets reported.

use regex::Regex;
use std::{fmt, sync::LazyLock};
use tracing::debug;

use crate::{config::Config, hooks::ChatEvent};

static AT_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\S*").expect("static regex"));
static CQ_AT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[CQ:at[^\]]*\]").expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReason {
    Disabled,
    NotAddressed,
    Unauthorized,
    EmptyMessage,
    NoKeyword,
    Matched { keyword: String },
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("plugin disabled"),
            Self::NotAddressed => f.write_str("message does not address the bot"),
            Self::Unauthorized => f.write_str("sender is not allowed to trigger"),
            Self::EmptyMessage => f.write_str("message is empty"),
            Self::NoKeyword => f.write_str("no trigger keyword matched"),
            Self::Matched { keyword } => write!(f, "matched keyword: {keyword}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    pub fire: bool,
    pub reason: TriggerReason,
}

impl TriggerDecision {
    fn skip(reason: TriggerReason) -> Self { Self { fire: false, reason } }
}

/// Drop `@name` runs and `[CQ:at,...]` tags, then trim.
pub fn strip_mentions(text: &str) -> String {
    let cleaned = AT_TOKEN.replace_all(text, "");
    CQ_AT.replace_all(&cleaned, "").trim().to_string()
}

/// Admin-only mode trusts the host's role lookup when it has one. Without it
/// the sender is let through, as in authorized-user-less mode; the real gate
/// for admin-only hosts is their own command permission layer.
pub fn sender_permitted(event: &(impl ChatEvent + ?Sized), cfg: &Config) -> bool {
    if cfg.admin_only_mode {
        return match event.sender_is_admin() {
            Some(is_admin) => is_admin,
            None => {
                debug!(sender = event.sender_id(), "admin-only mode without host role info, permitting");
                true
            }
        };
    }
    cfg.authorized_users.is_empty() || cfg.authorized_users.iter().any(|u| u == event.sender_id())
}

pub fn should_trigger(event: &(impl ChatEvent + ?Sized), cfg: &Config) -> TriggerDecision {
    if !cfg.enabled { return TriggerDecision::skip(TriggerReason::Disabled); }
    if !event.is_addressed() { return TriggerDecision::skip(TriggerReason::NotAddressed); }
    if !sender_permitted(event, cfg) { return TriggerDecision::skip(TriggerReason::Unauthorized); }

    let cleaned = strip_mentions(event.text());
    if cleaned.is_empty() { return TriggerDecision::skip(TriggerReason::EmptyMessage); }

    let lowered = cleaned.to_lowercase();
    match cfg.trigger_keywords.iter().find(|k| lowered.contains(&k.to_lowercase())) {
        Some(keyword) => TriggerDecision { fire: true, reason: TriggerReason::Matched { keyword: keyword.clone() } },
        None => TriggerDecision::skip(TriggerReason::NoKeyword),
    }
}
