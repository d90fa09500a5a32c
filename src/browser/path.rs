//! Deep-link path language.
//!
//! A deep link is an absolute path whose segments may be `[host:port]`
//! endpoint switches, `<...>` command tokens, a trailing `[openaction]`,
//! or literal child names. Building emits the minimum-length link that
//! reproduces a navigation state.

use super::NavEntry;
use super::client::Endpoint;
use crate::provider::engine::{Token, is_token_segment};

/// One parsed deep-link segment.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkSegment {
    /// `[host:port]` — switch the current endpoint.
    Endpoint(Endpoint),
    /// `<Cmd:...>` — appended as-is to the current remote id.
    Command(String),
    /// Trailing `[openaction]` or `<OpenAction>` — perform the last
    /// object's open action.
    OpenAction,
    /// A literal child name, matched against the current listing.
    Literal(String),
}

/// Split a deep link into typed segments.
pub fn parse_link(link: &str) -> Vec<LinkSegment> {
    link.trim()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(classify_segment)
        .collect()
}

fn classify_segment(segment: &str) -> LinkSegment {
    if segment.len() >= 2 && segment.starts_with('[') && segment.ends_with(']') {
        let inner = &segment[1..segment.len() - 1];
        if inner.eq_ignore_ascii_case("openaction") {
            return LinkSegment::OpenAction;
        }
        if let Some((host, port)) = inner.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                if !host.is_empty() {
                    return LinkSegment::Endpoint(Endpoint::new(host, port));
                }
            }
        }
    }
    if is_token_segment(segment) {
        if matches!(Token::parse(segment), Some(Token::OpenAction)) {
            return LinkSegment::OpenAction;
        }
        return LinkSegment::Command(segment.to_string());
    }
    LinkSegment::Literal(segment.to_string())
}

/// Breadcrumb title for a command token: `<GroupBy:P>` reads "Group by P",
/// `<Show:P:V>` reads "Show P = V". Other segments keep their own name.
pub fn humanize_token(segment: &str) -> Option<String> {
    match Token::parse(segment)? {
        Token::GroupBy(prop) => Some(format!("Group by {prop}")),
        Token::Show { prop, value } => Some(format!("Show {prop} = {value}")),
        _ => None,
    }
}

/// Title for a nav entry whose remote id may end in a command token.
pub fn humanize_title(remote_id: &str, fallback: &str) -> String {
    remote_id
        .rsplit('/')
        .next()
        .and_then(humanize_token)
        .unwrap_or_else(|| fallback.to_string())
}

/// Last path segment of an id, used when a crumb has no title.
fn last_segment(id: &str) -> &str {
    id.rsplit('/').find(|s| !s.is_empty()).unwrap_or(id)
}

/// Emit the minimum-length deep link reproducing a navigation state:
/// an endpoint token only where the endpoint changes, a command token where
/// the crumb's remote id ends in one, the crumb title otherwise.
pub fn build_link(root: &Endpoint, nav: &[NavEntry]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = root.clone();
    for entry in nav {
        let endpoint = Endpoint::new(entry.host.clone(), entry.port);
        if endpoint != current {
            parts.push(format!("[{}:{}]", endpoint.host, endpoint.port));
            current = endpoint;
        }
        if entry.remote_id == "/" {
            // Synthetic crumb from a host switch; the endpoint token is
            // the whole story.
            continue;
        }
        let trailing = entry.remote_id.rsplit('/').next().unwrap_or_default();
        if is_token_segment(trailing) {
            parts.push(trailing.to_string());
        } else if !entry.title.is_empty() {
            parts.push(entry.title.clone());
        } else {
            parts.push(last_segment(&entry.id).to_string());
        }
    }
    format!("/{}", parts.join("/"))
}
