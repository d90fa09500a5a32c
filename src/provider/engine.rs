//! Path and command engine.
//!
//! A request id carries a base path followed by command-token segments of
//! the form `<Cmd:Arg[:Arg]>`. The engine peels tokens off the id,
//! normalizes the pipeline, and evaluates it over the provider's listing of
//! the base path.

use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::model::{ObjectClass, ProviderObject};

/// One command token of a path pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `<GroupBy:prop>` — aggregate the listing by a property.
    GroupBy(String),
    /// `<Show:prop:value>` — filter to members whose property stringifies
    /// to the value. The value may itself contain `:`.
    Show { prop: String, value: String },
    /// `<ShowMy:user>` — provider-defined "restricted to the caller".
    ShowMy(String),
    /// `<Search:...>` — search sub-protocol marker; never evaluated as part
    /// of a listing pipeline.
    Search(String),
    /// `<OpenAction>` — consumed by the browser, never by a provider.
    OpenAction,
    /// Any other `<...>` segment, kept verbatim.
    Unrecognized(String),
}

impl Token {
    /// Parse one path segment; `None` when the segment is not `<...>`-shaped.
    pub fn parse(segment: &str) -> Option<Token> {
        if !is_token_segment(segment) {
            return None;
        }
        let inner = &segment[1..segment.len() - 1];
        let mut parts = inner.splitn(3, ':');
        let cmd = parts.next().unwrap_or_default();
        let arg1 = parts.next();
        let arg2 = parts.next();
        let token = match (cmd, arg1, arg2) {
            ("GroupBy", Some(prop), None) => Token::GroupBy(prop.to_string()),
            ("Show", Some(prop), Some(value)) => Token::Show {
                prop: prop.to_string(),
                value: value.to_string(),
            },
            ("ShowMy", Some(user), None) => Token::ShowMy(user.to_string()),
            ("Search", _, _) => {
                Token::Search(inner.strip_prefix("Search").unwrap_or_default()
                    .strip_prefix(':').unwrap_or_default().to_string())
            }
            ("OpenAction", None, None) => Token::OpenAction,
            _ => Token::Unrecognized(segment.to_string()),
        };
        Some(token)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::GroupBy(prop) => write!(f, "<GroupBy:{prop}>"),
            Token::Show { prop, value } => write!(f, "<Show:{prop}:{value}>"),
            Token::ShowMy(user) => write!(f, "<ShowMy:{user}>"),
            Token::Search(args) if args.is_empty() => write!(f, "<Search>"),
            Token::Search(args) => write!(f, "<Search:{args}>"),
            Token::OpenAction => write!(f, "<OpenAction>"),
            Token::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

/// True when a path segment has the `<...>` command-token shape.
pub fn is_token_segment(segment: &str) -> bool {
    segment.len() >= 2 && segment.starts_with('<') && segment.ends_with('>')
}

/// A request id split into its base path and command pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    pub base: String,
    pub tokens: Vec<Token>,
}

/// Split an id into base and pipeline by peeling trailing `<...>` segments
/// from the right. The base keeps the leading `/` when the id was rooted;
/// an empty base becomes `/`.
pub fn parse_id(id: &str) -> ParsedId {
    let trimmed = id.trim();
    let rooted = trimmed.starts_with('/');
    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    let mut tokens = Vec::new();
    while let Some(last) = segments.last() {
        match Token::parse(last) {
            Some(token) => {
                tokens.push(token);
                segments.pop();
            }
            None => break,
        }
    }
    tokens.reverse();

    let joined = segments.join("/");
    let base = if joined.is_empty() {
        "/".to_string()
    } else if rooted {
        format!("/{joined}")
    } else {
        joined
    };
    ParsedId { base, tokens }
}

/// Collapse every adjacent `<GroupBy:P>, <Show:P:V>` pair into the `Show`
/// alone: entering a synthesized group and then filtering on the same
/// property is a drill-through that must restore the original leaf stream.
pub fn normalize(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let (Some(Token::GroupBy(grouped)), Token::Show { prop, .. }) = (out.last(), &token) {
            if grouped == prop {
                out.pop();
            }
        }
        out.push(token);
    }
    out
}

/// Grouping configuration supplied by the provider.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Icon filename stamped onto synthesized group objects.
    pub group_icon: String,
    /// Properties `GroupBy` may aggregate on; `None` allows any.
    pub whitelist: Option<HashSet<String>>,
}

/// Evaluate a pipeline over the listing of `base`.
///
/// Only `Show` is legal as an intermediate step; the trailing token may also
/// be `GroupBy`. Any other composition yields the empty listing (a semantic
/// error, never a protocol error), as does a `GroupBy` on a property outside
/// the whitelist.
pub fn evaluate<F>(
    base: &str,
    tokens: &[Token],
    options: &EngineOptions,
    list_for_base: F,
) -> Result<Vec<ProviderObject>>
where
    F: FnOnce(&str) -> Result<Vec<ProviderObject>>,
{
    let tokens = normalize(tokens.to_vec());
    let mut acc = list_for_base(base)?;
    for (index, token) in tokens.iter().enumerate() {
        let trailing = index + 1 == tokens.len();
        match token {
            Token::Show { prop, value } => {
                acc.retain(|o| o.property(prop).as_deref() == Some(value.as_str()));
            }
            Token::GroupBy(prop) if trailing => {
                if let Some(whitelist) = &options.whitelist {
                    if !whitelist.contains(prop) {
                        return Ok(Vec::new());
                    }
                }
                return Ok(group_by(&acc, base, &tokens[..index], prop, &options.group_icon));
            }
            _ => return Ok(Vec::new()),
        }
    }
    Ok(acc)
}

/// Aggregate a listing by the stringified value of `prop`, skipping objects
/// where it is null or missing. Groups come out in first-occurrence order;
/// each group id appends `<Show:prop:value>` to the base plus all tokens
/// already applied, so entering the group round-trips exactly.
fn group_by(
    objects: &[ProviderObject],
    base: &str,
    prior: &[Token],
    prop: &str,
    group_icon: &str,
) -> Vec<ProviderObject> {
    let mut prefix = if base == "/" {
        String::new()
    } else {
        base.trim_end_matches('/').to_string()
    };
    for token in prior {
        prefix.push('/');
        prefix.push_str(&token.to_string());
    }

    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, u64> = HashMap::new();
    for object in objects {
        let Some(value) = object.property(prop) else {
            continue;
        };
        if !counts.contains_key(&value) {
            order.push(value.clone());
        }
        *counts.entry(value).or_insert(0) += 1;
    }

    order
        .into_iter()
        .map(|value| {
            let count = counts[&value];
            ProviderObject {
                class: ObjectClass::Group,
                id: format!("{prefix}/<Show:{prop}:{value}>"),
                title: value,
                icon: Some(group_icon.to_string()),
                objects: count,
                extras: serde_json::Map::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, user: Option<&str>, state: &str) -> ProviderObject {
        let obj = ProviderObject::new(ObjectClass::SlurmJob, id, id.trim_start_matches('/'))
            .extra("jobstate", state);
        match user {
            Some(u) => obj.extra("userid", u),
            None => obj.extra("userid", serde_json::Value::Null),
        }
    }

    fn leaves() -> Vec<ProviderObject> {
        vec![
            job("/part/1", Some("alice"), "Running"),
            job("/part/2", Some("alice"), "Pending"),
            job("/part/3", Some("bob"), "Running"),
            job("/part/4", None, "Running"),
        ]
    }

    fn options() -> EngineOptions {
        EngineOptions {
            group_icon: "./resources/Group.png".to_string(),
            whitelist: None,
        }
    }

    #[test]
    fn test_parse_id_peels_trailing_tokens() {
        let parsed = parse_id("/part/<GroupBy:userid>/<Show:userid:alice>");
        assert_eq!(parsed.base, "/part");
        assert_eq!(
            parsed.tokens,
            vec![
                Token::GroupBy("userid".into()),
                Token::Show {
                    prop: "userid".into(),
                    value: "alice".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_id_root_and_bare_tokens() {
        assert_eq!(parse_id("/"), ParsedId { base: "/".into(), tokens: vec![] });
        assert_eq!(parse_id(""), ParsedId { base: "/".into(), tokens: vec![] });

        // Command tokens directly on the root are legal.
        let parsed = parse_id("/<GroupBy:userid>");
        assert_eq!(parsed.base, "/");
        assert_eq!(parsed.tokens, vec![Token::GroupBy("userid".into())]);

        let parsed = parse_id("/<ShowMy:alice>");
        assert_eq!(parsed.tokens, vec![Token::ShowMy("alice".into())]);
    }

    #[test]
    fn test_parse_show_value_may_contain_colons() {
        let parsed = parse_id("/x/<Show:maxtime:1-00:00:00>");
        assert_eq!(
            parsed.tokens,
            vec![Token::Show {
                prop: "maxtime".into(),
                value: "1-00:00:00".into()
            }]
        );
        // And the token renders back exactly.
        assert_eq!(parsed.tokens[0].to_string(), "<Show:maxtime:1-00:00:00>");
    }

    #[test]
    fn test_parse_unrecognized_token_kept_verbatim() {
        let parsed = parse_id("/x/<Frob:1>");
        assert_eq!(parsed.base, "/x");
        assert_eq!(parsed.tokens, vec![Token::Unrecognized("<Frob:1>".into())]);
        assert_eq!(parsed.tokens[0].to_string(), "<Frob:1>");
    }

    #[test]
    fn test_normalize_collapses_drill_through() {
        let collapsed = normalize(vec![
            Token::GroupBy("userid".into()),
            Token::Show {
                prop: "userid".into(),
                value: "alice".into(),
            },
        ]);
        assert_eq!(
            collapsed,
            vec![Token::Show {
                prop: "userid".into(),
                value: "alice".into()
            }]
        );

        // Different properties do not collapse.
        let kept = normalize(vec![
            Token::GroupBy("userid".into()),
            Token::Show {
                prop: "jobstate".into(),
                value: "Running".into(),
            },
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_group_then_show_equals_plain_show() {
        let piped = evaluate(
            "/part",
            &parse_id("/part/<GroupBy:userid>/<Show:userid:alice>").tokens,
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        let direct = evaluate(
            "/part",
            &parse_id("/part/<Show:userid:alice>").tokens,
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        assert_eq!(piped, direct);
        assert_eq!(piped.len(), 2);
    }

    #[test]
    fn test_group_by_counts_and_ids() {
        let groups = evaluate(
            "/part",
            &[Token::GroupBy("userid".into())],
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        // One group per distinct non-null value, counts summing to the
        // non-null members, first-occurrence order.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].title, "alice");
        assert_eq!(groups[0].objects, 2);
        assert_eq!(groups[0].id, "/part/<Show:userid:alice>");
        assert_eq!(groups[1].title, "bob");
        assert_eq!(groups[1].objects, 1);
        assert_eq!(groups.iter().map(|g| g.objects).sum::<u64>(), 3);

        // Entering a group id yields exactly the original members.
        let parsed = parse_id(&groups[0].id);
        let members = evaluate(&parsed.base, &parsed.tokens, &options(), |_| Ok(leaves())).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|o| o.property("userid").as_deref() == Some("alice")));
    }

    #[test]
    fn test_show_partitions_are_disjoint_and_cover() {
        let all = leaves();
        let values = ["alice", "bob"];
        let mut seen = Vec::new();
        for value in values {
            let subset = evaluate(
                "/part",
                &[Token::Show {
                    prop: "userid".into(),
                    value: value.into(),
                }],
                &options(),
                |_| Ok(leaves()),
            )
            .unwrap();
            for object in &subset {
                assert!(!seen.contains(&object.id), "partitions overlap at {}", object.id);
                seen.push(object.id.clone());
            }
        }
        let non_null = all.iter().filter(|o| o.property("userid").is_some()).count();
        assert_eq!(seen.len(), non_null);
    }

    #[test]
    fn test_group_by_after_filter_prefixes_prior_tokens() {
        let groups = evaluate(
            "/part",
            &parse_id("/part/<Show:jobstate:Running>/<GroupBy:userid>").tokens,
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[0].id,
            "/part/<Show:jobstate:Running>/<Show:userid:alice>"
        );
        assert_eq!(groups[0].objects, 1);
    }

    #[test]
    fn test_intermediate_group_by_is_empty() {
        let result = evaluate(
            "/part",
            &parse_id("/part/<GroupBy:userid>/<Show:jobstate:Running>").tokens,
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_whitelist_misses_yield_empty_not_error() {
        let restricted = EngineOptions {
            group_icon: "./resources/Group.png".to_string(),
            whitelist: Some(HashSet::from(["status".to_string()])),
        };
        let result = evaluate(
            "/part",
            &[Token::GroupBy("userid".into())],
            &restricted,
            |_| Ok(leaves()),
        )
        .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_search_and_showmy_do_not_compose() {
        for tokens in [
            vec![Token::Search("yes:mpi".into())],
            vec![Token::ShowMy("alice".into())],
            vec![
                Token::Show {
                    prop: "userid".into(),
                    value: "alice".into(),
                },
                Token::OpenAction,
            ],
        ] {
            let result = evaluate("/part", &tokens, &options(), |_| Ok(leaves())).unwrap();
            assert!(result.is_empty(), "tokens {tokens:?} must not evaluate");
        }
    }

    #[test]
    fn test_group_by_all_null_property_yields_no_groups() {
        let groups = evaluate(
            "/part",
            &[Token::GroupBy("nosuch".into())],
            &options(),
            |_| Ok(leaves()),
        )
        .unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_group_by_on_root_base() {
        let groups = evaluate("/", &[Token::GroupBy("jobstate".into())], &options(), |_| {
            Ok(leaves())
        })
        .unwrap();
        assert_eq!(groups[0].id, "/<Show:jobstate:Running>");
        assert_eq!(groups[0].objects, 3);
    }
}
