//! A small CSS selector matcher: type, `*`, `#id`, `.class`, `[attr]`,
//! `[attr=value]`, compounds of those, and the descendant combinator.

use crate::dom::{Document, NodeId};
use crate::error::DomError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Simple {
    Universal,
    Type(String),
    Id(String),
    Class(String),
    Attr { name: String, value: Option<String> },
}

/// A parsed selector: compounds separated by whitespace (descendant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    compounds: Vec<Vec<Simple>>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, DomError> {
        let fail = |reason: &str| DomError::InvalidSelector {
            selector: input.to_string(),
            reason: reason.to_string(),
        };
        let compounds = input
            .split_whitespace()
            .map(|part| parse_compound(part).map_err(|r| fail(&r)))
            .collect::<Result<Vec<_>, _>>()?;
        if compounds.is_empty() {
            return Err(fail("empty selector"));
        }
        Ok(Self { compounds })
    }

    /// Whether element `id` matches.
    pub fn matches(&self, doc: &Document, id: NodeId) -> bool {
        let Some((last, ancestors)) = self.compounds.split_last() else {
            return false;
        };
        if !compound_matches(doc, id, last) {
            return false;
        }
        // Greedy right-to-left ancestor walk is exact for descendant-only
        // selectors.
        let mut remaining = ancestors.iter().rev().peekable();
        let mut cur = doc.parent(id);
        while let Some(compound) = remaining.peek() {
            match cur {
                None => return false,
                Some(node) => {
                    if compound_matches(doc, node, compound) {
                        remaining.next();
                    }
                    cur = doc.parent(node);
                }
            }
        }
        true
    }
}

fn compound_matches(doc: &Document, id: NodeId, compound: &[Simple]) -> bool {
    let Some(el) = doc.element(id) else {
        return false;
    };
    compound.iter().all(|s| match s {
        Simple::Universal => true,
        Simple::Type(t) => el.tag.name() == t,
        Simple::Id(v) => el.id() == Some(v.as_str()),
        Simple::Class(c) => el.classes().any(|k| k == c),
        Simple::Attr { name, value } => match (el.attribute(name), value) {
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
            (None, _) => false,
        },
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(part: &str) -> Result<Vec<Simple>, String> {
    let mut out = Vec::new();
    let mut rest = part;

    let take_ident = |s: &str| -> (String, usize) {
        let end = s.find(|c: char| !is_ident_char(c)).unwrap_or(s.len());
        (s[..end].to_string(), end)
    };

    if let Some(stripped) = rest.strip_prefix('*') {
        out.push(Simple::Universal);
        rest = stripped;
    } else {
        let (name, used) = take_ident(rest);
        if used > 0 {
            out.push(Simple::Type(name.to_ascii_lowercase()));
            rest = &rest[used..];
        }
    }

    while let Some(c) = rest.chars().next() {
        match c {
            '#' | '.' => {
                let (name, used) = take_ident(&rest[1..]);
                if used == 0 {
                    return Err(format!("expected a name after '{c}'"));
                }
                out.push(if c == '#' {
                    Simple::Id(name)
                } else {
                    Simple::Class(name)
                });
                rest = &rest[1 + used..];
            }
            '[' => {
                let close = rest.find(']').ok_or("unterminated attribute selector")?;
                let body = &rest[1..close];
                let simple = match body.split_once('=') {
                    Some((name, value)) => Simple::Attr {
                        name: name.trim().to_ascii_lowercase(),
                        value: Some(value.trim().trim_matches(|q| q == '"' || q == '\'').to_string()),
                    },
                    None => Simple::Attr {
                        name: body.trim().to_ascii_lowercase(),
                        value: None,
                    },
                };
                if matches!(&simple, Simple::Attr { name, .. } if name.is_empty()) {
                    return Err("empty attribute name".to_string());
                }
                out.push(simple);
                rest = &rest[close + 1..];
            }
            other => return Err(format!("unsupported character '{other}'")),
        }
    }

    if out.is_empty() {
        return Err("empty compound".to_string());
    }
    Ok(out)
}
