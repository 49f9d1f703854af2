use crate::filter::header_space::HeaderSpace;
use crate::flow::Flow;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineAction {
    Permit,
    Deny,
}

impl Display for LineAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LineAction::Permit => f.write_str("permit"),
            LineAction::Deny => f.write_str("deny"),
        }
    }
}

/// A boolean expression over packet headers
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum MatchExpr {
    HeaderSpace(HeaderSpace),
    /// Matches every packet
    #[default]
    True,
    /// Matches no packet (an empty [`HeaderSpace`] would match everything instead)
    False,
    Not(Box<MatchExpr>),
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
}

impl MatchExpr {
    pub fn matches(&self, flow: &Flow) -> bool {
        match self {
            MatchExpr::HeaderSpace(hs) => hs.matches(flow),
            MatchExpr::True => true,
            MatchExpr::False => false,
            MatchExpr::Not(expr) => !expr.matches(flow),
            MatchExpr::And(exprs) => exprs.iter().all(|e| e.matches(flow)),
            MatchExpr::Or(exprs) => exprs.iter().any(|e| e.matches(flow)),
        }
    }

    /// Whether the expression trivially matches every packet
    pub fn is_unrestricted(&self) -> bool {
        match self {
            MatchExpr::HeaderSpace(hs) => hs.is_unrestricted(),
            MatchExpr::True => true,
            MatchExpr::And(exprs) => exprs.iter().all(MatchExpr::is_unrestricted),
            _ => false,
        }
    }
}

impl From<HeaderSpace> for MatchExpr {
    fn from(hs: HeaderSpace) -> Self {
        MatchExpr::HeaderSpace(hs)
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct AclLine {
    #[serde(default)]
    pub name: String,
    pub action: LineAction,
    #[serde(rename = "match", default)]
    pub matcher: MatchExpr,
}

impl AclLine {
    pub fn permit(matcher: impl Into<MatchExpr>) -> Self {
        Self {
            name: String::new(),
            action: LineAction::Permit,
            matcher: matcher.into(),
        }
    }

    pub fn deny(matcher: impl Into<MatchExpr>) -> Self {
        Self {
            name: String::new(),
            action: LineAction::Deny,
            matcher: matcher.into(),
        }
    }

    pub fn named(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }
}

/// The outcome of running a flow through an access list
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct FilterResult {
    /// Index of the first matching line, if any line matched
    pub matched_line: Option<usize>,
    pub action: LineAction,
}

impl FilterResult {
    pub fn is_permitted(&self) -> bool {
        self.action == LineAction::Permit
    }
}

/// An ordered list of lines, evaluated first-match-wins with an implicit deny at the end
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct IpAccessList {
    #[serde(with = "crate::util::serde_arc_str")]
    pub name: Arc<str>,
    pub lines: Vec<AclLine>,
}

impl IpAccessList {
    pub fn new(name: impl Into<Arc<str>>, lines: Vec<AclLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    pub fn filter(&self, flow: &Flow) -> FilterResult {
        self.lines
            .iter()
            .position(|line| line.matcher.matches(flow))
            .map(|i| FilterResult {
                matched_line: Some(i),
                action: self.lines[i].action,
            })
            .unwrap_or(FilterResult {
                matched_line: None,
                action: LineAction::Deny,
            })
    }

    /// Whether the list permits every packet without needing to look at it
    pub fn is_permit_all(&self) -> bool {
        self.lines
            .first()
            .is_some_and(|l| l.action == LineAction::Permit && l.matcher.is_unrestricted())
    }

    /// A description of the line that decided `result`, for trace notes
    pub fn describe(&self, result: &FilterResult) -> String {
        match result.matched_line {
            Some(i) if !self.lines[i].name.is_empty() => {
                format!("{} line {i} ({})", self.name, self.lines[i].name)
            }
            Some(i) => format!("{} line {i}", self.name),
            None => format!("{} implicit deny", self.name),
        }
    }
}
