//! Inspection outcomes.

use std::fmt;

/// The fixed policy rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    CcCount,
    MentionCount,
    Keyword,
}

impl Rule {
    /// Short reason used in logs and metrics.
    pub fn reason(self) -> &'static str {
        match self {
            Rule::CcCount => "too many items in cc",
            Rule::MentionCount => "too many mentions",
            Rule::Keyword => "denied keyword",
        }
    }

    /// Message shown to the client in the rejection envelope.
    pub fn client_message(self) -> &'static str {
        match self {
            Rule::CcCount => "Your request has been filtered for too many items in field cc.",
            Rule::MentionCount => "Your request has been filtered for too many mentions.",
            Rule::Keyword => {
                "Your request has been filtered for having keywords that denied by our server."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rule::CcCount => "cc",
            Rule::MentionCount => "mentions",
            Rule::Keyword => "keyword",
        }
    }
}

/// What tripped the rule. Kept out of the client-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Count { found: usize, limit: usize },
    Keyword(String),
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Count { found, limit } => write!(f, "{}/{}", found, limit),
            Finding::Keyword(keyword) => write!(f, "keyword `{}`", keyword),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub rule: Rule,
    pub finding: Finding,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        self.rule.reason()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}
