use super::pattern::wildcard_match;
use super::snapshot::{ThreadId, ThreadRef};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Which threads a recording or a query applies to.
///
/// Text form: `*`, or a comma separated list of ids (`12`), id ranges (`3-7`)
/// and double-quoted name patterns (`"pool-*"`), e.g. `1,3-5,"Thread-*"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadSelector {
    All,
    Items(Vec<SelectorItem>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorItem {
    Id(ThreadId),
    Range(ThreadId, ThreadId),
    Name(String),
}

impl ThreadSelector {
    pub fn ids(ids: impl IntoIterator<Item = u64>) -> Self {
        ThreadSelector::Items(
            ids.into_iter()
                .map(|id| SelectorItem::Id(ThreadId(id)))
                .collect(),
        )
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ThreadSelector::All)
    }

    /// Resolve against the known threads. Result is sorted and de-duplicated;
    /// ids that are not in `threads` are dropped.
    pub fn resolve(&self, threads: &[ThreadRef]) -> Vec<ThreadId> {
        let selected: BTreeSet<ThreadId> = threads
            .iter()
            .filter(|t| self.matches(t))
            .map(|t| t.id)
            .collect();
        selected.into_iter().collect()
    }

    pub fn matches(&self, thread: &ThreadRef) -> bool {
        match self {
            ThreadSelector::All => true,
            ThreadSelector::Items(items) => items.iter().any(|item| match item {
                SelectorItem::Id(id) => thread.id == *id,
                SelectorItem::Range(lo, hi) => thread.id >= *lo && thread.id <= *hi,
                SelectorItem::Name(pattern) => wildcard_match(&thread.name, pattern),
            }),
        }
    }
}

impl FromStr for ThreadSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "*" {
            return Ok(ThreadSelector::All);
        }

        let mut items = Vec::new();
        for token in split_outside_quotes(s)? {
            let token = token.trim();
            if token.is_empty() {
                return Err(Error::InvalidSelector(s.to_string()));
            }
            items.push(parse_item(token).ok_or_else(|| Error::InvalidSelector(s.to_string()))?);
        }

        if items.is_empty() {
            return Err(Error::InvalidSelector(s.to_string()));
        }
        Ok(ThreadSelector::Items(items))
    }
}

fn parse_item(token: &str) -> Option<SelectorItem> {
    if let Some(inner) = token.strip_prefix('"') {
        let name = inner.strip_suffix('"')?;
        return (!name.is_empty()).then(|| SelectorItem::Name(name.to_string()));
    }
    if let Ok(id) = token.parse::<u64>() {
        return Some(SelectorItem::Id(ThreadId(id)));
    }
    let (lo, hi) = token.split_once('-')?;
    let lo = lo.trim().parse::<u64>().ok()?;
    let hi = hi.trim().parse::<u64>().ok()?;
    (lo <= hi).then_some(SelectorItem::Range(ThreadId(lo), ThreadId(hi)))
}

/// Split on commas that are not inside double quotes
fn split_outside_quotes(s: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(Error::InvalidSelector(s.to_string()));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

impl fmt::Display for ThreadSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadSelector::All => f.write_str("*"),
            ThreadSelector::Items(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match item {
                        SelectorItem::Id(id) => write!(f, "{}", id)?,
                        SelectorItem::Range(lo, hi) => write!(f, "{}-{}", lo, hi)?,
                        SelectorItem::Name(name) => write!(f, "\"{}\"", name)?,
                    }
                }
                Ok(())
            }
        }
    }
}
