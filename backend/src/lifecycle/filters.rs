// Workflow Filters - the closed set of predicates a workflow can narrow its events with

use serde::{Deserialize, Serialize};

use super::events::EventSource;

/// A filter predicate. An absent filter of a kind means "any value".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowFilter {
    /// Subject's department must be one of `values` (ASCII case-insensitive)
    Department { values: Vec<String> },
    /// Event source must be one of `values`
    Source { values: Vec<EventSource> },
}

impl WorkflowFilter {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Department { .. } => "department",
            Self::Source { .. } => "source",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Department { values } => values.iter().all(|v| v.trim().is_empty()),
            Self::Source { values } => values.is_empty(),
        }
    }

    pub fn matches(&self, subject: &MatchSubject) -> bool {
        match self {
            Self::Department { values } => {
                if self.is_empty() {
                    return true;
                }
                match subject.department.as_deref() {
                    Some(department) => values
                        .iter()
                        .any(|v| v.trim().eq_ignore_ascii_case(department.trim())),
                    None => false,
                }
            }
            Self::Source { values } => values.is_empty() || values.contains(&subject.source),
        }
    }
}

/// The attributes filters are evaluated against, resolved once per event
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSubject {
    pub department: Option<String>,
    pub source: EventSource,
}

/// All filters must pass
pub fn all_match(filters: &[WorkflowFilter], subject: &MatchSubject) -> bool {
    filters.iter().all(|f| f.matches(subject))
}
