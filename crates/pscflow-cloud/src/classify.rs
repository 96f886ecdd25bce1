//! Failure classification from unstructured diagnostic text
//!
//! The external tools only report failures as free text on stderr, so the
//! classifier is a table of `(category, matchers)` rules evaluated in priority
//! order. New phrases are added to the table, never to control flow.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Category assigned to a failed apply attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A provider API was just enabled (or not yet) and has not propagated
    CapabilityPropagating,
    /// The operating identity lacks access to the project
    PermissionDenied,
    /// A long-running operation is still progressing on the provider side
    AsyncOperationInProgress,
    /// A long-running operation was accepted and continues in the background
    AsyncOperationAccepted,
    /// Anything else; never retried
    Unclassified,
}

impl ErrorCategory {
    /// Whether the category describes an accepted submission rather than a failure
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            ErrorCategory::AsyncOperationAccepted | ErrorCategory::AsyncOperationInProgress
        )
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::CapabilityPropagating => write!(f, "capability-propagating"),
            ErrorCategory::PermissionDenied => write!(f, "permission-denied"),
            ErrorCategory::AsyncOperationInProgress => write!(f, "async-operation-in-progress"),
            ErrorCategory::AsyncOperationAccepted => write!(f, "async-operation-accepted"),
            ErrorCategory::Unclassified => write!(f, "unclassified"),
        }
    }
}

/// Phrases that prove a provider API is not enabled yet.
///
/// They veto every higher-priority matcher so that such text always lands in
/// [`ErrorCategory::CapabilityPropagating`]. "wait a few minutes" is only a
/// hint and does not veto: it also appears in permission and quota errors.
const CAPABILITY_MARKERS: &[&str] = &[
    "SERVICE_DISABLED",
    "has not been used",
    "it is disabled",
    "accessNotConfigured",
];

const PERMISSION_PHRASES: &[&str] = &[
    "PERMISSION_DENIED",
    "Permission denied",
    "permission denied",
    "does not have permission",
    "not authorized to",
];

const ACCEPTED_PHRASES: &[&str] = &["running in the background", "running in background"];

const IN_PROGRESS_PHRASES: &[&str] = &[
    "taking longer than expected",
    "timeout while waiting",
    "timed out waiting",
    "context deadline exceeded",
];

const CAPABILITY_PHRASES: &[&str] = &[
    "SERVICE_DISABLED",
    "has not been used",
    "it is disabled",
    "wait a few minutes",
    "accessNotConfigured",
];

/// A single predicate: `phrase` present and none of `unless` present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    phrase: String,
    unless: Vec<String>,
}

impl Matcher {
    pub fn contains(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            unless: Vec::new(),
        }
    }

    /// Veto this matcher when any of `phrases` is also present
    pub fn unless<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unless.extend(phrases.into_iter().map(Into::into));
        self
    }

    pub fn matches(&self, text: &str) -> bool {
        text.contains(self.phrase.as_str()) && !self.unless.iter().any(|u| text.contains(u.as_str()))
    }
}

/// A classification rule; any matching matcher assigns `category`
#[derive(Debug, Clone)]
pub struct Rule {
    pub category: ErrorCategory,
    /// Only consulted for long-running resource types
    pub long_running_only: bool,
    pub matchers: Vec<Matcher>,
}

impl Rule {
    fn from_phrases(category: ErrorCategory, long_running_only: bool, phrases: &[&str]) -> Self {
        Self {
            category,
            long_running_only,
            matchers: phrases
                .iter()
                .map(|p| Matcher::contains(*p).unless(CAPABILITY_MARKERS.iter().copied()))
                .collect(),
        }
    }

    fn matches(&self, text: &str, long_running: bool) -> bool {
        if self.long_running_only && !long_running {
            return false;
        }
        self.matchers.iter().any(|m| m.matches(text))
    }
}

/// Ordered rule table; first matching rule wins
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = vec![
            Rule::from_phrases(ErrorCategory::PermissionDenied, false, PERMISSION_PHRASES),
            Rule::from_phrases(ErrorCategory::AsyncOperationAccepted, true, ACCEPTED_PHRASES),
            Rule::from_phrases(
                ErrorCategory::AsyncOperationInProgress,
                true,
                IN_PROGRESS_PHRASES,
            ),
            Rule {
                category: ErrorCategory::CapabilityPropagating,
                long_running_only: false,
                matchers: CAPABILITY_PHRASES
                    .iter()
                    .map(|p| Matcher::contains(*p))
                    .collect(),
            },
        ];
        Self { rules }
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; it is evaluated after the existing ones
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a matcher to the first rule of `category`, creating the rule if needed
    pub fn with_matcher(mut self, category: ErrorCategory, matcher: Matcher) -> Self {
        match self.rules.iter_mut().find(|r| r.category == category) {
            Some(rule) => rule.matchers.push(matcher),
            None => self.rules.push(Rule {
                category,
                long_running_only: false,
                matchers: vec![matcher],
            }),
        }
        self
    }

    pub fn classify(&self, stderr: &str, long_running: bool) -> ErrorCategory {
        self.rules
            .iter()
            .find(|rule| rule.matches(stderr, long_running))
            .map(|rule| rule.category)
            .unwrap_or(ErrorCategory::Unclassified)
    }
}

static DEFAULT_CLASSIFIER: LazyLock<Classifier> = LazyLock::new(Classifier::default);

/// Classify with the built-in rule table
pub fn classify(stderr: &str, long_running: bool) -> ErrorCategory {
    DEFAULT_CLASSIFIER.classify(stderr, long_running)
}
