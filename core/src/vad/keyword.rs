use std::collections::BTreeSet;

pub const DEFAULT_CONTROL_PHRASES: &[&str] = &[
    "stop",
    "wait",
    "cancel",
    "never mind",
    "nevermind",
    "hold on",
    "actually",
];

/// Fixed set of spoken control phrases.
///
/// Matching is case-insensitive on the trimmed text and exact: "stop" matches
/// "  Stop " but not "stopping" or "please stop".
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPhrases {
    phrases: BTreeSet<String>,
}

impl Default for ControlPhrases {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_PHRASES.iter().copied())
    }
}

impl ControlPhrases {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.phrases.contains(&text.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}
