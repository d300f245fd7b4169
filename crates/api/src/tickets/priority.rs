//! Initial priority classification

use helpdesk_shared::{TicketCategory, TicketPriority};

use crate::config::DEFAULT_URGENT_KEYWORDS;

/// HIGH for SECURITY tickets or descriptions containing an urgent keyword
/// (case-insensitive), MEDIUM otherwise.
#[derive(Debug, Clone)]
pub struct PriorityRule {
    keywords: Vec<String>,
}

impl PriorityRule {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, description: &str, category: TicketCategory) -> TicketPriority {
        if category == TicketCategory::Security {
            return TicketPriority::High;
        }
        let text = description.to_lowercase();
        if self.keywords.iter().any(|k| text.contains(k.as_str())) {
            TicketPriority::High
        } else {
            TicketPriority::Medium
        }
    }
}

impl Default for PriorityRule {
    fn default() -> Self {
        Self::new(DEFAULT_URGENT_KEYWORDS)
    }
}
