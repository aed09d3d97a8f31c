use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use matching_common::api::ProblemStatementRecord;
use matching_common::embedding::EmbedRole;
use matching_common::hashing::{content_hash, short_id};

const PREVIEW_CHARS: usize = 500;

/// Which kind of entity an analysis or embedding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ProblemStatement,
    Vendor,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::ProblemStatement, EntityKind::Vendor];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::ProblemStatement => "ps",
            EntityKind::Vendor => "vendor",
        }
    }

    /// Problem statements are the search queries; vendor profiles are the corpus.
    pub fn embed_role(self) -> EmbedRole {
        match self {
            EntityKind::ProblemStatement => EmbedRole::Query,
            EntityKind::Vendor => EmbedRole::Document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemStatement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub full_statement: String,
    pub created_at: DateTime<Utc>,
}

impl ProblemStatement {
    pub fn new(title: &str, description: &str, outcomes: &str) -> Self {
        Self {
            id: short_id(title),
            title: title.to_string(),
            description: description.to_string(),
            outcomes: outcomes.to_string(),
            full_statement: format!(
                "Title: {title}\nDescription: {description}\nOutcomes: {outcomes}"
            ),
            created_at: Utc::now(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.full_statement)
    }
}

impl From<&ProblemStatement> for ProblemStatementRecord {
    fn from(ps: &ProblemStatement) -> Self {
        Self {
            id: ps.id.clone(),
            title: ps.title.clone(),
            description: ps.description.clone(),
            outcomes: ps.outcomes.clone(),
            full_statement: ps.full_statement.clone(),
            created_at: ps.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vendor {
    pub name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Vendor {
    pub fn new(name: &str, text: String) -> Self {
        Self {
            name: name.to_string(),
            text,
            created_at: Utc::now(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&format!("{}:{}", self.name, self.text))
    }

    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }

    /// First 500 characters, with an ellipsis when the text is longer.
    pub fn text_preview(&self) -> String {
        if self.text_len() > PREVIEW_CHARS {
            let head: String = self.text.chars().take(PREVIEW_CHARS).collect();
            format!("{head}...")
        } else {
            self.text.clone()
        }
    }
}

/// Newest first.
pub fn sort_newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_statement_id_and_full_text() {
        let ps = ProblemStatement::new("Fraud detection", "Detect card fraud", "Fewer chargebacks");
        assert_eq!(ps.id.len(), 8);
        assert_eq!(ps.id, short_id("Fraud detection"));
        assert_eq!(
            ps.full_statement,
            "Title: Fraud detection\nDescription: Detect card fraud\nOutcomes: Fewer chargebacks"
        );
        assert_eq!(ps.content_hash(), content_hash(&ps.full_statement));
    }

    #[test]
    fn vendor_hash_covers_name_and_text() {
        let a = Vendor::new("Acme", "ML consulting".into());
        let b = Vendor::new("Acme Labs", "ML consulting".into());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash(), content_hash("Acme:ML consulting"));
    }

    #[test]
    fn preview_truncates_long_text() {
        let short = Vendor::new("A", "short".into());
        assert_eq!(short.text_preview(), "short");

        let long = Vendor::new("B", "x".repeat(600));
        let preview = long.text_preview();
        assert_eq!(preview.chars().count(), 503);
        assert!(preview.ends_with("..."));
        assert_eq!(long.text_len(), 600);
    }
}
