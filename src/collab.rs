//! Collaborator contracts
//!
//! Typed interfaces for the I/O services plugkit consumes but does not
//! implement: sending mail and searching the web. Applications plug in
//! their own backends; tests use in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An outgoing email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Message body
    pub body: String,
    /// Sender address; backends fall back to their configured identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Outcome of a send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message: String,
}

/// An SMTP-shaped mail sender.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: &EmailMessage) -> SendOutcome;
}

/// One web search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// A web search backend.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search for `query`, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchHit>;
}

/// Format search hits into a context block for prompt augmentation.
pub fn format_search_context(hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for (index, hit) in hits.iter().enumerate() {
        context.push_str(&format!(
            "{}. {}\n   URL: {}\n   {}\n\n",
            index + 1,
            hit.title,
            hit.url,
            hit.snippet
        ));
    }
    context
}
