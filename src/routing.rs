//! Query routing
//!
//! An optional policy layer that decides, per query, whether to augment
//! the prompt with web search results before delegating to the capability
//! provider. The decision is one extra classification call unless the
//! caller forces it, so tests can pin the route deterministically.

use crate::collab::{format_search_context, WebSearch};
use crate::error::ProviderError;
use crate::provider::{CapabilityProvider, ChatMessage, ExecuteOptions, NoTools};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routing choice for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteChoice {
    /// Ask the model whether search would help
    #[default]
    Auto,
    /// Always search first
    Search,
    /// Never search
    Direct,
}

/// The decision the router arrived at, with its rationale.
#[derive(Debug, Clone)]
pub struct SearchDecision {
    pub use_search: bool,
    pub rationale: String,
}

/// A routed answer plus metadata about how it was produced.
#[derive(Debug, Clone)]
pub struct RoutedAnswer {
    /// Generated answer text
    pub text: String,
    /// Whether search results were injected into the prompt
    pub used_search: bool,
    /// URLs of the search hits consulted
    pub sources: Vec<String>,
    /// The routing decision taken
    pub decision: SearchDecision,
}

/// Answers free-text queries, optionally augmenting them with web search.
pub struct SmartRouter {
    provider: Arc<dyn CapabilityProvider>,
    searcher: Option<Arc<dyn WebSearch>>,
    max_results: usize,
}

impl SmartRouter {
    /// Create a router. Without a searcher every query goes direct.
    pub fn new(provider: Arc<dyn CapabilityProvider>, searcher: Option<Arc<dyn WebSearch>>) -> Self {
        Self {
            provider,
            searcher,
            max_results: 5,
        }
    }

    /// Cap the number of search hits injected into the prompt.
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Answer a question, deciding (or being told) whether to search first.
    pub async fn answer(
        &self,
        question: &str,
        route: RouteChoice,
        options: &ExecuteOptions,
    ) -> Result<RoutedAnswer, ProviderError> {
        let decision = match route {
            RouteChoice::Search => SearchDecision {
                use_search: true,
                rationale: "forced by caller".to_string(),
            },
            RouteChoice::Direct => SearchDecision {
                use_search: false,
                rationale: "forced by caller".to_string(),
            },
            RouteChoice::Auto => self.classify(question, options).await,
        };

        let mut sources = Vec::new();
        let context = if decision.use_search {
            match &self.searcher {
                Some(searcher) => {
                    let hits = searcher.search(question, self.max_results).await;
                    sources = hits.iter().map(|hit| hit.url.clone()).collect();
                    debug!("Search returned {} hits for routing", hits.len());
                    if hits.is_empty() {
                        None
                    } else {
                        Some(format_search_context(&hits))
                    }
                }
                None => {
                    debug!("Route asked for search but no searcher is configured");
                    None
                }
            }
        } else {
            None
        };

        let used_search = context.is_some();
        let messages = vec![
            ChatMessage::system(answer_system_prompt(used_search)),
            ChatMessage::user(build_question_prompt(question, context.as_deref())),
        ];

        let result = self
            .provider
            .chat(messages, &[], &NoTools, options)
            .await?;

        Ok(RoutedAnswer {
            text: result.text,
            used_search,
            sources: if used_search { sources } else { Vec::new() },
            decision,
        })
    }

    /// One cheap classification call: does this question need current
    /// information from the web? A failed call falls back to searching
    /// when a searcher is available, since stale answers are the worse
    /// failure mode.
    async fn classify(&self, question: &str, options: &ExecuteOptions) -> SearchDecision {
        if self.searcher.is_none() {
            return SearchDecision {
                use_search: false,
                rationale: "no searcher configured".to_string(),
            };
        }

        let prompt = format!(
            "Analyze this question and determine if it needs current or recent \
             information from the web.\n\nQuestion: {question}\n\nConsider:\n\
             - Does it ask about recent events, news, or current data?\n\
             - Does it ask about specific facts that might change?\n\
             - Would the answer benefit from up-to-date information?\n\n\
             Respond with only \"YES\" or \"NO\"."
        );

        let classify_options = ExecuteOptions {
            temperature: Some(0.1),
            max_tokens: Some(10),
            ..options.clone()
        };

        match self
            .provider
            .chat(
                vec![ChatMessage::user(prompt)],
                &[],
                &NoTools,
                &classify_options,
            )
            .await
        {
            Ok(result) => {
                let use_search = result.text.to_uppercase().contains("YES");
                SearchDecision {
                    use_search,
                    rationale: format!("classifier said: {}", result.text.trim()),
                }
            }
            Err(e) => {
                warn!("Search classification failed, defaulting to search: {}", e);
                SearchDecision {
                    use_search: true,
                    rationale: format!("classification failed ({e}), defaulted to search"),
                }
            }
        }
    }
}

fn answer_system_prompt(with_search: bool) -> String {
    if with_search {
        "You are a helpful assistant. Web search results are provided; use them \
         to give current, accurate information and stay faithful to them."
            .to_string()
    } else {
        "You are a helpful assistant. Answer from your training data and mention \
         when information might be outdated."
            .to_string()
    }
}

fn build_question_prompt(question: &str, context: Option<&str>) -> String {
    match context {
        Some(context) => format!(
            "Question: {question}\n\nWeb Search Results:\n{context}\n\
             Answer the question using the search results above. If they do not \
             fully answer it, add what you know."
        ),
        None => format!("Question: {question}"),
    }
}
