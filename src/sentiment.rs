//! Headline and description sentiment via a chat model.
//!
//! The model is asked for exactly one word. Replies are matched leniently:
//! an exact `positive`/`negative` wins, then a substring of either, and
//! anything else counts as [`Sentiment::Neutral`]. Service failures are not
//! errors to the caller; they come back as [`Sentiment::Unavailable`] and the
//! article is stored without a label.

use crate::api::ChatBackend;
use crate::models::SentimentLabel;
use crate::utils::{truncate_for_log, truncate_with_ellipsis};
use tracing::{info, instrument, warn};

pub const SYSTEM_PROMPT: &str = "You are a sentiment analysis expert. Your task is to classify the \
    sentiment of the provided news article content as either 'positive' or 'negative'. Consider the \
    overall emotional tone and impact of the news. Respond with ONLY the word 'positive' or 'negative'.";

/// Outcome of classifying one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
    /// No text to classify, or a reply that named neither label.
    Neutral,
    /// The service could not be reached or refused the request.
    Unavailable,
}

impl Sentiment {
    /// Interpret a raw model reply.
    pub fn from_reply(reply: &str) -> Self {
        let reply = reply.trim().to_lowercase();
        match reply.as_str() {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ if reply.contains("positive") => Sentiment::Positive,
            _ if reply.contains("negative") => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }

    /// Label to persist. `Unavailable` stores no label.
    pub fn label(self) -> Option<SentimentLabel> {
        match self {
            Sentiment::Positive => Some(SentimentLabel::Positive),
            Sentiment::Negative => Some(SentimentLabel::Negative),
            Sentiment::Neutral => Some(SentimentLabel::Neutral),
            Sentiment::Unavailable => None,
        }
    }
}

/// Build the model input: labelled headline and description blocks.
///
/// Blank parts are left out; the description is cut to `max_description_chars`.
pub fn classifier_input(headline: &str, description: &str, max_description_chars: usize) -> String {
    let mut blocks = Vec::with_capacity(2);
    if !headline.trim().is_empty() {
        blocks.push(format!("Headline: {headline}"));
    }
    if !description.trim().is_empty() {
        blocks.push(format!(
            "Description: {}",
            truncate_with_ellipsis(description, max_description_chars)
        ));
    }
    blocks.join("\n\n")
}

pub struct SentimentClassifier<B> {
    backend: B,
    max_description_chars: usize,
}

impl<B: ChatBackend> SentimentClassifier<B> {
    pub fn new(backend: B, max_description_chars: usize) -> Self {
        Self {
            backend,
            max_description_chars,
        }
    }

    #[instrument(level = "info", skip_all, fields(headline = %truncate_for_log(headline, 80)))]
    pub async fn classify(&self, headline: &str, description: &str) -> Sentiment {
        let input = classifier_input(headline, description, self.max_description_chars);
        if input.is_empty() {
            warn!("No text to classify; using neutral");
            return Sentiment::Neutral;
        }

        match self.backend.complete(SYSTEM_PROMPT, &input).await {
            Ok(reply) => {
                let sentiment = Sentiment::from_reply(&reply);
                if !matches!(reply.trim().to_lowercase().as_str(), "positive" | "negative") {
                    warn!(reply = %truncate_for_log(&reply, 60), ?sentiment, "Unexpected classifier reply");
                }
                info!(?sentiment, "Classified");
                sentiment
            }
            Err(e) => {
                warn!(error = %e, "Classification unavailable");
                Sentiment::Unavailable
            }
        }
    }
}
