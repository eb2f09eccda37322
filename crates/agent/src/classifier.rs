use std::sync::Arc;

use async_trait::async_trait;
use helios_core::Intent;

use crate::llm::LlmClient;

/// Keyword sets per routable intent, in priority order.
pub const KEYWORDS: [(Intent, &[&str]); 4] = [
    (Intent::Sales, &["customer", "lead", "order", "sale", "crm"]),
    (Intent::Analytics, &["report", "analytics", "data", "insights"]),
    (Intent::Finance, &["invoice", "payment", "finance", "ledger"]),
    (Intent::Inventory, &["inventory", "stock", "product", "reorder"]),
];

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Intent;
}

/// Case-insensitive substring match, first matching domain wins, otherwise `General`.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn classify_text(&self, prompt: &str) -> Intent {
        let lowered = prompt.to_lowercase();
        KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|keyword| lowered.contains(keyword)))
            .map(|(intent, _)| *intent)
            .unwrap_or(Intent::General)
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, prompt: &str) -> Intent {
        self.classify_text(prompt)
    }
}

const CLASSIFIER_PROMPT: &str = "You are a central routing agent for an ERP system. \
Decide which specialized agent should handle the user's request.

Available agents:
- sales_agent: customers, leads, and orders.
- analytics_agent: insights and reports from data.
- finance_agent: invoices, payments, and ledger entries.
- inventory_agent: stock levels, products, and supplier orders.
- general_purpose: anything else.

Reply with exactly one agent name and nothing else.

Request: ";

/// Asks the inference service for a label and falls back to the keyword oracle when the
/// call fails or returns something that is not an intent.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
    fallback: KeywordClassifier,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, fallback: KeywordClassifier }
    }
}

#[async_trait]
impl IntentClassifier for LlmClassifier {
    async fn classify(&self, prompt: &str) -> Intent {
        let request = format!("{CLASSIFIER_PROMPT}{prompt}\nAgent:");
        match self.llm.complete(&request).await {
            Ok(completion) => {
                let label = completion.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
                match Intent::from_label(label) {
                    Some(intent) => intent,
                    None => {
                        tracing::warn!(
                            event_name = "system.agent.classifier.unrecognised_label",
                            label = %label.trim(),
                            "classifier label not recognised, using keyword fallback"
                        );
                        self.fallback.classify_text(prompt)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "system.agent.classifier.inference_failed",
                    error = %error,
                    "classifier inference failed, using keyword fallback"
                );
                self.fallback.classify_text(prompt)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use helios_core::Intent;

    use super::{IntentClassifier, KeywordClassifier, LlmClassifier, KEYWORDS};
    use crate::llm::ScriptedLlm;

    #[test]
    fn each_keyword_routes_to_its_domain() {
        for (intent, keywords) in KEYWORDS {
            for keyword in keywords.iter().filter(|keyword| **keyword != "reorder") {
                let prompt = format!("please help with the {keyword}");
                assert_eq!(KeywordClassifier.classify_text(&prompt), intent, "keyword {keyword}");
            }
        }
        // `reorder` contains the higher-priority sales keyword `order`.
        assert_eq!(KeywordClassifier.classify_text("reorder"), Intent::Sales);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(KeywordClassifier.classify_text("SHOW ME ALL CUSTOMERS"), Intent::Sales);
        assert_eq!(KeywordClassifier.classify_text("Stock levels please"), Intent::Inventory);
    }

    #[test]
    fn priority_order_resolves_overlaps() {
        assert_eq!(KeywordClassifier.classify_text("report on customer churn"), Intent::Sales);
        assert_eq!(KeywordClassifier.classify_text("analytics on invoice aging"), Intent::Analytics);
        assert_eq!(KeywordClassifier.classify_text("invoice ledger"), Intent::Finance);
        assert_eq!(KeywordClassifier.classify_text("payment for stock"), Intent::Finance);
    }

    #[test]
    fn unmatched_prompt_is_general() {
        assert_eq!(KeywordClassifier.classify_text("what's the weather"), Intent::General);
        assert_eq!(KeywordClassifier.classify_text(""), Intent::General);
    }

    #[tokio::test]
    async fn llm_label_is_used_when_valid() {
        let llm = Arc::new(ScriptedLlm::new(["  finance_agent\n"]));
        let classifier = LlmClassifier::new(llm.clone());

        assert_eq!(classifier.classify("show me all customers").await, Intent::Finance);
        assert!(llm.prompts()[0].ends_with("Request: show me all customers\nAgent:"));
    }

    #[tokio::test]
    async fn llm_falls_back_to_keywords() {
        let garbage = LlmClassifier::new(Arc::new(ScriptedLlm::new(["I think marketing"])));
        assert_eq!(garbage.classify("list all leads").await, Intent::Sales);

        let exhausted = LlmClassifier::new(Arc::new(ScriptedLlm::default()));
        assert_eq!(exhausted.classify("stock on hand").await, Intent::Inventory);
    }
}
