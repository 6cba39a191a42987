use std::time::Duration;

use tracing::{debug, warn};

use leadflow_core::lead::LeadJudgment;

use crate::llm::{complete_within, LlmClient};

pub fn build_lead_judgment_prompt(business_name: &str, message: &str, transcript: &str) -> String {
    format!(
        "You help {business_name} decide when to invite a website visitor to leave their \
         contact details.\n\
         Answer YES if the visitor shows buying interest, asks about prices, bookings or \
         services, or needs personal follow-up. Otherwise answer NO.\n\
         Reply with YES or NO only.\n\n\
         Conversation so far:\n{transcript}\n\nLatest message: {message}\n\nAnswer:"
    )
}

/// Secondary judgment call. Errors and timeouts degrade to
/// [`LeadJudgment::Failed`] so the keyword fallback can take over.
pub async fn judge_lead(
    client: &dyn LlmClient,
    business_name: &str,
    message: &str,
    transcript: &str,
    budget: Duration,
) -> LeadJudgment {
    let prompt = build_lead_judgment_prompt(business_name, message, transcript);
    match complete_within(client, &prompt, budget).await {
        Ok(result) => {
            let answer = result.text.trim().to_string();
            debug!(
                event_name = "engine.lead_judge.completed",
                provider = client.name(),
                answer = %answer,
                "lead judgment obtained"
            );
            LeadJudgment::Obtained(answer)
        }
        Err(error) => {
            warn!(
                event_name = "engine.lead_judge.degraded",
                provider = client.name(),
                error_class = error.error_class(),
                error = %error,
                "lead judgment unavailable; keyword fallback applies"
            );
            LeadJudgment::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use leadflow_core::lead::LeadJudgment;

    use super::{build_lead_judgment_prompt, judge_lead};
    use crate::llm::{LlmClient, LlmError, ProviderResult};

    struct Answer(Option<&'static str>);

    #[async_trait]
    impl LlmClient for Answer {
        fn name(&self) -> &'static str {
            "answer"
        }

        async fn complete(&self, _prompt: &str) -> Result<ProviderResult, LlmError> {
            self.0
                .map(ProviderResult::new)
                .ok_or_else(|| LlmError::Network("connection refused".into()))
        }
    }

    #[test]
    fn prompt_asks_for_a_binary_answer() {
        let prompt = build_lead_judgment_prompt("Acme", "how much?", "User: hi");
        assert!(prompt.contains("Reply with YES or NO only."));
        assert!(prompt.contains("Latest message: how much?"));
        assert!(prompt.contains("User: hi"));
    }

    #[tokio::test]
    async fn answers_are_trimmed_and_kept_verbatim() {
        let judgment =
            judge_lead(&Answer(Some(" Yes \n")), "Acme", "price?", "", Duration::from_secs(1))
                .await;
        assert_eq!(judgment, LeadJudgment::Obtained("Yes".to_string()));
        assert!(judgment.is_yes());
    }

    #[tokio::test]
    async fn failures_degrade_to_failed() {
        let judgment = judge_lead(&Answer(None), "Acme", "price?", "", Duration::from_secs(1)).await;
        assert_eq!(judgment, LeadJudgment::Failed);
    }
}
