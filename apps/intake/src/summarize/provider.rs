//! Production summary provider backed by the Anthropic client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{LlmClient, LlmError};
use crate::summarize::prompts::{SUMMARY_PROMPT_TEMPLATE, SUMMARY_ROLE};
use crate::summarize::{ProviderError, SummarizeInput, SummaryProvider};

pub struct LlmSummaryProvider {
    llm: LlmClient,
    system: String,
}

impl LlmSummaryProvider {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            system: format!("{JSON_ONLY_SYSTEM} {SUMMARY_ROLE}"),
        }
    }
}

#[async_trait]
impl SummaryProvider for LlmSummaryProvider {
    async fn summarize(&self, input: &SummarizeInput) -> Result<Value, ProviderError> {
        let prompt = build_summary_prompt(input)
            .map_err(|e| ProviderError::Call(format!("failed to build prompt: {e}")))?;

        self.llm
            .call_json::<Value>(&prompt, &self.system)
            .await
            .map_err(|e| match e {
                LlmError::Parse(_) | LlmError::EmptyContent | LlmError::Truncated => {
                    ProviderError::Malformed(e.to_string())
                }
                other => ProviderError::Call(other.to_string()),
            })
    }
}

/// Fills the template. Sections are emitted in key order so identical JDs get identical prompts.
fn build_summary_prompt(input: &SummarizeInput) -> Result<String, serde_json::Error> {
    let ordered: BTreeMap<&String, &Vec<String>> = input.section_map.iter().collect();
    let sections_json = serde_json::to_string_pretty(&ordered)?;

    Ok(SUMMARY_PROMPT_TEMPLATE
        .replace("{brand_name}", &input.brand_name)
        .replace("{position_name}", &input.position_name)
        .replace("{position_candidates}", &bullet_list(&input.position_candidates))
        .replace("{company_candidates}", &bullet_list(&input.company_candidates))
        .replace("{sections_json}", &sections_json))
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::SectionMap;

    #[test]
    fn test_prompt_contains_inputs_in_stable_order() {
        let mut section_map = SectionMap::new();
        section_map.insert("requirements".into(), vec!["3y Java".into()]);
        section_map.insert("preferred".into(), vec!["AWS".into()]);
        let input = SummarizeInput {
            brand_name: "Acme".into(),
            position_name: "Backend Engineer".into(),
            position_candidates: vec!["Backend Engineer".into(), "UNKNOWN".into()],
            company_candidates: vec![],
            section_map,
        };
        let prompt = build_summary_prompt(&input).unwrap();
        assert!(prompt.contains("Brand (as submitted): Acme"));
        assert!(prompt.contains("- Backend Engineer\n- UNKNOWN"));
        assert!(prompt.contains("(none)"));
        let preferred = prompt.find("\"preferred\"").unwrap();
        let requirements = prompt.find("\"requirements\"").unwrap();
        assert!(preferred < requirements);
        assert!(!prompt.contains("{sections_json}"));
    }
}
