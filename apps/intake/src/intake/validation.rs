use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::{classify_section, hashing::core_text, SectionKind};
use crate::intake::{IntakeRequest, SourceType};

pub const DEFAULT_MIN_CORE_TEXT_CHARS: usize = 10;

/// Minimum-content policy applied at admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPolicy {
    pub min_core_text_chars: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            min_core_text_chars: DEFAULT_MIN_CORE_TEXT_CHARS,
        }
    }
}

/// Input rejected before it enters the pipeline. Collects every problem, not just the first.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("submission rejected: {}", problems.join("; "))]
pub struct ValidationFailure {
    pub problems: Vec<String>,
}

/// Validates a submission against the content policy.
///
/// FAIL conditions:
/// - blank `request_id`, `brand_name` or `position_name`
/// - `source = URL` without an http(s) `source_url`
/// - no non-blank line in a responsibilities or requirements section
/// - core text shorter than `min_core_text_chars`
/// - `opened_date` after `closed_date`
pub fn validate_request(
    request: &IntakeRequest,
    policy: &ContentPolicy,
) -> Result<(), ValidationFailure> {
    let mut problems = Vec::new();

    for (field, value) in [
        ("request_id", &request.request_id),
        ("brand_name", &request.brand_name),
        ("position_name", &request.position_name),
    ] {
        if value.trim().is_empty() {
            problems.push(format!("{field} cannot be empty"));
        }
    }

    if request.source == SourceType::Url {
        match request.source_url.as_deref().map(str::trim) {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
            Some(_) => problems.push("source_url must be an http(s) URL".to_string()),
            None => problems.push("source_url is required when source is URL".to_string()),
        }
    }

    let has_core_section = request.section_map.iter().any(|(name, lines)| {
        matches!(
            classify_section(name),
            SectionKind::Responsibilities | SectionKind::Requirements
        ) && lines.iter().any(|l| !l.trim().is_empty())
    });
    if !has_core_section {
        problems.push("a responsibilities or requirements section is required".to_string());
    }

    let core_chars = core_text(&request.section_map).chars().count();
    if core_chars < policy.min_core_text_chars {
        problems.push(format!(
            "job description too short: {core_chars} characters of core content, minimum {}",
            policy.min_core_text_chars
        ));
    }

    if let (Some(opened), Some(closed)) = (request.opened_date, request.closed_date) {
        if opened > closed {
            problems.push(format!(
                "opened_date {opened} is after closed_date {closed}"
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { problems })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::SectionMap;
    use crate::intake::RecruitmentPeriodType;
    use chrono::NaiveDate;

    fn request(sections: &[(&str, &[&str])]) -> IntakeRequest {
        let section_map: SectionMap = sections
            .iter()
            .map(|(k, lines)| (k.to_string(), lines.iter().map(|l| l.to_string()).collect()))
            .collect();
        IntakeRequest {
            request_id: "req-1".into(),
            brand_name: "Acme".into(),
            position_name: "Backend Engineer".into(),
            source: SourceType::Text,
            source_url: None,
            section_map,
            recruitment_period_type: RecruitmentPeriodType::Ongoing,
            opened_date: None,
            closed_date: None,
        }
    }

    #[test]
    fn test_pass_minimal_jd() {
        let req = request(&[
            ("responsibilities", &["Build APIs"]),
            ("requirements", &["3y Java"]),
            ("preferred", &["AWS"]),
        ]);
        assert!(validate_request(&req, &ContentPolicy::default()).is_ok());
    }

    #[test]
    fn test_fail_without_core_sections() {
        let req = request(&[("benefits", &["Free lunch every single day"])]);
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("responsibilities")));
    }

    #[test]
    fn test_fail_blank_lines_do_not_count() {
        let req = request(&[("responsibilities", &["   ", ""])]);
        assert!(validate_request(&req, &ContentPolicy::default()).is_err());
    }

    #[test]
    fn test_fail_too_short() {
        let req = request(&[("requirements", &["Java"])]);
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert!(err.problems.iter().any(|p| p.contains("too short")));
    }

    #[test]
    fn test_fail_url_source_without_url() {
        let mut req = request(&[("responsibilities", &["Build and run APIs"])]);
        req.source = SourceType::Url;
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert!(err.problems[0].contains("source_url is required"));

        req.source_url = Some("ftp://jobs".into());
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert!(err.problems[0].contains("http(s)"));
    }

    #[test]
    fn test_fail_inverted_dates() {
        let mut req = request(&[("responsibilities", &["Build and run APIs"])]);
        req.opened_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        req.closed_date = NaiveDate::from_ymd_opt(2026, 2, 1);
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert!(err.problems[0].contains("after closed_date"));
    }

    #[test]
    fn test_collects_all_problems() {
        let mut req = request(&[]);
        req.brand_name = " ".into();
        req.position_name = String::new();
        let err = validate_request(&req, &ContentPolicy::default()).unwrap_err();
        assert_eq!(err.problems.len(), 4);
    }
}
