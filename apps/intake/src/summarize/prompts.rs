// Prompt templates for JD summarization.
// The transport lives in llm_client; this file only shapes the request.

pub const SUMMARY_ROLE: &str = "\
    You summarize job descriptions for a job-posting catalog. \
    Use only facts stated in the posting. If a field is not supported by the posting, \
    return null for optional fields. Never invent requirements.";

pub const SUMMARY_PROMPT_TEMPLATE: &str = r#"Summarize the job description below.

Brand (as submitted): {brand_name}
Position (as submitted): {position_name}

Known positions (prefer one of these for position_name, verbatim):
{position_candidates}

Companies previously seen for this brand (prefer one of these for company_name, verbatim):
{company_candidates}

Job description sections (JSON, section name -> lines):
{sections_json}

Return a JSON object with exactly these keys:
{
  "brand_name": string,
  "position_name": string,
  "summary": string,
  "responsibilities": string,
  "required_qualifications": string,
  "preferred_qualifications": string | null,
  "category_name": string | null,
  "career_type": "NEW" | "EXPERIENCED" | "ANY" | null,
  "career_min_years": integer | null,
  "company_name": string | null,
  "insight": {
    "work_scope": string | null,
    "team_culture": string | null,
    "growth_opportunity": string | null,
    "hiring_signal": string | null,
    "keywords": [string]
  }
}"#;
