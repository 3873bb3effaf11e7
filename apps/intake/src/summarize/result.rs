//! Typed summary assembled from raw provider output.
//!
//! Mandatory fields missing from the provider's answer make the whole result a parse
//! failure. A summary is never persisted half-filled. Optional fields are read leniently:
//! a value of the wrong type is dropped, not fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Qualitative extras. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default)]
    pub work_scope: Option<String>,
    #[serde(default)]
    pub team_culture: Option<String>,
    #[serde(default)]
    pub growth_opportunity: Option<String>,
    #[serde(default)]
    pub hiring_signal: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Insight {
    /// Best-effort read of the provider's `insight` object. Non-objects yield `None`.
    fn lenient(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let text = |key: &str| non_blank(object.get(key).and_then(Value::as_str).map(String::from));
        let keywords = object
            .get("keywords")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            work_scope: text("work_scope"),
            team_culture: text("team_culture"),
            growth_opportunity: text("growth_opportunity"),
            hiring_signal: text("hiring_signal"),
            keywords,
        })
    }
}

/// Provider output as received. Nothing is trusted yet; optional fields stay untyped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSummary {
    #[serde(default)]
    pub brand_name: Option<String>,
    #[serde(default)]
    pub position_name: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub responsibilities: Option<String>,
    #[serde(default)]
    pub required_qualifications: Option<String>,
    #[serde(default)]
    pub preferred_qualifications: Option<Value>,
    #[serde(default)]
    pub category_name: Option<Value>,
    #[serde(default)]
    pub career_type: Option<Value>,
    #[serde(default)]
    pub career_min_years: Option<Value>,
    #[serde(default)]
    pub company_name: Option<Value>,
    #[serde(default)]
    pub insight: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub brand_name: String,
    pub position_name: String,
    pub summary: String,
    pub responsibilities: String,
    pub required_qualifications: String,
    pub preferred_qualifications: Option<String>,
    pub category_name: Option<String>,
    pub career_type: Option<String>,
    pub career_min_years: Option<i32>,
    /// Company the provider inferred; recorded as a best-effort candidate only.
    pub company_name: Option<String>,
    pub insight: Option<Insight>,
}

impl SummaryResult {
    /// Parses provider JSON. Errors name every missing mandatory field.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let raw: RawSummary = serde_json::from_value(value)
            .map_err(|e| format!("unexpected response shape: {e}"))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawSummary) -> Result<Self, String> {
        let mut missing = Vec::new();
        let mut required = |field: &'static str, value: Option<String>| -> String {
            match non_blank(value) {
                Some(v) => v,
                None => {
                    missing.push(field);
                    String::new()
                }
            }
        };

        let brand_name = required("brand_name", raw.brand_name);
        let position_name = required("position_name", raw.position_name);
        let summary = required("summary", raw.summary);
        let responsibilities = required("responsibilities", raw.responsibilities);
        let required_qualifications =
            required("required_qualifications", raw.required_qualifications);

        if !missing.is_empty() {
            return Err(format!("missing mandatory fields: {}", missing.join(", ")));
        }

        Ok(Self {
            brand_name,
            position_name,
            summary,
            responsibilities,
            required_qualifications,
            preferred_qualifications: optional_text(raw.preferred_qualifications),
            category_name: optional_text(raw.category_name),
            career_type: optional_text(raw.career_type).map(|c| c.to_uppercase()),
            career_min_years: raw.career_min_years.as_ref().and_then(years),
            company_name: optional_text(raw.company_name),
            insight: raw.insight.as_ref().and_then(Insight::lenient),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn optional_text(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => non_blank(Some(s)),
        _ => None,
    }
}

/// Accepts `3` or `"3"`; anything else, or a negative count, is dropped.
fn years(value: &Value) -> Option<i32> {
    let years = match value {
        Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }?;
    (years >= 0).then_some(years)
}
