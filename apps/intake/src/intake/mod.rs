//! Intake request types — the immutable hand-off from the extraction stage.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::canonical::SectionMap;

pub mod validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Text,
    Image,
    Url,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "TEXT",
            SourceType::Image => "IMAGE",
            SourceType::Url => "URL",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TEXT" => Ok(SourceType::Text),
            "IMAGE" => Ok(SourceType::Image),
            "URL" => Ok(SourceType::Url),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecruitmentPeriodType {
    /// Explicit opening and closing dates.
    Fixed,
    /// Always accepting applications.
    Ongoing,
    /// Closes when the position is filled.
    UntilFilled,
}

impl RecruitmentPeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecruitmentPeriodType::Fixed => "FIXED",
            RecruitmentPeriodType::Ongoing => "ONGOING",
            RecruitmentPeriodType::UntilFilled => "UNTIL_FILLED",
        }
    }
}

impl FromStr for RecruitmentPeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FIXED" => Ok(RecruitmentPeriodType::Fixed),
            "ONGOING" => Ok(RecruitmentPeriodType::Ongoing),
            "UNTIL_FILLED" => Ok(RecruitmentPeriodType::UntilFilled),
            other => Err(format!("unknown recruitment period type '{other}'")),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw JD submission. Produced by the intake source; never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRequest {
    /// Opaque idempotency key supplied by the intake source.
    pub request_id: String,
    pub brand_name: String,
    pub position_name: String,
    pub source: SourceType,
    #[serde(default)]
    pub source_url: Option<String>,
    pub section_map: SectionMap,
    pub recruitment_period_type: RecruitmentPeriodType,
    #[serde(default)]
    pub opened_date: Option<NaiveDate>,
    #[serde(default)]
    pub closed_date: Option<NaiveDate>,
}

impl IntakeRequest {
    /// Source URL, only when the submission actually came from a URL.
    pub fn url_source(&self) -> Option<&str> {
        match self.source {
            SourceType::Url => self.source_url.as_deref().map(str::trim).filter(|u| !u.is_empty()),
            _ => None,
        }
    }

    pub fn is_dated(&self) -> bool {
        self.opened_date.is_some() || self.closed_date.is_some()
    }
}
