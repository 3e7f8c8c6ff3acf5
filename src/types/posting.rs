// src/types/posting.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::analysis::StructuredAnalysis;

/// Experience level drawn from a closed set. Normalization is total:
/// any input string resolves to one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Entry,
    Junior,
    Mid,
    Senior,
    Lead,
    Principal,
    Executive,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Entry => "entry",
            ExperienceLevel::Junior => "junior",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Lead => "lead",
            ExperienceLevel::Principal => "principal",
            ExperienceLevel::Executive => "executive",
        }
    }
}

/// Map free text to an experience level. Compound values ("Senior/Lead")
/// resolve to the higher-priority variant. `mid` when no signal is found.
pub fn normalize_experience_level(input: &str) -> ExperienceLevel {
    let lowered = input.trim().to_lowercase();
    if lowered.is_empty() {
        return ExperienceLevel::Mid;
    }

    // Split compound values so "Senior/Lead" considers both parts and
    // keeps the highest one.
    let parts = lowered.split(['/', ',', '-']).map(str::trim);

    let mut best: Option<ExperienceLevel> = None;
    for part in parts {
        let level = match_experience_keyword(part).or_else(|| match_experience_keyword(&lowered));
        if let Some(level) = level {
            best = Some(match best {
                Some(current) if current >= level => current,
                _ => level,
            });
        }
    }

    best.unwrap_or(ExperienceLevel::Mid)
}

fn match_experience_keyword(text: &str) -> Option<ExperienceLevel> {
    if text.contains("executive")
        || text.contains("director")
        || text.contains("vp")
        || text.contains("chief")
    {
        Some(ExperienceLevel::Executive)
    } else if text.contains("principal") || text.contains("staff") {
        Some(ExperienceLevel::Principal)
    } else if text.contains("lead") {
        Some(ExperienceLevel::Lead)
    } else if text.contains("senior") || text.contains("sr.") || text == "sr" {
        Some(ExperienceLevel::Senior)
    } else if text.contains("junior") || text.contains("jr.") || text == "jr" {
        Some(ExperienceLevel::Junior)
    } else if text.contains("entry")
        || text.contains("graduate")
        || text.contains("intern")
        || text.contains("trainee")
    {
        Some(ExperienceLevel::Entry)
    } else if text.contains("mid") || text.contains("intermediate") {
        Some(ExperienceLevel::Mid)
    } else {
        None
    }
}

/// Work arrangement drawn from a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkArrangement {
    Remote,
    Hybrid,
    Onsite,
    Unknown,
}

impl WorkArrangement {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkArrangement::Remote => "remote",
            WorkArrangement::Hybrid => "hybrid",
            WorkArrangement::Onsite => "onsite",
            WorkArrangement::Unknown => "unknown",
        }
    }
}

/// Map free text to a work arrangement. `unknown` when no signal is found.
pub fn normalize_work_arrangement(input: &str) -> WorkArrangement {
    let lowered = input.trim().to_lowercase();
    if lowered.contains("hybrid") {
        WorkArrangement::Hybrid
    } else if lowered.contains("remote")
        || lowered.contains("work from home")
        || lowered.contains("wfh")
        || lowered.contains("anywhere")
    {
        WorkArrangement::Remote
    } else if lowered.contains("on-site")
        || lowered.contains("onsite")
        || lowered.contains("on site")
        || lowered.contains("in office")
        || lowered.contains("in-office")
    {
        WorkArrangement::Onsite
    } else {
        WorkArrangement::Unknown
    }
}

/// Source platform tag derived from the posting URL by a single
/// classification function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePlatform {
    LinkedIn,
    Indeed,
    Glassdoor,
    ZipRecruiter,
    Monster,
    Dice,
    Wellfound,
    Greenhouse,
    Lever,
    Workday,
    Other,
}

impl SourcePlatform {
    /// Classify a posting URL into a platform tag. Unrecognized hosts map
    /// to `Other`.
    pub fn classify(url: &str) -> Self {
        let lowered = url.to_lowercase();
        let host = lowered
            .split("//")
            .nth(1)
            .unwrap_or(&lowered)
            .split('/')
            .next()
            .unwrap_or(&lowered);

        match host {
            h if h.contains("linkedin.") => SourcePlatform::LinkedIn,
            h if h.contains("indeed.") => SourcePlatform::Indeed,
            h if h.contains("glassdoor.") => SourcePlatform::Glassdoor,
            h if h.contains("ziprecruiter.") => SourcePlatform::ZipRecruiter,
            h if h.contains("monster.") => SourcePlatform::Monster,
            h if h.contains("dice.") => SourcePlatform::Dice,
            h if h.contains("wellfound.") || h.contains("angel.co") => SourcePlatform::Wellfound,
            h if h.contains("greenhouse.") => SourcePlatform::Greenhouse,
            h if h.contains("lever.co") => SourcePlatform::Lever,
            h if h.contains("workday") => SourcePlatform::Workday,
            _ => SourcePlatform::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::LinkedIn => "linkedin",
            SourcePlatform::Indeed => "indeed",
            SourcePlatform::Glassdoor => "glassdoor",
            SourcePlatform::ZipRecruiter => "ziprecruiter",
            SourcePlatform::Monster => "monster",
            SourcePlatform::Dice => "dice",
            SourcePlatform::Wellfound => "wellfound",
            SourcePlatform::Greenhouse => "greenhouse",
            SourcePlatform::Lever => "lever",
            SourcePlatform::Workday => "workday",
            SourcePlatform::Other => "other",
        }
    }
}

/// Applicant-tracking hostnames used to infer a coarse "direct employer"
/// flag. Informational only, never gates persistence.
const ATS_HOSTNAMES: &[&str] = &[
    "greenhouse.io",
    "lever.co",
    "myworkdayjobs.com",
    "ashbyhq.com",
    "smartrecruiters.com",
    "jobvite.com",
    "icims.com",
    "bamboohr.com",
    "recruitee.com",
    "workable.com",
];

pub fn is_ats_url(url: &str) -> bool {
    let lowered = url.to_lowercase();
    ATS_HOSTNAMES.iter().any(|host| lowered.contains(host))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobLocation {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

impl JobLocation {
    /// Parse a raw "City, Region, Country" location string. Best effort;
    /// anything unparseable stays in `city`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        Some(match parts.as_slice() {
            [city] => JobLocation {
                city: Some(city.to_string()),
                ..Default::default()
            },
            [city, region] => JobLocation {
                city: Some(city.to_string()),
                region: Some(region.to_string()),
                country: None,
            },
            [city, region, country, ..] => JobLocation {
                city: Some(city.to_string()),
                region: Some(region.to_string()),
                country: Some(country.to_string()),
            },
            [] => return None,
        })
    }
}

/// Salary range with min/max swapped on construction so `min <= max`
/// always holds when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalaryRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: Option<String>,
    pub confidence: f32,
    pub source: String,
}

impl SalaryRange {
    pub fn new(
        min: Option<f64>,
        max: Option<f64>,
        currency: Option<String>,
        confidence: f32,
        source: &str,
    ) -> Self {
        let (min, max) = match (min, max) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            other => other,
        };
        Self {
            min,
            max,
            currency,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.to_string(),
        }
    }
}

/// One candidate job pulled from the provider, before analysis and
/// persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPosting {
    pub title: String,
    pub company: String,
    pub location_raw: String,
    pub location: Option<JobLocation>,
    pub source_url: String,
    pub description: String,
    pub provider_id: String,
    pub platform: SourcePlatform,
    pub work_arrangement: WorkArrangement,
    pub direct_employer: bool,
}

impl DiscoveredPosting {
    /// A posting must carry a title, company, and provider identifier
    /// before it is eligible for analysis.
    pub fn is_analyzable(&self) -> bool {
        !self.title.trim().is_empty()
            && !self.company.trim().is_empty()
            && !self.provider_id.trim().is_empty()
    }
}

/// The durable job record populated by the Persist phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedJob {
    pub user_id: String,
    pub run_id: String,
    pub posting: DiscoveredPosting,
    pub analysis: StructuredAnalysis,
    pub salary: Option<SalaryRange>,
    pub discovery_method: String,
    pub used_fallback_analysis: bool,
    pub created_at: DateTime<Utc>,
}
