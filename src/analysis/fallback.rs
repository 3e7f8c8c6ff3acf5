// src/analysis/fallback.rs
//! Deterministic rule-based extraction used when the primary analysis
//! path fails or returns invalid output.
//!
//! This is the circuit breaker of the whole pipeline: it never fails and
//! always returns a structurally valid document, even for empty or
//! non-English input.

use regex::Regex;

use crate::types::analysis::{AnalysisMetadata, AnalysisPath, SkillEntry, StructuredAnalysis};
use crate::types::posting::{
    normalize_experience_level, normalize_work_arrangement, ExperienceLevel, SalaryRange,
    WorkArrangement,
};

/// Fixed dictionary of technology and tool names matched against raw
/// posting text.
const TECH_DICTIONARY: &[&str] = &[
    "Python", "Java", "JavaScript", "TypeScript", "Rust", "Go", "C++", "C#", "Ruby", "PHP",
    "Kotlin", "Swift", "Scala", "SQL", "PostgreSQL", "MySQL", "MongoDB", "Redis", "Elasticsearch",
    "Kafka", "Spark", "Airflow", "Snowflake", "dbt", "AWS", "Azure", "GCP", "Docker", "Kubernetes",
    "Terraform", "Ansible", "Jenkins", "Git", "Linux", "React", "Angular", "Vue", "Node.js",
    "Django", "Flask", "Spring", "GraphQL", "gRPC", "REST", "Tableau", "Power BI", "Excel",
    "Salesforce", "Jira", "Figma",
];

pub struct FallbackAnalyzer {
    years_with: Regex,
    proficiency: Regex,
    experience_in: Regex,
    years_only: Regex,
    salary_range: Regex,
}

impl FallbackAnalyzer {
    pub fn new() -> Self {
        Self {
            years_with: Regex::new(
                r"(?i)(\d{1,2})\+?\s*years?(?:\s+of)?\s+experience\s+(?:with|in|using)\s+([A-Za-z0-9#+./\- ]{2,40}?)(?:\s+and\b|[,.;:\n]|$)",
            )
            .expect("valid years-with pattern"),
            proficiency: Regex::new(
                r"(?i)proficien(?:cy|t)\s+(?:in|with)\s+([A-Za-z0-9#+./\- ]{2,40}?)(?:\s+and\b|[,.;:\n]|$)",
            )
            .expect("valid proficiency pattern"),
            experience_in: Regex::new(
                r"(?i)experience\s+(?:with|in|using)\s+([A-Za-z0-9#+./\- ]{2,40}?)(?:\s+and\b|[,.;:\n]|$)",
            )
            .expect("valid experience-in pattern"),
            years_only: Regex::new(r"(?i)(\d{1,2})\+?\s*years?").expect("valid years pattern"),
            // Matches "$120,000 - $150,000" and shorthand "$120k-$150k".
            salary_range: Regex::new(
                r"(?i)\$\s*(\d+(?:\.\d+)?\s*k|\d{1,3}(?:,\d{3})+|\d{4,7})\s*(?:-|–|—|to)\s*\$?\s*(\d+(?:\.\d+)?\s*k|\d{1,3}(?:,\d{3})+|\d{4,7})",
            )
            .expect("valid salary pattern"),
        }
    }

    /// Extract a smaller but always-valid analysis document from raw
    /// text. Infallible by construction.
    pub fn analyze(&self, text: &str, title: &str) -> StructuredAnalysis {
        let mut technical_requirements = Vec::new();
        for caps in self.years_with.captures_iter(text) {
            if let (Some(years), Some(subject)) = (caps.get(1), caps.get(2)) {
                technical_requirements.push(format!(
                    "{}+ years experience with {}",
                    years.as_str(),
                    subject.as_str().trim()
                ));
            }
        }
        for caps in self.proficiency.captures_iter(text) {
            if let Some(subject) = caps.get(1) {
                technical_requirements.push(format!("Proficiency in {}", subject.as_str().trim()));
            }
        }
        for caps in self.experience_in.captures_iter(text).take(10) {
            if let Some(subject) = caps.get(1) {
                let subject = subject.as_str().trim();
                let already_covered = technical_requirements
                    .iter()
                    .any(|r| r.to_lowercase().contains(&subject.to_lowercase()));
                if !already_covered {
                    technical_requirements.push(format!("Experience with {}", subject));
                }
            }
        }
        technical_requirements.truncate(20);

        let tools_and_technologies = self.match_dictionary(text);
        let key_skills = tools_and_technologies
            .iter()
            .map(|tool| SkillEntry {
                name: tool.clone(),
                importance: 5,
                category: "technical".to_string(),
                skill_type: "tool".to_string(),
            })
            .collect();

        StructuredAnalysis {
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            technical_requirements,
            tools_and_technologies,
            key_skills,
            salary: self.extract_salary(text),
            experience_level: self.infer_experience_level(title, text),
            work_arrangement: self.infer_work_arrangement(text),
            metadata: AnalysisMetadata::now(AnalysisPath::Fallback),
        }
        .normalized()
    }

    fn match_dictionary(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        TECH_DICTIONARY
            .iter()
            .filter(|tech| contains_word(&lowered, &tech.to_lowercase()))
            .map(|tech| tech.to_string())
            .collect()
    }

    fn infer_experience_level(&self, title: &str, text: &str) -> ExperienceLevel {
        let from_title = normalize_experience_level(title);
        if from_title != ExperienceLevel::Mid {
            return from_title;
        }

        // No keyword signal in the title: try a years-of-experience
        // mention in the body.
        if let Some(caps) = self.years_only.captures(text) {
            if let Some(years) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                return match years {
                    0..=1 => ExperienceLevel::Entry,
                    2..=4 => ExperienceLevel::Mid,
                    5..=8 => ExperienceLevel::Senior,
                    _ => ExperienceLevel::Lead,
                };
            }
        }

        ExperienceLevel::Mid
    }

    fn infer_work_arrangement(&self, text: &str) -> WorkArrangement {
        normalize_work_arrangement(text)
    }

    /// Pull an advertised range like "$120,000 - $150,000" or
    /// "$120k-$150k" out of the posting text. Low confidence: the text
    /// may also quote equity bands or hourly rates.
    fn extract_salary(&self, text: &str) -> Option<SalaryRange> {
        let caps = self.salary_range.captures(text)?;
        let min = parse_amount(caps.get(1)?.as_str())?;
        let max = parse_amount(caps.get(2)?.as_str())?;
        Some(SalaryRange::new(
            Some(min),
            Some(max),
            Some("USD".to_string()),
            0.4,
            "posting_text",
        ))
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw.replace([',', ' '], "");
    if let Some(thousands) = cleaned
        .strip_suffix('k')
        .or_else(|| cleaned.strip_suffix('K'))
    {
        return thousands.parse::<f64>().ok().map(|v| v * 1000.0);
    }
    cleaned.parse::<f64>().ok()
}

impl Default for FallbackAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Word-boundary match that tolerates dictionary entries with
/// punctuation ("C++", "Node.js").
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = begin == 0
            || !haystack[..begin]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        let after_ok = end >= haystack.len()
            || !haystack[end..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric())
                .unwrap_or(false);
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}
