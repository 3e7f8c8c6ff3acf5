// src/analysis/client.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::analysis::AnalysisApi;
use crate::error::AnalysisError;
use crate::types::analysis::{AnalysisMetadata, AnalysisPath, SkillEntry, StructuredAnalysis};
use crate::types::posting::{
    normalize_experience_level, normalize_work_arrangement, DiscoveredPosting, SalaryRange,
};

const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// The five arrays the extraction contract requires. A response missing
/// more than half of them is treated as failed.
const REQUIRED_ARRAYS: usize = 5;

#[derive(Debug, Serialize)]
struct ExtractionRequest<'a> {
    instruction: &'a str,
    title: &'a str,
    company: &'a str,
    location: &'a str,
    text: &'a str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    #[serde(alias = "message", alias = "completion")]
    content: String,
}

/// Raw extraction document as the model emits it: every field optional,
/// enums as free text. Coerced into the closed shapes after parsing.
#[derive(Debug, Deserialize)]
struct RawAnalysisDoc {
    requirements: Option<Vec<String>>,
    responsibilities: Option<Vec<String>>,
    #[serde(alias = "technicalRequirements")]
    technical_requirements: Option<Vec<String>>,
    #[serde(alias = "toolsAndTechnologies")]
    tools_and_technologies: Option<Vec<String>>,
    #[serde(alias = "keySkills")]
    key_skills: Option<Vec<RawSkill>>,
    #[serde(alias = "salaryRange", alias = "salary_range")]
    salary: Option<RawSalary>,
    #[serde(default, alias = "experienceLevel")]
    experience_level: String,
    #[serde(default, alias = "workArrangement")]
    work_arrangement: String,
}

#[derive(Debug, Deserialize)]
struct RawSalary {
    min: Option<f64>,
    max: Option<f64>,
    currency: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSkill {
    #[serde(default)]
    name: String,
    #[serde(default)]
    importance: f64,
    #[serde(default)]
    category: String,
    #[serde(default, alias = "skillType")]
    skill_type: String,
}

/// HTTP adapter to the external structured-extraction service.
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, api_key: &str, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisApi for HttpAnalysisClient {
    async fn analyze(
        &self,
        posting: &DiscoveredPosting,
    ) -> Result<StructuredAnalysis, AnalysisError> {
        let request = ExtractionRequest {
            instruction: EXTRACTION_INSTRUCTION,
            title: &posting.title,
            company: &posting.company,
            location: &posting.location_raw,
            text: &posting.description,
            temperature: EXTRACTION_TEMPERATURE,
        };

        info!(
            "Requesting structured extraction for '{}' at {}",
            posting.title, posting.company
        );

        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Request(format!("HTTP {}: {}", status, body)));
        }

        let extraction: ExtractionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

        parse_extraction_content(&extraction.content)
    }
}

/// Parse the model's reply into a normalized document.
///
/// Tolerates prose and code-fence wrapping by extracting the first
/// balanced `{...}` span before deserializing.
pub fn parse_extraction_content(content: &str) -> Result<StructuredAnalysis, AnalysisError> {
    let json_span = extract_json_object(content).ok_or_else(|| {
        AnalysisError::MalformedResponse("No JSON object found in response".to_string())
    })?;

    let raw: RawAnalysisDoc = serde_json::from_str(json_span)
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

    let missing = [
        raw.requirements.is_none(),
        raw.responsibilities.is_none(),
        raw.technical_requirements.is_none(),
        raw.tools_and_technologies.is_none(),
        raw.key_skills.is_none(),
    ]
    .iter()
    .filter(|m| **m)
    .count();
    if missing * 2 > REQUIRED_ARRAYS {
        return Err(AnalysisError::Incomplete {
            missing,
            required: REQUIRED_ARRAYS,
        });
    }

    let key_skills = raw
        .key_skills
        .unwrap_or_default()
        .into_iter()
        .map(|s| SkillEntry {
            name: s.name,
            importance: s.importance.round().clamp(1.0, 10.0) as u8,
            category: s.category,
            skill_type: s.skill_type,
        })
        .collect();

    let salary = raw.salary.and_then(|s| {
        if s.min.is_none() && s.max.is_none() {
            return None;
        }
        Some(SalaryRange::new(
            s.min,
            s.max,
            s.currency,
            s.confidence.unwrap_or(0.7) as f32,
            "analysis",
        ))
    });

    Ok(StructuredAnalysis {
        requirements: raw.requirements.unwrap_or_default(),
        responsibilities: raw.responsibilities.unwrap_or_default(),
        technical_requirements: raw.technical_requirements.unwrap_or_default(),
        tools_and_technologies: raw.tools_and_technologies.unwrap_or_default(),
        key_skills,
        salary,
        experience_level: normalize_experience_level(&raw.experience_level),
        work_arrangement: normalize_work_arrangement(&raw.work_arrangement),
        metadata: AnalysisMetadata::now(AnalysisPath::Primary),
    }
    .normalized())
}

/// Return the first balanced `{...}` span in `text`, respecting JSON
/// string escapes.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        match byte {
            _ if escaped => escaped = false,
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

const EXTRACTION_INSTRUCTION: &str = "Extract the job posting into a single JSON object with \
keys: requirements, responsibilities, technical_requirements, tools_and_technologies (arrays of \
strings), key_skills (array of {name, importance 1-10, category, skill_type}), experience_level \
(entry|junior|mid|senior|lead|principal|executive), work_arrangement \
(remote|hybrid|onsite|unknown) and, when the posting states compensation, salary \
({min, max, currency, confidence 0-1}; omit otherwise). Respond with the JSON object only.";
