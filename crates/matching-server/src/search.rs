/// Web search for vendors that are not in the repository.
///
/// The searcher returns a Responses API payload. Its output items are walked for text and
/// `url_citation` annotations, the text is cut into one section per vendor, and each vendor
/// is then scored by the selected chat model.
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{error, info, warn};

use matching_common::api::{VendorEvaluation, WebSource};
use matching_common::criteria::{Criterion, WeightUnit};
use matching_common::json_text::field_strings;
use matching_common::llm::{parse_json_output, ChatModel, WebSearcher};
use matching_common::openai::LlmError;

use crate::error::AppError;
use crate::matching::score_item;

const MIN_SECTION_CHARS: usize = 50;
const MIN_DESCRIPTION_CHARS: usize = 30;
const MAX_PARSED_VENDORS: usize = 10;

static BOLD_HEADING_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s+\*\*").expect("valid regex"));
static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").expect("valid regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid regex"));
static NUMBERED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.[ \t]+([A-Z][A-Za-z0-9&.,\- \t]{3,})").expect("valid regex")
});
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\s*").expect("valid regex"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>")\]]+"#).expect("valid regex"));

/// A vendor cut out of the search text, before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct WebVendor {
    pub name: String,
    pub description: String,
    pub full_text: String,
    pub web_sources: Vec<WebSource>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchText {
    pub text: String,
    pub citations: Vec<WebSource>,
    pub web_search_used: bool,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub vendors: Vec<WebVendor>,
    pub raw_text: String,
    pub sources_count: usize,
}

/// Queries derived from the analysis: two domains, then the first three tools, with a
/// description-based fallback.
pub fn search_queries(analysis: &Value, full_statement: &str) -> Vec<String> {
    let domains = field_strings(analysis, "primary_technical_domains");
    let tools = field_strings(analysis, "required_tools_or_frameworks");

    let mut queries: Vec<String> = domains
        .iter()
        .take(2)
        .map(|d| format!("top companies specializing in {d}"))
        .collect();
    if !tools.is_empty() {
        let tools: Vec<&str> = tools.iter().take(3).map(String::as_str).collect();
        queries.push(format!("companies using {}", tools.join(", ")));
    }

    if queries.is_empty() {
        let description = full_statement
            .lines()
            .find_map(|line| {
                let line = line.trim();
                line.get(..12)
                    .filter(|head| head.eq_ignore_ascii_case("description:"))
                    .map(|_| line[12..].trim())
            })
            .unwrap_or_default();
        let description: String = description.chars().take(120).collect();
        let topic = if description.is_empty() {
            "software development".to_string()
        } else {
            description
        };
        queries.push(format!("technology vendors for {topic}"));
    }
    queries
}

fn preview(items: &[String], limit: usize, fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.iter().take(limit).cloned().collect::<Vec<_>>().join(", ")
    }
}

pub fn search_prompt(analysis: &Value, queries: &[String], count: usize) -> String {
    let domains = preview(
        &field_strings(analysis, "primary_technical_domains"),
        5,
        "software development",
    );
    let tools = preview(
        &field_strings(analysis, "required_tools_or_frameworks"),
        6,
        "modern stack",
    );
    let requirements = preview(
        &field_strings(analysis, "key_technical_requirements"),
        6,
        "enterprise-grade",
    );
    let query_lines = queries
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a procurement researcher. Use web search to find exactly {count} real, active technology vendors.\n\n\
SEARCH CRITERIA:\n- Domains: {domains}\n- Tools: {tools}\n- Requirements: {requirements}\n\n\
USE THESE SEARCH QUERIES:\n{query_lines}\n\n\
For each company give its name, a 2-3 sentence description, the technologies it uses and its \
official website. Only use search results.\n\n\
Return a numbered list:\n\
1. **Company Name**\n   Description...\n   Technologies: ...\n   Website: https://..."
    )
}

/// Collect text pieces and URL citations from a Responses API payload.
pub fn collect_output(response: &Value) -> SearchText {
    let mut out = SearchText::default();
    let items: Vec<&Value> = match response.get("output") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };

    for item in items {
        if let Value::String(s) = item {
            push_text(&mut out.text, s);
            continue;
        }
        let item_type = item
            .get("type")
            .or_else(|| item.get("role"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if item_type.to_ascii_lowercase().contains("web_search") {
            out.web_search_used = true;
        }

        let contents: Vec<&Value> = match item.get("content") {
            Some(Value::Array(contents)) => contents.iter().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        };
        for content in contents {
            match content {
                Value::String(s) => push_text(&mut out.text, s),
                Value::Object(_) => {
                    let text = ["text", "output_text", "content"]
                        .iter()
                        .find_map(|k| content.get(*k).and_then(Value::as_str))
                        .unwrap_or_default();
                    push_text(&mut out.text, text);
                    let annotations = content
                        .get("annotations")
                        .or_else(|| content.get("metadata"))
                        .and_then(Value::as_array);
                    for annotation in annotations.into_iter().flatten() {
                        if annotation.get("type").and_then(Value::as_str) == Some("url_citation") {
                            let url = annotation
                                .get("url")
                                .and_then(Value::as_str)
                                .unwrap_or_default();
                            let title = annotation
                                .get("title")
                                .and_then(Value::as_str)
                                .unwrap_or("Source");
                            out.citations.push(WebSource {
                                url: url.to_string(),
                                title: title.to_string(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }
    out
}

fn push_text(buf: &mut String, piece: &str) {
    if !piece.is_empty() {
        buf.push_str(piece);
        buf.push('\n');
    }
}

/// Split at lines matching `start`, keeping the matching line at the head of its section.
fn split_at_lines(text: &str, start: &Regex) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    for (i, line) in text.lines().enumerate() {
        if i > 0 && start.is_match(line) {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    sections.push(current);
    sections
}

fn split_sections(text: &str) -> Vec<String> {
    let sections = split_at_lines(text, &BOLD_HEADING_LINE);
    if sections.len() > 1 {
        return sections;
    }
    let sections = split_at_lines(text, &NUMBERED_LINE);
    if sections.len() > 1 {
        return sections;
    }
    BLANK_LINES.split(text).map(str::to_string).collect()
}

fn parse_section(section: &str) -> Option<WebVendor> {
    let name = BOLD
        .captures(section)
        .or_else(|| NUMBERED_NAME.captures(section))
        .and_then(|c| c.get(1))
        .map(|m| LEADING_NUMBER.replace(m.as_str().trim(), "").trim().to_string())
        .unwrap_or_default();

    let mut description_lines = Vec::new();
    for line in section.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if ["http", "Technologies:", "Website:", "Tech Stack:"]
            .iter()
            .any(|p| line.starts_with(p))
        {
            continue;
        }
        let without_bold = BOLD.replace_all(line, "");
        let cleaned = LEADING_NUMBER.replace(without_bold.trim(), "");
        let cleaned = cleaned.trim();
        if cleaned.chars().count() > 20 {
            description_lines.push(cleaned.to_string());
            if description_lines.len() >= 3 {
                break;
            }
        }
    }
    let description = description_lines.join(" ");

    if name.is_empty() || description.chars().count() <= MIN_DESCRIPTION_CHARS {
        return None;
    }

    let web_sources = URL
        .find_iter(section)
        .take(2)
        .map(|m| WebSource {
            url: m.as_str().to_string(),
            title: name.clone(),
        })
        .collect();

    Some(WebVendor {
        name,
        description,
        full_text: section.to_string(),
        web_sources,
    })
}

/// Cut search text into vendors. Short sections and vendors without a name or a usable
/// description are dropped; at most ten are returned.
pub fn parse_vendor_sections(text: &str) -> Vec<WebVendor> {
    let text = text.trim();
    if text.chars().count() < MIN_SECTION_CHARS {
        return Vec::new();
    }
    split_sections(text)
        .iter()
        .map(|s| s.trim())
        .filter(|s| s.chars().count() >= MIN_SECTION_CHARS)
        .filter_map(parse_section)
        .take(MAX_PARSED_VENDORS)
        .collect()
}

/// Run the web search and parse vendors out of the response.
pub async fn search_vendors(
    searcher: &dyn WebSearcher,
    analysis: &Value,
    full_statement: &str,
    count: usize,
) -> Result<SearchOutcome, AppError> {
    let queries = search_queries(analysis, full_statement);
    info!(?queries, "web search queries");

    let response = searcher
        .search(&search_prompt(analysis, &queries, count))
        .await
        .map_err(|e| AppError::WebSearch {
            details: e.to_string(),
        })?;
    let output = collect_output(&response);

    if !output.web_search_used && output.text.trim().is_empty() {
        return Err(AppError::WebSearch {
            details: "Web search not performed or no usable output from the tool".to_string(),
        });
    }
    if !output.web_search_used {
        warn!("web search call not detected in output, parsing text anyway");
    }
    info!(
        chars = output.text.len(),
        citations = output.citations.len(),
        "web search returned"
    );

    let mut seen = HashSet::new();
    let citations: Vec<WebSource> = output
        .citations
        .into_iter()
        .filter(|c| !c.url.is_empty() && seen.insert(c.url.clone()))
        .collect();

    let mut vendors = parse_vendor_sections(&output.text);
    for vendor in &mut vendors {
        for citation in &citations {
            if !vendor.web_sources.iter().any(|s| s.url == citation.url) {
                vendor.web_sources.push(citation.clone());
            }
        }
    }
    vendors.truncate(count);

    Ok(SearchOutcome {
        vendors,
        raw_text: output.text,
        sources_count: citations.len(),
    })
}

pub fn web_evaluation_prompt(analysis: &Value, vendor: &WebVendor, criteria: &[Criterion]) -> String {
    let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
    let criteria_lines = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} (0-100)", i + 1, c.label))
        .collect::<Vec<_>>()
        .join("\n");
    let score_fields = criteria
        .iter()
        .map(|c| format!("  \"{}\": <0-100 score>,", c.key))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a senior technical procurement expert.\n\n\
PROBLEM REQUIREMENTS:\n{analysis_json}\n\n\
VENDOR FROM WEB SEARCH:\nName: {}\nDescription: {}\nFull Context: {}\n\n\
EVALUATION CRITERIA:\n{criteria_lines}\n\n\
Respond with one JSON object only:\n\
{{\n  \"name\": \"<vendor name>\",\n{score_fields}\n  \
\"justification\": \"<3-5 sentences citing the vendor description>\",\n  \
\"strengths\": [\"<strength>\"],\n  \
\"concerns\": [\"<concern>\"]\n}}",
        vendor.name, vendor.description, vendor.full_text
    )
}

async fn evaluate_web_vendor(
    llm: &dyn ChatModel,
    analysis: &Value,
    vendor: &WebVendor,
    criteria: &[Criterion],
) -> Result<VendorEvaluation, LlmError> {
    let raw = llm
        .complete(&web_evaluation_prompt(analysis, vendor, criteria))
        .await?;
    let parsed = parse_json_output(&raw)?;
    let item = match parsed {
        Value::Array(items) => items.into_iter().find(Value::is_object),
        obj @ Value::Object(_) => Some(obj),
        _ => None,
    }
    .ok_or_else(|| LlmError::UnparseableOutput("expected a JSON object".to_string()))?;

    let name = item
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&vendor.name)
        .to_string();
    let mut evaluation = score_item(&item, name, criteria, WeightUnit::Percent);
    evaluation.description = Some(vendor.description.clone());
    evaluation.web_sources = vendor.web_sources.clone();
    evaluation.source = Some("web_search".to_string());
    Ok(evaluation)
}

fn web_fallback(vendor: &WebVendor, criteria: &[Criterion], error: &LlmError) -> VendorEvaluation {
    let reason: String = error.to_string().chars().take(100).collect();
    VendorEvaluation {
        name: vendor.name.clone(),
        composite_score: 0.0,
        justification: format!("Evaluation failed: {reason}"),
        strengths: Vec::new(),
        concerns: vec![
            "LLM evaluation error".to_string(),
            "Unable to score vendor".to_string(),
        ],
        description: Some(vendor.description.clone()),
        web_sources: vendor.web_sources.clone(),
        source: Some("web_search_fallback".to_string()),
        scores: criteria.iter().map(|c| (c.score_field(), 0.0)).collect(),
    }
}

/// Score each web vendor with percent-weighted criteria, best composite first.
pub async fn evaluate_web_vendors(
    llm: &dyn ChatModel,
    analysis: &Value,
    vendors: &[WebVendor],
    criteria: &[Criterion],
) -> Vec<VendorEvaluation> {
    let mut results = Vec::with_capacity(vendors.len());
    for vendor in vendors {
        match evaluate_web_vendor(llm, analysis, vendor, criteria).await {
            Ok(evaluation) => {
                info!(vendor = %evaluation.name, score = evaluation.composite_score, "web vendor evaluated");
                results.push(evaluation);
            }
            Err(e) => {
                error!(vendor = %vendor.name, error = %e, "web vendor evaluation failed");
                results.push(web_fallback(vendor, criteria, &e));
            }
        }
    }
    results.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
    results
}
