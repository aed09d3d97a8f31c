/// Plain-text presentation of scored vendors.
use std::fmt::Write as _;

use matching_common::api::{MatchResponse, VendorEvaluation, WebSearchResponse};
use matching_common::criteria::Criterion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBand {
    Green,
    Yellow,
    Orange,
    Red,
}

impl ScoreBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            ScoreBand::Green
        } else if score >= 60.0 {
            ScoreBand::Yellow
        } else if score >= 40.0 {
            ScoreBand::Orange
        } else {
            ScoreBand::Red
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreBand::Green => "green",
            ScoreBand::Yellow => "yellow",
            ScoreBand::Orange => "orange",
            ScoreBand::Red => "red",
        }
    }
}

fn list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "   {heading}:");
    for item in items {
        let _ = writeln!(out, "     - {item}");
    }
}

pub fn render_evaluation(rank: usize, evaluation: &VendorEvaluation, criteria: &[Criterion]) -> String {
    let mut out = String::new();
    let band = ScoreBand::from_score(evaluation.composite_score);
    let _ = writeln!(
        out,
        "{rank}. {} [{:.1} {}]",
        evaluation.name,
        evaluation.composite_score,
        band.as_str()
    );
    if let Some(description) = evaluation.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "   {description}");
    }
    for criterion in criteria {
        let _ = writeln!(out, "   {}: {:.1}", criterion.label, evaluation.score(criterion));
    }
    if !evaluation.justification.is_empty() {
        let _ = writeln!(out, "   {}", evaluation.justification);
    }
    list(&mut out, "Strengths", &evaluation.strengths);
    list(&mut out, "Concerns", &evaluation.concerns);
    let sources: Vec<String> = evaluation
        .web_sources
        .iter()
        .map(|s| {
            if s.title.is_empty() {
                s.url.clone()
            } else {
                format!("{} ({})", s.title, s.url)
            }
        })
        .collect();
    list(&mut out, "Sources", &sources);
    out
}

pub fn render_results(results: &[VendorEvaluation], criteria: &[Criterion]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, evaluation)| render_evaluation(i + 1, evaluation, criteria))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_match(response: &MatchResponse, criteria: &[Criterion]) -> String {
    let mut out = format!(
        "{}: {} of {} vendors shortlisted ({})\n\n",
        response.problem_statement.title,
        response.shortlisted_vendors,
        response.total_vendors_analyzed,
        response.llm_provider
    );
    out.push_str(&render_results(&response.results, criteria));
    out
}

pub fn render_web_search(response: &WebSearchResponse) -> String {
    let criteria: Vec<Criterion> = response.evaluation_params.iter().map(Criterion::from).collect();
    let mut out = format!(
        "{} vendors found on the web, {} sources ({})\n",
        response.total_found, response.sources_count, response.llm_provider
    );
    if let Some(message) = &response.message {
        let _ = writeln!(out, "{message}");
    }
    out.push('\n');
    out.push_str(&render_results(&response.vendors, &criteria));
    out
}
