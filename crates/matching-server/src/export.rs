/// CSV rendering of matching results.
use matching_common::api::VendorEvaluation;
use matching_common::criteria::Criterion;

fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One header row, then one row per vendor in rank order. List columns are joined with `; `.
pub fn results_csv(results: &[VendorEvaluation], criteria: &[Criterion]) -> String {
    let mut header = vec!["rank".to_string(), "name".to_string(), "composite_score".to_string()];
    header.extend(criteria.iter().map(|c| c.score_field()));
    header.extend(["justification", "strengths", "concerns"].map(String::from));

    let mut out = String::new();
    out.push_str(&header.iter().map(|h| field(h)).collect::<Vec<_>>().join(","));
    out.push_str("\r\n");

    for (i, result) in results.iter().enumerate() {
        let mut row = vec![
            (i + 1).to_string(),
            field(&result.name),
            result.composite_score.to_string(),
        ];
        row.extend(criteria.iter().map(|c| result.score(c).to_string()));
        row.push(field(&result.justification));
        row.push(field(&result.strengths.join("; ")));
        row.push(field(&result.concerns.join("; ")));
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}
