use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{info, warn};

use matching_common::api::{
    EvaluationParam, MatchRequest, MatchResponse, WebSearchRequest, WebSearchResponse,
    DEFAULT_BATCH_SIZE, DEFAULT_TOP_K,
};
use matching_common::criteria::{default_criteria, validate_criteria, Criterion, WeightUnit};
use matching_common::json_text::field_strings;
use matching_common::provider::Provider;

use crate::analysis::Analyzer;
use crate::error::AppError;
use crate::export::results_csv;
use crate::handlers::problem_statements::find;
use crate::handlers::ProviderQuery;
use crate::matching::run_vendor_matching;
use crate::model::{EntityKind, ProblemStatement};
use crate::search::{evaluate_web_vendors, search_vendors};
use crate::state::AppState;

const MIN_SEARCH_COUNT: i64 = 3;
const MAX_SEARCH_COUNT: i64 = 10;
const SEARCH_PREVIEW_CHARS: usize = 500;

fn check_range(name: &str, value: i64, min: i64, max: i64) -> Result<usize, AppError> {
    if (min..=max).contains(&value) {
        Ok(value as usize)
    } else {
        Err(AppError::validation(format!(
            "{name} must be between {min} and {max}"
        )))
    }
}

fn required_id(id: &str) -> Result<&str, AppError> {
    let id = id.trim();
    if id.is_empty() {
        Err(AppError::validation("Problem statement ID is required"))
    } else {
        Ok(id)
    }
}

pub async fn vendor_matching(
    State(state): State<Arc<AppState>>,
    Json(body): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let ps_id = required_id(&body.ps_id)?;
    let provider = state.body_provider(body.llm_provider.as_deref())?;
    let top_k = check_range("top_k", body.top_k, 1, state.config.top_k_limit)?;
    let batch_size = check_range("batch_size", body.batch_size, 1, state.config.batch_size_limit)?;

    let criteria = if body.criteria.is_empty() {
        default_criteria(WeightUnit::Fraction)
    } else {
        let criteria: Vec<Criterion> = body
            .criteria
            .into_iter()
            .map(Criterion::with_derived_key)
            .collect();
        validate_criteria(&criteria, WeightUnit::Fraction)?;
        criteria
    };

    let ps = find(&state, ps_id).await?;
    let analyzer = state.analyzer(provider)?;
    info!(ps_id = %ps.id, %provider, top_k, batch_size, criteria = criteria.len(), "vendor matching");

    let outcome =
        run_vendor_matching(&state.repo, &analyzer, &ps, top_k, batch_size, &criteria).await?;

    Ok(Json(MatchResponse {
        problem_statement: (&ps).into(),
        shortlisted_vendors: outcome.results.len(),
        top_composite_score: outcome
            .results
            .first()
            .map_or(0.0, |r| r.composite_score),
        total_vendors_analyzed: outcome.total_vendors,
        cache_stats: outcome.cache_stats,
        results: outcome.results,
        llm_provider: provider,
    }))
}

/// The cached analysis, regenerated when it lacks every field the search queries use.
async fn search_ready_analysis(
    state: &AppState,
    analyzer: &Analyzer,
    ps: &ProblemStatement,
) -> Result<serde_json::Value, AppError> {
    let processed = analyzer.problem_statement(ps).await?;
    let usable = [
        "primary_technical_domains",
        "required_tools_or_frameworks",
        "key_technical_requirements",
    ]
    .iter()
    .any(|field| !field_strings(&processed.analysis, field).is_empty());
    if usable {
        return Ok(processed.analysis);
    }

    warn!(ps_id = %ps.id, "cached analysis has no searchable fields, regenerating");
    state
        .repo
        .delete_analysis(
            EntityKind::ProblemStatement,
            analyzer.provider(),
            &ps.content_hash(),
        )
        .await?;
    Ok(analyzer.problem_statement(ps).await?.analysis)
}

pub async fn web_search_vendors(
    State(state): State<Arc<AppState>>,
    Json(body): Json<WebSearchRequest>,
) -> Result<Json<WebSearchResponse>, AppError> {
    let ps_id = required_id(&body.ps_id)?;
    let count = check_range("count", body.count, MIN_SEARCH_COUNT, MAX_SEARCH_COUNT)?;
    let provider = state.body_provider_or(body.llm_provider.as_deref(), Provider::Gemini)?;

    let criteria = match &body.evaluation_params {
        None => default_criteria(WeightUnit::Percent),
        Some(params) => {
            let criteria: Vec<Criterion> = params.iter().map(Criterion::from).collect();
            validate_criteria(&criteria, WeightUnit::Percent)?;
            criteria
        }
    };
    let evaluation_params: Vec<EvaluationParam> = criteria.iter().map(Into::into).collect();

    let ps = find(&state, ps_id).await?;
    let analyzer = state.analyzer(provider)?;
    let analysis = search_ready_analysis(&state, &analyzer, &ps).await?;

    info!(ps_id = %ps.id, %provider, count, "web vendor search");
    let outcome = search_vendors(state.searcher.as_ref(), &analysis, &ps.full_statement, count).await?;

    if outcome.vendors.is_empty() {
        warn!(ps_id = %ps.id, "web search returned no parseable vendors");
        return Ok(Json(WebSearchResponse {
            problem_statement_id: ps.id,
            llm_provider: provider,
            total_found: 0,
            sources_count: outcome.sources_count,
            top_score: 0.0,
            vendors: Vec::new(),
            evaluation_params,
            message: Some("No vendors found in web search".to_string()),
            search_results_preview: Some(
                outcome.raw_text.chars().take(SEARCH_PREVIEW_CHARS).collect(),
            ),
        }));
    }

    let vendors =
        evaluate_web_vendors(analyzer.llm().as_ref(), &analysis, &outcome.vendors, &criteria).await;

    Ok(Json(WebSearchResponse {
        problem_statement_id: ps.id,
        llm_provider: provider,
        total_found: vendors.len(),
        sources_count: outcome.sources_count,
        top_score: vendors.first().map_or(0.0, |v| v.composite_score),
        vendors,
        evaluation_params,
        message: None,
        search_results_preview: None,
    }))
}

/// Re-runs matching with the default settings and returns the ranking as CSV.
pub async fn download_results(
    State(state): State<Arc<AppState>>,
    Path(ps_id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<impl IntoResponse, AppError> {
    let provider = query.provider_or(state.config.default_provider);
    let ps = find(&state, &ps_id).await?;
    let analyzer = state.analyzer(provider)?;
    let criteria = default_criteria(WeightUnit::Fraction);

    let outcome = run_vendor_matching(
        &state.repo,
        &analyzer,
        &ps,
        DEFAULT_TOP_K as usize,
        DEFAULT_BATCH_SIZE as usize,
        &criteria,
    )
    .await?;

    let disposition = format!("attachment; filename=\"matching_results_{}.csv\"", ps.id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        results_csv(&outcome.results, &criteria),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use matching_common::llm::LlmRegistry;
    use matching_common::openai::LlmError;
    use matching_common::provider::Provider;

    use crate::config::Config;
    use crate::handlers::router;
    use crate::handlers::test_support::{get, post_json};
    use crate::model::{ProblemStatement, Vendor};
    use crate::state::AppState;
    use crate::store::MemoryRepository;
    use crate::testing::{state_with, test_state, FakeEmbedder, FakeSearcher, ScriptedChat};

    async fn seeded(state: &Arc<AppState>) -> String {
        let ps = ProblemStatement::new(
            "Support triage",
            "Route customer tickets with NLP models in the cloud",
            "Faster first response",
        );
        state.repo.put_problem_statement(&ps).await.unwrap();
        for (name, text) in [
            ("Lexica", "Lexica ships NLP ticket classifiers built with PyTorch."),
            ("Optika", "Optika builds computer vision inspection systems with PyTorch."),
        ] {
            state
                .repo
                .put_vendor(&Vendor::new(name, text.to_string()))
                .await
                .unwrap();
        }
        ps.id
    }

    #[tokio::test]
    async fn matching_ranks_shortlist_and_reports_cache_use() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        let request = json!({"ps_id": ps_id, "top_k": 1});
        let (status, body) = post_json(&app, "/api/vendor_matching", request.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_vendors_analyzed"], 2);
        assert_eq!(body["shortlisted_vendors"], 1);
        assert_eq!(body["results"][0]["name"], "Lexica");
        assert_eq!(body["results"][0]["domain_fit_score"], 80.0);
        // 80*0.4 + 70*0.3 + 60*0.2 + 50*0.1
        assert_eq!(body["top_composite_score"], 70.0);
        assert_eq!(body["cache_stats"], json!({"vendors_from_cache": 0, "vendors_processed": 2}));
        assert_eq!(body["problem_statement"]["id"], ps_id.as_str());
        assert_eq!(body["llm_provider"], "openai");

        let (_, again) = post_json(&app, "/api/vendor_matching", request).await;
        assert_eq!(again["cache_stats"], json!({"vendors_from_cache": 2, "vendors_processed": 0}));
    }

    #[tokio::test]
    async fn custom_criteria_drive_the_composite() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        let request = json!({
            "ps_id": ps_id,
            "criteria": [
                {"label": "Domain Fit", "weight": 0.5},
                {"label": "Cost", "weight": 0.5}
            ]
        });
        let (status, body) = post_json(&app, "/api/vendor_matching", request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["cost_score"], 0.0);
        assert_eq!(body["top_composite_score"], 40.0);
    }

    #[tokio::test]
    async fn matching_validation() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        let cases = [
            (json!({"top_k": 5}), StatusCode::BAD_REQUEST, "Problem statement ID is required"),
            (json!({"ps_id": ps_id, "top_k": 0}), StatusCode::BAD_REQUEST, "top_k must be between 1 and 100"),
            (json!({"ps_id": ps_id, "batch_size": 21}), StatusCode::BAD_REQUEST, "batch_size must be between 1 and 20"),
            (json!({"ps_id": ps_id, "llm_provider": "claude"}), StatusCode::BAD_REQUEST, "invalid LLM provider 'claude'. Use: openai, gemini, or ollama"),
            (json!({"ps_id": "missing1"}), StatusCode::NOT_FOUND, "Problem statement not found"),
        ];
        for (request, expected_status, expected_error) in cases {
            let (status, body) = post_json(&app, "/api/vendor_matching", request).await;
            assert_eq!(status, expected_status);
            assert_eq!(body["error"], expected_error);
        }

        let (status, body) = post_json(
            &app,
            "/api/vendor_matching",
            json!({"ps_id": ps_id, "criteria": [{"label": "A", "weight": 0.6}, {"label": "B", "weight": 0.3}]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("total weight must equal 1"));
    }

    #[tokio::test]
    async fn matching_without_vendors_is_rejected() {
        let state = test_state();
        let ps = ProblemStatement::new("Lonely", "Nobody to match", "None");
        state.repo.put_problem_statement(&ps).await.unwrap();
        let app = router(state);

        let (status, body) = post_json(&app, "/api/vendor_matching", json!({"ps_id": ps.id})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No vendors available");
    }

    fn search_response(text: &str) -> Value {
        json!({"output": [
            {"type": "web_search_call", "status": "completed"},
            {"type": "message", "content": [{
                "type": "output_text",
                "text": text,
                "annotations": [
                    {"type": "url_citation", "url": "https://review.example.com/nlp", "title": "Review"}
                ]
            }]}
        ]})
    }

    #[tokio::test]
    async fn web_search_scores_found_vendors() {
        let text = "1. **Parsewell**\n   Parsewell automates support ticket routing with transformer models.\n   Website: https://parsewell.example.com\n\
2. **Triageon**\n   Triageon offers multilingual intent detection APIs for contact centers.\n   Website: https://triageon.example.com";
        let state = state_with(
            Arc::new(ScriptedChat::standard()),
            FakeSearcher::ok(search_response(text)),
        );
        let ps_id = seeded(&state).await;
        let app = router(state);

        let (status, body) =
            post_json(&app, "/api/web_search_vendors", json!({"ps_id": ps_id, "count": 3})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["llm_provider"], "gemini");
        assert_eq!(body["total_found"], 2);
        assert_eq!(body["sources_count"], 1);
        assert_eq!(body["top_score"], 70.0);
        assert_eq!(body["vendors"][0]["source"], "web_search");
        assert_eq!(body["vendors"][0]["web_sources"].as_array().unwrap().len(), 2);
        assert_eq!(
            body["evaluation_params"],
            json!([
                {"name": "Domain Fit", "weight": 40.0},
                {"name": "Tools/Stack Fit", "weight": 30.0},
                {"name": "Experience", "weight": 20.0},
                {"name": "Scalability", "weight": 10.0}
            ])
        );
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn web_search_without_parseable_vendors() {
        let state = state_with(
            Arc::new(ScriptedChat::standard()),
            FakeSearcher::ok(search_response("I could not find any matching companies.")),
        );
        let ps_id = seeded(&state).await;
        let app = router(state);

        let (status, body) =
            post_json(&app, "/api/web_search_vendors", json!({"ps_id": ps_id})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_found"], 0);
        assert_eq!(body["message"], "No vendors found in web search");
        assert_eq!(body["search_results_preview"], "I could not find any matching companies.\n");
    }

    #[tokio::test]
    async fn web_search_failures_and_validation() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        let (status, body) =
            post_json(&app, "/api/web_search_vendors", json!({"ps_id": ps_id})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Web search failed");
        assert!(body["details"].is_string());

        let (status, body) =
            post_json(&app, "/api/web_search_vendors", json!({"ps_id": ps_id, "count": 11})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "count must be between 3 and 10");

        let (status, _) = post_json(
            &app,
            "/api/web_search_vendors",
            json!({"ps_id": ps_id, "evaluation_params": [{"name": "Cost", "weight": 90}]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post_json(
            &app,
            "/api/web_search_vendors",
            json!({"ps_id": ps_id, "evaluation_params": []}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_is_a_csv_attachment() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        let request = Request::get(format!("/api/download_results/{ps_id}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/csv");
        assert_eq!(
            response.headers()["content-disposition"],
            format!("attachment; filename=\"matching_results_{ps_id}.csv\"").as_str()
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = csv.trim_end().split("\r\n").collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("rank,name,composite_score,domain_fit_score"));
        assert!(lines[1].starts_with("1,Lexica,70,"));
    }

    #[tokio::test]
    async fn download_defaults_to_the_configured_provider() {
        let gemini = Arc::new(ScriptedChat::standard());
        let openai = Arc::new(ScriptedChat::new(|_| {
            Err(LlmError::MissingContent("choices[0].message.content"))
        }));
        let state = Arc::new(AppState {
            config: Config {
                default_provider: Provider::Gemini,
                ..Config::default()
            },
            repo: Arc::new(MemoryRepository::new()),
            llms: LlmRegistry::new()
                .with(Provider::Gemini, gemini.clone())
                .with(Provider::OpenAi, openai.clone()),
            embedder: Arc::new(FakeEmbedder::default()),
            searcher: Arc::new(FakeSearcher::failing()),
        });
        let ps_id = seeded(&state).await;
        let app = router(state);

        let (status, body) = get(&app, &format!("/api/download_results/{ps_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_str().unwrap().contains("1,Lexica,70,"));
        assert!(gemini.calls() > 0);
        assert_eq!(openai.calls(), 0);

        let (status, _) = get(&app, &format!("/api/download_results/{ps_id}?llm_provider=ollama")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn criteria_shadowing_fixed_fields_are_rejected() {
        let state = test_state();
        let ps_id = seeded(&state).await;
        let app = router(state);

        for label in ["Composite", "Name", "???"] {
            let request = json!({
                "ps_id": ps_id,
                "criteria": [
                    {"label": "Domain Fit", "weight": 0.5},
                    {"label": label, "weight": 0.5}
                ]
            });
            let (status, _) = post_json(&app, "/api/vendor_matching", request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "label {label}");
        }

        let (status, body) = post_json(
            &app,
            "/api/web_search_vendors",
            json!({"ps_id": ps_id, "evaluation_params": [
                {"name": "Concerns", "weight": 60},
                {"name": "Cost", "weight": 40}
            ]}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "criterion name 'concerns' is reserved");
    }
}
