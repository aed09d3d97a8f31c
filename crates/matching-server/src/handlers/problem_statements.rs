use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use tracing::info;

use matching_common::api::{
    DeleteResponse, ProblemStatementDetail, ProblemStatementSubmission, ProblemStatementSummary,
    SubmissionResponse,
};
use matching_common::provider::Provider;

use crate::analysis::analysis_preview;
use crate::error::AppError;
use crate::handlers::ProviderQuery;
use crate::model::{sort_newest_first, EntityKind, ProblemStatement};
use crate::state::AppState;

const MAX_TITLE_CHARS: usize = 200;

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProblemStatementSubmission>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let title = body.title.trim();
    let description = body.description.trim();
    let outcomes = body.outcomes.trim();
    if title.is_empty() || description.is_empty() || outcomes.is_empty() {
        return Err(AppError::validation(
            "Title, description, and outcomes are required",
        ));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::validation("Title too long (max 200 characters)"));
    }

    let provider = state.body_provider(body.llm_provider.as_deref())?;
    let analyzer = state.analyzer(provider)?;

    let mut ps = ProblemStatement::new(title, description, outcomes);
    if let Some(existing) = state.repo.get_problem_statement(&ps.id).await? {
        ps.created_at = existing.created_at;
    }
    state.repo.put_problem_statement(&ps).await?;
    info!(ps_id = %ps.id, %provider, "problem statement stored");

    analyzer.problem_statement(&ps).await?;

    Ok(Json(SubmissionResponse {
        message: format!("Problem Statement '{title}' processed and cached!"),
        ps_id: Some(ps.id),
        llm_provider: provider,
    }))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<Vec<ProblemStatementSummary>>, AppError> {
    let provider = query.provider();
    let mut statements = state.repo.list_problem_statements().await?;
    sort_newest_first(&mut statements, |ps| ps.created_at);

    let mut out = Vec::with_capacity(statements.len());
    for ps in statements {
        let hash = ps.content_hash();
        let analysis = state
            .repo
            .get_analysis(EntityKind::ProblemStatement, provider, &hash)
            .await?;
        let has_embedding = state
            .repo
            .get_embedding(EntityKind::ProblemStatement, &hash)
            .await?
            .is_some();
        out.push(ProblemStatementSummary {
            id: ps.id,
            title: ps.title,
            description: ps.description,
            outcomes: ps.outcomes,
            has_analysis: analysis.is_some(),
            analysis: analysis.as_ref().and_then(analysis_preview),
            has_embedding,
        });
    }
    Ok(Json(out))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<ProblemStatementDetail>, AppError> {
    let provider = query.provider();
    let ps = find(&state, &id).await?;
    let hash = ps.content_hash();
    let analysis = state
        .repo
        .get_analysis(EntityKind::ProblemStatement, provider, &hash)
        .await?;
    let embedding = state
        .repo
        .get_embedding(EntityKind::ProblemStatement, &hash)
        .await?;

    Ok(Json(ProblemStatementDetail {
        id: ps.id,
        title: ps.title,
        description: ps.description,
        outcomes: ps.outcomes,
        full_statement: ps.full_statement,
        analysis,
        has_embedding: embedding.is_some(),
        embedding_dimensions: embedding.map_or(0, |e| e.len()),
        llm_provider: provider,
    }))
}

/// Removes the statement, its analyses under every provider and its embedding.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let ps = find(&state, &id).await?;
    let hash = ps.content_hash();
    let kind = EntityKind::ProblemStatement;

    let mut deleted_from = Vec::new();
    if state.repo.delete_problem_statement(&ps.id).await? {
        deleted_from.push("problem_statements".to_string());
    }
    for provider in Provider::ALL {
        if state.repo.delete_analysis(kind, provider, &hash).await? {
            deleted_from.push(format!("ps_analysis_{provider}"));
        }
    }
    if state.repo.delete_embedding(kind, &hash).await? {
        deleted_from.push("ps_embeddings".to_string());
    }
    info!(ps_id = %ps.id, ?deleted_from, "problem statement deleted");

    Ok(Json(DeleteResponse {
        message: format!("Problem statement '{}' deleted", ps.title),
        deleted_from,
    }))
}

pub(crate) async fn find(state: &AppState, id: &str) -> Result<ProblemStatement, AppError> {
    state
        .repo
        .get_problem_statement(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Problem statement not found".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::handlers::router;
    use crate::handlers::test_support::{delete, get, post_json};
    use crate::testing::test_state;

    fn submission() -> serde_json::Value {
        json!({
            "title": "Fraud detection",
            "description": "Detect card fraud with NLP on transaction notes",
            "outcomes": "Fewer chargebacks"
        })
    }

    #[tokio::test]
    async fn submit_then_list_and_detail() {
        let app = router(test_state());

        let (status, body) = post_json(&app, "/api/ps_submission", submission()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            "Problem Statement 'Fraud detection' processed and cached!"
        );
        assert_eq!(body["llm_provider"], "openai");
        let id = body["ps_id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 8);

        let (status, list) = get(&app, "/api/problem_statements").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["has_analysis"], true);
        assert_eq!(list[0]["has_embedding"], true);
        assert_eq!(list[0]["analysis"].as_object().unwrap().len(), 2);

        let (_, other) = get(&app, "/api/problem_statements?llm_provider=gemini").await;
        assert_eq!(other[0]["has_analysis"], false);
        assert_eq!(other[0]["has_embedding"], true);

        let (status, detail) = get(&app, &format!("/api/problem_statements/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["embedding_dimensions"], 4);
        assert_eq!(detail["analysis"]["primary_technical_domains"], json!(["NLP"]));
        assert!(detail["full_statement"]
            .as_str()
            .unwrap()
            .starts_with("Title: Fraud detection\n"));
    }

    #[tokio::test]
    async fn resubmission_keeps_creation_time() {
        let state = test_state();
        let app = router(state.clone());
        let (_, first) = post_json(&app, "/api/ps_submission", submission()).await;
        let id = first["ps_id"].as_str().unwrap();
        let created = state.repo.get_problem_statement(id).await.unwrap().unwrap().created_at;

        let mut changed = submission();
        changed["outcomes"] = json!("Fewer chargebacks and faster reviews");
        let (status, second) = post_json(&app, "/api/ps_submission", changed).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["ps_id"], first["ps_id"]);

        let stored = state.repo.get_problem_statement(id).await.unwrap().unwrap();
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.outcomes, "Fewer chargebacks and faster reviews");
    }

    #[tokio::test]
    async fn submission_validation() {
        let app = router(test_state());

        let (status, body) = post_json(
            &app,
            "/api/ps_submission",
            json!({"title": "T", "description": "  ", "outcomes": "O"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title, description, and outcomes are required");

        let mut long = submission();
        long["title"] = json!("x".repeat(201));
        let (status, body) = post_json(&app, "/api/ps_submission", long).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Title too long (max 200 characters)");

        let mut unknown = submission();
        unknown["llm_provider"] = json!("claude");
        let (status, _) = post_json(&app, "/api/ps_submission", unknown).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_reports_every_removed_record() {
        let app = router(test_state());
        let (_, body) = post_json(&app, "/api/ps_submission", submission()).await;
        let id = body["ps_id"].as_str().unwrap().to_string();

        let (status, body) = delete(&app, &format!("/api/problem_statements/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Problem statement 'Fraud detection' deleted");
        assert_eq!(
            body["deleted_from"],
            json!(["problem_statements", "ps_analysis_openai", "ps_embeddings"])
        );

        let (status, body) = get(&app, &format!("/api/problem_statements/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Problem statement not found");
        let (status, _) = delete(&app, &format!("/api/problem_statements/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
