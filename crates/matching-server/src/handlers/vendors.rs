use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use tracing::info;

use matching_common::api::{
    DeleteResponse, SubmissionResponse, VendorDetail, VendorList, VendorSummary,
};
use matching_common::provider::Provider;

use crate::documents::extract_text;
use crate::error::AppError;
use crate::handlers::ProviderQuery;
use crate::model::{sort_newest_first, EntityKind, Vendor};
use crate::state::AppState;

const MAX_NAME_CHARS: usize = 100;

#[derive(Default)]
struct Upload {
    vendor_name: Option<String>,
    file: Option<(String, Vec<u8>)>,
    llm_provider: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut upload = Upload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        match field.name() {
            Some("vendor_name") => {
                upload.vendor_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation(e.body_text()))?,
                );
            }
            Some("llm_provider") => {
                upload.llm_provider = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::validation(e.body_text()))?,
                );
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(e.body_text()))?;
                upload.file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }
    Ok(upload)
}

fn valid_name(name: &str) -> bool {
    name.chars().count() <= MAX_NAME_CHARS && !name.chars().any(|c| c == '/' || c.is_control())
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SubmissionResponse>, AppError> {
    let upload = read_upload(multipart).await?;
    let name = upload.vendor_name.as_deref().map(str::trim).unwrap_or_default();
    let Some((filename, bytes)) = upload.file.filter(|_| !name.is_empty()) else {
        return Err(AppError::validation("Vendor name and file are required"));
    };
    if !valid_name(name) {
        return Err(AppError::validation("Invalid vendor name (max 100 characters)"));
    }

    let provider = state.body_provider(upload.llm_provider.as_deref())?;
    let analyzer = state.analyzer(provider)?;
    let text = extract_text(&filename, bytes, state.config.max_file_size).await?;

    let mut vendor = Vendor::new(name, text);
    if let Some(existing) = state.repo.get_vendor(name).await? {
        vendor.created_at = existing.created_at;
    }
    state.repo.put_vendor(&vendor).await?;
    info!(vendor = %name, file = %filename, chars = vendor.text_len(), "vendor stored");

    analyzer.vendor(&vendor).await?;

    Ok(Json(SubmissionResponse {
        message: format!("Vendor '{name}' onboarded successfully!"),
        ps_id: None,
        llm_provider: provider,
    }))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<VendorList>, AppError> {
    let provider = query.provider();
    let mut vendors = state.repo.list_vendors().await?;
    sort_newest_first(&mut vendors, |v| v.created_at);

    let mut summaries = Vec::with_capacity(vendors.len());
    for vendor in &vendors {
        let hash = vendor.content_hash();
        summaries.push(VendorSummary {
            name: vendor.name.clone(),
            text_preview: vendor.text_preview(),
            full_text_length: vendor.text_len(),
            capabilities: state
                .repo
                .get_analysis(EntityKind::Vendor, provider, &hash)
                .await?,
            has_embedding: state
                .repo
                .get_embedding(EntityKind::Vendor, &hash)
                .await?
                .is_some(),
        });
    }

    Ok(Json(VendorList {
        total: summaries.len(),
        vendors: summaries,
        llm_provider: provider,
    }))
}

pub async fn detail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> Result<Json<VendorDetail>, AppError> {
    let provider = query.provider();
    let vendor = find(&state, &name).await?;
    let hash = vendor.content_hash();
    let capabilities = state
        .repo
        .get_analysis(EntityKind::Vendor, provider, &hash)
        .await?;
    let embedding = state.repo.get_embedding(EntityKind::Vendor, &hash).await?;

    Ok(Json(VendorDetail {
        text_length: vendor.text_len(),
        name: vendor.name,
        full_text: vendor.text,
        capabilities,
        has_embedding: embedding.is_some(),
        embedding_dimensions: embedding.map_or(0, |e| e.len()),
        llm_provider: provider,
    }))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let vendor = find(&state, &name).await?;
    let hash = vendor.content_hash();
    let kind = EntityKind::Vendor;

    let mut deleted_from = Vec::new();
    if state.repo.delete_vendor(&vendor.name).await? {
        deleted_from.push("vendors".to_string());
    }
    for provider in Provider::ALL {
        if state.repo.delete_analysis(kind, provider, &hash).await? {
            deleted_from.push(format!("vendor_capabilities_{provider}"));
        }
    }
    if state.repo.delete_embedding(kind, &hash).await? {
        deleted_from.push("vendor_embeddings".to_string());
    }
    info!(vendor = %vendor.name, ?deleted_from, "vendor deleted");

    Ok(Json(DeleteResponse {
        message: format!("Vendor '{}' deleted", vendor.name),
        deleted_from,
    }))
}

async fn find(state: &AppState, name: &str) -> Result<Vendor, AppError> {
    state
        .repo
        .get_vendor(name)
        .await?
        .ok_or_else(|| AppError::NotFound("Vendor not found".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::handlers::router;
    use crate::handlers::test_support::{delete, get, multipart, send};
    use crate::testing::test_state;

    const PROFILE: &[u8] = b"Acme builds NLP pipelines in PyTorch on the cloud.";

    #[tokio::test]
    async fn upload_text_profile() {
        let app = router(test_state());
        let request = multipart(
            &[("vendor_name", "Acme"), ("llm_provider", "gemini")],
            Some(("acme.txt", PROFILE)),
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Vendor 'Acme' onboarded successfully!");
        assert_eq!(body["llm_provider"], "gemini");
        assert!(body.get("ps_id").is_none());

        let (status, list) = get(&app, "/api/vendors?llm_provider=gemini").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        assert_eq!(list["llm_provider"], "gemini");
        assert_eq!(list["vendors"][0]["name"], "Acme");
        assert_eq!(list["vendors"][0]["full_text_length"], PROFILE.len());
        assert_eq!(list["vendors"][0]["capabilities"]["name"], "Acme");
        assert_eq!(list["vendors"][0]["has_embedding"], true);

        let (status, detail) = get(&app, "/api/vendors/Acme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["llm_provider"], "openai");
        assert_eq!(detail["capabilities"], serde_json::Value::Null);
        assert_eq!(detail["embedding_dimensions"], 4);
    }

    #[tokio::test]
    async fn upload_validation() {
        let app = router(test_state());

        let (status, body) = send(&app, multipart(&[("vendor_name", "Acme")], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Vendor name and file are required");

        let (status, body) =
            send(&app, multipart(&[("vendor_name", " ")], Some(("a.txt", PROFILE)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Vendor name and file are required");

        let long = "x".repeat(101);
        let (status, body) =
            send(&app, multipart(&[("vendor_name", &long)], Some(("a.txt", PROFILE)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid vendor name (max 100 characters)");

        let (status, body) =
            send(&app, multipart(&[("vendor_name", "Acme")], Some(("a.docx", PROFILE)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unsupported file type. Allowed: pdf, txt, md");

        let (status, body) =
            send(&app, multipart(&[("vendor_name", "Acme")], Some(("a.md", b"")))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "File is empty");
    }

    #[tokio::test]
    async fn delete_vendor_everywhere() {
        let app = router(test_state());
        send(
            &app,
            multipart(&[("vendor_name", "Acme")], Some(("acme.md", PROFILE))),
        )
        .await;

        let (status, body) = delete(&app, "/api/vendors/Acme").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["deleted_from"],
            json!(["vendors", "vendor_capabilities_openai", "vendor_embeddings"])
        );

        let (status, body) = get(&app, "/api/vendors/Acme").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Vendor not found");
    }
}
