/// Typed HTTP client for the matching server.
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use matching_common::api::{
    Dashboard, DeleteResponse, ErrorBody, Health, MatchRequest, MatchResponse, MessageResponse,
    ProblemStatementDetail, ProblemStatementSubmission, ProblemStatementSummary,
    SubmissionResponse, VendorDetail, VendorList, WebSearchRequest, WebSearchResponse,
};
use matching_common::provider::Provider;

use crate::error::ClientError;

/// The two long-running operations a session issues.
#[async_trait]
pub trait MatchingBackend: Send + Sync {
    async fn match_vendors(&self, request: &MatchRequest) -> Result<MatchResponse, ClientError>;
    async fn web_search(&self, request: &WebSearchRequest)
        -> Result<WebSearchResponse, ClientError>;
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Validation(format!("invalid server URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "invalid server URL: {base_url}"
            )));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    /// `/api/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str], provider: Option<Provider>) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Validation(format!("invalid server URL: {}", self.base_url)))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        if let Some(provider) = provider {
            url.query_pairs_mut()
                .append_pair("llm_provider", provider.as_str());
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        provider: Option<Provider>,
    ) -> Result<T, ClientError> {
        let url = self.url(segments, provider)?;
        debug!(%url, "GET");
        self.send(self.http.get(url)).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ClientError> {
        let url = self.url(segments, None)?;
        debug!(%url, "POST");
        self.send(self.http.post(url).json(body)).await
    }

    async fn delete<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let url = self.url(segments, None)?;
        debug!(%url, "DELETE");
        self.send(self.http.delete(url)).await
    }

    /// Health is reported with a 503 when the store is down; both carry a [`Health`] body.
    pub async fn health(&self) -> Result<Health, ClientError> {
        let response = self.http.get(self.url(&["health"], None)?).send().await?;
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<Health>(&body) {
            Ok(health) => Ok(health),
            Err(_) if !status.is_success() => Err(api_error(status, &body)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn dashboard(&self) -> Result<Dashboard, ClientError> {
        self.get(&["dashboard"], None).await
    }

    pub async fn clear_cache(&self) -> Result<MessageResponse, ClientError> {
        self.post(&["clear_cache"], &serde_json::json!({})).await
    }

    pub async fn submit_problem_statement(
        &self,
        submission: &ProblemStatementSubmission,
    ) -> Result<SubmissionResponse, ClientError> {
        self.post(&["ps_submission"], submission).await
    }

    pub async fn problem_statements(
        &self,
        provider: Provider,
    ) -> Result<Vec<ProblemStatementSummary>, ClientError> {
        self.get(&["problem_statements"], Some(provider)).await
    }

    pub async fn problem_statement(
        &self,
        id: &str,
        provider: Provider,
    ) -> Result<ProblemStatementDetail, ClientError> {
        self.get(&["problem_statements", id], Some(provider)).await
    }

    pub async fn delete_problem_statement(&self, id: &str) -> Result<DeleteResponse, ClientError> {
        self.delete(&["problem_statements", id]).await
    }

    pub async fn submit_vendor(
        &self,
        name: &str,
        filename: &str,
        contents: Vec<u8>,
        provider: Provider,
    ) -> Result<SubmissionResponse, ClientError> {
        let file = reqwest::multipart::Part::bytes(contents).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("vendor_name", name.to_string())
            .text("llm_provider", provider.as_str())
            .part("file", file);
        let url = self.url(&["vendor_submission"], None)?;
        debug!(%url, vendor = name, "POST multipart");
        self.send(self.http.post(url).multipart(form)).await
    }

    pub async fn vendors(&self, provider: Provider) -> Result<VendorList, ClientError> {
        self.get(&["vendors"], Some(provider)).await
    }

    pub async fn vendor(&self, name: &str, provider: Provider) -> Result<VendorDetail, ClientError> {
        self.get(&["vendors", name], Some(provider)).await
    }

    pub async fn delete_vendor(&self, name: &str) -> Result<DeleteResponse, ClientError> {
        self.delete(&["vendors", name]).await
    }

    /// The CSV export, as text.
    pub async fn download_results(
        &self,
        ps_id: &str,
        provider: Provider,
    ) -> Result<String, ClientError> {
        let url = self.url(&["download_results", ps_id], Some(provider))?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(api_error(status, &body))
        }
    }
}

#[async_trait]
impl MatchingBackend for ApiClient {
    async fn match_vendors(&self, request: &MatchRequest) -> Result<MatchResponse, ClientError> {
        self.post(&["vendor_matching"], request).await
    }

    async fn web_search(
        &self,
        request: &WebSearchRequest,
    ) -> Result<WebSearchResponse, ClientError> {
        self.post(&["web_search_vendors"], request).await
    }
}

/// Prefer the server's `{error, details}` body; fall back to the raw text.
fn api_error(status: StatusCode, body: &str) -> ClientError {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorBody { error, .. }) => error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}
