/// Form state for one user: the selected problem statement, the criteria being edited and the
/// results of the last matching and web search runs.
///
/// Nothing is sent while the criteria fail validation. A run of either kind supersedes the
/// previous run of that kind, and selecting a different problem statement cancels both. A
/// cancelled run leaves no trace in the state: no result, no error, and the loading flag is
/// cleared only if no newer run owns it.
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use matching_common::api::{
    EvaluationParam, MatchRequest, MatchResponse, WebSearchRequest, WebSearchResponse,
    DEFAULT_BATCH_SIZE, DEFAULT_SEARCH_COUNT, DEFAULT_TOP_K,
};
use matching_common::criteria::{
    default_criteria, normalize_weights, validate_criteria, Criterion, WeightUnit,
};

use crate::api::MatchingBackend;
use crate::error::ClientError;
use crate::lifecycle::{OperationKind, Outcome, RequestLifecycle, RequestTicket};
use crate::preference::ProviderPreference;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationState {
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub selected_ps: Option<String>,
    /// Repository matching criteria, fraction weights.
    pub criteria: Vec<Criterion>,
    /// Web search parameters, percent weights.
    pub search_criteria: Vec<Criterion>,
    pub top_k: i64,
    pub batch_size: i64,
    pub search_count: i64,
    pub matching: OperationState,
    pub web_search: OperationState,
    pub match_results: Option<MatchResponse>,
    pub web_results: Option<WebSearchResponse>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            selected_ps: None,
            criteria: default_criteria(WeightUnit::Fraction),
            search_criteria: default_criteria(WeightUnit::Percent),
            top_k: DEFAULT_TOP_K,
            batch_size: DEFAULT_BATCH_SIZE,
            search_count: DEFAULT_SEARCH_COUNT,
            matching: OperationState::default(),
            web_search: OperationState::default(),
            match_results: None,
            web_results: None,
        }
    }
}

impl SessionState {
    pub fn operation(&self, kind: OperationKind) -> &OperationState {
        match kind {
            OperationKind::RepositoryMatch => &self.matching,
            OperationKind::WebSearch => &self.web_search,
        }
    }

    fn operation_mut(&mut self, kind: OperationKind) -> &mut OperationState {
        match kind {
            OperationKind::RepositoryMatch => &mut self.matching,
            OperationKind::WebSearch => &mut self.web_search,
        }
    }

    fn criteria_for(&self, kind: OperationKind) -> (&[Criterion], WeightUnit) {
        match kind {
            OperationKind::RepositoryMatch => (&self.criteria, WeightUnit::Fraction),
            OperationKind::WebSearch => (&self.search_criteria, WeightUnit::Percent),
        }
    }

    /// Why a run of `kind` cannot be submitted right now, if anything.
    pub fn submission_blocker(&self, kind: OperationKind) -> Option<String> {
        if self.selected_ps.is_none() {
            return Some("Please select a problem statement".to_string());
        }
        let (criteria, unit) = self.criteria_for(kind);
        validate_criteria(criteria, unit).err().map(|e| e.to_string())
    }

    pub fn can_submit(&self, kind: OperationKind) -> bool {
        self.submission_blocker(kind).is_none()
    }
}

pub struct MatchingSession {
    backend: Arc<dyn MatchingBackend>,
    preference: Arc<ProviderPreference>,
    lifecycle: RequestLifecycle,
    state: Mutex<SessionState>,
}

/// Clears the loading flag when a run ends, however it ends, unless a newer run of the same
/// kind has taken over.
struct LoadingGuard<'a> {
    session: &'a MatchingSession,
    ticket: &'a RequestTicket,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.session.state.lock();
        if self.session.lifecycle.is_current(self.ticket) {
            state.operation_mut(self.ticket.kind()).loading = false;
            self.session.lifecycle.finish(self.ticket);
        }
    }
}

impl MatchingSession {
    pub fn new(backend: Arc<dyn MatchingBackend>, preference: Arc<ProviderPreference>) -> Self {
        Self {
            backend,
            preference,
            lifecycle: RequestLifecycle::new(),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Switch problem statements. Pending runs of both kinds are cancelled and old results
    /// cleared.
    pub fn select_problem_statement(&self, ps_id: Option<String>) {
        let mut state = self.state.lock();
        self.lifecycle.cancel_all();
        state.selected_ps = ps_id.filter(|id| !id.trim().is_empty());
        state.match_results = None;
        state.web_results = None;
        for kind in OperationKind::ALL {
            *state.operation_mut(kind) = OperationState::default();
        }
    }

    pub fn set_criteria(&self, criteria: Vec<Criterion>) {
        self.state.lock().criteria = criteria.into_iter().map(Criterion::with_derived_key).collect();
    }

    pub fn set_search_params(&self, params: &[EvaluationParam]) {
        self.state.lock().search_criteria = params.iter().map(Criterion::from).collect();
    }

    pub fn set_limits(&self, top_k: i64, batch_size: i64, search_count: i64) {
        let mut state = self.state.lock();
        state.top_k = top_k;
        state.batch_size = batch_size;
        state.search_count = search_count;
    }

    /// Rescale both criteria lists so their weights hit the target exactly.
    pub fn normalize_criteria(&self) {
        let mut state = self.state.lock();
        state.criteria = normalize_weights(&state.criteria, WeightUnit::Fraction);
        state.search_criteria = normalize_weights(&state.search_criteria, WeightUnit::Percent);
    }

    /// Either the blocker message, or the selected problem statement id.
    fn check_submission(&self, kind: OperationKind) -> Result<(SessionState, String), ClientError> {
        let mut state = self.state.lock();
        match (state.submission_blocker(kind), state.selected_ps.clone()) {
            (None, Some(ps_id)) => Ok((state.clone(), ps_id)),
            (blocker, _) => {
                let message =
                    blocker.unwrap_or_else(|| "Please select a problem statement".to_string());
                state.operation_mut(kind).error = Some(message.clone());
                Err(ClientError::Validation(message))
            }
        }
    }

    /// Score the repository's vendors against the selected problem statement.
    pub async fn run_matching(&self) -> Result<Outcome<()>, ClientError> {
        let kind = OperationKind::RepositoryMatch;
        let (state, ps_id) = self.check_submission(kind)?;
        let request = MatchRequest {
            ps_id,
            top_k: state.top_k,
            batch_size: state.batch_size,
            llm_provider: Some(self.preference.current().as_str().to_string()),
            criteria: state.criteria,
        };
        self.run(kind, self.backend.match_vendors(&request), |state, response| {
            state.match_results = Some(response);
        })
        .await
    }

    /// Search the web for vendors matching the selected problem statement.
    pub async fn run_web_search(&self) -> Result<Outcome<()>, ClientError> {
        let kind = OperationKind::WebSearch;
        let (state, ps_id) = self.check_submission(kind)?;
        let request = WebSearchRequest {
            ps_id,
            count: state.search_count,
            llm_provider: Some(self.preference.current().as_str().to_string()),
            evaluation_params: Some(state.search_criteria.iter().map(Into::into).collect()),
        };
        self.run(kind, self.backend.web_search(&request), |state, response| {
            state.web_results = Some(response);
        })
        .await
    }

    /// Cancel the pending run of `kind`, if any.
    pub fn cancel(&self, kind: OperationKind) {
        let mut state = self.state.lock();
        self.lifecycle.cancel(kind);
        state.operation_mut(kind).loading = false;
    }

    async fn run<T, F>(
        &self,
        kind: OperationKind,
        call: F,
        apply: impl FnOnce(&mut SessionState, T),
    ) -> Result<Outcome<()>, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let ticket = {
            let mut state = self.state.lock();
            let ticket = self.lifecycle.begin(kind);
            let operation = state.operation_mut(kind);
            operation.loading = true;
            operation.error = None;
            ticket
        };
        let _guard = LoadingGuard {
            session: self,
            ticket: &ticket,
        };

        let result = match ticket.run(call).await {
            Outcome::Completed(result) => result,
            Outcome::Cancelled => {
                debug!(kind = kind.as_str(), generation = ticket.generation(), "request cancelled");
                return Ok(Outcome::Cancelled);
            }
        };

        // A newer run or a cancel may have landed after the call finished.
        let mut state = self.state.lock();
        if !self.lifecycle.is_current(&ticket) {
            debug!(kind = kind.as_str(), generation = ticket.generation(), "discarding superseded result");
            return Ok(Outcome::Cancelled);
        }
        match result {
            Ok(value) => {
                apply(&mut state, value);
                Ok(Outcome::Completed(()))
            }
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "request failed");
                state.operation_mut(kind).error = Some(e.user_message());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use matching_common::api::{CacheStats, ProblemStatementRecord};
    use matching_common::provider::Provider;

    use crate::preference::PreferenceStore;

    fn record(id: &str) -> ProblemStatementRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": "Support triage",
            "description": "d",
            "outcomes": "o",
            "full_statement": "f",
            "created_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap()
    }

    struct NoStore;

    impl PreferenceStore for NoStore {
        fn load(&self) -> Result<Option<Provider>, ClientError> {
            Ok(Some(Provider::Gemini))
        }

        fn save(&self, _provider: Provider) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// Call `n` (1-based) sleeps `delays[n - 1]` and reports `n` as `total_vendors_analyzed`.
    struct SlowBackend {
        delays: Vec<Duration>,
        fail: bool,
        calls: AtomicUsize,
        last_provider: Mutex<Option<String>>,
    }

    impl SlowBackend {
        fn new(delays: &[u64]) -> Self {
            Self {
                delays: delays.iter().map(|ms| Duration::from_millis(*ms)).collect(),
                fail: false,
                calls: AtomicUsize::new(0),
                last_provider: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[5, 100])
            }
        }

        async fn call(&self) -> Result<usize, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.delays.get(n - 1).copied().unwrap_or_default();
            tokio::time::sleep(delay).await;
            if self.fail {
                return Err(ClientError::Api {
                    status: 500,
                    message: "internal server error".to_string(),
                });
            }
            Ok(n)
        }
    }

    #[async_trait]
    impl MatchingBackend for SlowBackend {
        async fn match_vendors(&self, request: &MatchRequest) -> Result<MatchResponse, ClientError> {
            *self.last_provider.lock() = request.llm_provider.clone();
            let n = self.call().await?;
            Ok(MatchResponse {
                problem_statement: record(&request.ps_id),
                results: Vec::new(),
                total_vendors_analyzed: n,
                shortlisted_vendors: 0,
                top_composite_score: 0.0,
                cache_stats: CacheStats::default(),
                llm_provider: Provider::Gemini,
            })
        }

        async fn web_search(
            &self,
            request: &WebSearchRequest,
        ) -> Result<WebSearchResponse, ClientError> {
            let n = self.call().await?;
            Ok(WebSearchResponse {
                problem_statement_id: request.ps_id.clone(),
                llm_provider: Provider::Gemini,
                total_found: n,
                sources_count: 0,
                top_score: 0.0,
                vendors: Vec::new(),
                evaluation_params: request.evaluation_params.clone().unwrap_or_default(),
                message: None,
                search_results_preview: None,
            })
        }
    }

    fn session(backend: Arc<SlowBackend>) -> Arc<MatchingSession> {
        let preference = ProviderPreference::load(NoStore, None).unwrap();
        let session = MatchingSession::new(backend, Arc::new(preference));
        session.select_problem_statement(Some("ab12cd34".to_string()));
        Arc::new(session)
    }

    #[tokio::test(start_paused = true)]
    async fn second_match_supersedes_the_first() {
        let backend = Arc::new(SlowBackend::new(&[100, 10]));
        let session = session(backend.clone());

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.run_matching().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(session.state().matching.loading);

        let second = session.run_matching().await.unwrap();
        assert_eq!(second, Outcome::Completed(()));
        assert_eq!(first.await.unwrap().unwrap(), Outcome::Cancelled);

        let state = session.state();
        assert_eq!(state.match_results.unwrap().total_vendors_analyzed, 2);
        assert_eq!(state.matching, OperationState::default());
        assert_eq!(backend.last_provider.lock().as_deref(), Some("gemini"));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_run_does_not_clear_the_newer_loading_flag() {
        let backend = Arc::new(SlowBackend::new(&[100, 500]));
        let session = session(backend);

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.run_matching().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = tokio::spawn({
            let session = session.clone();
            async move { session.run_matching().await }
        });

        assert_eq!(first.await.unwrap().unwrap(), Outcome::Cancelled);
        assert!(session.state().matching.loading);

        assert_eq!(second.await.unwrap().unwrap(), Outcome::Completed(()));
        assert!(!session.state().matching.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_another_statement_cancels_both_kinds() {
        let backend = Arc::new(SlowBackend::new(&[100, 100]));
        let session = session(backend);

        let matching = tokio::spawn({
            let session = session.clone();
            async move { session.run_matching().await }
        });
        let search = tokio::spawn({
            let session = session.clone();
            async move { session.run_web_search().await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        session.select_problem_statement(Some("ffff0000".to_string()));

        assert_eq!(matching.await.unwrap().unwrap(), Outcome::Cancelled);
        assert_eq!(search.await.unwrap().unwrap(), Outcome::Cancelled);
        let state = session.state();
        assert!(state.match_results.is_none() && state.web_results.is_none());
        assert_eq!(state.matching, OperationState::default());
        assert_eq!(state.web_search, OperationState::default());
        assert_eq!(state.selected_ps.as_deref(), Some("ffff0000"));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shown_and_cancellations_are_not() {
        let session = session(Arc::new(SlowBackend::failing()));
        let err = session.run_web_search().await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 500, .. }));
        let state = session.state();
        assert_eq!(state.web_search.error.as_deref(), Some("internal server error"));
        assert!(!state.web_search.loading);

        let session2 = session.clone();
        let pending = tokio::spawn(async move { session2.run_matching().await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        session.cancel(OperationKind::RepositoryMatch);
        assert_eq!(pending.await.unwrap().unwrap(), Outcome::Cancelled);
        assert_eq!(session.state().matching, OperationState::default());
    }

    #[tokio::test]
    async fn result_landing_after_a_cancel_is_discarded_silently() {
        let session = session(Arc::new(SlowBackend::new(&[])));
        let kind = OperationKind::WebSearch;

        // The call finishes in the same poll that cancels it, so only the generation check
        // can tell the result is stale.
        let outcome = session
            .run(
                kind,
                async {
                    session.cancel(kind);
                    Ok::<_, ClientError>(7usize)
                },
                |state, _| state.operation_mut(kind).error = Some("applied".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(session.state().web_search, OperationState::default());

        let outcome = session
            .run(
                kind,
                async {
                    session.cancel(kind);
                    Err::<usize, _>(ClientError::Api {
                        status: 502,
                        message: "Web search failed".to_string(),
                    })
                },
                |_, _| {},
            )
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(session.state().web_search, OperationState::default());
    }

    #[tokio::test]
    async fn invalid_criteria_block_submission() {
        let backend = Arc::new(SlowBackend::new(&[]));
        let session = session(backend.clone());
        session.set_criteria(vec![
            Criterion::new("Domain Fit", 0.3),
            Criterion::new("Tools/Stack Fit", 0.4),
            Criterion::new("Experience", 0.2),
            Criterion::new("Scalability", 0.15),
        ]);

        assert!(!session.state().can_submit(OperationKind::RepositoryMatch));
        let err = session.run_matching().await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(session.state().matching.error.is_some());

        session.normalize_criteria();
        let weights: Vec<f64> = session.state().criteria.iter().map(|c| c.weight).collect();
        for (w, expected) in weights.iter().zip([0.286, 0.381, 0.190, 0.143]) {
            assert!((w - expected).abs() < 1e-9);
        }
        assert!(session.state().can_submit(OperationKind::RepositoryMatch));
        assert_eq!(session.run_matching().await.unwrap(), Outcome::Completed(()));
    }

    #[tokio::test]
    async fn nothing_is_sent_without_a_selection() {
        let backend = Arc::new(SlowBackend::new(&[]));
        let session = session(backend.clone());
        session.select_problem_statement(None);

        let err = session.run_web_search().await.unwrap_err();
        assert_eq!(err.to_string(), "Please select a problem statement");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
