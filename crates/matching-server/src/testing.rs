//! Deterministic fakes for the LLM seams and a ready-made application state.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use matching_common::embedding::EmbedRole;
use matching_common::error::CommonError;
use matching_common::llm::{ChatModel, LlmRegistry, TextEmbedder, WebSearcher};
use matching_common::openai::LlmError;
use matching_common::provider::Provider;

use crate::config::Config;
use crate::state::AppState;
use crate::store::MemoryRepository;

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

pub struct ScriptedChat {
    respond: Responder,
    calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(respond: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers analysis prompts; anything else fails.
    pub fn analysis_only() -> Self {
        Self::new(|prompt| {
            analysis_reply(prompt).ok_or(LlmError::MissingContent("choices[0].message.content"))
        })
    }

    /// Answers analysis prompts and scores every evaluated vendor 80/70/60/50 on the default
    /// criteria.
    pub fn standard() -> Self {
        Self::new(|prompt| {
            if let Some(reply) = analysis_reply(prompt) {
                return Ok(reply);
            }
            let names = vendor_names(prompt);
            let items: Vec<Value> = names
                .iter()
                .map(|name| {
                    json!({
                        "name": name,
                        "domain_fit": 80,
                        "tools_stack_fit": 70,
                        "experience": 60,
                        "scalability": 50,
                        "justification": format!("{name} fits."),
                        "strengths": ["Relevant experience"],
                        "concerns": ["Pricing unknown"]
                    })
                })
                .collect();
            Ok(Value::Array(items).to_string())
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn analysis_reply(prompt: &str) -> Option<String> {
    if prompt.starts_with("Analyze this problem statement") {
        let domain = if prompt.to_lowercase().contains("vision") {
            "Computer Vision"
        } else {
            "NLP"
        };
        Some(
            json!({
                "primary_technical_domains": [domain],
                "required_tools_or_frameworks": ["PyTorch"],
                "key_technical_requirements": ["real-time"],
                "deployment_constraints": "cloud",
                "project_complexity": "production"
            })
            .to_string(),
        )
    } else if prompt.starts_with("From this vendor profile") {
        let profile = prompt.to_lowercase();
        let domain = if profile.contains("vision") {
            "Computer Vision"
        } else {
            "NLP"
        };
        Some(json!({"technical_domains": [domain], "tools_and_frameworks": ["PyTorch"]}).to_string())
    } else {
        None
    }
}

/// Vendor names as they appear in an evaluation prompt (`"name": "..."`) or a web
/// evaluation prompt (`Name: ...`).
fn vendor_names(prompt: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in prompt.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("\"name\": \"") {
            if let Some(name) = rest.split('"').next() {
                if !name.starts_with('<') {
                    names.push(name.to_string());
                }
            }
        } else if let Some(name) = line.strip_prefix("Name: ") {
            names.push(name.to_string());
        }
    }
    names
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt)
    }
}

/// Bag-of-keywords embedding over a fixed vocabulary.
#[derive(Default)]
pub struct FakeEmbedder {
    calls: AtomicUsize,
}

impl FakeEmbedder {
    const VOCABULARY: [&'static str; 4] = ["nlp", "vision", "pytorch", "cloud"];

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextEmbedder for FakeEmbedder {
    async fn embed(&self, text: &str, _role: EmbedRole) -> Result<Vec<f32>, CommonError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = text.to_lowercase();
        Ok(Self::VOCABULARY
            .iter()
            .map(|word| text.matches(word).count() as f32)
            .collect())
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }
}

pub struct FakeSearcher {
    response: Option<Value>,
}

impl FakeSearcher {
    pub fn ok(response: Value) -> Self {
        Self {
            response: Some(response),
        }
    }

    pub fn failing() -> Self {
        Self { response: None }
    }
}

#[async_trait]
impl WebSearcher for FakeSearcher {
    async fn search(&self, _prompt: &str) -> Result<Value, LlmError> {
        self.response
            .clone()
            .ok_or(LlmError::MissingContent("output"))
    }
}

pub fn state_with(chat: Arc<dyn ChatModel>, searcher: FakeSearcher) -> Arc<AppState> {
    let llms = Provider::ALL
        .into_iter()
        .fold(LlmRegistry::new(), |registry, provider| {
            registry.with(provider, Arc::clone(&chat))
        });
    Arc::new(AppState {
        config: Config::default(),
        repo: Arc::new(MemoryRepository::new()),
        llms,
        embedder: Arc::new(FakeEmbedder::default()),
        searcher: Arc::new(searcher),
    })
}

pub fn test_state() -> Arc<AppState> {
    state_with(
        Arc::new(ScriptedChat::standard()),
        FakeSearcher::failing(),
    )
}
