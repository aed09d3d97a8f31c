pub mod api;
pub mod criteria;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod json_text;
pub mod llm;
pub mod openai;
pub mod provider;
