/// Client-side pieces of the vendor matching service.
///
/// [`api::ApiClient`] speaks the server's HTTP API. A [`session::MatchingSession`] holds what a
/// user has selected and typed, validates criteria before anything is sent, and runs matching and
/// web search requests through a [`lifecycle::RequestLifecycle`] so a newer request of the same
/// kind cancels the older one.
pub mod api;
pub mod error;
pub mod lifecycle;
pub mod preference;
pub mod render;
pub mod session;
