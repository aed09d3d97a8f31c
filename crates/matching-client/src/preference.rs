/// The user's LLM provider choice, persisted between runs.
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use matching_common::provider::Provider;

use crate::error::ClientError;

const APP_DIR: &str = "vendor-matching";
const FILE_NAME: &str = "preferences.json";

pub trait PreferenceStore: Send + Sync {
    fn load(&self) -> Result<Option<Provider>, ClientError>;
    fn save(&self, provider: Provider) -> Result<(), ClientError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PreferenceFile {
    llm_provider: String,
}

/// `preferences.json` under the user's config directory.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_CONFIG_HOME/vendor-matching/preferences.json` or the platform equivalent.
    pub fn default_location() -> Result<Self, ClientError> {
        let dir = dirs::config_dir().ok_or_else(|| {
            ClientError::Preference("cannot determine the user config directory".to_string())
        })?;
        Ok(Self::new(dir.join(APP_DIR).join(FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    /// A missing file is no preference; an unknown provider name is ignored with a warning.
    fn load(&self) -> Result<Option<Provider>, ClientError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: PreferenceFile = serde_json::from_str(&raw)?;
        match file.llm_provider.parse::<Provider>() {
            Ok(provider) => Ok(Some(provider)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring stored provider");
                Ok(None)
            }
        }
    }

    fn save(&self, provider: Provider) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = PreferenceFile {
            llm_provider: provider.as_str().to_string(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

type OnChange = Box<dyn Fn(Provider) + Send + Sync>;

/// The selected provider, created once at startup and passed to whatever needs it.
///
/// Every change is saved to the store and reported to the callback.
pub struct ProviderPreference {
    current: Mutex<Provider>,
    store: Box<dyn PreferenceStore>,
    on_change: Option<OnChange>,
}

impl ProviderPreference {
    /// Read the stored choice (OpenAI when there is none) and hand it to `on_change` so the
    /// caller applies it on startup.
    pub fn load(
        store: impl PreferenceStore + 'static,
        on_change: Option<OnChange>,
    ) -> Result<Self, ClientError> {
        let provider = store.load()?.unwrap_or(Provider::OpenAi);
        info!(%provider, "provider preference loaded");
        if let Some(callback) = &on_change {
            callback(provider);
        }
        Ok(Self {
            current: Mutex::new(provider),
            store: Box::new(store),
            on_change,
        })
    }

    pub fn current(&self) -> Provider {
        *self.current.lock()
    }

    pub fn set(&self, provider: Provider) -> Result<(), ClientError> {
        {
            let mut current = self.current.lock();
            if *current == provider {
                return Ok(());
            }
            self.store.save(provider)?;
            *current = provider;
        }
        info!(%provider, "provider preference changed");
        if let Some(callback) = &self.on_change {
            callback(provider);
        }
        Ok(())
    }

    /// Set from a user-supplied name; unknown names are a validation error.
    pub fn set_named(&self, name: &str) -> Result<(), ClientError> {
        let provider = name
            .parse::<Provider>()
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        self.set(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<Provider>>>, OnChange) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |p| sink.lock().push(p)))
    }

    #[test]
    fn defaults_to_openai_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path().join("nested").join(FILE_NAME));
        let (seen, callback) = recorder();

        let preference = ProviderPreference::load(store, Some(callback)).unwrap();
        assert_eq!(preference.current(), Provider::OpenAi);
        assert_eq!(*seen.lock(), vec![Provider::OpenAi]);
    }

    #[test]
    fn changes_persist_and_reapply_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FILE_NAME);

        let preference = ProviderPreference::load(FilePreferenceStore::new(&path), None).unwrap();
        preference.set_named("Gemini").unwrap();
        assert_eq!(preference.current(), Provider::Gemini);
        assert!(matches!(
            preference.set_named("claude"),
            Err(ClientError::Validation(_))
        ));

        let (seen, callback) = recorder();
        let reloaded = ProviderPreference::load(FilePreferenceStore::new(&path), Some(callback)).unwrap();
        assert_eq!(reloaded.current(), Provider::Gemini);
        assert_eq!(*seen.lock(), vec![Provider::Gemini]);

        reloaded.set(Provider::Gemini).unwrap();
        reloaded.set(Provider::Ollama).unwrap();
        assert_eq!(*seen.lock(), vec![Provider::Gemini, Provider::Ollama]);
    }

    #[test]
    fn unknown_stored_provider_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, r#"{"llm_provider": "claude"}"#).unwrap();
        assert_eq!(FilePreferenceStore::new(&path).load().unwrap(), None);
    }
}
