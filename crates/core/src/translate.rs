//! Prompt translation seam.
//!
//! Generation modes accept prompts in the user's language and may need
//! them in English. The actual translation backend lives outside this
//! workspace; modes only see the [`Translator`] trait.

/// Translates prompt text from one language to another.
///
/// Implementations must never fail loudly: on error they return the
/// input unchanged so a generation can still go ahead.
pub trait Translator: Send + Sync {
    fn translate(&self, text: &str) -> String;
}

/// Returns text unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Translator for Passthrough {
    fn translate(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Which translator the process was configured with.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Backend name from `TRANSLATOR` (default `none`).
    pub backend: String,
    /// Source language code from `SOURCE_LANG` (default `ru`).
    pub source_lang: String,
    /// Target language code from `TARGET_LANG` (default `en`).
    pub target_lang: String,
}

impl TranslatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            backend: lookup("TRANSLATOR").unwrap_or_else(|| "none".into()),
            source_lang: lookup("SOURCE_LANG").unwrap_or_else(|| "ru".into()),
            target_lang: lookup("TARGET_LANG").unwrap_or_else(|| "en".into()),
        }
    }

    /// Build the configured translator.
    ///
    /// Only the pass-through backend ships with this workspace; any other
    /// name logs a warning and falls back to it.
    pub fn build(&self) -> Box<dyn Translator> {
        match self.backend.as_str() {
            "none" | "passthrough" => {}
            other => {
                tracing::warn!(
                    backend = %other,
                    source_lang = %self.source_lang,
                    target_lang = %self.target_lang,
                    "Translator backend not available, prompts will be sent as written",
                );
            }
        }
        Box::new(Passthrough)
    }
}
