//! Prompt translation side-pass.
//!
//! Generation models want English prompts; users write in whatever
//! language they think in. When a prompt contains CJK script and
//! translation is enabled, the model input becomes the English
//! translation while the stored row and result payload keep the
//! original. Translation failures fall back to the original text rather
//! than failing the job.

use std::sync::OnceLock;

use super::runner::RunnerClient;

fn cjk_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"[\p{Hangul}\p{Han}\p{Hiragana}\p{Katakana}]")
            .expect("CJK pattern is valid")
    })
}

/// Whether the text contains Hangul, Han, Hiragana or Katakana script.
pub fn contains_cjk(text: &str) -> bool {
    cjk_regex().is_match(text)
}

pub struct TranslatePipeline {
    runner: RunnerClient,
    model: String,
    enabled: bool,
}

impl TranslatePipeline {
    pub fn new(runner: RunnerClient, model: String, enabled: bool) -> Self {
        Self {
            runner,
            model,
            enabled,
        }
    }

    /// Returns the text to feed the model and whether it was translated.
    pub async fn translate(&self, text: &str) -> (String, bool) {
        if !self.enabled || !contains_cjk(text) {
            return (text.to_string(), false);
        }

        match self
            .runner
            .invoke_text(
                "translate",
                &self.model,
                serde_json::json!({ "text": text, "target_language": "en" }),
            )
            .await
        {
            Ok(translated) => {
                tracing::info!("Translated prompt for model input");
                (translated, true)
            }
            Err(e) => {
                tracing::error!("Translation failed, using original text: {}", e);
                (text.to_string(), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cjk_detection() {
        assert!(contains_cjk("고양이"));
        assert!(contains_cjk("猫が好き"));
        assert!(contains_cjk("カタカナ"));
        assert!(contains_cjk("a cat with 한글 inside"));
        assert!(!contains_cjk("a cat"));
        assert!(!contains_cjk(""));
        assert!(!contains_cjk("émoji ✨ ünïcode"));
    }
}
