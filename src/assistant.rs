//! Explain / follow-up / save orchestration on top of the intake session.
//!
//! ```text
//! IntakeSession::take ──▶ encode (blocking) ──▶ llm::generate ──▶ clean_answer
//!                                                                    │
//!                                          NoteStore::insert ◀── save_note
//! ```
//!
//! The raster is taken out of the session before the request is sent, so its
//! buffer is released as soon as it has been encoded.

use crate::config::{Language, StudyConfig, DEFAULT_MODEL};
use crate::error::StudyError;
use crate::notes::{NewNote, NoteStore, SavedNote};
use crate::pipeline::{encode, llm, postprocess};
use crate::prompts;
use crate::session::{CompositeRaster, IntakeSession, RasterInfo};
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// A cleaned answer and where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// The prompt as typed, before language wrapping.
    pub prompt: String,
    pub answer: String,
    pub language: Language,
    /// Raster the answer is about; `None` for text-only questions.
    pub source: Option<RasterInfo>,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

pub struct Assistant {
    provider: Arc<dyn LLMProvider>,
    config: StudyConfig,
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("provider", &"<dyn LLMProvider>")
            .field("config", &self.config)
            .finish()
    }
}

impl Assistant {
    /// Resolve the provider from `config` and the environment.
    pub fn from_config(config: StudyConfig) -> Result<Self, StudyError> {
        let provider = resolve_provider(&config)?;
        Ok(Self { provider, config })
    }

    pub fn with_provider(provider: Arc<dyn LLMProvider>, config: StudyConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    /// Explain the session's current selection.
    ///
    /// The raster is handed off (the session becomes empty) before the call;
    /// fails with [`StudyError::NoSelection`] if there is nothing to explain.
    pub async fn explain_selection(
        &self,
        session: &IntakeSession,
        prompt: Option<&str>,
    ) -> Result<Explanation, StudyError> {
        let raster = session.take().ok_or(StudyError::NoSelection)?;
        self.explain(Some(raster), prompt).await
    }

    /// Ask about `raster`, or a text-only question when it is `None`.
    ///
    /// An empty prompt falls back to [`prompts::DEFAULT_PROMPT`]. The
    /// generation call is made once; its failure is returned unchanged.
    pub async fn explain(
        &self,
        raster: Option<CompositeRaster>,
        prompt: Option<&str>,
    ) -> Result<Explanation, StudyError> {
        let prompt = prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(prompts::DEFAULT_PROMPT)
            .to_string();
        let source = raster.as_ref().map(CompositeRaster::info);

        let image = match raster {
            Some(raster) => Some(encode_off_thread(raster).await?),
            None => None,
        };

        let full_prompt = prompts::with_language(&prompt, self.config.language);
        info!(
            "Explaining {} in {}",
            source
                .as_ref()
                .map(|s| s.source_file_name.as_str())
                .unwrap_or("text prompt"),
            self.config.language
        );
        let generation = llm::generate(&self.provider, &full_prompt, image, &self.config).await?;

        Ok(Explanation {
            prompt,
            answer: answer_or_fallback(&generation.text),
            language: self.config.language,
            source,
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
            duration_ms: generation.duration_ms,
        })
    }

    /// Ask a question about an earlier answer. Text only.
    pub async fn follow_up(&self, explanation: &str, question: &str) -> Result<String, StudyError> {
        let question = non_empty_question(question)?;
        let prompt = prompts::follow_up(explanation, question);
        self.ask_text(&prompt, self.config.language).await
    }

    /// Ask a question about a saved note, answered in the note's language.
    pub async fn ask_about_note(&self, note: &SavedNote, question: &str) -> Result<String, StudyError> {
        let question = non_empty_question(question)?;
        let language = Language::parse(&note.language).unwrap_or(self.config.language);
        debug!("Question about note {} in {language}", note.id);
        let prompt = prompts::follow_up_on_note(&note.content, question);
        self.ask_text(&prompt, language).await
    }

    async fn ask_text(&self, prompt: &str, language: Language) -> Result<String, StudyError> {
        let prompt = prompts::with_language(prompt, language);
        let generation = llm::generate(&self.provider, &prompt, None, &self.config).await?;
        Ok(answer_or_fallback(&generation.text))
    }

    /// Store `explanation` as a note stamped now.
    pub fn save_note(&self, store: &NoteStore, explanation: &Explanation) -> Result<i64, StudyError> {
        let note = note_from(explanation, chrono::Utc::now().timestamp_millis());
        store.insert(&note)
    }
}

fn note_from(explanation: &Explanation, timestamp: i64) -> NewNote {
    NewNote {
        title: prompts::note_title(&explanation.prompt),
        content: explanation.answer.clone(),
        timestamp,
        language: explanation.language.name().to_string(),
    }
}

fn non_empty_question(question: &str) -> Result<&str, StudyError> {
    let question = question.trim();
    if question.is_empty() {
        Err(StudyError::EmptyQuestion)
    } else {
        Ok(question)
    }
}

fn answer_or_fallback(raw: &str) -> String {
    let cleaned = postprocess::clean_answer(raw);
    if cleaned.is_empty() {
        prompts::NO_RESPONSE.to_string()
    } else {
        cleaned
    }
}

/// PNG encoding of a tall composite is CPU-heavy; keep it off the runtime.
async fn encode_off_thread(raster: CompositeRaster) -> Result<edgequake_llm::ImageData, StudyError> {
    tokio::task::spawn_blocking(move || {
        let data = encode::encode_raster(raster.image());
        debug!("Encoded {}, releasing raster", raster.source_file_name());
        data
    })
    .await
    .map_err(|e| StudyError::Internal(format!("encode task panicked: {e}")))?
    .map_err(|e| StudyError::Internal(format!("image encoding failed: {e}")))
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, StudyError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        StudyError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`, `config.model`).
/// 3. **Environment pair** (`STUDYDESK_LLM_PROVIDER` + `STUDYDESK_MODEL`),
///    honoured only when both are set.
/// 4. **Auto-detection**: Gemini when `GEMINI_API_KEY` is set, otherwise
///    [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &StudyConfig) -> Result<Arc<dyn LLMProvider>, StudyError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("STUDYDESK_LLM_PROVIDER"),
        std::env::var("STUDYDESK_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_vision_provider("gemini", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| StudyError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                 Set GEMINI_API_KEY, OPENAI_API_KEY, or pass --provider.\n\
                 Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}
