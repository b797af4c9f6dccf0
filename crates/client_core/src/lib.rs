use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use shared::{
    domain::{Language, SessionId, TranscriptEntry, UnsupportedLanguage},
    protocol::{ChatRequest, ChatResponse, DiagnosisResponse},
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod summary;
pub mod transport;

pub use error::ExchangeError;
pub use transport::HttpBackend;

pub const GREETING: &str = "Hello! Ask me anything or switch languages from the globe icon.";
pub const NO_RESPONSE_FALLBACK: &str = "No response";
pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please try again.";
pub const IMAGE_UPLOADED_MESSAGE: &str = "Uploaded an image for crop diagnosis…";
pub const DIAGNOSIS_FAILED_MESSAGE: &str = "Image analysis failed. Please try a clear photo.";

const EVENT_CAPACITY: usize = 256;

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send_chat(&self, request: ChatRequest) -> Result<ChatResponse, ExchangeError>;
}

#[async_trait]
pub trait DiagnosisService: Send + Sync {
    async fn diagnose(&self, request: DiagnosisRequest)
        -> Result<DiagnosisResponse, ExchangeError>;
}

/// A photo picked by the user, read fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosisRequest {
    pub image: ImageUpload,
    /// Always sent empty; the service infers the plant.
    pub plant_type: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    EntryAppended(TranscriptEntry),
    BusyChanged(bool),
    LanguageChanged(Language),
}

/// How a submission settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Input was rejected locally; nothing was appended or sent.
    Ignored,
    Completed(TranscriptEntry),
    Failed(TranscriptEntry),
}

impl ExchangeOutcome {
    pub fn entry(&self) -> Option<&TranscriptEntry> {
        match self {
            ExchangeOutcome::Ignored => None,
            ExchangeOutcome::Completed(entry) | ExchangeOutcome::Failed(entry) => Some(entry),
        }
    }
}

struct ConversationState {
    language: Language,
    transcript: Vec<TranscriptEntry>,
    in_flight: usize,
}

/// Owns one conversation: its session id, transcript, language and busy flag.
///
/// The busy flag is cooperative. Submissions made while busy are still
/// served; callers are expected to check [`ConversationController::is_busy`]
/// and hold new submissions back until it clears.
pub struct ConversationController {
    session_id: SessionId,
    chat: Arc<dyn ChatService>,
    diagnosis: Arc<dyn DiagnosisService>,
    inner: Mutex<ConversationState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ConversationController {
    pub fn initialize(
        chat: Arc<dyn ChatService>,
        diagnosis: Arc<dyn DiagnosisService>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session_id = SessionId::generate();
        info!("session: initialized session={session_id}");
        Arc::new(Self {
            session_id,
            chat,
            diagnosis,
            inner: Mutex::new(ConversationState {
                language: Language::default(),
                transcript: vec![TranscriptEntry::assistant(GREETING)],
                in_flight: 0,
            }),
            events,
        })
    }

    /// Uses one backend for both services.
    pub fn with_backend<B>(backend: Arc<B>) -> Arc<Self>
    where
        B: ChatService + DiagnosisService + 'static,
    {
        let chat: Arc<dyn ChatService> = backend.clone();
        Self::initialize(chat, backend)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn language(&self) -> Language {
        self.state().language
    }

    pub fn is_busy(&self) -> bool {
        self.state().in_flight > 0
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.state().transcript.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Rejects codes outside the supported set and leaves the language as is.
    pub fn set_language(&self, code: &str) -> Result<Language, UnsupportedLanguage> {
        let language = code.parse::<Language>().inspect_err(|err| {
            debug!("session: rejected language change session={}: {err}", self.session_id);
        })?;
        self.select_language(language);
        Ok(language)
    }

    pub fn select_language(&self, language: Language) {
        let changed = {
            let mut state = self.state();
            std::mem::replace(&mut state.language, language) != language
        };
        if changed {
            info!(
                "session: language changed session={} language={language}",
                self.session_id
            );
            let _ = self.events.send(ClientEvent::LanguageChanged(language));
        }
    }

    pub async fn submit_text(&self, text: &str) -> ExchangeOutcome {
        let message = text.trim();
        if message.is_empty() {
            debug!("chat: ignored empty submission session={}", self.session_id);
            return ExchangeOutcome::Ignored;
        }

        let (exchange, language) =
            self.begin_exchange(TranscriptEntry::user(message), ExchangeKind::Chat);
        let request = ChatRequest {
            session_id: self.session_id.clone(),
            message: message.to_string(),
            language,
        };

        match self.chat.send_chat(request).await {
            Ok(response) => {
                let reply = response.reply_text().unwrap_or(NO_RESPONSE_FALLBACK);
                exchange.complete(TranscriptEntry::assistant(reply))
            }
            Err(err) => exchange.fail(&err),
        }
    }

    /// `None` stands for "no file picked" and is ignored.
    pub async fn submit_image(&self, image: Option<ImageUpload>) -> ExchangeOutcome {
        let Some(image) = image else {
            debug!(
                "diagnose: ignored submission without image session={}",
                self.session_id
            );
            return ExchangeOutcome::Ignored;
        };

        let (exchange, language) = self.begin_exchange(
            TranscriptEntry::user(IMAGE_UPLOADED_MESSAGE),
            ExchangeKind::Diagnosis,
        );
        let request = DiagnosisRequest {
            image,
            plant_type: String::new(),
            language,
        };

        match self.diagnosis.diagnose(request).await {
            Ok(diagnosis) => {
                let rendered = summary::render_diagnosis(&diagnosis);
                exchange.complete(TranscriptEntry::assistant(rendered))
            }
            Err(err) => exchange.fail(&err),
        }
    }

    fn state(&self) -> MutexGuard<'_, ConversationState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends the user entry and raises busy in one step, returning the
    /// language the request must carry.
    fn begin_exchange(
        &self,
        entry: TranscriptEntry,
        kind: ExchangeKind,
    ) -> (Exchange<'_>, Language) {
        let (language, became_busy) = {
            let mut state = self.state();
            state.transcript.push(entry.clone());
            state.in_flight += 1;
            (state.language, state.in_flight == 1)
        };
        info!(
            "{}: exchange started session={} language={language}",
            kind.label(),
            self.session_id
        );
        let _ = self.events.send(ClientEvent::EntryAppended(entry));
        if became_busy {
            let _ = self.events.send(ClientEvent::BusyChanged(true));
        }
        (
            Exchange {
                controller: self,
                kind,
                settled: false,
            },
            language,
        )
    }

    /// Appends the resolving entry and lowers busy under one lock.
    fn settle_exchange(&self, entry: TranscriptEntry) {
        let became_idle = {
            let mut state = self.state();
            state.transcript.push(entry.clone());
            state.in_flight = state.in_flight.saturating_sub(1);
            state.in_flight == 0
        };
        let _ = self.events.send(ClientEvent::EntryAppended(entry));
        if became_idle {
            let _ = self.events.send(ClientEvent::BusyChanged(false));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeKind {
    Chat,
    Diagnosis,
}

impl ExchangeKind {
    fn label(self) -> &'static str {
        match self {
            ExchangeKind::Chat => "chat",
            ExchangeKind::Diagnosis => "diagnose",
        }
    }

    fn failure_message(self) -> &'static str {
        match self {
            ExchangeKind::Chat => NETWORK_ERROR_MESSAGE,
            ExchangeKind::Diagnosis => DIAGNOSIS_FAILED_MESSAGE,
        }
    }
}

/// One outstanding exchange. Settles exactly once: through `complete`/`fail`,
/// or on drop with the failure entry if the awaiting future was abandoned.
struct Exchange<'a> {
    controller: &'a ConversationController,
    kind: ExchangeKind,
    settled: bool,
}

impl Exchange<'_> {
    fn complete(mut self, entry: TranscriptEntry) -> ExchangeOutcome {
        self.settled = true;
        info!(
            "{}: exchange completed session={}",
            self.kind.label(),
            self.controller.session_id
        );
        self.controller.settle_exchange(entry.clone());
        ExchangeOutcome::Completed(entry)
    }

    fn fail(mut self, err: &ExchangeError) -> ExchangeOutcome {
        self.settled = true;
        warn!(
            "{}: exchange failed session={} timeout={}: {err}",
            self.kind.label(),
            self.controller.session_id,
            err.is_timeout()
        );
        let entry = TranscriptEntry::assistant(self.kind.failure_message());
        self.controller.settle_exchange(entry.clone());
        ExchangeOutcome::Failed(entry)
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(
            "{}: exchange abandoned before settling session={}",
            self.kind.label(),
            self.controller.session_id
        );
        self.controller
            .settle_exchange(TranscriptEntry::assistant(self.kind.failure_message()));
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
