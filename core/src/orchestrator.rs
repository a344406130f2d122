//! Conversation orchestrator: the interaction state machine that ties speech
//! capture, the LLM client, persistence and synthesis together.
//!
//! All state lives behind one mutex. Asynchronous completions carry the
//! generation number they were started under and are discarded once the
//! generation moves on or the orchestrator is torn down.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::cohost::topic_prompt;
use crate::config::InteractionConfig;
use crate::errors::{HerOsError, LlmError, SpeechError, StoreError};
use crate::llm::{ChatMessage, LlmClient};
use crate::memory::{ConversationStore, Message, Role};
use crate::persona::{next_persona, PersonaId, PersonaTable};
use crate::speech::{CancelHandle, SpeechCapture, SpeechSynthesis};
use crate::transcript::DownloadSink;

const CAPTURE_FAILED: &str = "Speech recognition failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Home,
    CoHost,
    Game,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    BeginCapture,
    StopCapture,
    /// Mic button: begin when idle, stop when listening.
    ToggleCapture,
    SubmitText(String),
    ChangeTopic(String),
    SwitchMode(Mode),
    TogglePersona,
    SetCredential(Option<String>),
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    ConfigurationRequired,
    Error,
}

/// User-visible message. `id` increases with every publication so a dismiss
/// timer only clears the notice it was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub code: &'static str,
    pub message: String,
}

pub struct OrchestratorParts {
    pub config: InteractionConfig,
    pub store: ConversationStore,
    pub llm: Arc<LlmClient>,
    pub capture: Arc<dyn SpeechCapture>,
    pub synthesis: Arc<dyn SpeechSynthesis>,
    pub personas: Arc<dyn PersonaTable>,
    pub persona: PersonaId,
    pub credential: Option<String>,
}

struct Machine {
    state: InteractionState,
    mode: Mode,
    persona: PersonaId,
    credential: Option<String>,
    generation: u64,
    closed: bool,
    capture: Option<CancelHandle>,
    synthesis: Option<CancelHandle>,
    notice_seq: u64,
}

impl Machine {
    fn is_current(&self, generation: u64) -> bool {
        !self.closed && self.generation == generation
    }

    fn credential(&self) -> Option<String> {
        self.credential
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    fn cancel_sessions(&mut self) {
        if let Some(mut handle) = self.capture.take() {
            handle.cancel();
        }
        if let Some(mut handle) = self.synthesis.take() {
            handle.cancel();
        }
    }
}

struct Shared {
    config: InteractionConfig,
    store: ConversationStore,
    llm: Arc<LlmClient>,
    capture: Arc<dyn SpeechCapture>,
    synthesis: Arc<dyn SpeechSynthesis>,
    personas: Arc<dyn PersonaTable>,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<InteractionState>,
    notice_tx: watch::Sender<Option<Notice>>,
    partial_tx: watch::Sender<String>,
}

/// Cheap to clone; clones drive the same machine. [`dispatch`](Self::dispatch)
/// spawns onto the ambient Tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let (state_tx, _) = watch::channel(InteractionState::Idle);
        let (notice_tx, _) = watch::channel(None);
        let (partial_tx, _) = watch::channel(String::new());
        let machine = Machine {
            state: InteractionState::Idle,
            mode: Mode::Home,
            persona: parts.persona,
            credential: parts.credential,
            generation: 0,
            closed: false,
            capture: None,
            synthesis: None,
            notice_seq: 0,
        };
        Self {
            shared: Arc::new(Shared {
                config: parts.config,
                store: parts.store,
                llm: parts.llm,
                capture: parts.capture,
                synthesis: parts.synthesis,
                personas: parts.personas,
                machine: Mutex::new(machine),
                state_tx,
                notice_tx,
                partial_tx,
            }),
        }
    }

    pub fn current_state(&self) -> InteractionState {
        self.lock().state
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode
    }

    pub fn persona(&self) -> PersonaId {
        self.lock().persona.clone()
    }

    pub fn has_credential(&self) -> bool {
        self.lock().credential().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<InteractionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn notices(&self) -> watch::Receiver<Option<Notice>> {
        self.shared.notice_tx.subscribe()
    }

    /// Cumulative text of the response currently being streamed.
    pub fn partial_response(&self) -> watch::Receiver<String> {
        self.shared.partial_tx.subscribe()
    }

    pub fn history(&self) -> Vec<Message> {
        self.shared.store.all()
    }

    pub fn export_transcript(&self, sink: &dyn DownloadSink) -> Result<String, StoreError> {
        let persona = self.persona();
        self.shared.store.export(&persona, sink)
    }

    pub fn clear_history(&self) -> Result<(), StoreError> {
        self.shared.store.clear()
    }

    /// Apply a UI event. Returns `false` when the event is not valid in the
    /// current state and was ignored.
    pub fn dispatch(&self, event: UiEvent) -> bool {
        match event {
            UiEvent::BeginCapture => self.begin_capture(),
            UiEvent::StopCapture => self.stop_capture(),
            UiEvent::ToggleCapture => {
                let state = self.current_state();
                match state {
                    InteractionState::Idle => self.begin_capture(),
                    InteractionState::Listening => self.stop_capture(),
                    _ => false,
                }
            }
            UiEvent::SubmitText(text) => self.submit_text(&text),
            UiEvent::ChangeTopic(topic) => self.submit_text(&topic_prompt(&topic)),
            UiEvent::SwitchMode(mode) => self.reset(Some(mode), false),
            UiEvent::TogglePersona => self.toggle_persona(),
            UiEvent::SetCredential(credential) => {
                let mut m = self.lock();
                if m.closed {
                    return false;
                }
                m.credential = credential
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty());
                true
            }
            UiEvent::Teardown => self.reset(None, true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.shared
            .machine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, m: &mut Machine, next: InteractionState) {
        if m.state != next {
            info!("interaction state {:?} -> {:?}", m.state, next);
        }
        m.state = next;
        self.shared.state_tx.send_replace(next);
    }

    fn begin_capture(&self) -> bool {
        let started = {
            let mut m = self.lock();
            if m.closed || m.state != InteractionState::Idle {
                return false;
            }
            if m.credential().is_none() {
                Err(HerOsError::ConfigurationMissing)
            } else {
                match self.shared.capture.start_listening() {
                    Ok(session) => {
                        let (outcome, cancel) = session.into_parts();
                        m.generation += 1;
                        m.capture = Some(cancel);
                        self.transition(&mut m, InteractionState::Listening);
                        Ok((m.generation, outcome))
                    }
                    Err(err) => Err(HerOsError::Speech(err)),
                }
            }
        };

        match started {
            Ok((generation, outcome)) => {
                self.shared.notice_tx.send_replace(None);
                let this = self.clone();
                tokio::spawn(async move {
                    this.on_transcript(generation, outcome).await;
                });
                true
            }
            Err(err) => {
                self.publish_notice(&err);
                false
            }
        }
    }

    fn stop_capture(&self) -> bool {
        let mut m = self.lock();
        if m.closed || m.state != InteractionState::Listening {
            return false;
        }
        if let Some(mut handle) = m.capture.take() {
            handle.cancel();
        }
        m.generation += 1;
        self.transition(&mut m, InteractionState::Idle);
        true
    }

    fn submit_text(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let started = {
            let mut m = self.lock();
            if m.closed || m.state != InteractionState::Idle {
                return false;
            }
            match m.credential() {
                Some(credential) => {
                    m.generation += 1;
                    self.transition(&mut m, InteractionState::Processing);
                    Some((m.generation, credential, m.persona.clone()))
                }
                None => None,
            }
        };

        let Some((generation, credential, persona)) = started else {
            self.publish_notice(&HerOsError::ConfigurationMissing);
            return false;
        };
        self.shared.notice_tx.send_replace(None);
        let this = self.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            this.run_turn(generation, credential, persona, text).await;
        });
        true
    }

    fn reset(&self, mode: Option<Mode>, close: bool) -> bool {
        let mut m = self.lock();
        if m.closed {
            return false;
        }
        m.cancel_sessions();
        m.generation += 1;
        if let Some(mode) = mode {
            if m.mode != mode {
                info!("mode {:?} -> {:?}", m.mode, mode);
            }
            m.mode = mode;
        }
        m.closed = close;
        self.transition(&mut m, InteractionState::Idle);
        true
    }

    fn toggle_persona(&self) -> bool {
        let mut m = self.lock();
        if m.closed {
            return false;
        }
        match next_persona(self.shared.personas.as_ref(), &m.persona) {
            Some(next) => {
                info!("persona {} -> {}", m.persona, next);
                m.persona = next;
                true
            }
            None => false,
        }
    }

    async fn on_transcript(
        &self,
        generation: u64,
        outcome: oneshot::Receiver<Result<String, SpeechError>>,
    ) {
        let result = outcome.await;
        let turn = {
            let mut m = self.lock();
            if !m.is_current(generation) || m.state != InteractionState::Listening {
                return;
            }
            m.capture = None;
            match result {
                Ok(Ok(transcript)) => {
                    self.transition(&mut m, InteractionState::Processing);
                    Ok((m.credential().unwrap_or_default(), m.persona.clone(), transcript))
                }
                Ok(Err(err)) => {
                    self.transition(&mut m, InteractionState::Idle);
                    Err(err)
                }
                Err(_) => {
                    self.transition(&mut m, InteractionState::Idle);
                    Err(SpeechError::CaptureFailed("capture session dropped".into()))
                }
            }
        };

        match turn {
            Ok((credential, persona, transcript)) => {
                self.run_turn(generation, credential, persona, transcript)
                    .await;
            }
            Err(err) => {
                warn!("{}: {err}", err.code());
                self.publish_notice(&HerOsError::Speech(err));
            }
        }
    }

    /// Persist the user turn, ask the model, then speak the answer.
    async fn run_turn(&self, generation: u64, credential: String, persona: PersonaId, text: String) {
        if let Err(err) = self.shared.store.append(Role::User, &text) {
            warn!("{}: failed to persist user turn: {err}", err.code());
        }
        let messages = self.compose(&persona);

        let result = if self.shared.config.streaming {
            let partial = &self.shared.partial_tx;
            partial.send_replace(String::new());
            self.shared
                .llm
                .stream_message(&credential, &messages, &mut |text: &str| {
                    partial.send_replace(text.to_string());
                })
                .await
        } else {
            self.shared.llm.send_message(&credential, &messages).await
        };

        match result {
            Ok(reply) => self.speak_reply(generation, persona, reply).await,
            Err(err) => self.fail_turn(generation, err),
        }
    }

    fn compose(&self, persona: &PersonaId) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        match self.shared.personas.lookup(persona) {
            Some(profile) => messages.push(ChatMessage::new(Role::System, profile.system_prompt)),
            None => warn!("unknown persona {persona}, sending without a system prompt"),
        }
        messages.extend(self.shared.store.all().iter().map(ChatMessage::from));
        messages
    }

    async fn speak_reply(&self, generation: u64, persona: PersonaId, reply: String) {
        // Kept even when the interaction was cancelled meanwhile.
        if let Err(err) = self.shared.store.append(Role::Assistant, &reply) {
            warn!("{}: failed to persist assistant turn: {err}", err.code());
        }

        let outcome = {
            let mut m = self.lock();
            if !m.is_current(generation) || m.state != InteractionState::Processing {
                info!("response arrived after the interaction ended; not speaking it");
                return;
            }
            let (outcome, cancel) = self.shared.synthesis.speak(&reply, &persona).into_parts();
            m.synthesis = Some(cancel);
            self.transition(&mut m, InteractionState::Speaking);
            outcome
        };

        match tokio::time::timeout(self.shared.config.speech_timeout, outcome).await {
            Err(_) => warn!(
                "speech synthesis did not finish within {:?}",
                self.shared.config.speech_timeout
            ),
            Ok(Ok(Err(err))) => warn!("{}: {err}", err.code()),
            Ok(_) => {}
        }

        let mut m = self.lock();
        if m.is_current(generation) && m.state == InteractionState::Speaking {
            if let Some(mut handle) = m.synthesis.take() {
                handle.cancel();
            }
            self.transition(&mut m, InteractionState::Idle);
        }
    }

    fn fail_turn(&self, generation: u64, err: LlmError) {
        warn!("{}: {err}", err.code());
        {
            let mut m = self.lock();
            if !m.is_current(generation) || m.state != InteractionState::Processing {
                return;
            }
            self.transition(&mut m, InteractionState::Error);
        }
        self.publish_notice(&HerOsError::Llm(err));
        let mut m = self.lock();
        if m.is_current(generation) && m.state == InteractionState::Error {
            self.transition(&mut m, InteractionState::Idle);
        }
    }

    fn publish_notice(&self, err: &HerOsError) {
        let (kind, message) = match err {
            HerOsError::ConfigurationMissing => (NoticeKind::ConfigurationRequired, err.to_string()),
            HerOsError::Speech(SpeechError::CaptureFailed(_)) => {
                (NoticeKind::Error, CAPTURE_FAILED.to_string())
            }
            _ => (NoticeKind::Error, err.to_string()),
        };
        // Numbering and publishing share the lock so the newest id is the one left visible.
        let id = {
            let mut m = self.lock();
            m.notice_seq += 1;
            let id = m.notice_seq;
            self.shared.notice_tx.send_replace(Some(Notice {
                id,
                kind,
                code: err.code(),
                message,
            }));
            id
        };

        let notices = self.shared.notice_tx.clone();
        let after = self.shared.config.error_dismiss;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            notices.send_if_modified(|current| match current {
                Some(notice) if notice.id == id => {
                    *current = None;
                    true
                }
                _ => false,
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::kv::MemoryKeyValue;
    use crate::llm::{ChatProvider, ManualClock, OnChunk, RateLimiter};
    use crate::persona::StaticPersonas;
    use crate::speech::{session, Session, SessionControl};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptedCapture {
        sessions: Mutex<Vec<SessionControl<String>>>,
        unsupported: bool,
    }

    impl ScriptedCapture {
        fn take(&self) -> SessionControl<String> {
            self.sessions.lock().unwrap().pop().expect("capture session")
        }
    }

    impl SpeechCapture for ScriptedCapture {
        fn start_listening(&self) -> Result<Session<String>, SpeechError> {
            if self.unsupported {
                return Err(SpeechError::Unsupported);
            }
            let (session, control) = session();
            self.sessions.lock().unwrap().push(control);
            Ok(session)
        }
    }

    /// Finishes immediately unless `hang` is set, in which case the control is
    /// parked and never resolved.
    #[derive(Default)]
    struct Voice {
        spoken: Mutex<Vec<String>>,
        parked: Mutex<Vec<SessionControl<()>>>,
        hang: bool,
    }

    impl SpeechSynthesis for Voice {
        fn speak(&self, text: &str, _persona: &PersonaId) -> Session<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            let (session, control) = session();
            if self.hang {
                self.parked.lock().unwrap().push(control);
            } else {
                control.finish(Ok(()));
            }
            session
        }
    }

    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedModel {
        fn replying(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedModel {
        async fn send(&self, _credential: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".into()))
        }

        async fn stream(
            &self,
            credential: &str,
            messages: &[ChatMessage],
            on_chunk: &mut OnChunk<'_>,
        ) -> Result<String, LlmError> {
            let text = self.send(credential, messages).await?;
            let mid = text.len() / 2;
            on_chunk(&text[..mid]);
            on_chunk(&text);
            Ok(text)
        }
    }

    struct Rig {
        orchestrator: Orchestrator,
        capture: Arc<ScriptedCapture>,
        voice: Arc<Voice>,
        model: Arc<ScriptedModel>,
    }

    fn rig_with(
        capture: ScriptedCapture,
        voice: Voice,
        model: ScriptedModel,
        config: InteractionConfig,
        credential: Option<&str>,
    ) -> Rig {
        let capture = Arc::new(capture);
        let voice = Arc::new(voice);
        let model = Arc::new(model);
        let llm = LlmClient::with_providers(
            RateLimiter::new(&RateLimitConfig::default(), Arc::new(ManualClock::new())),
            model.clone(),
            model.clone(),
        );
        let orchestrator = Orchestrator::new(OrchestratorParts {
            config,
            store: ConversationStore::new(Arc::new(MemoryKeyValue::new()), 50),
            llm: Arc::new(llm),
            capture: capture.clone(),
            synthesis: voice.clone(),
            personas: Arc::new(StaticPersonas::default()),
            persona: PersonaId::new("wendy"),
            credential: credential.map(str::to_string),
        });
        Rig {
            orchestrator,
            capture,
            voice,
            model,
        }
    }

    fn rig(model: ScriptedModel) -> Rig {
        rig_with(
            ScriptedCapture::default(),
            Voice::default(),
            model,
            InteractionConfig::default(),
            Some("sk-test"),
        )
    }

    async fn settle(rx: &mut watch::Receiver<InteractionState>, state: InteractionState) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state reached in time")
            .expect("orchestrator alive");
    }

    #[tokio::test]
    async fn voice_turn_persists_both_sides_and_speaks() {
        let rig = rig(ScriptedModel::replying(vec![Ok("hi there".into())]));
        let mut states = rig.orchestrator.subscribe();

        assert!(rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Listening);
        rig.capture.take().finish(Ok("hello".into()));
        settle(&mut states, InteractionState::Idle).await;

        let history = rig.orchestrator.history();
        assert_eq!(history.len(), 2);
        assert_eq!((history[0].role, history[0].content.as_str()), (Role::User, "hello"));
        assert_eq!(
            (history[1].role, history[1].content.as_str()),
            (Role::Assistant, "hi there")
        );
        assert_eq!(*rig.voice.spoken.lock().unwrap(), vec!["hi there"]);
    }

    #[tokio::test]
    async fn request_starts_with_persona_prompt_and_never_stores_it() {
        let rig = rig(ScriptedModel::default());
        let mut states = rig.orchestrator.subscribe();

        assert!(rig.orchestrator.dispatch(UiEvent::ChangeTopic("space travel".into())));
        settle(&mut states, InteractionState::Idle).await;

        let requests = rig.model.requests.lock().unwrap();
        let sent = &requests[0];
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("Wendy"));
        assert_eq!(
            sent.last().unwrap().content,
            topic_prompt("space travel")
        );
        assert!(rig
            .orchestrator
            .history()
            .iter()
            .all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn second_interaction_is_refused_while_processing() {
        let gate = Arc::new(Notify::new());
        let rig = rig(ScriptedModel {
            gate: Some(gate.clone()),
            ..ScriptedModel::default()
        });
        let mut states = rig.orchestrator.subscribe();

        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("first".into())));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Processing);
        assert!(!rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert!(!rig.orchestrator.dispatch(UiEvent::SubmitText("second".into())));
        assert!(rig.capture.sessions.lock().unwrap().is_empty());

        gate.notify_one();
        settle(&mut states, InteractionState::Idle).await;
        assert_eq!(rig.model.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_ignored() {
        let rig = rig(ScriptedModel::default());
        assert!(!rig.orchestrator.dispatch(UiEvent::SubmitText("   ".into())));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
    }

    #[tokio::test]
    async fn missing_credential_asks_for_configuration() {
        let rig = rig_with(
            ScriptedCapture::default(),
            Voice::default(),
            ScriptedModel::default(),
            InteractionConfig::default(),
            None,
        );
        let notices = rig.orchestrator.notices();

        assert!(!rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
        let notice = notices.borrow().clone().expect("notice");
        assert_eq!(notice.kind, NoticeKind::ConfigurationRequired);
        assert_eq!(notice.message, "Please enter your API key in settings.");

        assert!(rig
            .orchestrator
            .dispatch(UiEvent::SetCredential(Some("sk-test".into()))));
        assert!(rig.orchestrator.dispatch(UiEvent::BeginCapture));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_notices_leave_the_newest_visible() {
        let rig = rig_with(
            ScriptedCapture::default(),
            Voice::default(),
            ScriptedModel::default(),
            InteractionConfig::default(),
            None,
        );
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let orchestrator = rig.orchestrator.clone();
                tokio::spawn(async move {
                    for _ in 0..100 {
                        assert!(!orchestrator.dispatch(UiEvent::BeginCapture));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        let notice = rig.orchestrator.notices().borrow().clone().expect("notice");
        assert_eq!(notice.id, 400);
        assert_eq!(notice.kind, NoticeKind::ConfigurationRequired);
    }

    #[tokio::test]
    async fn toggle_stops_an_active_capture() {
        let rig = rig(ScriptedModel::default());

        assert!(rig.orchestrator.dispatch(UiEvent::ToggleCapture));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Listening);
        assert!(rig.orchestrator.dispatch(UiEvent::ToggleCapture));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);

        let mut control = rig.capture.take();
        assert!(control.is_cancelled());
        control.finish(Ok("too late".into()));
        tokio::task::yield_now().await;
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
        assert!(rig.model.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_failure_returns_to_idle_with_notice() {
        let rig = rig(ScriptedModel::default());
        let mut notices = rig.orchestrator.notices();

        assert!(rig.orchestrator.dispatch(UiEvent::BeginCapture));
        rig.capture
            .take()
            .finish(Err(SpeechError::CaptureFailed("no-speech".into())));
        let notice = notices
            .wait_for(|n| n.is_some())
            .await
            .unwrap()
            .clone()
            .expect("notice");
        assert_eq!(notice.message, CAPTURE_FAILED);
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
    }

    #[tokio::test]
    async fn unsupported_capture_does_not_transition() {
        let rig = rig_with(
            ScriptedCapture {
                unsupported: true,
                ..ScriptedCapture::default()
            },
            Voice::default(),
            ScriptedModel::default(),
            InteractionConfig::default(),
            Some("sk-test"),
        );
        let notices = rig.orchestrator.notices();

        assert!(!rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
        let notice = notices.borrow().clone().expect("notice");
        assert_eq!(notice.message, SpeechError::Unsupported.to_string());
        assert_eq!(notice.code, "SPK-1001");
    }

    #[tokio::test(start_paused = true)]
    async fn llm_error_notice_is_dismissed_after_five_seconds() {
        let rig = rig(ScriptedModel::replying(vec![
            Err(LlmError::ProviderHttp {
                status: 401,
                message: "Incorrect API key provided".into(),
            }),
            Err(LlmError::RateLimitExceeded),
        ]));
        let mut states = rig.orchestrator.subscribe();
        let notices = rig.orchestrator.notices();

        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("hello".into())));
        settle(&mut states, InteractionState::Idle).await;
        let first = notices.borrow().clone().expect("notice");
        assert_eq!(first.message, "Incorrect API key provided");
        assert!(rig.voice.spoken.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("again".into())));
        settle(&mut states, InteractionState::Idle).await;
        let second = notices.borrow().clone().expect("notice");
        assert!(second.id > first.id);

        // The first timer fires here and must leave the newer notice alone.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(notices.borrow().as_ref().map(|n| n.id), Some(second.id));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(notices.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_synthesis_times_out_to_idle() {
        let rig = rig_with(
            ScriptedCapture::default(),
            Voice {
                hang: true,
                ..Voice::default()
            },
            ScriptedModel::default(),
            InteractionConfig::default(),
            Some("sk-test"),
        );
        let mut states = rig.orchestrator.subscribe();
        let started = tokio::time::Instant::now();

        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("hello".into())));
        settle(&mut states, InteractionState::Speaking).await;
        tokio::time::timeout(
            Duration::from_secs(60),
            states.wait_for(|s| *s == InteractionState::Idle),
        )
        .await
        .expect("timed out waiting for idle")
        .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn late_response_after_mode_switch_is_kept_but_not_spoken() {
        let gate = Arc::new(Notify::new());
        let rig = rig(ScriptedModel {
            replies: Mutex::new(vec![Ok("late answer".into())].into()),
            gate: Some(gate.clone()),
            ..ScriptedModel::default()
        });

        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("hello".into())));
        assert!(rig.orchestrator.dispatch(UiEvent::SwitchMode(Mode::Game)));
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
        assert_eq!(rig.orchestrator.mode(), Mode::Game);

        gate.notify_one();
        for _ in 0..100 {
            if rig.orchestrator.history().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(rig.orchestrator.history()[1].content, "late answer");
        assert_eq!(rig.orchestrator.current_state(), InteractionState::Idle);
        assert!(rig.voice.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn teardown_refuses_further_events() {
        let rig = rig(ScriptedModel::default());
        assert!(rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert!(rig.orchestrator.dispatch(UiEvent::Teardown));
        assert!(rig.capture.take().is_cancelled());
        assert!(!rig.orchestrator.dispatch(UiEvent::BeginCapture));
        assert!(!rig.orchestrator.dispatch(UiEvent::TogglePersona));
    }

    #[tokio::test]
    async fn persona_toggle_cycles() {
        let rig = rig(ScriptedModel::default());
        assert!(rig.orchestrator.dispatch(UiEvent::TogglePersona));
        assert_eq!(rig.orchestrator.persona().as_str(), "liz");
        assert!(rig.orchestrator.dispatch(UiEvent::TogglePersona));
        assert_eq!(rig.orchestrator.persona().as_str(), "wendy");
    }

    #[tokio::test]
    async fn streaming_publishes_cumulative_text() {
        let rig = rig_with(
            ScriptedCapture::default(),
            Voice::default(),
            ScriptedModel::replying(vec![Ok("Hello there".into())]),
            InteractionConfig {
                streaming: true,
                ..InteractionConfig::default()
            },
            Some("sk-test"),
        );
        let mut states = rig.orchestrator.subscribe();
        let partial = rig.orchestrator.partial_response();

        assert!(rig.orchestrator.dispatch(UiEvent::SubmitText("hi".into())));
        settle(&mut states, InteractionState::Idle).await;
        assert_eq!(*partial.borrow(), "Hello there");
        assert_eq!(*rig.voice.spoken.lock().unwrap(), vec!["Hello there"]);
    }
}
