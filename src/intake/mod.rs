//! Speech Intake State Machine
//!
//! Dual-provider continuous recognition: a primary cloud session, a local
//! fallback recognizer, debounced reconnects, and language hot-swap. The
//! machine runs as a single actor task; exactly one provider connection is
//! active at any time, and every provider event carries the generation of
//! the connection that produced it so stale callbacks from a torn-down
//! connection are absorbed instead of resurrecting a stopped state.

pub mod cloud;
pub mod filter;
pub mod local;

pub use cloud::CloudProvider;
pub use filter::{CommitFilter, MAX_RECENT_UTTERANCES, MIN_COMMIT_LEN};
pub use local::LocalProvider;

use crate::error::{CoachError, CoachResult};
use crate::ledger::{ContextKind, ContextLedger};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Debounce before a fallback reconnect attempt
pub const RESTART_DEBOUNCE: Duration = Duration::from_millis(200);

/// Which provider a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Primary,
    Fallback,
}

/// Connection phase of the intake machine. Core invariant: at most one of
/// primary/fallback is ever active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting(ProviderKind),
    Listening(ProviderKind),
    Stopped,
}

impl ConnectionPhase {
    pub fn is_listening(&self) -> bool {
        matches!(self, ConnectionPhase::Listening(_))
    }
}

/// Event reported by a provider connection
#[derive(Debug, Clone)]
pub enum SpeechEvent {
    /// Live partial result, updates continuously
    Partial(String),
    /// Provider-reported final result, subject to the commit filter
    Committed(String),
    /// Provider-reported error; the connection is considered dead
    Error(String),
    /// Natural end of the session
    Ended,
}

/// A speech event tagged with the generation of its connection
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub generation: u64,
    pub event: SpeechEvent,
}

/// A live provider connection. `close` is best-effort; implementations
/// swallow disconnect errors.
#[async_trait]
pub trait ProviderConnection: Send {
    async fn close(&mut self);
}

/// A speech provider that can open connections
#[async_trait]
pub trait SpeechProvider: Send {
    async fn open(
        &mut self,
        language: &str,
        events: mpsc::Sender<ProviderEvent>,
        generation: u64,
    ) -> CoachResult<Box<dyn ProviderConnection>>;
}

/// Commands accepted by the intake actor
#[derive(Debug)]
pub enum IntakeCommand {
    Start,
    Stop,
    SetLanguage(String),
    SetAutoVoice(bool),
    Shutdown,
}

/// Handle to a running intake actor
#[derive(Clone)]
pub struct IntakeHandle {
    commands: mpsc::Sender<IntakeCommand>,
    phase: watch::Receiver<ConnectionPhase>,
    topic: watch::Receiver<String>,
    text: watch::Receiver<String>,
}

impl IntakeHandle {
    pub async fn start(&self) {
        let _ = self.commands.send(IntakeCommand::Start).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(IntakeCommand::Stop).await;
    }

    pub async fn set_language(&self, language: &str) {
        let _ = self
            .commands
            .send(IntakeCommand::SetLanguage(language.to_string()))
            .await;
    }

    pub async fn set_auto_voice(&self, enabled: bool) {
        let _ = self.commands.send(IntakeCommand::SetAutoVoice(enabled)).await;
    }

    /// Permanent teardown; the actor exits and never restarts anything
    pub async fn shutdown(&self) {
        let _ = self.commands.send(IntakeCommand::Shutdown).await;
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Watch for phase transitions (tests and UI)
    pub fn phase_watch(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase.clone()
    }

    /// Latest committed conversation topic
    pub fn topic_watch(&self) -> watch::Receiver<String> {
        self.topic.clone()
    }

    /// Live partial-recognition text
    pub fn text_watch(&self) -> watch::Receiver<String> {
        self.text.clone()
    }
}

/// The intake state machine actor
pub struct SpeechIntake {
    primary: Box<dyn SpeechProvider>,
    fallback: Option<Box<dyn SpeechProvider>>,
    ledger: Arc<Mutex<ContextLedger>>,

    language: String,
    auto_voice: bool,
    manually_stopped: bool,
    /// Once true, no primary attempt is ever made again this process
    primary_unavailable: bool,

    generation: u64,
    connection: Option<Box<dyn ProviderConnection>>,
    active_kind: Option<ProviderKind>,
    /// Single-slot debounced restart; assigning replaces any prior timer
    pending_restart: Option<Instant>,

    filter: CommitFilter,

    phase_tx: watch::Sender<ConnectionPhase>,
    topic_tx: watch::Sender<String>,
    text_tx: watch::Sender<String>,
    events_tx: mpsc::Sender<ProviderEvent>,
}

impl SpeechIntake {
    /// Spawn the actor and return its handle
    pub fn spawn(
        primary: Box<dyn SpeechProvider>,
        fallback: Option<Box<dyn SpeechProvider>>,
        ledger: Arc<Mutex<ContextLedger>>,
        language: String,
        auto_voice: bool,
    ) -> IntakeHandle {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::channel(64);
        let (phase_tx, phase_rx) = watch::channel(ConnectionPhase::Idle);
        let (topic_tx, topic_rx) = watch::channel(String::new());
        let (text_tx, text_rx) = watch::channel(String::new());

        let machine = Self {
            primary,
            fallback,
            ledger,
            language,
            auto_voice,
            manually_stopped: false,
            primary_unavailable: false,
            generation: 0,
            connection: None,
            active_kind: None,
            pending_restart: None,
            filter: CommitFilter::new(),
            phase_tx,
            topic_tx,
            text_tx,
            events_tx,
        };

        tokio::spawn(machine.run(command_rx, events_rx));

        IntakeHandle {
            commands: command_tx,
            phase: phase_rx,
            topic: topic_rx,
            text: text_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<IntakeCommand>,
        mut events: mpsc::Receiver<ProviderEvent>,
    ) {
        loop {
            let restart_at = self.pending_restart;

            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(cmd).await {
                                break;
                            }
                        }
                        // All handles dropped: same as shutdown
                        None => break,
                    }
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
                _ = tokio::time::sleep_until(restart_at.unwrap_or_else(Instant::now)),
                    if restart_at.is_some() =>
                {
                    self.pending_restart = None;
                    if !self.manually_stopped && self.auto_voice {
                        debug!("⏱️ Debounced reconnect firing");
                        self.open_fallback().await;
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Returns true when the actor should exit
    async fn handle_command(&mut self, cmd: IntakeCommand) -> bool {
        match cmd {
            IntakeCommand::Start => {
                self.manually_stopped = false;
                if self.connection.is_none() {
                    self.start_listening().await;
                }
            }
            IntakeCommand::Stop => {
                self.stop_listening().await;
            }
            IntakeCommand::SetLanguage(language) => {
                self.change_language(language).await;
            }
            IntakeCommand::SetAutoVoice(enabled) => {
                self.auto_voice = enabled;
                if enabled {
                    self.manually_stopped = false;
                    if self.connection.is_none() {
                        self.start_listening().await;
                    }
                } else {
                    // Same teardown as a manual stop; mute state is not
                    // touched here, the orchestrator owns it
                    self.stop_listening().await;
                }
            }
            IntakeCommand::Shutdown => return true,
        }
        false
    }

    async fn handle_event(&mut self, event: ProviderEvent) {
        // Ownership check: events from a torn-down connection are ignored
        if event.generation != self.generation {
            debug!(
                "Ignoring stale provider event (gen {} != {})",
                event.generation, self.generation
            );
            return;
        }

        match event.event {
            SpeechEvent::Partial(text) => {
                let _ = self.text_tx.send(text);
            }
            SpeechEvent::Committed(raw) => {
                if let Some(text) = self.filter.accept(&raw) {
                    info!("📝 Committed: '{}'", text);
                    let _ = self.topic_tx.send(text.clone());
                    if let Ok(mut ledger) = self.ledger.lock() {
                        ledger.push_entry(ContextKind::Speech, "heard", &text);
                    }
                }
            }
            SpeechEvent::Error(msg) => {
                warn!("Speech provider error: {}", msg);
                self.connection_lost().await;
            }
            SpeechEvent::Ended => {
                debug!("Speech session ended");
                self.connection_lost().await;
            }
        }
    }

    /// The active connection died on its own (error or natural end)
    async fn connection_lost(&mut self) {
        let kind = self.active_kind.take();
        // The connection is already dead; dropping it releases its tasks.
        // Bump the generation so any further events it emits are stale.
        self.connection = None;
        self.generation += 1;

        match kind {
            Some(ProviderKind::Primary) => {
                // Primary failures are permanent for this process
                self.primary_unavailable = true;
                info!("☁️ Primary speech provider marked unavailable, switching to fallback");
                self.open_fallback().await;
            }
            Some(ProviderKind::Fallback) | None => {
                self.schedule_restart_or_idle();
            }
        }
    }

    fn schedule_restart_or_idle(&mut self) {
        if !self.manually_stopped && self.auto_voice {
            // Single-slot: assigning replaces any pending timer
            self.pending_restart = Some(Instant::now() + RESTART_DEBOUNCE);
            self.set_phase(ConnectionPhase::Connecting(ProviderKind::Fallback));
        } else {
            self.set_phase(if self.manually_stopped {
                ConnectionPhase::Stopped
            } else {
                ConnectionPhase::Idle
            });
        }
    }

    /// Begin a fresh listening attempt: primary unless it has been marked
    /// unavailable, then fallback.
    async fn start_listening(&mut self) {
        self.pending_restart = None;
        self.teardown_connection().await;

        if !self.primary_unavailable {
            self.set_phase(ConnectionPhase::Connecting(ProviderKind::Primary));
            self.generation += 1;
            let generation = self.generation;
            let language = self.language.clone();
            let events = self.events_tx.clone();

            match self.primary.open(&language, events, generation).await {
                Ok(conn) => {
                    self.install(conn, ProviderKind::Primary);
                    return;
                }
                Err(e) => {
                    warn!("Primary speech provider failed to connect: {}", e);
                    self.primary_unavailable = true;
                }
            }
        }

        self.open_fallback().await;
    }

    async fn open_fallback(&mut self) {
        self.pending_restart = None;
        self.teardown_connection().await;

        self.generation += 1;
        let generation = self.generation;
        let language = self.language.clone();
        let events = self.events_tx.clone();

        let Some(provider) = self.fallback.as_mut() else {
            // Silent degradation: no local recognition facility
            debug!("No fallback recognizer available; staying idle");
            self.set_phase(ConnectionPhase::Idle);
            return;
        };

        let _ = self
            .phase_tx
            .send(ConnectionPhase::Connecting(ProviderKind::Fallback));
        match provider.open(&language, events, generation).await {
            Ok(conn) => self.install(conn, ProviderKind::Fallback),
            Err(CoachError::FallbackUnsupported(msg)) => {
                debug!("Fallback recognition unsupported: {}", msg);
                self.set_phase(ConnectionPhase::Idle);
            }
            Err(e) => {
                warn!("Fallback recognizer failed to start: {}", e);
                self.schedule_restart_or_idle();
            }
        }
    }

    fn install(&mut self, conn: Box<dyn ProviderConnection>, kind: ProviderKind) {
        self.connection = Some(conn);
        self.active_kind = Some(kind);
        self.set_phase(ConnectionPhase::Listening(kind));
        info!("🎙️ Listening via {:?} provider", kind);
    }

    async fn stop_listening(&mut self) {
        self.manually_stopped = true;
        self.pending_restart = None;
        self.teardown_connection().await;
        self.set_phase(ConnectionPhase::Stopped);
    }

    /// Language hot-swap: tear down whichever connection is active and, if
    /// auto-voice is still on, reconnect with the new tag right away.
    async fn change_language(&mut self, language: String) {
        if self.language == language {
            return;
        }
        self.language = language;
        info!("🌐 Language changed to {}", self.language);

        if self.connection.is_some() {
            self.teardown_connection().await;
            if self.auto_voice && !self.manually_stopped {
                if self.primary_unavailable {
                    self.open_fallback().await;
                } else {
                    self.start_listening().await;
                }
            } else {
                self.set_phase(ConnectionPhase::Idle);
            }
        }
        // No active provider: the language is simply recorded for the next
        // connection attempt
    }

    async fn teardown_connection(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close().await;
            // The closed connection no longer owns the event stream
            self.generation += 1;
        }
        self.active_kind = None;
    }

    /// Final teardown on shutdown: permanent no-restart guard, cancel the
    /// pending timer, best-effort disconnect.
    async fn teardown(&mut self) {
        self.manually_stopped = true;
        self.pending_restart = None;
        self.teardown_connection().await;
        self.set_phase(ConnectionPhase::Stopped);
        debug!("Speech intake shut down");
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        let _ = self.phase_tx.send(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    type SessionSlot = Arc<StdMutex<Option<(mpsc::Sender<ProviderEvent>, u64)>>>;

    /// Scriptable provider that records open attempts and exposes the
    /// event sender of its latest connection
    struct MockProvider {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        languages: Arc<StdMutex<Vec<String>>>,
        session: SessionSlot,
        fail_to_open: bool,
    }

    impl MockProvider {
        fn working() -> Self {
            Self {
                opens: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
                languages: Arc::new(StdMutex::new(Vec::new())),
                session: Arc::new(StdMutex::new(None)),
                fail_to_open: false,
            }
        }

        fn broken() -> Self {
            Self {
                fail_to_open: true,
                ..Self::working()
            }
        }

        async fn emit(&self, event: SpeechEvent) {
            let (tx, generation) = self
                .session
                .lock()
                .unwrap()
                .clone()
                .expect("no session open");
            tx.send(ProviderEvent { generation, event }).await.unwrap();
        }

        /// Emit tagged with a generation the machine no longer owns
        async fn emit_with_generation(&self, event: SpeechEvent, generation: u64) {
            let (tx, _) = self
                .session
                .lock()
                .unwrap()
                .clone()
                .expect("no session open");
            tx.send(ProviderEvent { generation, event }).await.unwrap();
        }

        fn generation(&self) -> u64 {
            self.session.lock().unwrap().as_ref().expect("no session").1
        }
    }

    struct MockConnection {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProviderConnection for MockConnection {
        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SpeechProvider for MockProvider {
        async fn open(
            &mut self,
            language: &str,
            events: mpsc::Sender<ProviderEvent>,
            generation: u64,
        ) -> CoachResult<Box<dyn ProviderConnection>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.languages.lock().unwrap().push(language.to_string());
            if self.fail_to_open {
                return Err(CoachError::Speech("provider down".to_string()));
            }
            *self.session.lock().unwrap() = Some((events, generation));
            Ok(Box::new(MockConnection {
                closes: self.closes.clone(),
            }))
        }
    }

    /// Shareable view of a provider handed to the machine
    struct ProviderProbe {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        languages: Arc<StdMutex<Vec<String>>>,
        session: SessionSlot,
        fail_to_open: bool,
    }

    impl ProviderProbe {
        fn split(provider: MockProvider) -> (Box<dyn SpeechProvider>, Self) {
            let probe = Self {
                opens: provider.opens.clone(),
                closes: provider.closes.clone(),
                languages: provider.languages.clone(),
                session: provider.session.clone(),
                fail_to_open: provider.fail_to_open,
            };
            (Box::new(provider), probe)
        }

        fn as_emitter(&self) -> MockProvider {
            MockProvider {
                opens: self.opens.clone(),
                closes: self.closes.clone(),
                languages: self.languages.clone(),
                session: self.session.clone(),
                fail_to_open: self.fail_to_open,
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    async fn wait_for_phase(rx: &mut watch::Receiver<ConnectionPhase>, want: ConnectionPhase) {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if *rx.borrow() == want {
                    return;
                }
                rx.changed().await.expect("phase channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?} (at {:?})", want, rx.borrow()));
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }

    fn ledger() -> Arc<Mutex<ContextLedger>> {
        Arc::new(Mutex::new(ContextLedger::new()))
    }

    fn spawn_machine(
        primary: MockProvider,
        fallback: MockProvider,
    ) -> (IntakeHandle, ProviderProbe, ProviderProbe, Arc<Mutex<ContextLedger>>) {
        let (primary_box, primary_probe) = ProviderProbe::split(primary);
        let (fallback_box, fallback_probe) = ProviderProbe::split(fallback);
        let ledger = ledger();
        let handle = SpeechIntake::spawn(
            primary_box,
            Some(fallback_box),
            ledger.clone(),
            "en-US".to_string(),
            true,
        );
        (handle, primary_probe, fallback_probe, ledger)
    }

    #[tokio::test]
    async fn test_happy_path_listens_on_primary() {
        let (handle, primary, fallback, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;

        assert_eq!(primary.opens(), 1);
        assert_eq!(fallback.opens(), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_switches_to_fallback_permanently() {
        let (handle, primary, fallback, _) =
            spawn_machine(MockProvider::broken(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Fallback)).await;
        assert_eq!(primary.opens(), 1);
        assert_eq!(fallback.opens(), 1);

        // A later stop/start cycle never retries the primary
        handle.stop().await;
        wait_for_phase(&mut phase, ConnectionPhase::Stopped).await;
        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Fallback)).await;

        assert_eq!(primary.opens(), 1);
        assert_eq!(fallback.opens(), 2);
    }

    #[tokio::test]
    async fn test_primary_midsession_error_falls_back() {
        let (handle, primary, fallback, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;

        primary
            .as_emitter()
            .emit(SpeechEvent::Error("socket dropped".to_string()))
            .await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Fallback)).await;

        assert_eq!(primary.opens(), 1);
        assert_eq!(fallback.opens(), 1);
    }

    #[tokio::test]
    async fn test_fallback_end_schedules_single_debounced_restart() {
        let (handle, _, fallback, _) =
            spawn_machine(MockProvider::broken(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Fallback)).await;
        assert_eq!(fallback.opens(), 1);

        fallback.as_emitter().emit(SpeechEvent::Ended).await;
        wait_until(|| fallback.opens() == 2).await;

        // Exactly one reopen; the single timer slot never doubles up
        tokio::time::sleep(RESTART_DEBOUNCE * 3).await;
        assert_eq!(fallback.opens(), 2);
        assert_eq!(
            handle.phase(),
            ConnectionPhase::Listening(ProviderKind::Fallback)
        );
    }

    #[tokio::test]
    async fn test_manual_stop_suppresses_restart() {
        let (handle, _, fallback, _) =
            spawn_machine(MockProvider::broken(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Fallback)).await;
        let emitter = fallback.as_emitter();
        let generation = emitter.generation();

        handle.stop().await;
        wait_for_phase(&mut phase, ConnectionPhase::Stopped).await;
        assert_eq!(fallback.closes(), 1);

        // The torn-down connection reports its end afterwards
        emitter
            .emit_with_generation(SpeechEvent::Ended, generation)
            .await;
        tokio::time::sleep(RESTART_DEBOUNCE * 3).await;

        assert_eq!(handle.phase(), ConnectionPhase::Stopped);
        assert_eq!(fallback.opens(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_from_old_connection_is_ignored() {
        let (handle, primary, _, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;
        let emitter = primary.as_emitter();
        let old_generation = emitter.generation();

        handle.set_language("fr-FR").await;
        wait_until(|| primary.opens() == 2).await;

        emitter
            .emit_with_generation(
                SpeechEvent::Committed("ghost of the old session".to_string()),
                old_generation,
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*handle.topic_watch().borrow(), "");
    }

    #[tokio::test]
    async fn test_language_change_reconnects_with_new_tag() {
        let (handle, primary, _, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;

        handle.set_language("de-DE").await;
        wait_until(|| primary.opens() == 2).await;

        assert_eq!(primary.closes(), 1);
        let languages = primary.languages.lock().unwrap().clone();
        assert_eq!(languages, vec!["en-US".to_string(), "de-DE".to_string()]);
    }

    #[tokio::test]
    async fn test_language_change_while_idle_only_records() {
        let (handle, primary, fallback, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());

        handle.set_language("es-MX").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(primary.opens(), 0);
        assert_eq!(fallback.opens(), 0);

        let mut phase = handle.phase_watch();
        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;
        assert_eq!(
            primary.languages.lock().unwrap().as_slice(),
            &["es-MX".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disable_auto_voice_stops_enable_restarts() {
        let (handle, primary, _, _) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;

        handle.set_auto_voice(false).await;
        wait_for_phase(&mut phase, ConnectionPhase::Stopped).await;
        assert_eq!(primary.closes(), 1);

        handle.set_auto_voice(true).await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;
        assert_eq!(primary.opens(), 2);
    }

    #[tokio::test]
    async fn test_commits_flow_into_topic_and_ledger() {
        let (handle, primary, _, ledger) =
            spawn_machine(MockProvider::working(), MockProvider::working());
        let mut phase = handle.phase_watch();

        handle.start().await;
        wait_for_phase(&mut phase, ConnectionPhase::Listening(ProviderKind::Primary)).await;
        let emitter = primary.as_emitter();

        emitter
            .emit(SpeechEvent::Partial("tell me ab".to_string()))
            .await;
        emitter
            .emit(SpeechEvent::Committed("tell me about your weekend".to_string()))
            .await;
        // Too short and duplicate finals are filtered
        emitter.emit(SpeechEvent::Committed("hi ok".to_string())).await;
        emitter
            .emit(SpeechEvent::Committed("tell me about your weekend".to_string()))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*handle.topic_watch().borrow(), "tell me about your weekend");
        assert_eq!(*handle.text_watch().borrow(), "tell me ab");
        assert_eq!(ledger.lock().unwrap().entry_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_fallback_degrades_silently() {
        let (primary_box, primary) = ProviderProbe::split(MockProvider::broken());
        let handle = SpeechIntake::spawn(
            primary_box,
            None,
            ledger(),
            "en-US".to_string(),
            true,
        );
        let mut phase = handle.phase_watch();

        handle.start().await;
        // The phase watch starts at Idle, so first wait for the open
        // attempt to happen before checking the phase settled back to Idle.
        wait_until(|| primary.opens() == 1).await;
        wait_for_phase(&mut phase, ConnectionPhase::Idle).await;
        assert_eq!(primary.opens(), 1);
    }
}
