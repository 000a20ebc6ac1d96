//! Session orchestrator.
//!
//! The sole mutator of session and turn state. Stages run as independent
//! tasks and report back over one event channel; the orchestrator
//! suspends only while selecting over heterogeneous event sources, so
//! all state writes are serialized through a single control point.
//!
//! Cancellation uses an epoch counter: every recognizer or reply pipeline
//! is tagged with the epoch it was spawned under, the counter is bumped
//! synchronously when a call is cancelled, and stale-epoch messages are
//! dropped on arrival. No output from a cancelled call can reach the sink
//! after a newer call for the session has started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use parley_config::ProviderConfig;
use parley_core::{
    AudioFrame, AudioSink, AudioSource, ConnectionState, Error, GenerateRequest, MetricEvent,
    NoiseSuppressor, ResponseGenerator, Result, Session, Speaker, SpeechRecognizer,
    SpeechSynthesizer, StageKind, TurnDecision, TurnDetector, TurnState, UsageSummary, Utterance,
    VadEvent, VadModel, VoiceSettings,
};

use crate::metrics::{MetricsCollector, MetricsHandle};
use crate::sentence::SentenceBuffer;
use crate::vad::{prewarm_vad, EnergyVadModel, VadSession};

/// Orchestrator tunables that are not provider-specific.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ignore barge-in this soon after the agent starts speaking. Zero
    /// means every confirmed speech start interrupts.
    pub grace_period_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { grace_period_ms: 0 }
    }
}

/// The wired component graph for one session. Providers are selected at
/// startup; the VAD model is the shared prewarmed instance.
#[derive(Clone)]
pub struct StageSet {
    pub vad_model: Arc<dyn VadModel>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub turn_detector: Arc<dyn TurnDetector>,
    pub suppressor: Option<Arc<dyn NoiseSuppressor>>,
}

/// Messages stages send back to the orchestrator, tagged with the epoch
/// of the call that produced them.
#[derive(Debug)]
enum StageMsg {
    Transcript { epoch: u64, utterance: Utterance },
    RecognizerClosed { epoch: u64 },
    ReplyDelta { epoch: u64, text: String },
    ReplyDone { epoch: u64, full_text: String },
    SynthFrame { epoch: u64, frame: AudioFrame },
    SentenceSpoken { epoch: u64, text: String },
    SynthDone { epoch: u64 },
    StageFailed { epoch: u64, stage: StageKind, message: String },
}

impl StageMsg {
    fn epoch(&self) -> u64 {
        match self {
            StageMsg::Transcript { epoch, .. }
            | StageMsg::RecognizerClosed { epoch }
            | StageMsg::ReplyDelta { epoch, .. }
            | StageMsg::ReplyDone { epoch, .. }
            | StageMsg::SynthFrame { epoch, .. }
            | StageMsg::SentenceSpoken { epoch, .. }
            | StageMsg::SynthDone { epoch }
            | StageMsg::StageFailed { epoch, .. } => *epoch,
        }
    }
}

/// Bounded retry with exponential backoff for a single stage call.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
}

async fn with_retries<T, F, Fut>(policy: RetryPolicy, stage: StageKind, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut last = None;
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                tracing::warn!(error = %err, attempt = attempt + 1, "stage call failed, will retry");
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| Error::stage(stage, "retries exhausted")))
}

/// Coordinates one session end to end.
pub struct SessionOrchestrator {
    session: Session,
    stages: StageSet,
    provider: ProviderConfig,
    config: OrchestratorConfig,
    voice: VoiceSettings,

    collector: MetricsCollector,
    metrics: MetricsHandle,
    vad: VadSession,

    events_tx: mpsc::Sender<StageMsg>,

    /// Current call generation; bumped on every cancellation or new call
    epoch: u64,
    /// Input to the active recognition, while the participant holds the floor
    stt_tx: Option<mpsc::Sender<AudioFrame>>,
    stt_task: Option<JoinHandle<()>>,
    reply_task: Option<JoinHandle<()>>,
    /// Synthesis sub-task of the active reply pipeline; the pipeline
    /// parks its handle here so cancellation can abort it directly
    /// instead of letting it drain queued sentences.
    synth_task: Arc<Mutex<Option<JoinHandle<()>>>>,

    /// Most recent partial transcript for the current turn
    pending_partial: Option<Utterance>,
    /// Agent reply text accumulated from generator deltas
    reply_full: String,
    /// Agent reply text actually synthesized and sent, for barge-in audit
    reply_spoken: String,
    reply_started_ms: u64,
    /// When synthesized audio first reached the sink for this reply
    speaking_since_ms: Option<u64>,
    /// Session audio clock: end timestamp of the latest inbound frame
    now_ms: u64,
}

impl SessionOrchestrator {
    /// Load state-heavy resources before any session starts. Idempotence
    /// is provided by the lifecycle manager, which caches the result.
    pub fn prewarm(config: &ProviderConfig) -> Result<Arc<EnergyVadModel>> {
        prewarm_vad(&config.vad).map_err(Into::into)
    }

    /// Wire the component graph for a new session. Must be called inside
    /// a tokio runtime; metric aggregation starts immediately.
    pub fn new(
        stages: StageSet,
        provider: ProviderConfig,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let voice = provider.tts.voice_settings().map_err(parley_core::Error::from)?;
        let session = Session::new();
        let collector = MetricsCollector::new(session.id.clone());
        let metrics = collector.handle();
        let vad = VadSession::new(Arc::clone(&stages.vad_model), provider.vad.clone());
        // Replaced with a live channel when `run` starts.
        let (events_tx, _) = mpsc::channel(1);

        Ok(Self {
            session,
            stages,
            provider,
            config,
            voice,
            collector,
            metrics,
            vad,
            events_tx,
            epoch: 0,
            stt_tx: None,
            stt_task: None,
            reply_task: None,
            synth_task: Arc::new(Mutex::new(None)),
            pending_partial: None,
            reply_full: String::new(),
            reply_spoken: String::new(),
            reply_started_ms: 0,
            speaking_since_ms: None,
            now_ms: 0,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drive the session until the transport closes or shutdown is
    /// signalled. Always produces exactly one usage summary, returned
    /// with the closed session for history inspection.
    pub async fn run(
        mut self,
        mut source: Box<dyn AudioSource>,
        mut sink: Box<dyn AudioSink>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (UsageSummary, Session) {
        let (events_tx, mut events_rx) = mpsc::channel(256);
        self.events_tx = events_tx;
        self.session.connection = ConnectionState::Connected;
        tracing::info!(session_id = %self.session.id, "session started");

        loop {
            tokio::select! {
                frame = source.next_frame() => {
                    match frame {
                        Some(frame) => {
                            if let Err(err) = self.on_frame(frame).await {
                                tracing::error!(session_id = %self.session.id, error = %err, "frame handling failed");
                            }
                        }
                        None => {
                            tracing::info!(session_id = %self.session.id, "transport closed");
                            self.session.connection = ConnectionState::Disconnected;
                            break;
                        }
                    }
                }
                Some(msg) = events_rx.recv() => {
                    if let Err(err) = self.on_stage_msg(msg, &mut sink).await {
                        tracing::error!(session_id = %self.session.id, error = %err, "event handling failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the worker is going away too.
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(session_id = %self.session.id, "shutdown requested");
                        break;
                    }
                }
            }
            if self.session.is_closed() {
                break;
            }
        }

        self.close(&mut sink).await
    }

    async fn on_frame(&mut self, frame: AudioFrame) -> Result<()> {
        self.now_ms = frame.timestamp_ms + frame.duration_ms();
        let frame = match &self.stages.suppressor {
            Some(suppressor) => suppressor.process(frame),
            None => frame,
        };

        if let Some(event) = self.vad.process(&frame) {
            self.on_vad_event(event).await?;
        }

        if self.session.turn_state() == TurnState::Recognizing {
            if let Some(tx) = &self.stt_tx {
                if tx.send(frame).await.is_err() {
                    // Recognizer ended on its own; its final utterance (or
                    // closure) is already in flight as an event.
                    self.stt_tx = None;
                }
            }
            self.maybe_yield();
        }
        Ok(())
    }

    /// Silence-driven yield check, consulted once per frame while the
    /// participant holds the floor. Advisory input only; the actual turn
    /// transition happens when the recognizer finalizes.
    fn maybe_yield(&mut self) {
        if self.stt_tx.is_none() || self.vad.is_speaking() {
            return;
        }
        let silence_ms = self.vad.silence_since_speech_ms(self.now_ms);
        if silence_ms == 0 {
            return;
        }
        let decision = self
            .stages
            .turn_detector
            .evaluate(self.pending_partial.as_ref(), silence_ms);
        if decision == TurnDecision::Yield {
            self.metrics.record(MetricEvent::new(
                StageKind::TurnDetector,
                "yield_silence_ms",
                silence_ms as f64,
                self.now_ms,
            ));
            // Closing the input finalizes the recognition.
            self.stt_tx = None;
        }
    }

    async fn on_vad_event(&mut self, event: VadEvent) -> Result<()> {
        match event {
            VadEvent::SpeechStart { timestamp_ms } => match self.session.turn_state() {
                TurnState::Listening => {
                    self.session.transition(TurnState::Recognizing)?;
                    self.start_recognizer(timestamp_ms);
                }
                TurnState::Thinking | TurnState::Speaking => {
                    self.handle_barge_in(timestamp_ms).await?;
                }
                _ => {}
            },
            VadEvent::SpeechEnd {
                timestamp_ms,
                duration_ms,
            } => {
                self.metrics.record(MetricEvent::new(
                    StageKind::Vad,
                    "speech_duration_ms",
                    duration_ms as f64,
                    timestamp_ms,
                ));
            }
        }
        Ok(())
    }

    /// Barge-in: the participant started speaking while the agent held
    /// the floor. Not an error; a normal state-machine transition.
    async fn handle_barge_in(&mut self, timestamp_ms: u64) -> Result<()> {
        if let Some(started) = self.speaking_since_ms {
            if timestamp_ms.saturating_sub(started) < self.config.grace_period_ms {
                return Ok(());
            }
        }
        tracing::info!(
            session_id = %self.session.id,
            at_ms = timestamp_ms,
            "barge-in, cancelling agent reply"
        );
        self.metrics.record(MetricEvent::new(
            StageKind::Orchestrator,
            "interruption",
            1.0,
            timestamp_ms,
        ));

        self.cancel_reply();
        // What was actually spoken stays in history, marked non-final.
        if !self.reply_spoken.is_empty() {
            self.session.record(Utterance::partial(
                Speaker::Agent,
                self.reply_spoken.clone(),
                self.reply_started_ms,
            ));
        }
        self.reset_reply_state();

        self.session.transition(TurnState::Interrupted)?;
        self.session.transition(TurnState::Recognizing)?;
        self.start_recognizer(timestamp_ms);
        Ok(())
    }

    /// Bump the epoch and abort the in-flight reply pipeline, including
    /// its synthesis sub-task so queued sentences are never sent to the
    /// provider. Any output still queued is dropped by the epoch check
    /// on arrival.
    fn cancel_reply(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if let Some(task) = self.synth_task.lock().take() {
            task.abort();
        }
    }

    fn reset_reply_state(&mut self) {
        self.reply_full.clear();
        self.reply_spoken.clear();
        self.speaking_since_ms = None;
        self.reply_task = None;
    }

    fn start_recognizer(&mut self, started_at_ms: u64) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.pending_partial = None;

        let (tx, rx) = mpsc::channel::<AudioFrame>(64);
        self.stt_tx = Some(tx);

        let recognizer = Arc::clone(&self.stages.recognizer);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let input = Box::pin(ReceiverStream::new(rx));
            let mut stream = recognizer.transcribe_stream(input);
            while let Some(item) = stream.next().await {
                let msg = match item {
                    Ok(utterance) => StageMsg::Transcript { epoch, utterance },
                    Err(err) => StageMsg::StageFailed {
                        epoch,
                        stage: StageKind::Recognizer,
                        message: err.to_string(),
                    },
                };
                if events.send(msg).await.is_err() {
                    return;
                }
            }
            let _ = events.send(StageMsg::RecognizerClosed { epoch }).await;
        });
        self.stt_task = Some(task);
        tracing::debug!(
            session_id = %self.session.id,
            started_at_ms,
            "recognition started"
        );
    }

    async fn on_stage_msg(
        &mut self,
        msg: StageMsg,
        sink: &mut Box<dyn AudioSink>,
    ) -> Result<()> {
        // Output of a cancelled or superseded call.
        if msg.epoch() != self.epoch {
            return Ok(());
        }
        match msg {
            StageMsg::Transcript { utterance, .. } => self.on_transcript(utterance),
            StageMsg::RecognizerClosed { .. } => {
                // Stream ended without a final utterance; nothing usable.
                self.stt_tx = None;
                self.pending_partial = None;
                if self.session.turn_state() == TurnState::Recognizing {
                    self.session.transition(TurnState::Listening)?;
                }
                Ok(())
            }
            StageMsg::ReplyDelta { text, .. } => {
                self.reply_full.push_str(&text);
                Ok(())
            }
            StageMsg::ReplyDone { full_text, .. } => {
                self.reply_full = full_text;
                Ok(())
            }
            StageMsg::SynthFrame { frame, .. } => {
                if self.session.turn_state() == TurnState::Thinking {
                    self.session.transition(TurnState::Speaking)?;
                    self.speaking_since_ms = Some(self.now_ms);
                }
                if self.session.turn_state() == TurnState::Speaking {
                    sink.write_frame(frame).await?;
                }
                Ok(())
            }
            StageMsg::SentenceSpoken { text, .. } => {
                if !self.reply_spoken.is_empty() {
                    self.reply_spoken.push(' ');
                }
                self.reply_spoken.push_str(&text);
                Ok(())
            }
            StageMsg::SynthDone { .. } => self.on_reply_complete(),
            StageMsg::StageFailed { stage, message, .. } => {
                self.on_stage_failure(stage, message, sink).await
            }
        }
    }

    fn on_transcript(&mut self, utterance: Utterance) -> Result<()> {
        if !utterance.is_final {
            self.pending_partial = Some(utterance);
            return Ok(());
        }

        self.pending_partial = None;
        self.stt_tx = None;

        if utterance.is_empty() {
            if self.session.turn_state() == TurnState::Recognizing {
                self.session.transition(TurnState::Listening)?;
            }
            return Ok(());
        }

        self.metrics.record(MetricEvent::new(
            StageKind::Recognizer,
            "final_transcript_words",
            utterance.word_count() as f64,
            self.now_ms,
        ));
        self.session.record(utterance);

        if self.session.turn_state() == TurnState::Recognizing {
            self.session.transition(TurnState::Thinking)?;
            self.spawn_reply();
        }
        Ok(())
    }

    fn spawn_reply(&mut self) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.reply_full.clear();
        self.reply_spoken.clear();
        self.reply_started_ms = self.now_ms;
        self.speaking_since_ms = None;

        let request = GenerateRequest {
            persona: self.provider.persona.clone(),
            history: self.session.history().to_vec(),
            max_tokens: self.provider.generator.max_tokens,
            temperature: self.provider.generator.temperature,
        };
        let retry = RetryPolicy {
            max_retries: self.provider.generator.max_retries,
            initial_backoff: Duration::from_millis(self.provider.generator.initial_backoff_ms),
        };
        let generator = Arc::clone(&self.stages.generator);
        let synthesizer = Arc::clone(&self.stages.synthesizer);
        let voice = self.voice.clone();
        let events = self.events_tx.clone();
        let metrics = self.metrics.clone();
        let now_ms = self.now_ms;

        let task = tokio::spawn(run_reply_pipeline(
            epoch,
            request,
            retry,
            generator,
            synthesizer,
            voice,
            events,
            metrics,
            now_ms,
            Arc::clone(&self.synth_task),
        ));
        self.reply_task = Some(task);
    }

    fn on_reply_complete(&mut self) -> Result<()> {
        if !self.reply_full.is_empty() {
            self.session.record(Utterance::final_(
                Speaker::Agent,
                self.reply_full.clone(),
                self.reply_started_ms,
                self.now_ms,
            ));
        }
        self.reset_reply_state();
        match self.session.turn_state() {
            // Thinking covers the empty-reply case where no audio flowed.
            TurnState::Speaking | TurnState::Thinking => {
                self.session.transition(TurnState::Listening)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// A stage exhausted its retries. Recover locally: speak a fallback
    /// through the normal synthesis path and return to listening. The
    /// session is not torn down for a single stage failure.
    async fn on_stage_failure(
        &mut self,
        stage: StageKind,
        message: String,
        sink: &mut Box<dyn AudioSink>,
    ) -> Result<()> {
        tracing::error!(
            session_id = %self.session.id,
            stage = %stage,
            error = %message,
            "stage failed after retries"
        );
        self.metrics.record(
            MetricEvent::new(StageKind::Orchestrator, "stage_failure", 1.0, self.now_ms)
                .with_data("stage", stage.as_str()),
        );

        self.cancel_reply();
        self.stt_tx = None;
        if let Some(task) = self.stt_task.take() {
            task.abort();
        }
        self.pending_partial = None;

        match stage {
            StageKind::Recognizer | StageKind::Generator | StageKind::Synthesizer => {
                self.speak_fallback(sink).await;
            }
            _ => {}
        }
        self.reset_reply_state();

        match self.session.turn_state() {
            TurnState::Recognizing | TurnState::Thinking | TurnState::Speaking => {
                self.session.transition(TurnState::Listening)?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn speak_fallback(&mut self, sink: &mut Box<dyn AudioSink>) {
        let text = self.provider.fallback_reply.clone();
        match self.stages.synthesizer.synthesize(&text, &self.voice).await {
            Ok(frame) => {
                if sink.write_frame(frame).await.is_ok() {
                    self.metrics.record(MetricEvent::new(
                        StageKind::Synthesizer,
                        "characters_synthesized",
                        text.chars().count() as f64,
                        self.now_ms,
                    ));
                    self.session.record(Utterance::final_(
                        Speaker::Agent,
                        text,
                        self.now_ms,
                        self.now_ms,
                    ));
                }
            }
            Err(err) => {
                tracing::error!(
                    session_id = %self.session.id,
                    error = %err,
                    "fallback synthesis failed"
                );
            }
        }
    }

    /// Flush in-flight output, finalize metrics, and produce the usage
    /// summary. Runs on every exit path.
    async fn close(mut self, sink: &mut Box<dyn AudioSink>) -> (UsageSummary, Session) {
        self.cancel_reply();
        self.stt_tx = None;
        if let Some(task) = self.stt_task.take() {
            task.abort();
        }

        if !self.reply_spoken.is_empty() {
            self.session.record(Utterance::partial(
                Speaker::Agent,
                self.reply_spoken.clone(),
                self.reply_started_ms,
            ));
        }

        if !self.session.is_closed() {
            if let Err(err) = self.session.transition(TurnState::Closed) {
                tracing::warn!(session_id = %self.session.id, error = %err, "close transition");
            }
        }
        if let Err(err) = sink.flush().await {
            tracing::warn!(session_id = %self.session.id, error = %err, "sink flush failed");
        }

        tracing::info!(
            session_id = %self.session.id,
            utterances = self.session.history().len(),
            "session closed"
        );
        let summary = self.collector.finish().await;
        (summary, self.session)
    }
}

/// Generator -> sentence buffer -> per-sentence synthesis, as one
/// abortable task. Synthesizing sentence-by-sentence keeps the exact
/// spoken-text audit trail the barge-in path needs.
#[allow(clippy::too_many_arguments)]
async fn run_reply_pipeline(
    epoch: u64,
    request: GenerateRequest,
    retry: RetryPolicy,
    generator: Arc<dyn ResponseGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice: VoiceSettings,
    events: mpsc::Sender<StageMsg>,
    metrics: MetricsHandle,
    now_ms: u64,
    synth_slot: Arc<Mutex<Option<JoinHandle<()>>>>,
) {
    metrics.record(MetricEvent::new(
        StageKind::Generator,
        "generation_call",
        1.0,
        now_ms,
    ));

    let (sentence_tx, mut sentence_rx) = mpsc::channel::<String>(16);
    let synth_events = events.clone();
    let synth_metrics = metrics.clone();
    let synth_task = tokio::spawn(async move {
        while let Some(sentence) = sentence_rx.recv().await {
            let result = with_retries(retry, StageKind::Synthesizer, || {
                synthesizer.synthesize(&sentence, &voice)
            })
            .await;
            match result {
                Ok(frame) => {
                    synth_metrics.record(MetricEvent::new(
                        StageKind::Synthesizer,
                        "characters_synthesized",
                        sentence.chars().count() as f64,
                        now_ms,
                    ));
                    if synth_events
                        .send(StageMsg::SynthFrame { epoch, frame })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    if synth_events
                        .send(StageMsg::SentenceSpoken {
                            epoch,
                            text: sentence,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => {
                    let _ = synth_events
                        .send(StageMsg::StageFailed {
                            epoch,
                            stage: StageKind::Synthesizer,
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
        let _ = synth_events.send(StageMsg::SynthDone { epoch }).await;
    });
    // No await between spawn and store, so an abort cannot slip between.
    *synth_slot.lock() = Some(synth_task);

    let started = Instant::now();
    let mut attempt = 0u32;
    let mut backoff = retry.initial_backoff;
    let mut full = String::new();
    let mut buffer = SentenceBuffer::new();
    let mut saw_first_delta = false;

    'call: loop {
        let mut stream = generator.generate_stream(request.clone());
        let mut emitted_any = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    emitted_any = true;
                    if !chunk.text.is_empty() {
                        if !saw_first_delta {
                            saw_first_delta = true;
                            metrics.record(MetricEvent::new(
                                StageKind::Generator,
                                "ttft_ms",
                                started.elapsed().as_millis() as f64,
                                now_ms,
                            ));
                        }
                        full.push_str(&chunk.text);
                        if events
                            .send(StageMsg::ReplyDelta {
                                epoch,
                                text: chunk.text.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        for sentence in buffer.push(&chunk.text) {
                            if sentence_tx.send(sentence).await.is_err() {
                                return;
                            }
                        }
                    }
                    if chunk.is_final {
                        break 'call;
                    }
                }
                // Whole-call retry is only safe before any delta reached
                // the participant-facing pipeline.
                Err(err) if !emitted_any && err.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %err, attempt, "generator call failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    continue 'call;
                }
                Err(err) => {
                    let _ = events
                        .send(StageMsg::StageFailed {
                            epoch,
                            stage: StageKind::Generator,
                            message: err.to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
        // Stream ended without a completion marker; treat as complete.
        break;
    }

    metrics.record(MetricEvent::new(
        StageKind::Generator,
        "tokens_generated",
        generator.estimate_tokens(&full) as f64,
        now_ms,
    ));
    if let Some(rest) = buffer.flush() {
        if sentence_tx.send(rest).await.is_err() {
            return;
        }
    }
    if events
        .send(StageMsg::ReplyDone {
            epoch,
            full_text: full,
        })
        .await
        .is_err()
    {
        return;
    }
    drop(sentence_tx);
    let synth_task = synth_slot.lock().take();
    if let Some(task) = synth_task {
        let _ = task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_recovers() {
        let attempts = AtomicU32::new(0);
        let result = with_retries(
            RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_millis(50),
            },
            StageKind::Generator,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::stage(StageKind::Generator, "transient"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retries_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retries(
            RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(10),
            },
            StageKind::Synthesizer,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::stage(StageKind::Synthesizer, "down")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retries_fatal_fails_fast() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retries(
            RetryPolicy {
                max_retries: 5,
                initial_backoff: Duration::from_millis(10),
            },
            StageKind::Generator,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::stage_fatal(StageKind::Generator, "bad request")) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stage_msg_epoch() {
        let msg = StageMsg::SynthDone { epoch: 7 };
        assert_eq!(msg.epoch(), 7);
        let msg = StageMsg::ReplyDelta {
            epoch: 3,
            text: "hi".into(),
        };
        assert_eq!(msg.epoch(), 3);
    }
}
