//! End-to-end session flows over scripted providers.
//!
//! Frames are pushed through a channel source with paused-clock pacing,
//! so speech, silence, and barge-in timing are fully deterministic.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use parley_config::ProviderConfig;
use parley_core::{
    AudioFrame, Channels, Error, GenerateRequest, ReplyChunk, ResponseGenerator, Result,
    SampleRate, Session, Speaker, SpeechRecognizer, SpeechSynthesizer, StageKind, TurnState,
    UsageSummary, Utterance, VoiceSettings,
};
use parley_pipeline::{prewarm_vad, HeuristicTurnDetector, OrchestratorConfig, SessionOrchestrator, StageSet};
use parley_providers::{ChannelSource, MemorySink, ScriptedGenerator, ScriptedRecognizer, ScriptedSynthesizer};

fn loud(timestamp_ms: u64) -> AudioFrame {
    AudioFrame::new(vec![0.4; 320], SampleRate::Hz16000, Channels::Mono, timestamp_ms)
}

fn silent(timestamp_ms: u64) -> AudioFrame {
    AudioFrame::silence(20, SampleRate::Hz16000, timestamp_ms)
}

fn provider_config() -> ProviderConfig {
    ProviderConfig {
        persona: "You are the front-desk assistant of a tennis club.".to_string(),
        ..Default::default()
    }
}

struct Harness {
    tx: tokio::sync::mpsc::Sender<AudioFrame>,
    sink: MemorySink,
    task: JoinHandle<(UsageSummary, Session)>,
    _shutdown: watch::Sender<bool>,
    clock_ms: u64,
}

impl Harness {
    fn start(stages: StageSet) -> Self {
        let orchestrator =
            SessionOrchestrator::new(stages, provider_config(), OrchestratorConfig::default())
                .expect("orchestrator");
        let (tx, source) = ChannelSource::pair(64);
        let sink = MemorySink::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(orchestrator.run(
            Box::new(source),
            Box::new(sink.clone()),
            shutdown_rx,
        ));
        Self {
            tx,
            sink,
            task,
            _shutdown: shutdown,
            clock_ms: 0,
        }
    }

    /// Send `n` frames 20 ms apart, advancing both the audio clock and
    /// the paused tokio clock so concurrent stages make progress.
    async fn feed(&mut self, n: usize, frame: fn(u64) -> AudioFrame) {
        for _ in 0..n {
            self.tx
                .send(frame(self.clock_ms))
                .await
                .expect("orchestrator stopped consuming frames");
            self.clock_ms += 20;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Let in-flight stages settle without feeding audio.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    async fn finish(self) -> (UsageSummary, Session) {
        drop(self.tx);
        self.task.await.expect("session task panicked")
    }
}

fn scripted_stages(
    transcripts: Vec<&str>,
    replies: Vec<&str>,
    reply_word_delay: Duration,
) -> StageSet {
    let config = provider_config();
    let vad_model = prewarm_vad(&config.vad).expect("vad");
    let mut generator =
        ScriptedGenerator::new(replies.into_iter().map(String::from).collect());
    if !reply_word_delay.is_zero() {
        generator = generator.with_word_delay(reply_word_delay);
    }
    StageSet {
        vad_model,
        recognizer: Arc::new(ScriptedRecognizer::new(
            transcripts.into_iter().map(String::from).collect(),
        )),
        generator: Arc::new(generator),
        synthesizer: Arc::new(ScriptedSynthesizer::new()),
        turn_detector: Arc::new(HeuristicTurnDetector::new(config.turn.clone())),
        suppressor: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_turn_conversation() {
    let stages = scripted_stages(
        vec!["hello"],
        vec!["Hi there. How can I help you today?"],
        Duration::ZERO,
    );
    let mut harness = Harness::start(stages);

    // One spoken turn, then enough silence to yield the floor.
    harness.feed(30, loud).await;
    harness.feed(50, silent).await;
    harness.settle().await;

    let sink = harness.sink.clone();
    let (summary, session) = harness.finish().await;

    let history = session.history();
    let participant: Vec<_> = history
        .iter()
        .filter(|u| u.speaker == Speaker::Participant && u.is_final)
        .collect();
    assert_eq!(participant.len(), 1);
    assert_eq!(participant[0].text, "hello");

    let agent: Vec<_> = history.iter().filter(|u| u.speaker == Speaker::Agent).collect();
    assert_eq!(agent.len(), 1);
    assert!(agent[0].is_final);
    assert_eq!(agent[0].text, "Hi there. How can I help you today?");

    assert_eq!(session.turn_state(), TurnState::Closed);
    assert_eq!(summary.generation_calls, 1);
    assert_eq!(summary.interruptions, 0);
    assert!(summary.speech_duration_ms > 0);
    assert!(summary.time_to_first_token_ms.is_some());
    assert!(sink.written_ms() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_cancels_reply_and_records_spoken_prefix() {
    let full_reply =
        "The club has nine courts. We open at seven every day. Memberships are billed monthly.";
    let stages = scripted_stages(
        vec!["tell me about the club", "actually wait"],
        vec![full_reply],
        Duration::from_millis(100),
    );
    let mut harness = Harness::start(stages);

    // Turn one, then silence until the floor yields and the agent starts.
    harness.feed(30, loud).await;
    harness.feed(45, silent).await;
    // The slow generator is still streaming; give it time to speak the
    // first sentence, then barge in before the second one lands.
    harness.feed(12, silent).await;
    let spoken_before_barge_in = harness.sink.written_ms();
    assert!(spoken_before_barge_in > 0, "agent should be speaking by now");

    harness.feed(25, loud).await;
    harness.feed(50, silent).await;
    harness.settle().await;

    let (summary, session) = harness.finish().await;

    assert_eq!(summary.interruptions, 1);

    let history = session.history();
    let interrupted: Vec<_> = history
        .iter()
        .filter(|u| u.speaker == Speaker::Agent && !u.is_final)
        .collect();
    assert_eq!(interrupted.len(), 1, "history: {history:?}");
    // Only what was actually synthesized before the cut, not the full reply
    assert!(interrupted[0].text.starts_with("The club has nine courts."));
    assert_ne!(interrupted[0].text, full_reply);

    // The second turn completed normally after the interruption.
    let finals: Vec<_> = history
        .iter()
        .filter(|u| u.speaker == Speaker::Participant && u.is_final)
        .collect();
    assert_eq!(finals.len(), 2);
    assert_eq!(finals[1].text, "actually wait");
    assert!(history
        .iter()
        .any(|u| u.speaker == Speaker::Agent && u.is_final));

    assert_eq!(summary.generation_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_close_still_produces_summary() {
    let stages = scripted_stages(vec![], vec![], Duration::ZERO);
    let harness = Harness::start(stages);

    let (summary, session) = harness.finish().await;
    assert_eq!(session.turn_state(), TurnState::Closed);
    assert_eq!(summary.generation_calls, 0);
    assert_eq!(summary.interruptions, 0);
    assert!(session.history().is_empty());
}

/// Generator that fails every call with a retryable error.
struct FlakyGenerator;

impl ResponseGenerator for FlakyGenerator {
    fn generate_stream<'a>(
        &'a self,
        _request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ReplyChunk>> + Send + 'a>> {
        Box::pin(futures::stream::iter(vec![Err(Error::stage(
            StageKind::Generator,
            "backend unavailable",
        ))]))
    }

    fn model_name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test(start_paused = true)]
async fn test_generator_failure_speaks_fallback() {
    let mut stages = scripted_stages(vec!["hello"], vec![], Duration::ZERO);
    stages.generator = Arc::new(FlakyGenerator);
    let mut harness = Harness::start(stages);

    harness.feed(30, loud).await;
    harness.feed(50, silent).await;
    harness.settle().await;

    let sink = harness.sink.clone();
    let (summary, session) = harness.finish().await;

    // Retries exhausted, fallback spoken through the normal synth path.
    let fallback = provider_config().fallback_reply;
    let agent: Vec<_> = session
        .history()
        .iter()
        .filter(|u| u.speaker == Speaker::Agent)
        .collect();
    assert_eq!(agent.len(), 1, "history: {:?}", session.history());
    assert_eq!(agent[0].text, fallback);
    assert!(sink.written_ms() > 0);

    // The failed call is still charged.
    assert_eq!(summary.generation_calls, 1);
}

/// Recognizer that fails every call with a retryable error.
struct FlakyRecognizer;

impl SpeechRecognizer for FlakyRecognizer {
    fn transcribe_stream<'a>(
        &'a self,
        _audio: Pin<Box<dyn futures::Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn futures::Stream<Item = Result<Utterance>> + Send + 'a>> {
        Box::pin(futures::stream::once(async {
            Err(Error::stage(StageKind::Recognizer, "stt backend down"))
        }))
    }

    fn supported_languages(&self) -> &[String] {
        &[]
    }

    fn model_name(&self) -> &str {
        "flaky-stt"
    }
}

#[tokio::test(start_paused = true)]
async fn test_recognizer_failure_speaks_fallback() {
    let mut stages = scripted_stages(vec![], vec![], Duration::ZERO);
    stages.recognizer = Arc::new(FlakyRecognizer);
    let mut harness = Harness::start(stages);

    harness.feed(30, loud).await;
    harness.feed(50, silent).await;
    harness.settle().await;

    let sink = harness.sink.clone();
    let (summary, session) = harness.finish().await;

    // The turn was lost, but the participant heard the apology.
    let fallback = provider_config().fallback_reply;
    let agent: Vec<_> = session
        .history()
        .iter()
        .filter(|u| u.speaker == Speaker::Agent)
        .collect();
    assert_eq!(agent.len(), 1, "history: {:?}", session.history());
    assert_eq!(agent[0].text, fallback);
    assert!(sink.written_ms() > 0);
    assert!(session
        .history()
        .iter()
        .all(|u| u.speaker != Speaker::Participant));
    assert_eq!(summary.generation_calls, 0);
}

/// Synthesizer that counts calls and takes a fixed time per sentence.
struct CountingSynthesizer {
    calls: Arc<std::sync::atomic::AtomicUsize>,
    delay: Duration,
}

#[async_trait::async_trait]
impl SpeechSynthesizer for CountingSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<AudioFrame> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(AudioFrame::new(
            vec![0.1; text.chars().count().max(1) * 160],
            voice.sample_rate,
            Channels::Mono,
            0,
        ))
    }

    fn model_name(&self) -> &str {
        "counting-tts"
    }
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_aborts_queued_synthesis() {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut stages = scripted_stages(
        vec!["tell me everything", "never mind"],
        vec!["One. Two. Three. Four. Five. Six."],
        Duration::ZERO,
    );
    stages.synthesizer = Arc::new(CountingSynthesizer {
        calls: Arc::clone(&calls),
        delay: Duration::from_millis(300),
    });
    let mut harness = Harness::start(stages);

    // Turn one yields mid-silence; all six sentences are queued at once
    // while the slow synthesizer works through them.
    harness.feed(30, loud).await;
    harness.feed(40, silent).await;
    harness.feed(25, loud).await;
    harness.feed(50, silent).await;
    harness.settle().await;

    let (summary, session) = harness.finish().await;

    assert_eq!(summary.interruptions, 1);
    // Sentences queued behind the cut are never sent to the provider.
    // Six from the first reply would mean the cancelled pipeline drained
    // its whole queue; the second turn adds one more on top.
    assert!(
        calls.load(std::sync::atomic::Ordering::SeqCst) < 6,
        "synthesis calls: {}",
        calls.load(std::sync::atomic::Ordering::SeqCst)
    );
    assert!(session
        .history()
        .iter()
        .any(|u| u.speaker == Speaker::Agent && !u.is_final));
}

#[tokio::test(start_paused = true)]
async fn test_silence_only_session_never_engages_stages() {
    let stages = scripted_stages(vec!["should not appear"], vec![], Duration::ZERO);
    let mut harness = Harness::start(stages);

    harness.feed(100, silent).await;
    let sink = harness.sink.clone();
    let (summary, session) = harness.finish().await;

    assert!(session.history().is_empty());
    assert_eq!(summary.generation_calls, 0);
    assert_eq!(summary.speech_duration_ms, 0);
    assert_eq!(sink.written_ms(), 0);
}
