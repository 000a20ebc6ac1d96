//! Deterministic in-process providers.
//!
//! Used for tests and local runs without any remote services. Each
//! provider plays back a script or derives its output from its input, so
//! full sessions can be driven end to end with predictable results.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_core::{
    AudioFrame, AudioSink, AudioSource, Channels, NoiseSuppressor, GenerateRequest, ReplyChunk,
    ResponseGenerator, Result, SampleRate, Speaker, SpeechRecognizer, SpeechSynthesizer,
    Transport, Utterance, VoiceSettings,
};

/// Plays back scripted transcripts, one per recognition call.
///
/// Each call consumes the turn's audio, emits a partial for the first
/// word and then the full line as the final utterance, timestamped from
/// the frames actually received. Past the end of the script every turn
/// transcribes as "hello", so unscripted sessions still make progress.
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<String>>,
    languages: Vec<String>,
}

impl ScriptedRecognizer {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            script: Mutex::new(lines.into()),
            languages: vec!["en-US".to_string()],
        }
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn transcribe_stream<'a>(
        &'a self,
        audio: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<Utterance>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            let mut audio = audio;
            let mut started_at = None;
            let mut ended_at = 0;
            let mut emitted_partial = false;
            let line = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| "hello".to_string());

            while let Some(frame) = audio.next().await {
                if started_at.is_none() {
                    started_at = Some(frame.timestamp_ms);
                }
                ended_at = frame.timestamp_ms + frame.duration_ms();

                if !emitted_partial {
                    if let (Some(first_word), Some(start)) =
                        (line.split_whitespace().next(), started_at)
                    {
                        emitted_partial = true;
                        yield Utterance::partial(Speaker::Participant, first_word, start);
                    }
                }
            }

            if let Some(start) = started_at {
                yield Utterance::final_(Speaker::Participant, line, start, ended_at);
            }
        })
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }

    fn model_name(&self) -> &str {
        "scripted-stt"
    }
}

/// Streams scripted replies word by word.
///
/// With an empty script it echoes the last participant utterance, so a
/// session never stalls for lack of material. An optional per-word delay
/// makes generation observable mid-flight in timing-sensitive tests.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<String>>,
    word_delay: Duration,
}

impl ScriptedGenerator {
    pub fn new(lines: Vec<String>) -> Self {
        Self {
            script: Mutex::new(lines.into()),
            word_delay: Duration::ZERO,
        }
    }

    pub fn with_word_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    fn next_reply(&self, request: &GenerateRequest) -> String {
        if let Some(line) = self.script.lock().pop_front() {
            return line;
        }
        request
            .history
            .iter()
            .rev()
            .find(|u| u.speaker == Speaker::Participant)
            .map(|u| format!("You said {}.", u.text))
            .unwrap_or_else(|| "I'm listening.".to_string())
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    fn generate_stream<'a>(
        &'a self,
        request: GenerateRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<ReplyChunk>> + Send + 'a>> {
        let reply = self.next_reply(&request);
        let delay = self.word_delay;
        Box::pin(async_stream::stream! {
            for word in reply.split_inclusive(' ') {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(ReplyChunk::delta(word));
            }
            yield Ok(ReplyChunk::done());
        })
    }

    fn model_name(&self) -> &str {
        "scripted-llm"
    }
}

/// Produces a constant-amplitude tone sized to the text.
pub struct ScriptedSynthesizer {
    /// Samples of audio per character of input text
    samples_per_char: usize,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self {
            samples_per_char: 160,
        }
    }
}

impl Default for ScriptedSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<AudioFrame> {
        let len = text.chars().count().max(1) * self.samples_per_char;
        Ok(AudioFrame::new(
            vec![0.1; len],
            voice.sample_rate,
            Channels::Mono,
            0,
        ))
    }

    fn model_name(&self) -> &str {
        "scripted-tts"
    }
}

/// Passthrough suppressor for when noise suppression is enabled with no
/// real implementation wired.
pub struct NullSuppressor;

impl NoiseSuppressor for NullSuppressor {
    fn process(&self, frame: AudioFrame) -> AudioFrame {
        frame
    }

    fn name(&self) -> &str {
        "null-suppressor"
    }
}

/// Audio source fed by a channel. Tests hold the sender and push frames
/// to drive the session clock.
pub struct ChannelSource {
    rx: mpsc::Receiver<AudioFrame>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<AudioFrame>) -> Self {
        Self { rx }
    }

    pub fn pair(capacity: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        self.rx.recv().await
    }
}

/// Sink that retains everything written to it.
#[derive(Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<AudioFrame>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<AudioFrame> {
        self.frames.lock().clone()
    }

    pub fn written_ms(&self) -> u64 {
        self.frames.lock().iter().map(|f| f.duration_ms()).sum()
    }
}

#[async_trait]
impl AudioSink for MemorySink {
    async fn write_frame(&mut self, frame: AudioFrame) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Transport that replays prerecorded frames in real time and captures
/// agent output in a [`MemorySink`].
pub struct LoopbackTransport {
    frames: Vec<AudioFrame>,
    sink: MemorySink,
}

impl LoopbackTransport {
    pub fn new(frames: Vec<AudioFrame>) -> Self {
        Self {
            frames,
            sink: MemorySink::new(),
        }
    }

    /// Frames of silence covering `duration_ms` at 16 kHz, 20 ms apart.
    pub fn silence(duration_ms: u64) -> Vec<AudioFrame> {
        (0..duration_ms / 20)
            .map(|i| AudioFrame::silence(20, SampleRate::Hz16000, i * 20))
            .collect()
    }

    pub fn sink(&self) -> MemorySink {
        self.sink.clone()
    }
}

struct ReplaySource {
    frames: VecDeque<AudioFrame>,
}

#[async_trait]
impl AudioSource for ReplaySource {
    async fn next_frame(&mut self) -> Option<AudioFrame> {
        let frame = self.frames.pop_front()?;
        // Pace playback at the frame rate
        tokio::time::sleep(Duration::from_millis(frame.duration_ms())).await;
        Some(frame)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self, room: &str) -> Result<(Box<dyn AudioSource>, Box<dyn AudioSink>)> {
        tracing::debug!(room, frames = self.frames.len(), "loopback transport connected");
        Ok((
            Box::new(ReplaySource {
                frames: self.frames.clone().into(),
            }),
            Box::new(self.sink.clone()),
        ))
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}
