//! Speech recognition and synthesis interfaces.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::audio::{AudioFrame, VoiceSettings};
use crate::error::Result;
use crate::transcript::Utterance;

/// Speech-to-Text interface.
///
/// One call covers one participant turn: the implementation consumes the
/// turn's audio frames and yields partial utterances followed by a final
/// one. Dropping the input stream cancels recognition; a cancelled call
/// discards all partial state and must not corrupt subsequent turns.
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Stream transcription as audio arrives.
    ///
    /// Partial results have `is_final = false` and are superseded by the
    /// next fragment. The stream ends after the final utterance for the
    /// turn, or immediately if the input closed with no speech.
    fn transcribe_stream<'a>(
        &'a self,
        audio: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
    ) -> Pin<Box<dyn Stream<Item = Result<Utterance>> + Send + 'a>>;

    /// Languages this recognizer accepts, as BCP-47 tags.
    fn supported_languages(&self) -> &[String];

    /// Model name for logging
    fn model_name(&self) -> &str;

    fn supports_language(&self, tag: &str) -> bool {
        self.supported_languages().iter().any(|l| l == tag)
    }
}

/// Text-to-Speech interface.
///
/// Voice identity and output format are fixed for the session's lifetime.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize one complete piece of text into a single frame.
    ///
    /// The orchestrator calls this per sentence so it can account for
    /// exactly which text was spoken before an interruption.
    async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<AudioFrame>;

    /// Stream synthesis chunk-by-chunk. Cancellation (the caller dropping
    /// the output stream) must stop frame emission immediately.
    fn synthesize_stream<'a>(
        &'a self,
        text: Pin<Box<dyn Stream<Item = String> + Send + 'a>>,
        voice: &'a VoiceSettings,
    ) -> Pin<Box<dyn Stream<Item = Result<AudioFrame>> + Send + 'a>> {
        use futures::StreamExt;
        Box::pin(text.then(move |chunk| async move { self.synthesize(&chunk, voice).await }))
    }

    /// Model name for logging
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Channels, SampleRate};
    use crate::transcript::Speaker;
    use futures::StreamExt;

    struct FixedRecognizer {
        languages: Vec<String>,
    }

    impl SpeechRecognizer for FixedRecognizer {
        fn transcribe_stream<'a>(
            &'a self,
            _audio: Pin<Box<dyn Stream<Item = AudioFrame> + Send + 'a>>,
        ) -> Pin<Box<dyn Stream<Item = Result<Utterance>> + Send + 'a>> {
            Box::pin(futures::stream::once(async {
                Ok(Utterance::final_(Speaker::Participant, "fixed", 0, 100))
            }))
        }

        fn supported_languages(&self) -> &[String] {
            &self.languages
        }

        fn model_name(&self) -> &str {
            "fixed-stt"
        }
    }

    struct ToneSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for ToneSynthesizer {
        async fn synthesize(&self, text: &str, voice: &VoiceSettings) -> Result<AudioFrame> {
            Ok(AudioFrame::new(
                vec![0.1; text.len() * 16],
                voice.sample_rate,
                Channels::Mono,
                0,
            ))
        }

        fn model_name(&self) -> &str {
            "tone-tts"
        }
    }

    #[test]
    fn test_supports_language() {
        let stt = FixedRecognizer {
            languages: vec!["en-US".to_string()],
        };
        assert!(stt.supports_language("en-US"));
        assert!(!stt.supports_language("hi-IN"));
    }

    #[tokio::test]
    async fn test_default_synthesize_stream() {
        let tts = ToneSynthesizer;
        let voice = VoiceSettings {
            sample_rate: SampleRate::Hz16000,
            ..Default::default()
        };
        let text = Box::pin(futures::stream::iter(vec![
            "one".to_string(),
            "two".to_string(),
        ]));
        let frames: Vec<_> = tts.synthesize_stream(text, &voice).collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.is_ok()));
    }
}
