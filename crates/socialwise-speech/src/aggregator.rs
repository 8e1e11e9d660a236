//! Folds parsed server messages into recognition text or synthesized audio.

use serde::Serialize;

use crate::error::{Result, SpeechError};
use crate::protocol::{RecognitionFragment, SynthesisFragment};

/// Final recognition result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

/// Incremental ASR view emitted once per data-bearing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionUpdate {
    /// Text carried by this message alone.
    pub fragment: String,
    /// Running text so far. Only authoritative when `is_final` is set.
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
}

/// Incremental TTS view emitted once per data-bearing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisUpdate {
    #[serde(skip)]
    pub audio: Vec<u8>,
    pub total_bytes: usize,
    pub is_final: bool,
}

/// ASR accumulator. Concatenates fragment text in arrival order without
/// separators and keeps the maximum confidence seen.
#[derive(Debug, Default)]
pub struct RecognitionAggregator {
    text: String,
    confidence: f32,
    fragments: usize,
    finished: bool,
}

impl RecognitionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: RecognitionFragment) -> Result<RecognitionUpdate> {
        if self.finished {
            return Err(SpeechError::InvalidState(
                "recognition fragment received after the final fragment".into(),
            ));
        }
        self.text.push_str(&fragment.text);
        self.confidence = self.confidence.max(fragment.confidence);
        self.fragments += 1;
        self.finished = fragment.is_final;

        Ok(RecognitionUpdate {
            fragment: fragment.text,
            text: self.text.clone(),
            confidence: self.confidence,
            is_final: self.finished,
        })
    }

    /// Running text, readable at any time.
    pub fn partial(&self) -> &str {
        &self.text
    }

    /// Final text. `None` until a fragment flagged final has been pushed.
    pub fn final_text(&self) -> Option<&str> {
        self.finished.then_some(self.text.as_str())
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn is_final(&self) -> bool {
        self.finished
    }

    pub fn finish(self) -> Result<Transcript> {
        if !self.finished {
            return Err(SpeechError::InvalidState(
                "recognition has not received its final fragment".into(),
            ));
        }
        Ok(Transcript {
            text: self.text,
            confidence: self.confidence,
        })
    }
}

/// TTS accumulator. Audio chunks are appended in arrival order.
#[derive(Debug, Default)]
pub struct SynthesisAggregator {
    audio: Vec<u8>,
    finished: bool,
}

impl SynthesisAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: SynthesisFragment) -> Result<SynthesisUpdate> {
        if self.finished {
            return Err(SpeechError::InvalidState(
                "synthesis fragment received after the final fragment".into(),
            ));
        }
        self.audio.extend_from_slice(&fragment.audio);
        self.finished = fragment.is_final;
        Ok(SynthesisUpdate {
            audio: fragment.audio,
            total_bytes: self.audio.len(),
            is_final: self.finished,
        })
    }

    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    pub fn is_final(&self) -> bool {
        self.finished
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if !self.finished {
            return Err(SpeechError::InvalidState(
                "synthesis has not received its final fragment".into(),
            ));
        }
        Ok(self.audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(text: &str, confidence: f32, is_final: bool) -> RecognitionFragment {
        RecognitionFragment {
            text: text.into(),
            confidence,
            is_final,
        }
    }

    #[test]
    fn test_partial_then_final() {
        let mut agg = RecognitionAggregator::new();

        let update = agg.push(rec("你好", 0.8, false)).unwrap();
        assert_eq!(update.text, "你好");
        assert!(!update.is_final);
        assert_eq!(agg.partial(), "你好");
        assert_eq!(agg.final_text(), None);

        let update = agg.push(rec("世界", 0.95, true)).unwrap();
        assert_eq!(update.fragment, "世界");
        assert!(update.is_final);
        assert_eq!(agg.final_text(), Some("你好世界"));
        assert!((agg.confidence() - 0.95).abs() < f32::EPSILON);

        let transcript = agg.finish().unwrap();
        assert_eq!(transcript.text, "你好世界");
        assert!((transcript.confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn test_confidence_is_max_not_last() {
        let mut agg = RecognitionAggregator::new();
        agg.push(rec("a", 0.9, false)).unwrap();
        agg.push(rec("b", 0.2, true)).unwrap();
        assert!((agg.confidence() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_no_separator_inserted() {
        let mut agg = RecognitionAggregator::new();
        agg.push(rec("hello", 0.5, false)).unwrap();
        agg.push(rec(" world", 0.5, false)).unwrap();
        agg.push(rec("", 0.0, true)).unwrap();
        assert_eq!(agg.final_text(), Some("hello world"));
        assert_eq!(agg.fragment_count(), 3);
    }

    #[test]
    fn test_finish_before_final_fails() {
        let mut agg = RecognitionAggregator::new();
        agg.push(rec("x", 0.5, false)).unwrap();
        assert!(matches!(agg.finish(), Err(SpeechError::InvalidState(_))));
    }

    #[test]
    fn test_push_after_final_fails() {
        let mut agg = RecognitionAggregator::new();
        agg.push(rec("x", 0.5, true)).unwrap();
        assert!(agg.push(rec("y", 0.5, false)).is_err());
        assert_eq!(agg.partial(), "x");
    }

    #[test]
    fn test_synthesis_concatenates_in_order() {
        let mut agg = SynthesisAggregator::new();
        let u = agg
            .push(SynthesisFragment {
                audio: vec![1, 2],
                is_final: false,
            })
            .unwrap();
        assert_eq!(u.total_bytes, 2);
        agg.push(SynthesisFragment {
            audio: vec![],
            is_final: false,
        })
        .unwrap();
        let u = agg
            .push(SynthesisFragment {
                audio: vec![3],
                is_final: true,
            })
            .unwrap();
        assert!(u.is_final);
        assert_eq!(u.audio, vec![3]);
        assert_eq!(agg.finish().unwrap(), vec![1, 2, 3]);
    }
}
