//! JSON envelopes exchanged with the iFlytek streaming endpoints.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use socialwise_core::config::{AsrConfig, TtsConfig};

use crate::chunker::AudioFrame;
use crate::error::{Result, SpeechError};

/// `data.status` value that marks the end of the remote output.
pub const COMPLETION_STATUS: u8 = 2;

/// Voice parameters for one synthesis request (protocol scale 0-100).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisOptions {
    pub voice: String,
    pub speed: u8,
    pub volume: u8,
    pub pitch: u8,
    pub background_sound: bool,
}

impl SynthesisOptions {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            speed: config.speed.min(100),
            volume: config.volume.min(100),
            pitch: config.pitch.min(100),
            background_sound: config.background_sound,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Map a speaking-rate multiplier (0.5 to 2.0, 1.0 is normal) onto the 0-100 scale.
    pub fn with_speed_factor(mut self, factor: f32) -> Self {
        let factor = if factor.is_finite() { factor } else { 1.0 };
        self.speed = (factor.clamp(0.5, 2.0) * 50.0).round().min(100.0) as u8;
        self
    }
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self::from_config(&TtsConfig::default())
    }
}

/// One parsed ASR response.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionFragment {
    pub text: String,
    /// Normalized to `[0, 1]`.
    pub confidence: f32,
    pub is_final: bool,
}

/// One parsed TTS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFragment {
    pub audio: Vec<u8>,
    pub is_final: bool,
}

/// Build the JSON text for one outbound ASR frame.
///
/// Only the first frame (sequence index 0) carries `common` and `business`.
pub fn recognition_frame(frame: &AudioFrame, app_id: &str, asr: &AsrConfig) -> Result<String> {
    let data = json!({
        "status": frame.status.code(),
        "format": audio_format(asr.sample_rate),
        "encoding": "raw",
        "audio": BASE64.encode(&frame.payload),
    });

    let envelope = if frame.sequence_index == 0 {
        json!({
            "common": { "app_id": app_id },
            "business": {
                "language": asr.language,
                "domain": asr.domain,
                "accent": asr.accent,
                "vad_eos": asr.vad_eos_ms,
            },
            "data": data,
        })
    } else {
        json!({ "data": data })
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Build the single TTS request envelope.
pub fn synthesis_request(
    text: &str,
    app_id: &str,
    tts: &TtsConfig,
    options: &SynthesisOptions,
) -> Result<String> {
    let envelope = json!({
        "common": { "app_id": app_id },
        "business": {
            "aue": "raw",
            "auf": audio_format(tts.sample_rate),
            "vcn": options.voice,
            "speed": options.speed,
            "volume": options.volume,
            "pitch": options.pitch,
            "bgs": u8::from(options.background_sound),
            "tte": tts.text_encoding,
        },
        "data": {
            "status": COMPLETION_STATUS,
            "text": BASE64.encode(text.as_bytes()),
        },
    });
    Ok(serde_json::to_string(&envelope)?)
}

fn audio_format(sample_rate: u32) -> String {
    format!("audio/L16;rate={sample_rate}")
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    data: Option<Data>,
}

#[derive(Debug, Deserialize)]
struct Data {
    #[serde(default)]
    status: Option<u8>,
    #[serde(default)]
    result: Option<AsrResult>,
    #[serde(default)]
    audio: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsrResult {
    #[serde(default)]
    ws: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    cw: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    w: String,
    #[serde(default)]
    sc: Option<f64>,
    #[serde(default)]
    wp: Option<Value>,
}

impl Candidate {
    /// `sc` if present, else a numeric `wp`; always divided by 100 and clamped.
    fn confidence(&self) -> Option<f32> {
        let raw = self.sc.or_else(|| self.wp.as_ref().and_then(Value::as_f64))?;
        Some(normalize_confidence(raw))
    }
}

/// Fixed normalization for remote word scores.
pub fn normalize_confidence(raw: f64) -> f32 {
    if !raw.is_finite() {
        return 0.0;
    }
    (raw / 100.0).clamp(0.0, 1.0) as f32
}

fn parse_envelope(message: &str) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_str(message)?;
    if envelope.code != 0 {
        tracing::debug!(code = envelope.code, sid = ?envelope.sid, "Speech service returned error");
        let message = if envelope.message.is_empty() {
            "unknown error".to_string()
        } else {
            envelope.message
        };
        return Err(SpeechError::Protocol {
            code: envelope.code,
            message,
        });
    }
    Ok(envelope)
}

/// Parse one ASR response. A non-zero `code` becomes [`SpeechError::Protocol`].
pub fn parse_recognition(message: &str) -> Result<RecognitionFragment> {
    let envelope = parse_envelope(message)?;
    let Some(data) = envelope.data else {
        return Ok(RecognitionFragment {
            text: String::new(),
            confidence: 0.0,
            is_final: false,
        });
    };

    let mut text = String::new();
    let mut confidence = 0.0f32;
    for word in data.result.iter().flat_map(|r| r.ws.iter()) {
        for candidate in &word.cw {
            text.push_str(&candidate.w);
            if let Some(score) = candidate.confidence() {
                confidence = confidence.max(score);
            }
        }
    }

    Ok(RecognitionFragment {
        text,
        confidence,
        is_final: data.status == Some(COMPLETION_STATUS),
    })
}

/// Parse one TTS response. Audio is base64-decoded.
pub fn parse_synthesis(message: &str) -> Result<SynthesisFragment> {
    let envelope = parse_envelope(message)?;
    let Some(data) = envelope.data else {
        return Ok(SynthesisFragment {
            audio: Vec::new(),
            is_final: false,
        });
    };
    let audio = match data.audio.as_deref() {
        Some(encoded) if !encoded.is_empty() => BASE64.decode(encoded)?,
        _ => Vec::new(),
    };
    Ok(SynthesisFragment {
        audio,
        is_final: data.status == Some(COMPLETION_STATUS),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk;

    fn decode(s: &str) -> Value {
        serde_json::from_str(s).unwrap()
    }

    #[test]
    fn test_first_frame_carries_business() {
        let asr = AsrConfig::default();
        let frames = chunk(&[0u8; 3000], 1280).unwrap();

        let first = decode(&recognition_frame(&frames[0], "app", &asr).unwrap());
        assert_eq!(first["common"]["app_id"], "app");
        assert_eq!(first["business"]["language"], "zh_cn");
        assert_eq!(first["business"]["domain"], "iat");
        assert_eq!(first["business"]["accent"], "mandarin");
        assert_eq!(first["business"]["vad_eos"], 10000);
        assert_eq!(first["data"]["status"], 0);
        assert_eq!(first["data"]["format"], "audio/L16;rate=16000");
        assert_eq!(first["data"]["encoding"], "raw");
        assert_eq!(
            BASE64.decode(first["data"]["audio"].as_str().unwrap()).unwrap().len(),
            1280
        );

        let last = decode(&recognition_frame(&frames[2], "app", &asr).unwrap());
        assert!(last.get("common").is_none());
        assert!(last.get("business").is_none());
        assert_eq!(last["data"]["status"], 2);
    }

    #[test]
    fn test_synthesis_request_envelope() {
        let tts = TtsConfig::default();
        let options = SynthesisOptions::default().with_voice("xiaofeng");
        let req = decode(&synthesis_request("你好", "app", &tts, &options).unwrap());
        assert_eq!(req["business"]["vcn"], "xiaofeng");
        assert_eq!(req["business"]["aue"], "raw");
        assert_eq!(req["business"]["auf"], "audio/L16;rate=16000");
        assert_eq!(req["business"]["bgs"], 0);
        assert_eq!(req["business"]["tte"], "UTF8");
        assert_eq!(req["data"]["status"], 2);
        let text = BASE64.decode(req["data"]["text"].as_str().unwrap()).unwrap();
        assert_eq!(String::from_utf8(text).unwrap(), "你好");
    }

    #[test]
    fn test_speed_factor_mapping() {
        assert_eq!(SynthesisOptions::default().with_speed_factor(1.0).speed, 50);
        assert_eq!(SynthesisOptions::default().with_speed_factor(2.0).speed, 100);
        assert_eq!(SynthesisOptions::default().with_speed_factor(0.5).speed, 25);
        assert_eq!(SynthesisOptions::default().with_speed_factor(9.0).speed, 100);
        assert_eq!(SynthesisOptions::default().with_speed_factor(0.1).speed, 25);
        assert_eq!(SynthesisOptions::default().with_speed_factor(f32::NAN).speed, 50);
    }

    #[test]
    fn test_parse_recognition_words() {
        let msg = r#"{"code":0,"message":"success","sid":"iat1","data":{"status":1,
            "result":{"ws":[{"cw":[{"w":"你","sc":80}]},{"cw":[{"w":"好","sc":60}]}]}}}"#;
        let frag = parse_recognition(msg).unwrap();
        assert_eq!(frag.text, "你好");
        assert!((frag.confidence - 0.8).abs() < 1e-6);
        assert!(!frag.is_final);
    }

    #[test]
    fn test_parse_recognition_final_and_wp_fallback() {
        let msg = r#"{"code":0,"data":{"status":2,"result":{"ws":[{"cw":[{"w":"。","wp":95}]}]}}}"#;
        let frag = parse_recognition(msg).unwrap();
        assert!(frag.is_final);
        assert!((frag.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_non_numeric_wp_is_ignored() {
        let msg = r#"{"code":0,"data":{"status":1,"result":{"ws":[{"cw":[{"w":"好","wp":"n"}]}]}}}"#;
        let frag = parse_recognition(msg).unwrap();
        assert_eq!(frag.confidence, 0.0);
    }

    #[test]
    fn test_normalization_is_fixed() {
        assert!((normalize_confidence(80.0) - 0.8).abs() < 1e-6);
        // Scores already on a 0-1 scale are still divided.
        assert!((normalize_confidence(0.5) - 0.005).abs() < 1e-6);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_error_code_is_protocol_error() {
        let err = parse_recognition(r#"{"code":10000,"message":"invalid parameter","sid":"x"}"#)
            .unwrap_err();
        match err {
            SpeechError::Protocol { code, message } => {
                assert_eq!(code, 10000);
                assert_eq!(message, "invalid parameter");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_is_decoding_error() {
        assert!(matches!(parse_recognition("not json"), Err(SpeechError::Decoding(_))));
        assert!(matches!(
            parse_synthesis(r#"{"code":0,"data":{"audio":"@@@","status":1}}"#),
            Err(SpeechError::Decoding(_))
        ));
    }

    #[test]
    fn test_parse_synthesis_audio() {
        let audio = BASE64.encode([1u8, 2, 3, 4]);
        let msg = format!(r#"{{"code":0,"data":{{"audio":"{audio}","status":2}}}}"#);
        let frag = parse_synthesis(&msg).unwrap();
        assert_eq!(frag.audio, vec![1, 2, 3, 4]);
        assert!(frag.is_final);
    }
}
