//! Streaming detect-intent wire types.
//!
//! One [`StreamingRequest`] per outbound message: the first carries the
//! session path, query input, and output audio config; every later one
//! carries a single chunk of caller audio.

use serde::{Deserialize, Serialize};

use voxbridge_core::types::QueryResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_input: Option<QueryInput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_config: Option<OutputAudioConfig>,

    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub input_audio: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventInput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_config: Option<InputAudioConfig>,
}

/// Named trigger event that opens a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub name: String,
    pub language_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputAudioConfig {
    pub audio_encoding: InputAudioEncoding,
    pub sample_rate_hertz: u32,
    pub language_code: String,
    pub single_utterance: bool,
    #[serde(default)]
    pub interim_results: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputAudioEncoding {
    #[serde(rename = "AUDIO_ENCODING_MULAW")]
    Mulaw,
    #[serde(rename = "AUDIO_ENCODING_LINEAR_16")]
    Linear16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputAudioConfig {
    pub audio_encoding: OutputAudioEncoding,
    pub sample_rate_hertz: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputAudioEncoding {
    #[serde(rename = "OUTPUT_AUDIO_ENCODING_LINEAR_16")]
    Linear16,
}

impl StreamingRequest {
    /// Setup message for the first turn of a call: fires the trigger event.
    pub fn first_turn(session: &str, event: &str, language_code: &str, output_rate: u32) -> Self {
        Self {
            session: session.to_string(),
            query_input: Some(QueryInput {
                event: Some(EventInput {
                    name: event.to_string(),
                    language_code: language_code.to_string(),
                }),
                audio_config: None,
            }),
            output_audio_config: Some(OutputAudioConfig::linear16(output_rate)),
            input_audio: Vec::new(),
        }
    }

    /// Setup message for later turns: stream 8 kHz µ-law, one utterance.
    pub fn continuation(session: &str, language_code: &str, output_rate: u32) -> Self {
        Self {
            session: session.to_string(),
            query_input: Some(QueryInput {
                event: None,
                audio_config: Some(InputAudioConfig {
                    audio_encoding: InputAudioEncoding::Mulaw,
                    sample_rate_hertz: 8000,
                    language_code: language_code.to_string(),
                    single_utterance: true,
                    interim_results: false,
                }),
            }),
            output_audio_config: Some(OutputAudioConfig::linear16(output_rate)),
            input_audio: Vec::new(),
        }
    }

    pub fn audio(chunk: &[u8]) -> Self {
        Self {
            input_audio: chunk.to_vec(),
            ..Self::default()
        }
    }

    pub fn is_setup(&self) -> bool {
        self.query_input.is_some()
    }
}

impl OutputAudioConfig {
    pub fn linear16(sample_rate_hertz: u32) -> Self {
        Self {
            audio_encoding: OutputAudioEncoding::Linear16,
            sample_rate_hertz,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recognition_result: Option<RecognitionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_result: Option<QueryResult>,

    /// LINEAR16 response audio, possibly wrapped in a WAV container.
    #[serde(default, with = "b64", skip_serializing_if = "Vec::is_empty")]
    pub output_audio: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    #[serde(default)]
    pub transcript: String,

    #[serde(default)]
    pub is_final: bool,
}

impl StreamingResponse {
    /// Non-empty recognition transcript, the barge-in signal.
    pub fn interim_transcript(&self) -> Option<&str> {
        self.recognition_result
            .as_ref()
            .map(|r| r.transcript.as_str())
            .filter(|t| !t.is_empty())
    }

    /// The query result when it asks to end the interaction.
    pub fn ending_result(&self) -> Option<&QueryResult> {
        self.query_result.as_ref().filter(|q| q.ends_interaction())
    }
}

/// Base64 (standard alphabet) for byte fields; `null` and absent decode to empty.
mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
