// Inbound message parsing for the transcription stream.
//
// Every message is JSON. Transcript-bearing ones carry
// `{ channel: { alternatives: [ { transcript } ] }, is_final }`; everything
// else (metadata, service error reports) is non-transcript and skipped.

use super::TranscriptEvent;
use serde::Deserialize;
use serde_json::Value;

/// A message that was not JSON at all.
///
/// Never fatal: the read loop logs the failure and keeps the session open.
#[derive(Debug, thiserror::Error)]
#[error("malformed transcription message: {0}")]
pub struct ProtocolError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
struct ListenMessage {
    channel: ListenChannel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
}

/// Parse one inbound message.
///
/// `Ok(Some)` for a transcript with non-empty text, `Ok(None)` for valid
/// JSON that is not a transcript (including the empty transcripts the
/// service sends between utterances), `Err` when the payload is not JSON.
pub fn parse_listen_message(raw: &str) -> Result<Option<TranscriptEvent>, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;

    let message = match ListenMessage::deserialize(&value) {
        Ok(message) => message,
        Err(_) => {
            report_non_transcript(&value);
            return Ok(None);
        }
    };

    let Some(alternative) = message.channel.alternatives.first() else {
        return Ok(None);
    };
    if alternative.transcript.is_empty() {
        return Ok(None);
    }

    Ok(Some(TranscriptEvent {
        text: alternative.transcript.clone(),
        is_final: message.is_final,
    }))
}

fn report_non_transcript(value: &Value) {
    match value.get("type").and_then(Value::as_str) {
        Some("Error") => {
            let detail = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            crate::warn!("Transcription service reported an error: {}", detail);
        }
        Some(kind) => crate::trace!("Ignoring non-transcript message: {}", kind),
        None => crate::trace!("Ignoring non-transcript message"),
    }
}
