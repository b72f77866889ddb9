//! Voice registry built from the engine's /speakers listing.
//!
//! The engine reports either grouped speakers with per-style ids or flat
//! {id, name} descriptors; both are flattened into one selectable list.
//! The registry also holds the currently selected voice id, read by the
//! player at the moment a synthesis request is issued, so switching voices
//! never affects a request already in flight.

use std::sync::Mutex;

use serde::Deserialize;
use tracing::warn;

use super::client::EngineClient;

/// One selectable voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOption {
    pub id: u32,
    pub display_name: String,
    pub group_name: String,
}

#[derive(Debug, Deserialize)]
struct RawStyle {
    id: u32,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawSpeaker {
    name: String,
    #[serde(default)]
    styles: Vec<RawStyle>,
    #[serde(default)]
    id: Option<u32>,
}

fn flatten(raw: Vec<RawSpeaker>) -> Vec<VoiceOption> {
    let mut voices = Vec::new();
    for speaker in raw {
        if speaker.styles.is_empty() {
            if let Some(id) = speaker.id {
                voices.push(VoiceOption {
                    id,
                    display_name: speaker.name.clone(),
                    group_name: speaker.name,
                });
            }
        } else {
            for style in speaker.styles {
                voices.push(VoiceOption {
                    id: style.id,
                    display_name: style.name,
                    group_name: speaker.name.clone(),
                });
            }
        }
    }
    voices
}

pub struct SpeakerRegistry {
    voices: Vec<VoiceOption>,
    current: Mutex<u32>,
}

impl SpeakerRegistry {
    pub fn with_voices(voices: Vec<VoiceOption>, default_id: u32) -> Self {
        Self {
            voices,
            current: Mutex::new(default_id),
        }
    }

    /// Fetch the voice list from the engine. A fetch failure degrades to
    /// an empty list; playback still works with the configured id.
    pub async fn fetch(client: &EngineClient, default_id: u32) -> Self {
        let voices = match client.get_json("/speakers").await {
            Ok(value) => match serde_json::from_value::<Vec<RawSpeaker>>(value) {
                Ok(raw) => flatten(raw),
                Err(e) => {
                    warn!("Unexpected /speakers payload: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Could not load voice list: {e}");
                Vec::new()
            }
        };
        Self::with_voices(voices, default_id)
    }

    pub fn voices(&self) -> &[VoiceOption] {
        &self.voices
    }

    pub fn current_voice_id(&self) -> u32 {
        *self.current.lock().unwrap()
    }

    /// Select a voice. Ids are validated against the fetched list; with no
    /// list available (engine was down at startup) any id is accepted.
    pub fn set_current(&self, id: u32) -> bool {
        if !self.voices.is_empty() && !self.voices.iter().any(|v| v.id == id) {
            warn!("Unknown voice id: {id}");
            return false;
        }
        *self.current.lock().unwrap() = id;
        true
    }

    pub fn display_name(&self, id: u32) -> Option<&str> {
        self.voices
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.display_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Vec<VoiceOption> {
        flatten(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn flattens_grouped_speakers() {
        let voices = parse(
            r#"[{"name": "四国めたん",
                 "styles": [{"id": 2, "name": "ノーマル"}, {"id": 36, "name": "ささやき"}]}]"#,
        );

        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].id, 2);
        assert_eq!(voices[0].display_name, "ノーマル");
        assert_eq!(voices[0].group_name, "四国めたん");
        assert_eq!(voices[1].id, 36);
    }

    #[test]
    fn accepts_flat_speakers() {
        let voices = parse(r#"[{"id": 7, "name": "ずんだもん"}]"#);

        assert_eq!(voices.len(), 1);
        assert_eq!(voices[0].id, 7);
        assert_eq!(voices[0].display_name, "ずんだもん");
        assert_eq!(voices[0].group_name, "ずんだもん");
    }

    #[test]
    fn mixed_shapes_keep_listing_order() {
        let voices = parse(
            r#"[{"name": "A", "styles": [{"id": 1, "name": "normal"}]},
                {"id": 9, "name": "B"}]"#,
        );

        assert_eq!(voices.iter().map(|v| v.id).collect::<Vec<_>>(), vec![1, 9]);
    }

    #[test]
    fn set_current_validates_against_list() {
        let registry = SpeakerRegistry::with_voices(
            parse(r#"[{"id": 3, "name": "voice"}]"#),
            3,
        );

        assert!(!registry.set_current(99));
        assert_eq!(registry.current_voice_id(), 3);
        assert!(registry.set_current(3));
    }

    #[test]
    fn empty_list_accepts_any_id() {
        let registry = SpeakerRegistry::with_voices(Vec::new(), 3);

        assert!(registry.set_current(42));
        assert_eq!(registry.current_voice_id(), 42);
    }
}
