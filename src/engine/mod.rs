//! VOICEVOX engine integration.
//!
//! `client` speaks the engine's two-step synthesis protocol with
//! retry/backoff; `speakers` fetches and flattens the voice listing.

pub mod client;
pub mod speakers;

pub use client::{AudioClip, EngineClient, SynthesisError, Synthesizer};
pub use speakers::{SpeakerRegistry, VoiceOption};
