//! Core library for Her OS, a voice-driven persona assistant.
//!
//! The modules split along the seams between the assistant and the outside
//! world:
//! - [`orchestrator`] runs the interaction state machine.
//! - [`llm`] talks to Gemini or OpenAI with rate limiting and model fallback.
//! - [`memory`] keeps the capped transcript and [`transcript`] exports it.
//! - [`speech`] and [`persona`] describe the collaborators the host provides.
//! - [`cohost`] and [`game`] hold the topic list and rock/paper/scissors rules.
//! - [`config`], [`db`], [`kv`], [`errors`] and [`logging`] carry settings,
//!   sqlite persistence, the error catalogue and structured diagnostics.

pub mod cohost;
pub mod config;
pub mod db;
pub mod errors;
pub mod game;
pub mod kv;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod persona;
pub mod speech;
pub mod transcript;
