//! Client library for the live radio engine.
//!
//! In-process API, no UI surface: the embedding application supplies an
//! [`sink::AudioSink`] (the one playable audio resource) and a
//! [`recorder::CaptureDevice`], runs the [`runtime::ClientRuntime`] event
//! loop, and reads [`state::ClientSession`] for rendering.

pub mod channel;
pub mod ops;
pub mod recorder;
pub mod runtime;
pub mod session;
pub mod sink;
pub mod state;
