//! Headless playback and metadata bridge for a port-driven music UI.
//!
//! The UI exchanges JSON messages over named ports. This crate plays the
//! active queue item on the local audio output, looks up tags of remote
//! audio files and keeps the user's data in a remote store, reporting back
//! through events.
//!
//! * [`bridge`] - Bootstrap and command dispatch
//! * [`player`] - Playback sessions and their lifetimes
//! * [`pipeline`] - Ordered tag lookups for batches of items
//! * [`output`] - Audio output with `rodio`
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[macro_use]
extern crate log;

pub mod audio_file;
pub mod bridge;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod fetch;
pub mod http;
pub mod output;
pub mod pipeline;
pub mod player;
pub mod protocol;
pub mod settings;
pub mod store;
pub mod tags;
pub mod user;
