/*
 *  lib.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Library surface so integration tests and the platform layer can link
 *  against the worker pipeline without going through the binary.
 */

pub mod artwork;
pub mod buttons;
pub mod canvas;
pub mod colour;
pub mod config;
pub mod evicting;
pub mod lru;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod renderer;
pub mod spotify;
pub mod themecache;
pub mod transport;

pub use evicting::EvictingQueue;
pub use models::{Command, Frame, PlaybackContext, PlaybackState, RenderRequest, RenderRole, Track};
