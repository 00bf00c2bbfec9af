/*
 *  buttons.rs
 *
 *  inkbeat - now playing, on paper
 *
 *  Button input worker. Sources hand over debounced GPIO line offsets;
 *  the worker maps them to transport commands and feeds the command
 *  channel. An offset we do not recognize is logged and dropped.
 */

use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::models::Command;

pub const OFFSET_NEXT: u32 = 5;
pub const OFFSET_TOGGLE: u32 = 6;
pub const OFFSET_PREVIOUS: u32 = 16;
pub const OFFSET_SAVE: u32 = 24;

/// A stream of debounced button presses, identified by GPIO offset.
#[async_trait]
pub trait ButtonSource: Send {
    /// Waits for the next press. None means the source is gone for good.
    async fn next_press(&mut self) -> Option<u32>;
}

/// Source for headless runs; never emits a press.
pub struct NullButtonSource;

#[async_trait]
impl ButtonSource for NullButtonSource {
    async fn next_press(&mut self) -> Option<u32> {
        std::future::pending().await
    }
}

pub fn map_offset(offset: u32) -> Option<Command> {
    match offset {
        OFFSET_NEXT => Some(Command::Next),
        OFFSET_TOGGLE => Some(Command::Toggle),
        OFFSET_PREVIOUS => Some(Command::Previous),
        OFFSET_SAVE => Some(Command::Save),
        _ => None,
    }
}

pub struct ButtonWorker<S: ButtonSource> {
    source: S,
    commands: UnboundedSender<Command>,
}

impl<S: ButtonSource> ButtonWorker<S> {
    pub fn new(source: S, commands: UnboundedSender<Command>) -> Self {
        ButtonWorker { source, commands }
    }

    pub async fn run(mut self, token: CancellationToken) {
        info!("button worker started");
        loop {
            let press = tokio::select! {
                _ = token.cancelled() => break,
                press = self.source.next_press() => press,
            };
            let Some(offset) = press else {
                info!("button source closed");
                break;
            };
            match map_offset(offset) {
                Some(command) => {
                    info!("button press on line {offset}: {command:?}");
                    if self.commands.send(command).is_err() {
                        // Orchestrator is gone, nothing left to do.
                        break;
                    }
                }
                None => warn!("press on unmapped GPIO line {offset}, ignored"),
            }
        }
        info!("button worker stopped");
    }
}
