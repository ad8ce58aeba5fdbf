//! The frame pump: capture, flip, apply the active strategy, show, react to
//! one key, repeat.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::image::flip_horizontal;
use crate::my_types::*;
use crate::strategy::{FlowStrategy, StrategyFactory, StrategyKind};

pub const KEY_ESC: i32 = 27;

pub trait VideoSource {
    /// Next frame, or `None` once the source has nothing more to give.
    fn read(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait Display {
    fn show(&mut self, image: &ColorImage) -> Result<()>;

    /// Wait up to `timeout_ms` for a key press
    fn poll_key(&mut self, timeout_ms: i32) -> Result<Option<i32>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ImageWriter {
    fn write(&mut self, path: &Path, image: &ColorImage) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Exit,
    Save,
    Flip,
    SelectMode(StrategyKind),
}

impl Command {
    pub fn from_key(key: i32) -> Option<Self> {
        if !(0..=0xff).contains(&key) {
            return None;
        }
        match key {
            KEY_ESC => Some(Command::Exit),
            k if k == 's' as i32 => Some(Command::Save),
            k if k == 'f' as i32 => Some(Command::Flip),
            k => StrategyKind::from_key(k).map(Command::SelectMode),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// mirror frames horizontally from the start
    pub flip: bool,
    pub poll_ms: i32,
    pub raw_output: PathBuf,
    pub flow_output: PathBuf,
    pub default_mode: StrategyKind,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flip: true,
            poll_ms: 1,
            raw_output: PathBuf::from("img_raw.png"),
            flow_output: PathBuf::from("img_w_flow.png"),
            default_mode: StrategyKind::DenseHsv,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstFrame,
    Running,
    Terminated,
}

pub struct Session<S, D, W> {
    source: S,
    display: D,
    writer: W,
    factory: StrategyFactory,
    settings: SessionSettings,
    strategy: Option<Box<dyn FlowStrategy>>,
    flip: bool,
    state: SessionState,
    frames: u64,
}

impl<S: VideoSource, D: Display, W: ImageWriter> Session<S, D, W> {
    pub fn new(
        source: S,
        display: D,
        writer: W,
        factory: StrategyFactory,
        settings: SessionSettings,
    ) -> Self {
        let flip = settings.flip;
        Self {
            source,
            display,
            writer,
            factory,
            settings,
            strategy: None,
            flip,
            state: SessionState::AwaitingFirstFrame,
            frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flip(&self) -> bool {
        self.flip
    }

    pub fn active_mode(&self) -> Option<StrategyKind> {
        self.strategy.as_ref().map(|s| s.kind())
    }

    /// Frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Tick until the session terminates, then release the source and close
    /// the display, also when a tick failed.
    pub fn run(&mut self) -> Result<()> {
        let mut result = Ok(());
        loop {
            match self.tick() {
                Ok(SessionState::Terminated) => break,
                Ok(_) => {}
                Err(err) => {
                    self.state = SessionState::Terminated;
                    result = Err(err);
                    break;
                }
            }
        }
        let closed = self.shutdown();
        result.and(closed)
    }

    pub fn tick(&mut self) -> Result<SessionState> {
        match self.state {
            SessionState::AwaitingFirstFrame => match self.capture()? {
                Some(frame) => {
                    self.switch_mode(self.settings.default_mode, &frame)?;
                    self.state = SessionState::Running;
                }
                None => {
                    info!("video source gave no frame");
                    self.state = SessionState::Terminated;
                }
            },
            SessionState::Running => self.run_tick()?,
            SessionState::Terminated => {}
        }
        Ok(self.state)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.state = SessionState::Terminated;
        let released = self.source.release().context("failed to release video source");
        let closed = self.display.close().context("failed to close display");
        released.and(closed)
    }

    fn capture(&mut self) -> Result<Option<Frame>> {
        let frame = self.source.read().context("failed to read frame")?;
        Ok(match frame {
            Some(frame) if self.flip => Some(flip_horizontal(&frame)),
            frame => frame,
        })
    }

    fn run_tick(&mut self) -> Result<()> {
        let frame = match self.capture()? {
            Some(frame) => frame,
            None => {
                info!("capture ended");
                self.state = SessionState::Terminated;
                return Ok(());
            }
        };

        let strategy = self
            .strategy
            .as_mut()
            .ok_or_else(|| anyhow!("running without a strategy"))?;
        let rendered = strategy.apply(&frame)?;
        self.display.show(&rendered)?;
        self.frames += 1;
        Span::current().pb_inc(1);
        debug!("frame {} rendered", self.frames);

        let key = self.display.poll_key(self.settings.poll_ms)?;
        match key.and_then(Command::from_key) {
            Some(Command::Exit) => {
                info!("Closing...");
                self.state = SessionState::Terminated;
            }
            Some(Command::Save) => self.save(&frame, &rendered)?,
            Some(Command::Flip) => {
                self.flip = !self.flip;
                info!("Flip image: {}", if self.flip { "ON" } else { "OFF" });
            }
            Some(Command::SelectMode(kind)) => self.switch_mode(kind, &frame)?,
            None => {}
        }
        Ok(())
    }

    /// Replace the active strategy with a fresh one whose baseline is `frame`
    fn switch_mode(&mut self, kind: StrategyKind, frame: &Frame) -> Result<()> {
        let mut strategy = self.factory.create(kind);
        strategy
            .set_first_frame(frame)
            .with_context(|| format!("cannot start {kind}"))?;
        info!("==> {}", kind.label());
        Span::current().pb_set_message(kind.label());
        self.strategy = Some(strategy);
        Ok(())
    }

    fn save(&mut self, raw: &Frame, rendered: &ColorImage) -> Result<()> {
        let raw_output = &self.settings.raw_output;
        let flow_output = &self.settings.flow_output;
        self.writer
            .write(raw_output, raw)
            .with_context(|| format!("failed to save {}", raw_output.display()))?;
        self.writer
            .write(flow_output, rendered)
            .with_context(|| format!("failed to save {}", flow_output.display()))?;
        info!(
            "Saved raw frame as {} and displayed as {}",
            raw_output.display(),
            flow_output.display()
        );
        Ok(())
    }
}
