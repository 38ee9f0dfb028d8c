//! Connection state machine: the permanent life of the host process.
//!
//! # One connection attempt (for beginners)
//!
//! ```text
//! WaitForDevice ── scan / handshake ──> HandshakeInProgress ── accessory opened
//!      ▲                                                             │
//!      │        ingestion adapter bound, HIDs registered  <──────────┘
//!      │                         │  HidRegistered
//!      │        decoder probes the stream, renderer sized
//!      │                         │  StreamOpened
//!      │        decode thread spawned
//!      │                         │  Streaming  (render loop: pop + present)
//!      │                         ▼
//!      └──── teardown ◄──── Lost  (transport gone, stream ended, render error)
//! ```
//!
//! Every attempt runs inside its own `tracing` span carrying a random
//! attempt id, so the log lines of one connection can be grepped together.
//!
//! # Shared state
//!
//! [`ConnectionContext`] is the only state shared between threads: the
//! atomic connected flag, the published [`ConnectionState`], the current
//! device handle and the frame ring.  The state machine is its only writer
//! apart from the connected flag, which the decode thread and the input
//! forwarder may clear.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, trace, warn, Span};
use uuid::Uuid;

use aoakvm_core::{ConnectionEvent, ConnectionState, FrameRing, HidDevice, StatusScreen};

use crate::application::decode::{run_decode_loop, DecodeError, DecodeExit, DecoderFactory, VideoFrame};
use crate::application::handshake::{AccessoryHandshake, HandshakeError};
use crate::application::hid_registration::{register_hids, unregister_hids};
use crate::application::ingest::{IngestSettings, VideoIngestion};
use crate::application::transport::{UsbBus, UsbHandle};

// ── Renderer seam ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot show status screen {screen:?}: {reason}")]
    StatusScreen { screen: StatusScreen, reason: String },

    #[error("cannot prepare a {width}x{height} surface: {reason}")]
    Prepare { width: u32, height: u32, reason: String },

    #[error("cannot present frame {sequence}: {reason}")]
    Present { sequence: u64, reason: String },
}

/// Window and pixel presentation, driven from the state machine thread.
#[cfg_attr(test, mockall::automock)]
pub trait Renderer {
    /// Replaces whatever is on screen with a status image.
    fn show_status(&mut self, screen: StatusScreen) -> Result<(), RenderError>;

    /// Sizes the video surface for a newly opened stream.
    fn prepare(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    fn present(&mut self, frame: &VideoFrame) -> Result<(), RenderError>;
}

// ── Shared context ────────────────────────────────────────────────────────────

/// State shared by the state machine, the decode thread and input forwarding.
pub struct ConnectionContext<H: UsbHandle> {
    connected: Arc<AtomicBool>,
    device_gone: Arc<AtomicBool>,
    state: watch::Sender<ConnectionState>,
    handle: Mutex<Option<Arc<H>>>,
    frames: Arc<FrameRing<VideoFrame>>,
}

impl<H: UsbHandle> ConnectionContext<H> {
    pub fn new(frames: Arc<FrameRing<VideoFrame>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::WaitForDevice);
        Self {
            connected: Arc::new(AtomicBool::new(false)),
            device_gone: Arc::new(AtomicBool::new(false)),
            state,
            handle: Mutex::new(None),
            frames,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Clears the connected flag.  Safe to call from any thread, any number of times.
    pub fn mark_lost(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("link marked lost");
        }
    }

    /// Records that the transport reported the device gone, and marks the
    /// link lost.  The current handle is not used again after this.
    pub fn mark_device_gone(&self) {
        if !self.device_gone.swap(true, Ordering::AcqRel) {
            debug!("device reported gone");
        }
        self.mark_lost();
    }

    /// Whether the transport reported the current device gone.
    pub fn is_device_gone(&self) -> bool {
        self.device_gone.load(Ordering::Acquire)
    }

    /// The last state published by the state machine.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn frames(&self) -> &FrameRing<VideoFrame> {
        &self.frames
    }

    /// The handle of the current connection, if any.
    pub fn current_handle(&self) -> Option<Arc<H>> {
        self.slot().clone()
    }

    fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    fn device_gone_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.device_gone)
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub(crate) fn attach(&self, handle: Arc<H>) {
        *self.slot() = Some(handle);
        self.device_gone.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn detach(&self) -> Option<Arc<H>> {
        self.mark_lost();
        self.slot().take()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<H>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decoder failed unrecoverably: {0}")]
    Decoder(#[source] DecodeError),

    #[error("failed to spawn the decode thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("decode thread panicked")]
    DecodeThreadPanicked,
}

/// Delays and transfer settings for the state machine.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub ingest: IngestSettings,
    pub control_timeout: Duration,
    /// Back-off after a scan found nothing or an attempt failed.
    pub scan_interval: Duration,
    /// Back-off when the frame ring is empty.
    pub frame_poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ingest: IngestSettings::default(),
            control_timeout: Duration::from_millis(1000),
            scan_interval: Duration::from_millis(100),
            frame_poll_interval: Duration::from_millis(1),
        }
    }
}

struct ActiveSession {
    span: Span,
    decode_thread: JoinHandle<DecodeExit>,
    hids: Vec<HidDevice>,
}

/// Sequences discovery, HID registration, stream setup, rendering and teardown.
pub struct ConnectionStateMachine<B: UsbBus, D: DecoderFactory, R: Renderer> {
    handshake: AccessoryHandshake<B>,
    decoders: D,
    renderer: R,
    context: Arc<ConnectionContext<B::Handle>>,
    settings: SessionSettings,
    state: ConnectionState,
    session: Option<ActiveSession>,
}

impl<B: UsbBus, D: DecoderFactory, R: Renderer> ConnectionStateMachine<B, D, R> {
    pub fn new(
        handshake: AccessoryHandshake<B>,
        decoders: D,
        renderer: R,
        context: Arc<ConnectionContext<B::Handle>>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            handshake,
            decoders,
            renderer,
            context,
            settings,
            state: ConnectionState::WaitForDevice,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn context(&self) -> &Arc<ConnectionContext<B::Handle>> {
        &self.context
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Runs until `shutdown` is set, then tears down the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for conditions the process cannot recover
    /// from, after the current connection has been torn down.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), SessionError> {
        self.show_status();
        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(e) = self.step() {
                break Err(e);
            }
        };
        self.shutdown()?;
        result
    }

    /// Performs the work of the current state once and returns the new state.
    ///
    /// From `WaitForDevice` one step is a whole connection attempt; while
    /// `Streaming` it is one render tick; from `Lost` it is the teardown.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] for unrecoverable conditions.
    pub fn step(&mut self) -> Result<ConnectionState, SessionError> {
        match self.state {
            ConnectionState::Streaming => self.render_tick(),
            ConnectionState::Lost => self.teardown()?,
            _ => self.connect()?,
        }
        Ok(self.state)
    }

    /// Tears down an active connection, if there is one.
    ///
    /// # Errors
    ///
    /// Returns the decode thread's fatal error, if it had one.
    pub fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.session.is_none() {
            return Ok(());
        }
        info!("shutting down active connection");
        self.context.mark_lost();
        self.apply(ConnectionEvent::LinkLost);
        self.teardown()
    }

    fn connect(&mut self) -> Result<(), SessionError> {
        let span = info_span!("attempt", id = %Uuid::new_v4());
        let entered = span.clone().entered();

        let acquired = {
            let state = &mut self.state;
            let context = &self.context;
            let renderer = &mut self.renderer;
            self.handshake
                .acquire(|| advance(state, context, renderer, ConnectionEvent::SwitchTriggered))
        };
        let handle = match acquired {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                trace!("no device");
                self.apply(ConnectionEvent::NoDevice);
                thread::sleep(self.settings.scan_interval);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "no accessory handle");
                let event = match e {
                    HandshakeError::AccessoryTimeout { .. } => ConnectionEvent::AccessoryTimedOut,
                    _ => ConnectionEvent::SetupFailed,
                };
                self.apply(event);
                thread::sleep(self.settings.scan_interval);
                return Ok(());
            }
        };
        info!(device = %handle.info(), "accessory handle obtained");

        let ingestion = match VideoIngestion::open(
            Arc::clone(&handle),
            self.context.connected_flag(),
            self.context.device_gone_flag(),
            self.settings.ingest,
        ) {
            Ok(ingestion) => ingestion,
            Err(e) => {
                error!(error = %e, "cannot open video ingestion");
                self.apply(ConnectionEvent::SetupFailed);
                return Ok(());
            }
        };
        self.context.attach(Arc::clone(&handle));

        let report = register_hids(handle.as_ref(), self.settings.control_timeout);
        if report.device_gone {
            self.context.mark_device_gone();
        }
        self.apply(ConnectionEvent::HidsRegistered);

        let decoder = match self.decoders.open(Box::new(ingestion)) {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!(error = %e, "cannot open video stream");
                self.abandon_setup(&handle, &report.registered);
                return Ok(());
            }
        };
        self.apply(ConnectionEvent::StreamOpened);

        let (width, height) = decoder.dimensions();
        info!(width, height, "video stream opened");
        if let Err(e) = self.renderer.prepare(width, height) {
            warn!(error = %e, "renderer rejected stream");
            drop(decoder);
            self.abandon_setup(&handle, &report.registered);
            return Ok(());
        }

        self.context.frames().clear();
        let frames = Arc::clone(&self.context.frames);
        let connected = self.context.connected_flag();
        let thread_span = span.clone();
        let spawned = thread::Builder::new()
            .name("aoakvm-decode".into())
            .spawn(move || {
                let _entered = thread_span.entered();
                run_decode_loop(decoder, &frames, &connected)
            });
        let decode_thread = match spawned {
            Ok(decode_thread) => decode_thread,
            Err(e) => {
                self.abandon_setup(&handle, &report.registered);
                return Err(SessionError::Spawn(e));
            }
        };

        drop(entered);
        self.session = Some(ActiveSession {
            span,
            decode_thread,
            hids: report.registered,
        });
        self.apply(ConnectionEvent::DecodeStarted);
        Ok(())
    }

    /// Undoes a partially set up connection and returns to `WaitForDevice`.
    fn abandon_setup(&mut self, handle: &Arc<B::Handle>, hids: &[HidDevice]) {
        self.context.detach();
        self.release_hids(handle.as_ref(), hids);
        self.apply(ConnectionEvent::SetupFailed);
    }

    /// Unregisters `hids` unless the device is already known to be gone.
    fn release_hids(&self, handle: &B::Handle, hids: &[HidDevice]) {
        if self.context.is_device_gone() {
            debug!("device gone, skipping HID unregistration");
            return;
        }
        unregister_hids(handle, hids, self.settings.control_timeout);
    }

    fn render_tick(&mut self) {
        let span = self.current_span();
        let _entered = span.enter();

        if !self.context.is_connected() {
            info!("link lost");
            self.apply(ConnectionEvent::LinkLost);
            return;
        }
        match self.context.frames().pop() {
            Some(frame) => {
                if let Err(e) = self.renderer.present(&frame) {
                    error!(error = %e, "render failed");
                    self.context.mark_lost();
                    self.apply(ConnectionEvent::RenderFailed);
                }
            }
            None => thread::sleep(self.settings.frame_poll_interval),
        }
    }

    /// Releases everything the connection held and returns to `WaitForDevice`.
    ///
    /// The decode thread is joined before the handle is dropped, so the handle
    /// is closed exactly once and never used afterwards.
    fn teardown(&mut self) -> Result<(), SessionError> {
        let span = self.current_span();
        let _entered = span.enter();

        let handle = self.context.detach();
        let mut result = Ok(());
        if let Some(session) = self.session.take() {
            match session.decode_thread.join() {
                Ok(DecodeExit::Fatal(e)) => result = Err(SessionError::Decoder(e)),
                Ok(exit) => debug!(?exit, "decode thread joined"),
                Err(_) => result = Err(SessionError::DecodeThreadPanicked),
            }
            if let Some(handle) = &handle {
                self.release_hids(handle.as_ref(), &session.hids);
            }
        }
        drop(handle);
        self.context.frames().clear();
        info!("connection torn down");
        self.apply(ConnectionEvent::TornDown);
        result
    }

    fn current_span(&self) -> Span {
        self.session
            .as_ref()
            .map_or_else(Span::none, |session| session.span.clone())
    }

    fn apply(&mut self, event: ConnectionEvent) {
        advance(&mut self.state, &self.context, &mut self.renderer, event);
    }

    fn show_status(&mut self) {
        if let Some(screen) = self.state.status_screen() {
            if let Err(e) = self.renderer.show_status(screen) {
                warn!(error = %e, "status screen not shown");
            }
        }
    }
}

/// Moves `state` along `event`, publishing the change and showing the new
/// status screen when it differs from the current one.
fn advance<H: UsbHandle, R: Renderer>(
    state: &mut ConnectionState,
    context: &ConnectionContext<H>,
    renderer: &mut R,
    event: ConnectionEvent,
) {
    let next = state.on(event);
    if next == *state {
        return;
    }
    info!(from = %state, to = %next, ?event, "connection state changed");
    let previous = std::mem::replace(state, next);
    context.publish(next);

    match next.status_screen() {
        Some(screen) if previous.status_screen() != Some(screen) => {
            if let Err(e) = renderer.show_status(screen) {
                warn!(error = %e, "status screen not shown");
            }
        }
        _ => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
