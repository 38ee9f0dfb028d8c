//! Connection states of the host and the events that move between them.
//!
//! ```text
//!                 SwitchTriggered                 AccessoryTimedOut
//!  WaitForDevice ────────────────> HandshakeInProgress ──────────────┐
//!     │  ▲  ▲                             │ HidsRegistered            │
//!     │  │  │ SetupFailed                 ▼                           │
//!     │  │  └──────────────────────  HidRegistered <──────────────────┼─ HidsRegistered
//!     │  │                                │ StreamOpened              │  (already in
//!     │  │ TornDown                       ▼                           │   accessory mode)
//!     │  │                            StreamOpened                    │
//!     │  │                                │ DecodeStarted             │
//!     │  │                                ▼                           │
//!     │  └────── Lost <──────────────  Streaming                      │
//!     │            LinkLost / RenderFailed                            │
//!     └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transition function is total: every `(state, event)` pair has a
//! defined successor.  Events that do not apply to a state leave it unchanged.

use serde::{Deserialize, Serialize};

/// The single authoritative connection state, owned by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No accessory-capable device found yet; scanning periodically.
    WaitForDevice,
    /// Identity strings sent and accessory mode requested; waiting for the
    /// device to re-enumerate under the accessory product id.
    HandshakeInProgress,
    /// Accessory handle claimed, ingestion adapter bound, HIDs announced.
    HidRegistered,
    /// The demuxer/decoder found a video stream in the ingested bytes.
    StreamOpened,
    /// The decode thread is running and the render loop is presenting frames.
    Streaming,
    /// The device or the renderer failed; the session is being torn down.
    Lost,
}

/// Outcome of one step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// The scan found nothing usable.
    NoDevice,
    /// A device accepted the identity strings and the start request.
    SwitchTriggered,
    /// The switched device did not reappear within the poll budget.
    AccessoryTimedOut,
    /// An accessory handle was obtained and HID registration ran.
    HidsRegistered,
    /// The decoder opened against the ingestion adapter.
    StreamOpened,
    /// The decode thread was spawned.
    DecodeStarted,
    /// Any setup step between handle and stream failed.
    SetupFailed,
    /// The connected flag dropped (transport loss or decoder end).
    LinkLost,
    /// The renderer reported an error.
    RenderFailed,
    /// The session resources were released.
    TornDown,
}

impl ConnectionState {
    /// Returns the successor state for `event`.
    pub fn on(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::WaitForDevice, E::NoDevice) => S::WaitForDevice,
            (S::WaitForDevice, E::SwitchTriggered) => S::HandshakeInProgress,
            (S::HandshakeInProgress, E::AccessoryTimedOut) => S::WaitForDevice,
            (S::WaitForDevice | S::HandshakeInProgress, E::HidsRegistered) => S::HidRegistered,
            (S::HidRegistered, E::StreamOpened) => S::StreamOpened,
            (S::StreamOpened, E::DecodeStarted) => S::Streaming,
            (
                S::WaitForDevice | S::HandshakeInProgress | S::HidRegistered | S::StreamOpened,
                E::SetupFailed,
            ) => S::WaitForDevice,
            (S::Streaming, E::LinkLost | E::RenderFailed) => S::Lost,
            (S::Lost, E::TornDown) => S::WaitForDevice,
            (state, _) => state,
        }
    }

    /// The status image to show in this state, or `None` while video is presented.
    pub fn status_screen(self) -> Option<StatusScreen> {
        match self {
            Self::WaitForDevice | Self::Lost => Some(StatusScreen::WaitForDevice),
            Self::HandshakeInProgress => Some(StatusScreen::AoaInitialized),
            Self::HidRegistered | Self::StreamOpened => Some(StatusScreen::WaitForDataTransmission),
            Self::Streaming => None,
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::WaitForDevice => "wait-for-device",
            Self::HandshakeInProgress => "handshake-in-progress",
            Self::HidRegistered => "hid-registered",
            Self::StreamOpened => "stream-opened",
            Self::Streaming => "streaming",
            Self::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// The three status images shown while no video is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusScreen {
    WaitForDevice,
    AoaInitialized,
    WaitForDataTransmission,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
