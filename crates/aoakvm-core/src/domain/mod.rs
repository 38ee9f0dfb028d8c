//! Domain entities for AOA-KVM.
//!
//! Pure logic with no infrastructure dependencies: the connection state
//! vocabulary shared by the state machine and the status display, and the
//! frame ring that bridges the decode thread and the render thread.

/// Bounded, newest-wins frame queue.
pub mod frame_ring;

/// Connection states, transition events and status screens.
pub mod state;
