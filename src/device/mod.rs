//! Device communication
//!
//! A [`DeviceSession`] owns the transport and the paced send queue; the
//! [`MidiTransport`] trait is the seam between it and real or simulated
//! hardware.

#[cfg(feature = "hardware")]
pub mod midi;
pub mod session;
pub mod transport;

#[cfg(feature = "hardware")]
pub use midi::MidirTransport;
pub use session::{Ack, DeviceSession};
pub use transport::{MidiTransport, RecordingTransport, SentFrame, TransportProbe};
