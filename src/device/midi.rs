//! midir-backed transport
//!
//! Ports are matched case-insensitively as substrings of their names. The
//! input callback forwards SysEx messages into a channel so `receive` can
//! wait with a timeout.

use std::time::Duration;

use flume::Receiver;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::device::transport::MidiTransport;
use crate::error::DeviceError;

/// MIDI port pair connected to the effect unit
pub struct MidirTransport {
    name: String,
    output: MidiOutputConnection,
    _input: Option<MidiInputConnection<()>>,
    incoming: Receiver<Vec<u8>>,
}

fn matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(pattern)
}

impl MidirTransport {
    /// Connect to the first output (and matching input) port containing `port_match`
    pub fn connect(port_match: &str) -> Result<Self, DeviceError> {
        let pattern = port_match.to_lowercase();

        let midi_out = MidiOutput::new("stompmatch-out")
            .map_err(|e| DeviceError::Transport(format!("MIDI output init: {}", e)))?;
        let out_port = midi_out
            .ports()
            .into_iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| matches(&n, &pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| DeviceError::Transport(format!("no MIDI output matching '{}'", port_match)))?;
        let name = midi_out
            .port_name(&out_port)
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        log::info!("MIDI: Found output port: {}", name);

        let output = midi_out
            .connect(&out_port, "stompmatch-output")
            .map_err(|e| DeviceError::Transport(format!("MIDI connect: {}", e)))?;

        let (tx, rx) = flume::unbounded();
        let input = match MidiInput::new("stompmatch-in") {
            Ok(mut midi_in) => {
                midi_in.ignore(midir::Ignore::None);
                let port = midi_in.ports().into_iter().find(|p| {
                    midi_in
                        .port_name(p)
                        .map(|n| matches(&n, &pattern))
                        .unwrap_or(false)
                });
                match port {
                    Some(port) => midi_in
                        .connect(
                            &port,
                            "stompmatch-input",
                            move |_ts, message, _| {
                                if message.first() == Some(&0xF0) {
                                    let _ = tx.send(message.to_vec());
                                }
                            },
                            (),
                        )
                        .map_err(|e| log::warn!("MIDI: input connect failed: {}", e))
                        .ok(),
                    None => {
                        log::warn!("MIDI: no input port matching '{}'; dumps unavailable", port_match);
                        None
                    }
                }
            }
            Err(e) => {
                log::warn!("MIDI: Failed to initialize input: {}", e);
                None
            }
        };

        Ok(Self {
            name,
            output,
            _input: input,
            incoming: rx,
        })
    }

    /// Names of every MIDI output port
    pub fn list_output_ports() -> Result<Vec<String>, DeviceError> {
        let midi_out = MidiOutput::new("stompmatch-list")
            .map_err(|e| DeviceError::Transport(e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect())
    }
}

impl MidiTransport for MidirTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.output
            .send(bytes)
            .map_err(|e| DeviceError::Transport(e.to_string()))
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        Ok(self.incoming.recv_timeout(timeout).ok())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
