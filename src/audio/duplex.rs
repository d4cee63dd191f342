//! cpal-backed duplex interface
//!
//! Each `play_record` call opens an input and an output stream on the
//! selected devices, starts capture before playback, and tears both down once
//! the capture buffer is full. Streams never outlive the call, so the handle
//! itself only keeps device names.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, StreamConfig};

use crate::audio::io::{check_signal, AudioIo};
use crate::audio::take::AudioTake;
use crate::error::AudioIoError;

/// Duplex loop through a sound card
pub struct CpalDuplex {
    output_match: Option<String>,
    input_match: Option<String>,
    sample_rate: u32,
    label: String,
}

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "<unnamed>".to_string())
}

fn find_output(host: &Host, pattern: Option<&str>) -> Result<Device, AudioIoError> {
    match pattern {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioIoError::Device("no default output device".to_string())),
        Some(p) => {
            let p = p.to_lowercase();
            host.output_devices()
                .map_err(|e| AudioIoError::Device(e.to_string()))?
                .find(|d| device_name(d).to_lowercase().contains(&p))
                .ok_or_else(|| AudioIoError::Device(format!("no output device matching '{}'", p)))
        }
    }
}

fn find_input(host: &Host, pattern: Option<&str>) -> Result<Device, AudioIoError> {
    match pattern {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioIoError::Device("no default input device".to_string())),
        Some(p) => {
            let p = p.to_lowercase();
            host.input_devices()
                .map_err(|e| AudioIoError::Device(e.to_string()))?
                .find(|d| device_name(d).to_lowercase().contains(&p))
                .ok_or_else(|| AudioIoError::Device(format!("no input device matching '{}'", p)))
        }
    }
}

impl CpalDuplex {
    /// Resolve the devices once up front so a bad name fails early
    pub fn open(
        output_match: Option<&str>,
        input_match: Option<&str>,
        sample_rate: u32,
    ) -> Result<Self, AudioIoError> {
        let host = cpal::default_host();
        let output = find_output(&host, output_match)?;
        let input = find_input(&host, input_match)?;
        let label = format!("{} -> {}", device_name(&output), device_name(&input));
        log::info!("Audio: duplex {} @ {} Hz", label, sample_rate);

        Ok(Self {
            output_match: output_match.map(str::to_string),
            input_match: input_match.map(str::to_string),
            sample_rate,
            label,
        })
    }

    /// `(outputs, inputs)` device names on the default host
    pub fn list_devices() -> Result<(Vec<String>, Vec<String>), AudioIoError> {
        let host = cpal::default_host();
        let outputs = host
            .output_devices()
            .map_err(|e| AudioIoError::Device(e.to_string()))?
            .map(|d| device_name(&d))
            .collect();
        let inputs = host
            .input_devices()
            .map_err(|e| AudioIoError::Device(e.to_string()))?
            .map(|d| device_name(&d))
            .collect();
        Ok((outputs, inputs))
    }

    fn stream_config(&self, channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: BufferSize::Default,
        }
    }
}

impl AudioIo for CpalDuplex {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play_record(
        &mut self,
        signal: &AudioTake,
        timeout: Duration,
    ) -> Result<AudioTake, AudioIoError> {
        check_signal(signal, self.sample_rate)?;

        let host = cpal::default_host();
        let output = find_output(&host, self.output_match.as_deref())?;
        let input = find_input(&host, self.input_match.as_deref())?;

        let out_channels = output
            .default_output_config()
            .map_err(|e| AudioIoError::Device(e.to_string()))?
            .channels();
        let in_channels = input
            .default_input_config()
            .map_err(|e| AudioIoError::Device(e.to_string()))?
            .channels() as usize;

        let playback = signal.mono_samples();
        let needed = playback.len();
        let (done_tx, done_rx) = flume::bounded::<Vec<f32>>(1);
        let (err_tx, err_rx) = flume::unbounded::<String>();

        let mut captured: Vec<f32> = Vec::with_capacity(needed);
        let mut sent = false;
        let input_err = err_tx.clone();
        let input_stream = input
            .build_input_stream(
                &self.stream_config(in_channels as u16),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if sent {
                        return;
                    }
                    // first channel carries the return from the unit
                    for frame in data.chunks(in_channels) {
                        if captured.len() >= needed {
                            break;
                        }
                        captured.push(frame[0]);
                    }
                    if captured.len() >= needed {
                        sent = true;
                        let _ = done_tx.try_send(std::mem::take(&mut captured));
                    }
                },
                move |e| {
                    let _ = input_err.send(e.to_string());
                },
                None,
            )
            .map_err(|e| AudioIoError::Stream(format!("input stream: {}", e)))?;

        let mut position = 0usize;
        let out_ch = out_channels as usize;
        let output_stream = output
            .build_output_stream(
                &self.stream_config(out_channels),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(out_ch) {
                        let v = playback.get(position).copied().unwrap_or(0.0);
                        position += 1;
                        frame.iter_mut().for_each(|s| *s = v);
                    }
                },
                move |e| {
                    let _ = err_tx.send(e.to_string());
                },
                None,
            )
            .map_err(|e| AudioIoError::Stream(format!("output stream: {}", e)))?;

        input_stream
            .play()
            .map_err(|e| AudioIoError::Stream(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| AudioIoError::Stream(e.to_string()))?;

        let result = done_rx.recv_timeout(timeout);
        let _ = output_stream.pause();
        let _ = input_stream.pause();

        if let Ok(message) = err_rx.try_recv() {
            return Err(AudioIoError::Stream(message));
        }
        let samples = result.map_err(|_| AudioIoError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })?;
        log::debug!("Audio: captured {} frames from {}", samples.len(), self.label);
        Ok(AudioTake::from_mono(samples, self.sample_rate))
    }

    fn name(&self) -> &str {
        &self.label
    }
}
