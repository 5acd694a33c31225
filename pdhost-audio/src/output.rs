//! Drives instance audio callbacks from a cpal output stream.
//!
//! Every instance renders into its own scratch buffer, pre-allocated at
//! stream start; the results are summed into the device buffer. Instances
//! receive silence as input.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use log::{error, info};
use pdhost_types::{HostAudio, CHANNELS_OUT};

use crate::audio_callback::AudioCallback;
use crate::error::DeviceError;

pub struct OutputStream {
    _stream: Stream,
    host: HostAudio,
}

impl OutputStream {
    /// Open `device` at `host` settings and start pulling audio from
    /// `callbacks`.
    pub fn start(device: &Device, host: HostAudio, callbacks: Vec<AudioCallback>) -> Result<Self, DeviceError> {
        let config = StreamConfig {
            channels: CHANNELS_OUT as u16,
            sample_rate: cpal::SampleRate(host.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(host.buffer_frames),
        };
        let mut mixer = Mixer::new(callbacks, (host.buffer_frames * CHANNELS_OUT) as usize);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data),
            |err| {
                error!(target: "pd::audio", "output stream error: {}", err);
            },
            None,
        )?;
        stream.play()?;

        info!(
            target: "pd::audio",
            "output running at {} Hz, {} frames per callback",
            host.sample_rate,
            host.buffer_frames
        );
        Ok(Self { _stream: stream, host })
    }

    pub fn host(&self) -> HostAudio {
        self.host
    }
}

/// Sums instance outputs into one interleaved buffer.
pub struct Mixer {
    voices: Vec<(AudioCallback, Vec<f32>)>,
}

impl Mixer {
    pub fn new(callbacks: Vec<AudioCallback>, max_samples: usize) -> Self {
        Self {
            voices: callbacks
                .into_iter()
                .map(|cb| (cb, vec![0.0; max_samples]))
                .collect(),
        }
    }

    /// Fill `out` with the sum of every running instance. Buffers larger
    /// than the pre-allocated scratch space are rendered as silence.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        for (callback, scratch) in self.voices.iter_mut() {
            let Some(scratch) = scratch.get_mut(..out.len()) else {
                continue;
            };
            scratch.fill(0.0);
            if callback.process(scratch) {
                for (o, s) in out.iter_mut().zip(scratch.iter()) {
                    *o += *s;
                }
            }
        }
    }
}
