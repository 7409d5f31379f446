//! Platform audio output for the standalone binary.
//!
//! Opens the default cpal output device and drives `Engine::render` from
//! the device callback. The engine is moved into the callback closure; the
//! caller keeps the `EngineController` and talks to the engine through it.
//! Plugin-style hosts do not use this module at all; they call
//! `Engine::render` from their own callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};

use crate::audio::engine::Engine;
use crate::audio::mixer::MAX_BLOCK;

pub struct AudioOutput {
    _stream: Stream,
    sample_rate: f32,
}

impl AudioOutput {
    /// Create and start audio output. The engine must have been created at
    /// the device's sample rate; call `preferred_sample_rate()` first.
    pub fn new(engine: Engine) -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no output device available".to_string())?;
        let config = device
            .default_output_config()
            .map_err(|e| format!("failed to get default output config: {}", e))?;
        let sample_rate = config.sample_rate().0 as f32;

        if (sample_rate - engine.sample_rate()).abs() > 0.5 {
            return Err(format!(
                "engine built for {} Hz but device runs at {} Hz",
                engine.sample_rate(),
                sample_rate
            ));
        }

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config.into(), engine)?
            }
            cpal::SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config.into(), engine)?
            }
            cpal::SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config.into(), engine)?
            }
            _ => return Err("unsupported sample format".to_string()),
        };

        stream
            .play()
            .map_err(|e| format!("failed to play stream: {}", e))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    /// Sample rate of the default output device, for engine construction.
    pub fn preferred_sample_rate() -> Result<f32, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no output device available".to_string())?;
        let config = device
            .default_output_config()
            .map_err(|e| format!("failed to get default output config: {}", e))?;
        Ok(config.sample_rate().0 as f32)
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut engine: Engine,
    ) -> Result<Stream, String>
    where
        T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let err_fn = |err| eprintln!("audio stream error: {}", err);

        // Scratch buffers sized for the largest block the engine accepts;
        // device callbacks larger than that are rendered in slices.
        let mut left = vec![0.0f32; MAX_BLOCK];
        let mut right = vec![0.0f32; MAX_BLOCK];
        let mut sample_time: u64 = 0;

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let mut done = 0;
                    while done < frames {
                        let n = (frames - done).min(MAX_BLOCK);
                        engine.render(&mut left[..n], &mut right[..n], sample_time);
                        sample_time += n as u64;

                        for i in 0..n {
                            let frame = &mut data[(done + i) * channels..(done + i + 1) * channels];
                            let l = cpal::Sample::from_sample(left[i].clamp(-1.0, 1.0));
                            let r = cpal::Sample::from_sample(right[i].clamp(-1.0, 1.0));
                            match frame.len() {
                                0 => {}
                                1 => frame[0] = l,
                                _ => {
                                    frame[0] = l;
                                    frame[1] = r;
                                    // Duplicate into any additional channels.
                                    for extra in frame.iter_mut().skip(2) {
                                        *extra = l;
                                    }
                                }
                            }
                        }
                        done += n;
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| format!("failed to build output stream: {}", e))?;

        Ok(stream)
    }
}
