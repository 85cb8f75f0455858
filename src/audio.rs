use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

/// Interleaved stereo output queue feeding a cpal stream. The core pushes
/// left/right frame pairs; the device callback drains them, padding with
/// silence on underrun.
pub struct AudioOutput {
    queue: Arc<Mutex<VecDeque<[f32; 2]>>>,
    _stream: cpal::Stream,
    sample_rate: u32,
    max_queue_frames: usize,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default audio output device"))?;
        let supported = device
            .default_output_config()
            .context("failed to query default audio config")?;

        let stream_config: cpal::StreamConfig = supported.config();
        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;
        let max_queue_frames = ((sample_rate as usize) * 96) / 1000;
        let queue = Arc::new(Mutex::new(VecDeque::<[f32; 2]>::with_capacity(
            max_queue_frames,
        )));

        let err_fn = |err| {
            eprintln!("audio stream error: {err}");
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| fill_output_f32(data, channels, &queue),
                    err_fn,
                    None,
                )?
            }
            cpal::SampleFormat::I16 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| fill_output_i16(data, channels, &queue),
                    err_fn,
                    None,
                )?
            }
            other => {
                return Err(anyhow!("unsupported audio sample format: {other:?}"));
            }
        };

        stream
            .play()
            .context("failed to start audio output stream")?;

        Ok(Self {
            queue,
            _stream: stream,
            sample_rate,
            max_queue_frames,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Queue interleaved stereo samples, dropping the oldest frames when
    /// the buffer runs long.
    pub fn push_samples(&self, interleaved: &[f32]) {
        if interleaved.len() < 2 {
            return;
        }

        let Ok(mut queue) = self.queue.lock() else {
            return;
        };

        let incoming = interleaved.len() / 2;
        let future_len = queue.len().saturating_add(incoming);
        if future_len > self.max_queue_frames {
            let drop_count = future_len - self.max_queue_frames;
            for _ in 0..drop_count.min(queue.len()) {
                queue.pop_front();
            }
        }

        queue.extend(
            interleaved
                .chunks_exact(2)
                .map(|pair| [pair[0].clamp(-1.0, 1.0), pair[1].clamp(-1.0, 1.0)]),
        );
    }

    pub fn queued_frames(&self) -> usize {
        if let Ok(queue) = self.queue.lock() { queue.len() } else { 0 }
    }
}

fn next_frame(queue: &Arc<Mutex<VecDeque<[f32; 2]>>>) -> [f32; 2] {
    if let Ok(mut q) = queue.lock() {
        q.pop_front().unwrap_or([0.0, 0.0])
    } else {
        [0.0, 0.0]
    }
}

fn fill_output_f32(data: &mut [f32], channels: usize, queue: &Arc<Mutex<VecDeque<[f32; 2]>>>) {
    for frame in data.chunks_mut(channels) {
        let [left, right] = next_frame(queue);
        for (index, out) in frame.iter_mut().enumerate() {
            *out = if index % 2 == 0 { left } else { right };
        }
    }
}

fn fill_output_i16(data: &mut [i16], channels: usize, queue: &Arc<Mutex<VecDeque<[f32; 2]>>>) {
    for frame in data.chunks_mut(channels) {
        let [left, right] = next_frame(queue);
        for (index, out) in frame.iter_mut().enumerate() {
            let sample = if index % 2 == 0 { left } else { right };
            *out = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        }
    }
}
