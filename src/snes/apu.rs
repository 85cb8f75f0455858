const DEFAULT_SAMPLE_RATE: u32 = 32_000;
const FRAME_RATE_HZ: f64 = 60.098_813_897_440_515;

/// Audio co-processor stub. The four CPU-visible ports behave as latches
/// with echo semantics (a write to port n is readable back at port n, the
/// handshake boot code polls for); synthesis is a silent source sized to
/// real time so downstream buffering behaves like it would with a DSP.
#[derive(Debug, Clone)]
pub struct Apu {
    pub(crate) ports: [u8; 4],
    /// Internal DSP register mirror for the CPU-visible ports (0x40-0x43).
    pub(crate) dsp_mirror: [u8; 4],

    sample_rate: u32,
    sample_phase: f64,
    samples: Vec<f32>,
}

impl Apu {
    pub fn new() -> Self {
        Self {
            ports: [0; 4],
            dsp_mirror: [0; 4],
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_phase: 0.0,
            samples: Vec::with_capacity(2048),
        }
    }

    pub fn reset(&mut self) {
        self.ports = [0; 4];
        self.dsp_mirror = [0; 4];
        self.sample_phase = 0.0;
        self.samples.clear();
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(8_000);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn write_port(&mut self, port: usize, value: u8) {
        let port = port & 0x03;
        self.ports[port] = value;
        self.dsp_mirror[port] = value;
    }

    pub fn read_port(&self, port: usize) -> u8 {
        self.ports[port & 0x03]
    }

    pub fn dsp_mirror(&self) -> [u8; 4] {
        self.dsp_mirror
    }

    /// Queue one frame's worth of interleaved stereo samples. The fractional
    /// remainder carries across frames so the long-run rate stays exact.
    pub fn generate_frame_samples(&mut self) {
        self.sample_phase += self.sample_rate as f64 / FRAME_RATE_HZ;
        let count = self.sample_phase as usize;
        self.sample_phase -= count as f64;
        self.samples.resize(self.samples.len() + count * 2, 0.0);
    }

    /// Drain queued interleaved stereo samples.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    pub fn queued_samples(&self) -> usize {
        self.samples.len()
    }

    /// Fill caller-provided channel buffers. Silence is the conforming
    /// baseline; slices of unequal length are both filled to their own end.
    pub fn fill_audio(&mut self, left: &mut [f32], right: &mut [f32]) {
        left.fill(0.0);
        right.fill(0.0);
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}
