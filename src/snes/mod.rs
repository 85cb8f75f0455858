pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod dma;
pub mod ppu;
pub mod savestate;

use std::collections::VecDeque;
use std::path::Path;

use anyhow::Result;

use apu::Apu;
use cartridge::{Cartridge, LoadError, Mapping};
use dma::DmaChannel;
use ppu::Ppu;

pub use ppu::{FRAME_HEIGHT, FRAME_WIDTH};

/// NTSC master clock and frame geometry: 262 scanlines of 1364 master
/// cycles, the first 224 visible.
pub const MASTER_CLOCK_HZ: f64 = 21_477_272.0;
pub const CYCLES_PER_SCANLINE: u64 = 1364;
pub const SCANLINES_PER_FRAME: u64 = 262;
pub const VISIBLE_SCANLINES: u64 = 224;
pub const CYCLES_PER_FRAME: u64 = CYCLES_PER_SCANLINE * SCANLINES_PER_FRAME;
pub const VBLANK_START_CYCLE: u64 = CYCLES_PER_SCANLINE * VISIBLE_SCANLINES;

const WRAM_SIZE: usize = 0x20000;
/// Flat shadow of the MMIO window 0x2100-0x5FFF.
const REG_FILE_SIZE: usize = 0x3F00;

const FRAME_STEP_GUARD: usize = 10_000_000;
const MAX_DEBUG_EVENTS: usize = 512;

/// Controller buttons, in the embedder's vocabulary. The serial protocol
/// shifts them out in pad bit order: B, Y, Select, Start, Up, Down, Left,
/// Right, A, X, L, R.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    X,
    Y,
    L,
    R,
    Start,
    Select,
}

impl Button {
    fn serial_bit(self) -> u16 {
        let index = match self {
            Button::B => 0,
            Button::Y => 1,
            Button::Select => 2,
            Button::Start => 3,
            Button::Up => 4,
            Button::Down => 5,
            Button::Left => 6,
            Button::Right => 7,
            Button::A => 8,
            Button::X => 9,
            Button::L => 10,
            Button::R => 11,
        };
        1 << index
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SnesDebugCounters {
    pub frames: u64,
    pub cpu_steps: u64,
    pub cpu_reads: u64,
    pub cpu_writes: u64,
    pub reads_wram: u64,
    pub reads_regs: u64,
    pub reads_sram: u64,
    pub reads_cart: u64,
    pub writes_wram: u64,
    pub writes_regs: u64,
    pub writes_sram: u64,
    pub mapping_misses: u64,
    pub sram_out_of_bounds: u64,
    pub decode_misses: u64,
    pub last_decode_miss_opcode: u8,
    pub last_decode_miss_pc: u32,
    pub dma_transfers: u64,
    pub dma_bytes: u64,
    pub nmi_serviced: u64,
    pub irq_serviced: u64,
    pub checksum_warnings: u64,
}

pub type FrameSink = Box<dyn FnMut(&[u8])>;

/// The whole machine. Components live as plain fields; the register file
/// and the CPU registers sit directly on the aggregate so the bus, the DMA
/// engine, and the instruction core are `impl` blocks over one owner.
pub struct Snes {
    // 65816 register file.
    pub(crate) a: u16,
    pub(crate) x: u16,
    pub(crate) y: u16,
    pub(crate) sp: u16,
    pub(crate) pc: u16,
    pub(crate) dp: u16,
    pub(crate) pbr: u8,
    pub(crate) dbr: u8,
    pub(crate) p: u8,
    pub(crate) emulation: bool,
    pub(crate) halted: bool,
    pub(crate) waiting: bool,

    pub(crate) cartridge: Option<Cartridge>,
    pub(crate) wram: Vec<u8>,
    pub(crate) sram: Vec<u8>,
    pub(crate) regs: Vec<u8>,
    pub(crate) ppu: Ppu,
    pub(crate) apu: Apu,
    pub(crate) dma: [DmaChannel; 8],

    pub(crate) nmi_enabled: bool,
    pub(crate) pending_nmi: bool,
    pub(crate) pending_irq: bool,
    pub(crate) in_vblank: bool,
    pub(crate) nmi_flag: bool,

    pub(crate) controller_state: u16,
    pub(crate) controller_shift: u16,
    pub(crate) controller_reads: u8,
    pub(crate) controller_strobe: bool,

    pub(crate) total_cycles: u64,
    pub(crate) frame_cycle: u64,

    running: bool,
    frame_sink: Option<FrameSink>,
    pub(crate) debug: SnesDebugCounters,
    debug_events: VecDeque<String>,
}

impl Default for Snes {
    fn default() -> Self {
        Self::new()
    }
}

impl Snes {
    pub fn new() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0x01FF,
            pc: 0,
            dp: 0,
            pbr: 0,
            dbr: 0,
            p: cpu::FLAG_M | cpu::FLAG_X | cpu::FLAG_I,
            emulation: true,
            halted: false,
            waiting: false,
            cartridge: None,
            wram: vec![0; WRAM_SIZE],
            sram: Vec::new(),
            regs: vec![0; REG_FILE_SIZE],
            ppu: Ppu::new(),
            apu: Apu::new(),
            dma: [DmaChannel::default(); 8],
            nmi_enabled: false,
            pending_nmi: false,
            pending_irq: false,
            in_vblank: false,
            nmi_flag: false,
            controller_state: 0,
            controller_shift: 0,
            controller_reads: 0,
            controller_strobe: false,
            total_cycles: 0,
            frame_cycle: 0,
            running: false,
            frame_sink: None,
            debug: SnesDebugCounters::default(),
            debug_events: VecDeque::with_capacity(MAX_DEBUG_EVENTS),
        }
    }

    pub fn has_cartridge(&self) -> bool {
        self.cartridge.is_some()
    }

    pub fn cartridge_title(&self) -> Option<&str> {
        self.cartridge.as_ref().map(|c| c.title())
    }

    pub fn cartridge_mapping(&self) -> Option<Mapping> {
        self.cartridge.as_ref().map(|c| c.mapping())
    }

    pub fn load_cartridge_from_path(&mut self, path: &Path) -> Result<()> {
        let cartridge = Cartridge::from_file(path)?;
        self.install_cartridge(cartridge);
        Ok(())
    }

    pub fn load_cartridge(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        let cartridge = Cartridge::from_bytes(bytes)?;
        self.install_cartridge(cartridge);
        Ok(())
    }

    fn install_cartridge(&mut self, cartridge: Cartridge) {
        let loaded = format!(
            "cartridge loaded: \"{}\" {:?}, {} KiB image ({} KiB per header), {} KiB SRAM",
            cartridge.title(),
            cartridge.mapping(),
            cartridge.rom_size() / 1024,
            cartridge.header_rom_size() / 1024,
            cartridge.sram_size() / 1024
        );
        let checksum_mismatch = if cartridge.checksum_ok() {
            None
        } else {
            Some(format!(
                "checksum mismatch: header ${:04X}, computed ${:04X}",
                cartridge.header_checksum(),
                cartridge.computed_checksum()
            ))
        };

        self.sram = vec![0; cartridge.sram_size()];
        self.cartridge = Some(cartridge);
        self.reset();

        self.push_debug_event(loaded);
        if let Some(warning) = checksum_mismatch {
            self.debug.checksum_warnings = self.debug.checksum_warnings.wrapping_add(1);
            self.push_debug_event(warning);
        }
    }

    /// Reset every component. The cartridge stays in the slot and save-RAM
    /// contents survive; everything else returns to power-on state.
    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0x01FF;
        self.dp = 0;
        self.pbr = 0;
        self.dbr = 0;
        self.p = cpu::FLAG_M | cpu::FLAG_X | cpu::FLAG_I;
        self.emulation = true;
        self.halted = false;
        self.waiting = false;

        self.wram.fill(0);
        self.regs.fill(0);
        self.ppu.reset();
        self.apu.reset();
        self.dma = [DmaChannel::default(); 8];

        self.nmi_enabled = false;
        self.pending_nmi = false;
        self.pending_irq = false;
        self.in_vblank = false;
        self.nmi_flag = false;

        self.controller_state = 0;
        self.controller_shift = 0;
        self.controller_reads = 0;
        self.controller_strobe = false;

        self.total_cycles = 0;
        self.frame_cycle = 0;
        self.debug = SnesDebugCounters::default();
        self.debug_events.clear();

        if self.cartridge.is_some() {
            self.pc = self.read16_bank0(cpu::VECTOR_RESET);
            self.push_debug_event(format!("reset, PC=${:02X}:{:04X}", self.pbr, self.pc));
        } else {
            self.pc = 0;
        }
    }

    /// Start the machine and simulate one frame. Returns at the frame
    /// boundary so the embedder can present pixels and feed input.
    pub fn run(&mut self) {
        self.running = true;
        self.run_frame();
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_frame_sink(&mut self, sink: FrameSink) {
        self.frame_sink = Some(sink);
    }

    pub fn frame_buffer(&self) -> &[u8] {
        self.ppu.frame_buffer()
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let bit = button.serial_bit();
        if pressed {
            self.controller_state |= bit;
        } else {
            self.controller_state &= !bit;
        }
        if self.controller_strobe {
            self.controller_shift = self.controller_state;
            self.controller_reads = 0;
        }
    }

    pub fn set_audio_sample_rate(&mut self, sample_rate: u32) {
        self.apu.set_sample_rate(sample_rate);
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.apu.sample_rate()
    }

    /// Drain the interleaved stereo samples produced since the last call.
    pub fn take_audio_samples(&mut self) -> Vec<f32> {
        self.apu.take_samples()
    }

    pub fn fill_audio(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.apu.fill_audio(left, right);
    }

    pub(crate) fn run_frame(&mut self) {
        if self.cartridge.is_none() || self.halted || !self.running {
            return;
        }

        let mut guard = 0usize;
        while self.frame_cycle < VBLANK_START_CYCLE {
            self.batch_step(&mut guard);
            if guard > FRAME_STEP_GUARD {
                self.push_debug_event("frame guard tripped in the visible period".to_string());
                self.frame_cycle = VBLANK_START_CYCLE;
                break;
            }
        }

        self.enter_vblank();

        while self.frame_cycle < CYCLES_PER_FRAME {
            self.batch_step(&mut guard);
            if guard > FRAME_STEP_GUARD {
                self.frame_cycle = CYCLES_PER_FRAME;
                break;
            }
        }

        self.in_vblank = false;
        self.frame_cycle -= CYCLES_PER_FRAME;
        self.debug.frames = self.debug.frames.wrapping_add(1);
        self.apu.generate_frame_samples();
    }

    fn batch_step(&mut self, guard: &mut usize) {
        self.debug.cpu_steps = self.debug.cpu_steps.wrapping_add(1);
        let cycles = self.step_cpu() as u64;
        self.frame_cycle += cycles;
        self.total_cycles = self.total_cycles.wrapping_add(cycles);
        *guard += 1;
    }

    fn enter_vblank(&mut self) {
        self.in_vblank = true;
        self.nmi_flag = true;
        if self.nmi_enabled {
            self.pending_nmi = true;
        }
        self.ppu.render_frame();
        if let Some(sink) = self.frame_sink.as_mut() {
            sink(self.ppu.frame_buffer());
        }
    }

    // Controller serial protocol over 0x4016/0x4017: strobe high latches
    // the live button state; strobe low shifts one bit per read, 1s after
    // all sixteen positions.
    pub(crate) fn controller_strobe_write(&mut self, value: u8) {
        let strobe = value & 0x01 != 0;
        if strobe {
            self.controller_shift = self.controller_state;
            self.controller_reads = 0;
        }
        self.controller_strobe = strobe;
    }

    pub(crate) fn controller_serial_read(&mut self) -> u8 {
        if self.controller_strobe {
            return (self.controller_state & 0x01) as u8;
        }
        if self.controller_reads >= 16 {
            return 0x01;
        }
        let bit = (self.controller_shift & 0x01) as u8;
        self.controller_shift >>= 1;
        self.controller_reads += 1;
        bit
    }

    pub(crate) fn push_debug_event<S: Into<String>>(&mut self, event: S) {
        if self.debug_events.len() >= MAX_DEBUG_EVENTS {
            self.debug_events.pop_front();
        }
        self.debug_events.push_back(event.into());
    }

    pub fn debug_counters(&self) -> SnesDebugCounters {
        self.debug
    }

    pub fn debug_recent_events(&self, limit: usize) -> Vec<String> {
        self.debug_events.iter().rev().take(limit).cloned().collect()
    }

    pub fn debug_pc(&self) -> u32 {
        ((self.pbr as u32) << 16) | self.pc as u32
    }

    /// (A, X, Y, SP, DP, P, emulation-mode)
    pub fn debug_cpu_regs(&self) -> (u16, u16, u16, u16, u16, u8, bool) {
        (self.a, self.x, self.y, self.sp, self.dp, self.p, self.emulation)
    }

    pub fn debug_halted(&self) -> bool {
        self.halted
    }

    pub fn debug_total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn debug_ppu_counters(&self) -> ppu::PpuDebugCounters {
        self.ppu.debug_counters()
    }
}
