//! Save states: a versioned little-endian blob of every piece of mutable
//! machine state, guarded by a cartridge fingerprint so a state can only be
//! restored onto the image it was taken from.

use std::fmt;

use sha1::{Digest, Sha1};

use super::{Snes, SnesDebugCounters};

pub const SAVESTATE_MAGIC: [u8; 4] = *b"C16S";
pub const SAVESTATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreError {
    BadMagic,
    BadVersion(u32),
    /// Fingerprint does not match the loaded cartridge.
    WrongCartridge,
    /// No cartridge is loaded to restore onto.
    NoCartridge,
    Truncated,
}

impl fmt::Display for RestoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not a save-state blob"),
            Self::BadVersion(version) => write!(f, "unsupported save-state version {version}"),
            Self::WrongCartridge => write!(f, "save state belongs to a different cartridge"),
            Self::NoCartridge => write!(f, "no cartridge loaded"),
            Self::Truncated => write!(f, "save state ends early"),
        }
    }
}

impl std::error::Error for RestoreError {}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::with_capacity(0x48000) }
    }

    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RestoreError> {
        let end = self.pos.checked_add(len).ok_or(RestoreError::Truncated)?;
        if end > self.data.len() {
            return Err(RestoreError::Truncated);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RestoreError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, RestoreError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, RestoreError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, RestoreError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, RestoreError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes_into(&mut self, out: &mut [u8]) -> Result<(), RestoreError> {
        let src = self.take(out.len())?;
        out.copy_from_slice(src);
        Ok(())
    }
}

fn cartridge_sha1(rom: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(rom);
    hasher.finalize().into()
}

impl Snes {
    /// Serialize the full mutable state. Panics are impossible; a machine
    /// with no cartridge produces a blob that only restores onto the same
    /// empty configuration.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&SAVESTATE_MAGIC);
        w.put_u32(SAVESTATE_VERSION);

        // Cartridge fingerprint.
        match &self.cartridge {
            Some(cartridge) => {
                w.put_u32(cartridge.rom_size() as u32);
                w.put_u16(cartridge.computed_checksum());
                w.put_bytes(&cartridge_sha1(cartridge.rom_bytes()));
            }
            None => {
                w.put_u32(0);
                w.put_u16(0);
                w.put_bytes(&[0u8; 20]);
            }
        }

        // CPU.
        w.put_u16(self.a);
        w.put_u16(self.x);
        w.put_u16(self.y);
        w.put_u16(self.sp);
        w.put_u16(self.pc);
        w.put_u16(self.dp);
        w.put_u8(self.pbr);
        w.put_u8(self.dbr);
        w.put_u8(self.p);
        w.put_bool(self.emulation);
        w.put_bool(self.halted);
        w.put_bool(self.waiting);

        // Memories.
        w.put_bytes(&self.wram);
        w.put_u32(self.sram.len() as u32);
        w.put_bytes(&self.sram);
        w.put_bytes(&self.regs);

        // PPU.
        for &word in &self.ppu.vram {
            w.put_u16(word);
        }
        for &entry in &self.ppu.cgram {
            w.put_u16(entry);
        }
        w.put_bytes(&self.ppu.oam);
        w.put_bool(self.ppu.forced_blank);
        w.put_u8(self.ppu.brightness);
        w.put_u8(self.ppu.bg_mode);
        for layer in &self.ppu.layers {
            w.put_bool(layer.tile16);
            w.put_u16(layer.map_base);
            w.put_u8(layer.map_size);
            w.put_u16(layer.chr_base);
        }
        w.put_u8(self.ppu.main_mask);
        w.put_u8(self.ppu.sub_mask);
        w.put_u16(self.ppu.vram_addr);
        w.put_u16(self.ppu.vram_step);
        w.put_bool(self.ppu.vram_inc_high);
        w.put_u16(self.ppu.vram_read_latch);
        w.put_u8(self.ppu.cgram_addr);
        w.put_bool(self.ppu.cgram_low.is_some());
        w.put_u8(self.ppu.cgram_low.unwrap_or(0));
        w.put_bool(self.ppu.cgram_read_high);
        w.put_u16(self.ppu.oam_addr);

        // APU ports.
        w.put_bytes(&self.apu.ports);
        w.put_bytes(&self.apu.dsp_mirror);

        // DMA channels.
        for channel in &self.dma {
            w.put_u8(channel.control);
            w.put_u8(channel.b_reg);
            w.put_u32(channel.a_addr);
            w.put_u16(channel.size);
        }

        // Scheduler and interrupt lines.
        w.put_bool(self.nmi_enabled);
        w.put_bool(self.pending_nmi);
        w.put_bool(self.pending_irq);
        w.put_bool(self.in_vblank);
        w.put_bool(self.nmi_flag);
        w.put_u16(self.controller_state);
        w.put_u16(self.controller_shift);
        w.put_u8(self.controller_reads);
        w.put_bool(self.controller_strobe);
        w.put_u64(self.total_cycles);
        w.put_u64(self.frame_cycle);

        // Diagnostic counters ride along so the embedder can read them out
        // of a snapshot.
        let d = &self.debug;
        for value in [
            d.frames,
            d.cpu_steps,
            d.cpu_reads,
            d.cpu_writes,
            d.reads_wram,
            d.reads_regs,
            d.reads_sram,
            d.reads_cart,
            d.writes_wram,
            d.writes_regs,
            d.writes_sram,
            d.mapping_misses,
            d.sram_out_of_bounds,
            d.decode_misses,
            d.dma_transfers,
            d.dma_bytes,
            d.nmi_serviced,
            d.irq_serviced,
            d.checksum_warnings,
        ] {
            w.put_u64(value);
        }
        w.put_u8(d.last_decode_miss_opcode);
        w.put_u32(d.last_decode_miss_pc);

        w.buf
    }

    pub fn restore(&mut self, blob: &[u8]) -> Result<(), RestoreError> {
        let mut r = Reader::new(blob);

        let mut magic = [0u8; 4];
        r.bytes_into(&mut magic)?;
        if magic != SAVESTATE_MAGIC {
            return Err(RestoreError::BadMagic);
        }
        let version = r.u32()?;
        if version != SAVESTATE_VERSION {
            return Err(RestoreError::BadVersion(version));
        }

        let rom_size = r.u32()? as usize;
        let checksum = r.u16()?;
        let mut sha = [0u8; 20];
        r.bytes_into(&mut sha)?;
        match &self.cartridge {
            Some(cartridge) => {
                if rom_size != cartridge.rom_size()
                    || checksum != cartridge.computed_checksum()
                    || sha != cartridge_sha1(cartridge.rom_bytes())
                {
                    return Err(RestoreError::WrongCartridge);
                }
            }
            None => {
                if rom_size != 0 {
                    return Err(RestoreError::NoCartridge);
                }
            }
        }

        self.a = r.u16()?;
        self.x = r.u16()?;
        self.y = r.u16()?;
        self.sp = r.u16()?;
        self.pc = r.u16()?;
        self.dp = r.u16()?;
        self.pbr = r.u8()?;
        self.dbr = r.u8()?;
        self.p = r.u8()?;
        self.emulation = r.bool()?;
        self.halted = r.bool()?;
        self.waiting = r.bool()?;

        r.bytes_into(&mut self.wram)?;
        let sram_len = r.u32()? as usize;
        self.sram = r.take(sram_len)?.to_vec();
        r.bytes_into(&mut self.regs)?;

        for index in 0..self.ppu.vram.len() {
            self.ppu.vram[index] = r.u16()?;
        }
        for index in 0..self.ppu.cgram.len() {
            self.ppu.cgram[index] = r.u16()?;
        }
        r.bytes_into(&mut self.ppu.oam)?;
        self.ppu.forced_blank = r.bool()?;
        self.ppu.brightness = r.u8()?;
        self.ppu.bg_mode = r.u8()?;
        for index in 0..self.ppu.layers.len() {
            self.ppu.layers[index].tile16 = r.bool()?;
            self.ppu.layers[index].map_base = r.u16()?;
            self.ppu.layers[index].map_size = r.u8()?;
            self.ppu.layers[index].chr_base = r.u16()?;
        }
        self.ppu.main_mask = r.u8()?;
        self.ppu.sub_mask = r.u8()?;
        self.ppu.vram_addr = r.u16()?;
        self.ppu.vram_step = r.u16()?;
        self.ppu.vram_inc_high = r.bool()?;
        self.ppu.vram_read_latch = r.u16()?;
        self.ppu.cgram_addr = r.u8()?;
        let has_low = r.bool()?;
        let low = r.u8()?;
        self.ppu.cgram_low = if has_low { Some(low) } else { None };
        self.ppu.cgram_read_high = r.bool()?;
        self.ppu.oam_addr = r.u16()?;

        r.bytes_into(&mut self.apu.ports)?;
        r.bytes_into(&mut self.apu.dsp_mirror)?;

        for channel in self.dma.iter_mut() {
            channel.control = r.u8()?;
            channel.b_reg = r.u8()?;
            channel.a_addr = r.u32()?;
            channel.size = r.u16()?;
        }

        self.nmi_enabled = r.bool()?;
        self.pending_nmi = r.bool()?;
        self.pending_irq = r.bool()?;
        self.in_vblank = r.bool()?;
        self.nmi_flag = r.bool()?;
        self.controller_state = r.u16()?;
        self.controller_shift = r.u16()?;
        self.controller_reads = r.u8()?;
        self.controller_strobe = r.bool()?;
        self.total_cycles = r.u64()?;
        self.frame_cycle = r.u64()?;

        let mut counters = SnesDebugCounters::default();
        counters.frames = r.u64()?;
        counters.cpu_steps = r.u64()?;
        counters.cpu_reads = r.u64()?;
        counters.cpu_writes = r.u64()?;
        counters.reads_wram = r.u64()?;
        counters.reads_regs = r.u64()?;
        counters.reads_sram = r.u64()?;
        counters.reads_cart = r.u64()?;
        counters.writes_wram = r.u64()?;
        counters.writes_regs = r.u64()?;
        counters.writes_sram = r.u64()?;
        counters.mapping_misses = r.u64()?;
        counters.sram_out_of_bounds = r.u64()?;
        counters.decode_misses = r.u64()?;
        counters.dma_transfers = r.u64()?;
        counters.dma_bytes = r.u64()?;
        counters.nmi_serviced = r.u64()?;
        counters.irq_serviced = r.u64()?;
        counters.checksum_warnings = r.u64()?;
        counters.last_decode_miss_opcode = r.u8()?;
        counters.last_decode_miss_pc = r.u32()?;
        self.debug = counters;

        Ok(())
    }
}
