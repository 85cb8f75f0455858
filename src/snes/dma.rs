//! General-purpose DMA: eight channels copying between the A-bus (memory)
//! and the B-bus (the 0x21xx register page).

use super::Snes;

const CTRL_DIRECTION_B_TO_A: u8 = 0x80;
const CTRL_ADDRESS_FIXED: u8 = 0x08;
const CTRL_MODE_MASK: u8 = 0x07;

/// B-bus register-offset sequence per transfer mode.
const MODE_PATTERNS: [&[u16]; 8] = [
    &[0],
    &[0, 1],
    &[0, 0],
    &[0, 0, 1, 1],
    &[0, 1, 2, 3],
    &[0, 1, 0, 1],
    &[0, 0],
    &[0, 0, 1, 1],
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaChannel {
    pub control: u8,
    /// B-bus destination: low byte of 0x21xx.
    pub b_reg: u8,
    /// 24-bit A-bus address.
    pub a_addr: u32,
    /// Transfer length in bytes; 0 means 65536.
    pub size: u16,
}

impl DmaChannel {
    fn byte_count(&self) -> usize {
        if self.size == 0 { 0x1_0000 } else { self.size as usize }
    }
}

impl Snes {
    /// Channel register write, 16 registers per channel at 0x10 stride.
    pub(crate) fn dma_reg_write(&mut self, offset: u16, value: u8) {
        let channel = &mut self.dma[((offset - 0x4300) >> 4) as usize & 0x07];
        match offset & 0x0F {
            0x00 => channel.control = value,
            0x02 => channel.b_reg = value,
            0x03 => channel.a_addr = (channel.a_addr & 0xFF_FF00) | value as u32,
            0x04 => channel.a_addr = (channel.a_addr & 0xFF_00FF) | ((value as u32) << 8),
            0x05 => channel.a_addr = (channel.a_addr & 0x00_FFFF) | ((value as u32) << 16),
            0x08 => channel.size = (channel.size & 0xFF00) | value as u16,
            0x09 => channel.size = (channel.size & 0x00FF) | ((value as u16) << 8),
            _ => {}
        }
    }

    /// 0x420B write: run every selected channel to completion, in channel
    /// order, then drop the enable bits.
    pub(crate) fn run_dma(&mut self, mask: u8) {
        for channel in 0..8 {
            if mask & (1 << channel) != 0 {
                self.run_dma_channel(channel);
            }
        }
        self.regs[(0x420B - 0x2100) as usize] = 0;
    }

    fn run_dma_channel(&mut self, channel: usize) {
        let state = self.dma[channel];
        let pattern = MODE_PATTERNS[(state.control & CTRL_MODE_MASK) as usize];
        let fixed = state.control & CTRL_ADDRESS_FIXED != 0;
        let b_to_a = state.control & CTRL_DIRECTION_B_TO_A != 0;
        let count = state.byte_count();

        let mut a_addr = state.a_addr;
        for index in 0..count {
            let b_offset = 0x2100 + state.b_reg as u16 + pattern[index % pattern.len()];
            if b_to_a {
                let value = self.mmio_read(b_offset);
                self.bus_write(a_addr, value);
            } else {
                let value = self.bus_read(a_addr);
                self.mmio_write(b_offset, value);
            }
            if !fixed {
                // The A-bus pointer walks within its bank.
                let next = (a_addr as u16).wrapping_add(1);
                a_addr = (a_addr & 0xFF_0000) | next as u32;
            }
        }

        self.dma[channel].a_addr = a_addr;
        self.dma[channel].size = 0;
        self.debug.dma_transfers = self.debug.dma_transfers.wrapping_add(1);
        self.debug.dma_bytes = self.debug.dma_bytes.wrapping_add(count as u64);
        self.push_debug_event(format!(
            "DMA ch{channel}: {count} bytes {} $21{:02X} pattern {:?}",
            if b_to_a { "from" } else { "to" },
            state.b_reg,
            pattern,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::super::Snes;
    use super::super::testrom::*;

    fn configure_channel(
        snes: &mut Snes,
        channel: u16,
        control: u8,
        b_reg: u8,
        a_addr: u32,
        size: u16,
    ) {
        let base = 0x4300 + channel * 0x10;
        snes.bus_write(0x0000_0000 | (base as u32), control);
        snes.bus_write((base + 0x02) as u32, b_reg);
        snes.bus_write((base + 0x03) as u32, a_addr as u8);
        snes.bus_write((base + 0x04) as u32, (a_addr >> 8) as u8);
        snes.bus_write((base + 0x05) as u32, (a_addr >> 16) as u8);
        snes.bus_write((base + 0x08) as u32, size as u8);
        snes.bus_write((base + 0x09) as u32, (size >> 8) as u8);
    }

    fn fill_wram(snes: &mut Snes, base: u32, bytes: &[u8]) {
        for (index, &byte) in bytes.iter().enumerate() {
            snes.bus_write(base + index as u32, byte);
        }
    }

    #[test]
    fn mode0_fills_palette_entries() {
        // S7: 32 bytes into the palette data port commit 16 entries.
        let mut snes = snes_with_code(&[0xEA]);
        let source: Vec<u8> = (0u8..32).collect();
        fill_wram(&mut snes, 0x7E_0200, &source);

        snes.bus_write(0x00_2121, 0x00); // palette index 0
        configure_channel(&mut snes, 0, 0x00, 0x22, 0x7E_0200, 32);
        snes.bus_write(0x00_420B, 0x01);

        for entry in 0..16u8 {
            let expected =
                u16::from_le_bytes([source[entry as usize * 2], source[entry as usize * 2 + 1]])
                    & 0x7FFF;
            assert_eq!(snes.ppu.cgram_entry(entry), expected, "entry {entry}");
        }
        assert_eq!(snes.ppu.cgram_addr(), 16);
        assert_eq!(snes.debug_counters().dma_bytes, 32);
    }

    #[test]
    fn mode1_alternates_vram_data_ports() {
        let mut snes = snes_with_code(&[0xEA]);
        let words: Vec<u8> = vec![0x34, 0x12, 0x78, 0x56];
        fill_wram(&mut snes, 0x7E_0100, &words);

        snes.bus_write(0x00_2115, 0x80); // increment on high byte, step 1
        snes.bus_write(0x00_2116, 0x00);
        snes.bus_write(0x00_2117, 0x30); // VRAM word 0x3000
        configure_channel(&mut snes, 0, 0x01, 0x18, 0x7E_0100, 4);
        snes.bus_write(0x00_420B, 0x01);

        assert_eq!(snes.ppu.vram_word(0x3000), 0x1234);
        assert_eq!(snes.ppu.vram_word(0x3001), 0x5678);
        assert_eq!(snes.ppu.vram_addr(), 0x3002);
    }

    #[test]
    fn fixed_address_rereads_one_byte() {
        let mut snes = snes_with_code(&[0xEA]);
        snes.bus_write(0x7E_0300, 0x5A);

        snes.bus_write(0x00_2121, 0x10);
        configure_channel(&mut snes, 0, 0x08, 0x22, 0x7E_0300, 4);
        snes.bus_write(0x00_420B, 0x01);

        // Four copies of the same byte: two committed palette words.
        assert_eq!(snes.ppu.cgram_entry(0x10), 0x5A5A);
        assert_eq!(snes.ppu.cgram_entry(0x11), 0x5A5A);
        assert_eq!(snes.dma[0].a_addr, 0x7E_0300);
    }

    #[test]
    fn b_to_a_reads_registers_into_memory() {
        let mut snes = snes_with_code(&[0xEA]);
        snes.bus_write(0x00_2140, 0xC3); // APU port echoes on read

        configure_channel(&mut snes, 1, 0x80, 0x40, 0x7E_0400, 4);
        snes.bus_write(0x00_420B, 0x02);

        for offset in 0..4u32 {
            assert_eq!(snes.bus_read(0x7E_0400 + offset), 0xC3);
        }
    }

    #[test]
    fn size_zero_means_full_bank() {
        let mut snes = snes_with_code(&[0xEA]);
        configure_channel(&mut snes, 0, 0x00, 0x80, 0x7E_0000, 0);
        snes.bus_write(0x00_420B, 0x01);
        assert_eq!(snes.debug_counters().dma_bytes, 0x1_0000);
        // Wrapped exactly once around the bank.
        assert_eq!(snes.dma[0].a_addr, 0x7E_0000);
    }

    #[test]
    fn channels_run_in_order_and_clear_enable() {
        let mut snes = snes_with_code(&[0xEA]);
        fill_wram(&mut snes, 0x7E_0500, &[0x11, 0x22]);
        fill_wram(&mut snes, 0x7E_0600, &[0x33, 0x44]);

        snes.bus_write(0x00_2121, 0x00);
        configure_channel(&mut snes, 0, 0x00, 0x22, 0x7E_0500, 2);
        configure_channel(&mut snes, 1, 0x00, 0x22, 0x7E_0600, 2);
        snes.bus_write(0x00_420B, 0x03);

        assert_eq!(snes.ppu.cgram_entry(0), 0x2211);
        assert_eq!(snes.ppu.cgram_entry(1), 0x4433);
        assert_eq!(snes.bus_read(0x00_420B), 0);
        assert_eq!(snes.debug_counters().dma_transfers, 2);
    }

    #[test]
    fn mode4_walks_four_registers() {
        let mut snes = snes_with_code(&[0xEA]);
        fill_wram(&mut snes, 0x7E_0700, &[0xA1, 0xA2, 0xA3, 0xA4]);

        // Walk the four audio ports 0x2140-0x2143.
        configure_channel(&mut snes, 0, 0x04, 0x40, 0x7E_0700, 4);
        snes.bus_write(0x00_420B, 0x01);

        assert_eq!(snes.bus_read(0x00_2140), 0xA1);
        assert_eq!(snes.bus_read(0x00_2141), 0xA2);
        assert_eq!(snes.bus_read(0x00_2142), 0xA3);
        assert_eq!(snes.bus_read(0x00_2143), 0xA4);
    }

    #[test]
    fn mode3_doubles_each_port() {
        let mut snes = snes_with_code(&[0xEA]);
        fill_wram(&mut snes, 0x7E_0800, &[0x01, 0x02, 0x03, 0x04]);

        configure_channel(&mut snes, 0, 0x03, 0x40, 0x7E_0800, 4);
        snes.bus_write(0x00_420B, 0x01);

        // Pattern 0,0,1,1: the later write wins each port.
        assert_eq!(snes.bus_read(0x00_2140), 0x02);
        assert_eq!(snes.bus_read(0x00_2141), 0x04);
    }
}
