pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 224;

const VRAM_WORDS: usize = 0x8000;
const CGRAM_ENTRIES: usize = 256;
const OAM_BYTES: usize = 544;

const DISPLAY_FORCED_BLANK: u8 = 0x80;
const VRAM_INC_ON_HIGH: u8 = 0x80;

/// Auto-increment step per 0x2115 bits 0-1.
const VRAM_STEPS: [u16; 4] = [1, 32, 128, 128];

#[derive(Debug, Clone, Copy, Default)]
pub struct PpuDebugCounters {
    pub frames_rendered: u64,
    pub vram_word_writes: u64,
    pub cgram_commits: u64,
    pub oam_writes: u64,
    pub reg_writes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BgLayer {
    /// 16x16 tiles instead of 8x8.
    pub tile16: bool,
    /// Tilemap base, in VRAM word addresses.
    pub map_base: u16,
    /// Tilemap size code: 0=32x32, 1=64x32, 2=32x64, 3=64x64 screens.
    pub map_size: u8,
    /// Character data base, in VRAM word addresses.
    pub chr_base: u16,
}

#[derive(Debug, Clone)]
pub struct Ppu {
    pub(crate) vram: Vec<u16>,
    pub(crate) cgram: [u16; CGRAM_ENTRIES],
    pub(crate) oam: [u8; OAM_BYTES],

    pub(crate) forced_blank: bool,
    pub(crate) brightness: u8,
    pub(crate) bg_mode: u8,
    pub(crate) layers: [BgLayer; 4],
    pub(crate) main_mask: u8,
    pub(crate) sub_mask: u8,

    // VRAM port state: word address, step, which byte write advances, and
    // the word latched for the read port.
    pub(crate) vram_addr: u16,
    pub(crate) vram_step: u16,
    pub(crate) vram_inc_high: bool,
    pub(crate) vram_read_latch: u16,

    // CGRAM port state: entry index plus the two-phase byte latches.
    pub(crate) cgram_addr: u8,
    pub(crate) cgram_low: Option<u8>,
    pub(crate) cgram_read_high: bool,

    pub(crate) oam_addr: u16,

    frame_buffer: Vec<u8>,
    debug: PpuDebugCounters,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            vram: vec![0; VRAM_WORDS],
            cgram: [0; CGRAM_ENTRIES],
            oam: [0; OAM_BYTES],
            forced_blank: true,
            brightness: 0,
            bg_mode: 0,
            layers: [BgLayer::default(); 4],
            main_mask: 0,
            sub_mask: 0,
            vram_addr: 0,
            vram_step: 1,
            vram_inc_high: false,
            vram_read_latch: 0,
            cgram_addr: 0,
            cgram_low: None,
            cgram_read_high: false,
            oam_addr: 0,
            frame_buffer: vec![0; FRAME_WIDTH * FRAME_HEIGHT * 4],
            debug: PpuDebugCounters::default(),
        }
    }

    pub fn reset(&mut self) {
        let mut fresh = Self::new();
        std::mem::swap(self, &mut fresh);
    }

    pub fn frame_buffer(&self) -> &[u8] {
        &self.frame_buffer
    }

    pub fn debug_counters(&self) -> PpuDebugCounters {
        self.debug
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn forced_blank(&self) -> bool {
        self.forced_blank
    }

    pub fn bg_mode(&self) -> u8 {
        self.bg_mode
    }

    pub fn vram_word(&self, index: u16) -> u16 {
        self.vram[(index as usize) & (VRAM_WORDS - 1)]
    }

    pub fn vram_addr(&self) -> u16 {
        self.vram_addr
    }

    pub fn cgram_entry(&self, index: u8) -> u16 {
        self.cgram[index as usize]
    }

    pub fn cgram_addr(&self) -> u8 {
        self.cgram_addr
    }

    /// Handle a write routed from the bus. Returns false for register
    /// addresses this unit does not model; the flat shadow keeps the byte.
    pub fn write_reg(&mut self, addr: u16, value: u8) -> bool {
        self.debug.reg_writes = self.debug.reg_writes.wrapping_add(1);
        match addr {
            0x2100 => {
                self.forced_blank = value & DISPLAY_FORCED_BLANK != 0;
                self.brightness = value & 0x0F;
            }
            0x2102 => {
                self.oam_addr = (self.oam_addr & 0x0200) | ((value as u16) << 1);
            }
            0x2103 => {
                self.oam_addr = (self.oam_addr & 0x01FF) | (((value as u16) & 0x01) << 9);
            }
            0x2104 => {
                self.oam[(self.oam_addr as usize) % OAM_BYTES] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1) % (OAM_BYTES as u16);
                self.debug.oam_writes = self.debug.oam_writes.wrapping_add(1);
            }
            0x2105 => {
                self.bg_mode = value & 0x07;
                for (index, layer) in self.layers.iter_mut().enumerate() {
                    layer.tile16 = value & (0x10 << index) != 0;
                }
            }
            0x2107..=0x210A => {
                let layer = &mut self.layers[(addr - 0x2107) as usize];
                layer.map_base = ((value as u16) >> 2) * 0x400;
                layer.map_size = value & 0x03;
            }
            0x210B => {
                self.layers[0].chr_base = ((value as u16) & 0x0F) * 0x1000;
                self.layers[1].chr_base = ((value as u16) >> 4) * 0x1000;
            }
            0x210C => {
                self.layers[2].chr_base = ((value as u16) & 0x0F) * 0x1000;
                self.layers[3].chr_base = ((value as u16) >> 4) * 0x1000;
            }
            0x2115 => {
                self.vram_step = VRAM_STEPS[(value & 0x03) as usize];
                self.vram_inc_high = value & VRAM_INC_ON_HIGH != 0;
            }
            0x2116 => {
                self.vram_addr = (self.vram_addr & 0xFF00) | value as u16;
                self.reload_vram_latch();
            }
            0x2117 => {
                self.vram_addr = (self.vram_addr & 0x00FF) | ((value as u16) << 8);
                self.reload_vram_latch();
            }
            0x2118 => {
                let index = (self.vram_addr as usize) & (VRAM_WORDS - 1);
                self.vram[index] = (self.vram[index] & 0xFF00) | value as u16;
                self.debug.vram_word_writes = self.debug.vram_word_writes.wrapping_add(1);
                if !self.vram_inc_high {
                    self.advance_vram_addr();
                }
            }
            0x2119 => {
                let index = (self.vram_addr as usize) & (VRAM_WORDS - 1);
                self.vram[index] = (self.vram[index] & 0x00FF) | ((value as u16) << 8);
                self.debug.vram_word_writes = self.debug.vram_word_writes.wrapping_add(1);
                if self.vram_inc_high {
                    self.advance_vram_addr();
                }
            }
            0x2121 => {
                self.cgram_addr = value;
                self.cgram_low = None;
                self.cgram_read_high = false;
            }
            0x2122 => match self.cgram_low.take() {
                None => self.cgram_low = Some(value),
                Some(low) => {
                    let entry = (((value as u16) & 0x7F) << 8) | low as u16;
                    self.cgram[self.cgram_addr as usize] = entry;
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                    self.debug.cgram_commits = self.debug.cgram_commits.wrapping_add(1);
                }
            },
            0x212C => self.main_mask = value & 0x1F,
            0x212D => self.sub_mask = value & 0x1F,
            _ => return false,
        }
        true
    }

    /// Handle a read routed from the bus for the ports with read behavior.
    pub fn read_reg(&mut self, addr: u16) -> Option<u8> {
        match addr {
            0x2139 => {
                let value = self.vram_read_latch as u8;
                if !self.vram_inc_high {
                    self.advance_vram_addr();
                    self.reload_vram_latch();
                }
                Some(value)
            }
            0x213A => {
                let value = (self.vram_read_latch >> 8) as u8;
                if self.vram_inc_high {
                    self.advance_vram_addr();
                    self.reload_vram_latch();
                }
                Some(value)
            }
            0x213B => {
                let entry = self.cgram[self.cgram_addr as usize];
                if self.cgram_read_high {
                    self.cgram_read_high = false;
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                    Some((entry >> 8) as u8)
                } else {
                    self.cgram_read_high = true;
                    Some(entry as u8)
                }
            }
            _ => None,
        }
    }

    fn advance_vram_addr(&mut self) {
        self.vram_addr = self.vram_addr.wrapping_add(self.vram_step);
    }

    fn reload_vram_latch(&mut self) {
        self.vram_read_latch = self.vram[(self.vram_addr as usize) & (VRAM_WORDS - 1)];
    }

    /// Decode the configured backgrounds into the RGBA frame buffer.
    pub fn render_frame(&mut self) {
        self.debug.frames_rendered = self.debug.frames_rendered.wrapping_add(1);

        let layers = self.active_layers();
        let any_enabled = layers.iter().any(|&(index, _)| self.main_mask & (1 << index) != 0);
        if self.forced_blank || !any_enabled {
            for pixel in self.frame_buffer.chunks_exact_mut(4) {
                pixel.copy_from_slice(&[0, 0, 0, 0xFF]);
            }
            return;
        }

        let backdrop = self.rgba(self.cgram[0]);
        for pixel in self.frame_buffer.chunks_exact_mut(4) {
            pixel.copy_from_slice(&backdrop);
        }

        // Painter passes: low-priority tiles of every layer back to front,
        // then high-priority tiles in the same order.
        for priority in [0u16, 1] {
            for &(index, bpp) in layers.iter().rev() {
                if self.main_mask & (1 << index) != 0 {
                    self.draw_layer(index, bpp, priority);
                }
            }
        }
    }

    /// Layers participating in the current mode, front to back, with their
    /// bits per pixel. Modes 2-7 fall back to the primary background.
    fn active_layers(&self) -> Vec<(usize, u8)> {
        match self.bg_mode {
            0 => vec![(0, 2), (1, 2), (2, 2), (3, 2)],
            1 => vec![(0, 4), (1, 4), (2, 2)],
            _ => vec![(0, 4)],
        }
    }

    /// Base CGRAM index for a palette group of the given layer. Mode 0 gives
    /// each background its own 32-entry region.
    fn palette_base(&self, layer: usize, bpp: u8, group: u16) -> usize {
        let colors = if bpp == 4 { 16 } else { 4 };
        let layer_base = if self.bg_mode == 0 { layer * 32 } else { 0 };
        layer_base + (group as usize) * colors
    }

    fn draw_layer(&mut self, layer_index: usize, bpp: u8, priority: u16) {
        let layer = self.layers[layer_index];
        let tile_px = if layer.tile16 { 16usize } else { 8 };
        let cols = FRAME_WIDTH / tile_px;
        let rows = FRAME_HEIGHT.div_ceil(tile_px);

        for ty in 0..rows {
            for tx in 0..cols {
                let entry = self.tilemap_entry(&layer, tx, ty);
                if (entry >> 13) & 1 != priority {
                    continue;
                }
                let tile = entry & 0x03FF;
                let group = (entry >> 10) & 0x07;
                let hflip = entry & 0x4000 != 0;
                let vflip = entry & 0x8000 != 0;
                let pal_base = self.palette_base(layer_index, bpp, group);

                if layer.tile16 {
                    for sub_y in 0..2usize {
                        for sub_x in 0..2usize {
                            let pick_x = if hflip { 1 - sub_x } else { sub_x };
                            let pick_y = if vflip { 1 - sub_y } else { sub_y };
                            let sub_tile =
                                (tile + pick_x as u16 + pick_y as u16 * 16) & 0x03FF;
                            self.draw_tile(
                                &layer,
                                bpp,
                                sub_tile,
                                pal_base,
                                hflip,
                                vflip,
                                tx * 16 + sub_x * 8,
                                ty * 16 + sub_y * 8,
                            );
                        }
                    }
                } else {
                    self.draw_tile(&layer, bpp, tile, pal_base, hflip, vflip, tx * 8, ty * 8);
                }
            }
        }
    }

    /// Tilemap word for an on-screen tile position, honoring the screen
    /// layout selected by the size code.
    fn tilemap_entry(&self, layer: &BgLayer, tx: usize, ty: usize) -> u16 {
        let screen = match layer.map_size {
            1 => tx / 32,
            2 => ty / 32,
            3 => (ty / 32) * 2 + tx / 32,
            _ => 0,
        };
        let offset = screen * 0x400 + (ty % 32) * 32 + (tx % 32);
        self.vram[(layer.map_base as usize + offset) & (VRAM_WORDS - 1)]
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_tile(
        &mut self,
        layer: &BgLayer,
        bpp: u8,
        tile: u16,
        pal_base: usize,
        hflip: bool,
        vflip: bool,
        px: usize,
        py: usize,
    ) {
        let words_per_tile = if bpp == 4 { 16usize } else { 8 };
        let char_addr = layer.chr_base as usize + tile as usize * words_per_tile;

        for row in 0..8usize {
            let y = py + row;
            if y >= FRAME_HEIGHT {
                break;
            }
            let fetch_row = if vflip { 7 - row } else { row };
            let plane01 = self.vram[(char_addr + fetch_row) & (VRAM_WORDS - 1)];
            let plane23 = if bpp == 4 {
                self.vram[(char_addr + 8 + fetch_row) & (VRAM_WORDS - 1)]
            } else {
                0
            };

            for col in 0..8usize {
                let x = px + col;
                if x >= FRAME_WIDTH {
                    break;
                }
                let bit = if hflip { col } else { 7 - col };
                let mut index = ((plane01 >> bit) & 1) | (((plane01 >> (8 + bit)) & 1) << 1);
                if bpp == 4 {
                    index |= (((plane23 >> bit) & 1) << 2) | (((plane23 >> (8 + bit)) & 1) << 3);
                }
                if index == 0 {
                    continue;
                }
                let color = self.cgram[(pal_base + index as usize) & (CGRAM_ENTRIES - 1)];
                let rgba = self.rgba(color);
                let at = (y * FRAME_WIDTH + x) * 4;
                self.frame_buffer[at..at + 4].copy_from_slice(&rgba);
            }
        }
    }

    /// 15-bit BGR to RGBA, replicating the high bits and applying brightness.
    fn rgba(&self, color: u16) -> [u8; 4] {
        let expand = |c5: u16| -> u8 { (((c5 << 3) | (c5 >> 2)) & 0xFF) as u8 };
        let scale = |c8: u8| -> u8 { ((c8 as u16 * self.brightness as u16) / 15) as u8 };
        let r = expand(color & 0x1F);
        let g = expand((color >> 5) & 0x1F);
        let b = expand((color >> 10) & 0x1F);
        [scale(r), scale(g), scale(b), 0xFF]
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit_ppu() -> Ppu {
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2100, 0x0F); // full brightness, blanking off
        ppu
    }

    fn write_vram_word(ppu: &mut Ppu, addr: u16, word: u16) {
        ppu.write_reg(0x2115, 0x80); // increment on high byte, step 1
        ppu.write_reg(0x2116, addr as u8);
        ppu.write_reg(0x2117, (addr >> 8) as u8);
        ppu.write_reg(0x2118, word as u8);
        ppu.write_reg(0x2119, (word >> 8) as u8);
    }

    fn write_palette(ppu: &mut Ppu, index: u8, color: u16) {
        ppu.write_reg(0x2121, index);
        ppu.write_reg(0x2122, color as u8);
        ppu.write_reg(0x2122, (color >> 8) as u8);
    }

    fn pixel(ppu: &Ppu, x: usize, y: usize) -> [u8; 4] {
        let at = (y * FRAME_WIDTH + x) * 4;
        ppu.frame_buffer()[at..at + 4].try_into().unwrap()
    }

    #[test]
    fn vram_write_advances_on_low_byte() {
        // S6: address 0x1000, step 1, increment on low byte.
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2115, 0x00);
        ppu.write_reg(0x2116, 0x00);
        ppu.write_reg(0x2117, 0x10);
        ppu.write_reg(0x2118, 0xCD);
        assert_eq!(ppu.vram_word(0x1000) & 0x00FF, 0x00CD);
        assert_eq!(ppu.vram_addr(), 0x1001);
    }

    #[test]
    fn vram_step_sizes() {
        for (mode_bits, step) in [(0x00u8, 1u16), (0x01, 32), (0x02, 128), (0x03, 128)] {
            let mut ppu = Ppu::new();
            ppu.write_reg(0x2115, mode_bits);
            ppu.write_reg(0x2116, 0x00);
            ppu.write_reg(0x2117, 0x20);
            ppu.write_reg(0x2118, 0xAA);
            assert_eq!(ppu.vram_addr(), 0x2000u16.wrapping_add(step));
        }
    }

    #[test]
    fn vram_increment_on_high_waits_for_high_byte() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2115, 0x80);
        ppu.write_reg(0x2116, 0x34);
        ppu.write_reg(0x2117, 0x12);
        ppu.write_reg(0x2118, 0x11);
        assert_eq!(ppu.vram_addr(), 0x1234);
        ppu.write_reg(0x2119, 0x22);
        assert_eq!(ppu.vram_addr(), 0x1235);
        assert_eq!(ppu.vram_word(0x1234), 0x2211);
    }

    #[test]
    fn vram_address_wraps_modulo_16_bits() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2115, 0x02); // step 128
        ppu.write_reg(0x2116, 0xC0);
        ppu.write_reg(0x2117, 0xFF);
        ppu.write_reg(0x2118, 0x01);
        assert_eq!(ppu.vram_addr(), 0xFFC0u16.wrapping_add(128));
    }

    #[test]
    fn palette_latch_commits_on_second_write() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2121, 0x10);
        ppu.write_reg(0x2122, 0x34);
        // First write only latches the low byte.
        assert_eq!(ppu.cgram_entry(0x10), 0);
        ppu.write_reg(0x2122, 0x12);
        assert_eq!(ppu.cgram_entry(0x10), 0x1234);
        assert_eq!(ppu.cgram_addr(), 0x11);
    }

    #[test]
    fn palette_readback_matches_written_bits() {
        // Property 3: a committed 15-bit entry reads back exactly.
        let mut ppu = Ppu::new();
        for (index, color) in [(0u8, 0x7FFFu16), (0x42, 0x1234), (0xFF, 0x0001)] {
            write_palette(&mut ppu, index, color);
            ppu.write_reg(0x2121, index);
            let low = ppu.read_reg(0x213B).unwrap();
            let high = ppu.read_reg(0x213B).unwrap();
            assert_eq!(u16::from_le_bytes([low, high]), color & 0x7FFF);
        }
    }

    #[test]
    fn palette_address_write_resets_latch() {
        let mut ppu = Ppu::new();
        ppu.write_reg(0x2121, 0x20);
        ppu.write_reg(0x2122, 0xAB); // dangling low byte
        ppu.write_reg(0x2121, 0x20);
        ppu.write_reg(0x2122, 0x11);
        ppu.write_reg(0x2122, 0x22);
        assert_eq!(ppu.cgram_entry(0x20), 0x2211);
    }

    #[test]
    fn vram_read_port_returns_written_word() {
        let mut ppu = Ppu::new();
        write_vram_word(&mut ppu, 0x0800, 0xBEEF);
        ppu.write_reg(0x2115, 0x80);
        ppu.write_reg(0x2116, 0x00);
        ppu.write_reg(0x2117, 0x08);
        let low = ppu.read_reg(0x2139).unwrap();
        let high = ppu.read_reg(0x213A).unwrap();
        assert_eq!(u16::from_le_bytes([low, high]), 0xBEEF);
        assert_eq!(ppu.vram_addr(), 0x0801);
    }

    #[test]
    fn forced_blank_renders_black() {
        let mut ppu = lit_ppu();
        write_palette(&mut ppu, 0, 0x7FFF);
        ppu.write_reg(0x212C, 0x01);
        ppu.write_reg(0x2100, 0x80);
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 128, 100), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn no_enabled_layers_renders_black() {
        let mut ppu = lit_ppu();
        write_palette(&mut ppu, 0, 0x7FFF);
        ppu.write_reg(0x212C, 0x00);
        ppu.render_frame();
        assert_eq!(pixel(&ppu, 0, 0), [0, 0, 0, 0xFF]);
    }

    fn checker_tile_2bpp(ppu: &mut Ppu, chr_base: u16, tile: u16) {
        // Plane 0 alternates columns; plane 1 clear: indices 1,0,1,0...
        let base = chr_base + tile * 8;
        for row in 0..8 {
            write_vram_word(ppu, base + row, 0x00AA);
        }
    }

    fn simple_bg1_setup(ppu: &mut Ppu) {
        ppu.write_reg(0x2105, 0x00); // mode 0, 8x8 tiles
        ppu.write_reg(0x2107, 0x04); // tilemap at word 0x0400
        ppu.write_reg(0x210B, 0x01); // BG1 characters at word 0x1000
        ppu.write_reg(0x212C, 0x01); // main screen: BG1 only
    }

    #[test]
    fn renders_2bpp_tile_with_palette_lookup() {
        let mut ppu = lit_ppu();
        simple_bg1_setup(&mut ppu);
        checker_tile_2bpp(&mut ppu, 0x1000, 1);
        write_vram_word(&mut ppu, 0x0400, 0x0001); // tile 1, group 0
        write_palette(&mut ppu, 1, 0x001F); // index 1: full red
        ppu.render_frame();

        // Column 0 carries plane bit 7=1 -> index 1 -> red.
        assert_eq!(pixel(&ppu, 0, 0), [0xFF, 0, 0, 0xFF]);
        // Column 1 is index 0 -> transparent -> backdrop (black).
        assert_eq!(pixel(&ppu, 1, 0), [0, 0, 0, 0xFF]);
    }

    #[test]
    fn horizontal_flip_mirrors_columns() {
        let mut ppu = lit_ppu();
        simple_bg1_setup(&mut ppu);
        checker_tile_2bpp(&mut ppu, 0x1000, 1);
        write_vram_word(&mut ppu, 0x0400, 0x4001); // H-flip set
        write_palette(&mut ppu, 1, 0x001F);
        ppu.render_frame();

        assert_eq!(pixel(&ppu, 0, 0), [0, 0, 0, 0xFF]);
        assert_eq!(pixel(&ppu, 1, 0), [0xFF, 0, 0, 0xFF]);
    }

    #[test]
    fn vertical_flip_mirrors_rows() {
        let mut ppu = lit_ppu();
        simple_bg1_setup(&mut ppu);
        // Only row 0 of tile 1 has pixels.
        write_vram_word(&mut ppu, 0x1000 + 8, 0x00FF);
        write_vram_word(&mut ppu, 0x0400, 0x8001); // V-flip set
        write_palette(&mut ppu, 1, 0x001F);
        ppu.render_frame();

        assert_eq!(pixel(&ppu, 0, 0), [0, 0, 0, 0xFF]);
        assert_eq!(pixel(&ppu, 0, 7), [0xFF, 0, 0, 0xFF]);
    }

    #[test]
    fn mode1_uses_4bpp_for_bg1() {
        let mut ppu = lit_ppu();
        ppu.write_reg(0x2105, 0x01);
        ppu.write_reg(0x2107, 0x04);
        ppu.write_reg(0x210B, 0x01);
        ppu.write_reg(0x212C, 0x01);

        // 4bpp tile 0: plane 3 set across row 0 -> index 8.
        write_vram_word(&mut ppu, 0x1000 + 8, 0xFF00);
        write_vram_word(&mut ppu, 0x0400, 0x0400); // group 1
        write_palette(&mut ppu, 16 + 8, 0x03E0); // group 1, index 8: green
        ppu.render_frame();

        assert_eq!(pixel(&ppu, 0, 0), [0, 0xFF, 0, 0xFF]);
    }

    #[test]
    fn brightness_scales_output() {
        let mut ppu = lit_ppu();
        simple_bg1_setup(&mut ppu);
        checker_tile_2bpp(&mut ppu, 0x1000, 1);
        write_vram_word(&mut ppu, 0x0400, 0x0001);
        write_palette(&mut ppu, 1, 0x001F);
        ppu.write_reg(0x2100, 0x05); // brightness 5 of 15
        ppu.render_frame();

        let expected = ((0xFFu16 * 5) / 15) as u8;
        assert_eq!(pixel(&ppu, 0, 0), [expected, 0, 0, 0xFF]);
    }

    #[test]
    fn priority_tiles_draw_over_other_layers() {
        let mut ppu = lit_ppu();
        ppu.write_reg(0x2105, 0x00);
        ppu.write_reg(0x2107, 0x04); // BG1 map
        ppu.write_reg(0x2108, 0x08); // BG2 map at word 0x0800
        ppu.write_reg(0x210B, 0x21); // BG1 chr 0x1000, BG2 chr 0x2000
        ppu.write_reg(0x212C, 0x03); // BG1 + BG2

        checker_tile_2bpp(&mut ppu, 0x1000, 1);
        checker_tile_2bpp(&mut ppu, 0x2000, 1);
        // BG1 normal priority, BG2 priority bit set: BG2 wins the pixel.
        write_vram_word(&mut ppu, 0x0400, 0x0001);
        write_vram_word(&mut ppu, 0x0800, 0x2001);
        write_palette(&mut ppu, 1, 0x001F); // BG1 region: red
        write_palette(&mut ppu, 33, 0x7C00); // BG2 region (mode 0 offset 32): blue
        ppu.render_frame();

        assert_eq!(pixel(&ppu, 0, 0), [0, 0, 0xFF, 0xFF]);
    }

    #[test]
    fn tile16_layer_uses_quad_subtiles() {
        let mut ppu = lit_ppu();
        ppu.write_reg(0x2105, 0x10); // mode 0, BG1 in 16x16 tiles
        ppu.write_reg(0x2107, 0x04);
        ppu.write_reg(0x210B, 0x01);
        ppu.write_reg(0x212C, 0x01);

        // Sub-tile 2 (index 1) fills its row 0; it lands at pixel x=8..16.
        write_vram_word(&mut ppu, 0x1000 + 8, 0x00FF);
        write_vram_word(&mut ppu, 0x0400, 0x0000); // tile 0
        write_palette(&mut ppu, 1, 0x001F);
        ppu.render_frame();

        assert_eq!(pixel(&ppu, 0, 0), [0, 0, 0, 0xFF]);
        assert_eq!(pixel(&ppu, 8, 0), [0xFF, 0, 0, 0xFF]);
    }

    #[test]
    fn tilemap_size_codes_address_screens() {
        let ppu = {
            let mut ppu = lit_ppu();
            ppu.write_reg(0x2107, 0x07); // base 0x0400, size 3 (64x64)
            ppu
        };
        let layer = ppu.layers[0];
        assert_eq!(layer.map_size, 3);
        // Screen 1 starts one 0x400 page in.
        let mut probe = ppu.clone();
        probe.vram[0x0400 + 0x400] = 0xBEEF;
        assert_eq!(probe.tilemap_entry(&layer, 32, 0), 0xBEEF);
        probe.vram[0x0400 + 0x800] = 0xCAFE;
        assert_eq!(probe.tilemap_entry(&layer, 0, 32), 0xCAFE);
    }
}
