use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use eframe::egui::{self, ColorImage, Key, TextureHandle, TextureOptions};

use crate::audio::AudioOutput;
use crate::snes::{Button, FRAME_HEIGHT, FRAME_WIDTH, Snes};

const NTSC_FRAME_RATE_HZ: f64 = 60.098_813_897_440_515;
const HIGH_REFRESH_RATE_HZ: f64 = 240.0;
const MAX_FRAMES_PER_UPDATE: u32 = 2;

const KEY_BINDINGS: [(Key, Button); 12] = [
    (Key::W, Button::Up),
    (Key::S, Button::Down),
    (Key::A, Button::Left),
    (Key::D, Button::Right),
    (Key::K, Button::A),
    (Key::J, Button::B),
    (Key::I, Button::X),
    (Key::U, Button::Y),
    (Key::Q, Button::L),
    (Key::E, Button::R),
    (Key::Enter, Button::Start),
    (Key::Backspace, Button::Select),
];

pub struct SnesApp {
    snes: Snes,
    frame_texture: Option<TextureHandle>,
    status_line: String,
    loaded_rom: Option<PathBuf>,
    audio: Option<AudioOutput>,
    frame_interval: Duration,
    high_refresh_interval: Duration,
    next_frame_at: Option<Instant>,
    paused: bool,
    update_dt_ema: Option<f64>,
    estimated_refresh_hz: f64,
    audio_target_buffer_ms: usize,
    audio_max_buffer_ms: usize,
}

impl SnesApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());

        let mut snes = Snes::new();
        let audio = AudioOutput::new().ok();
        if let Some(audio_out) = &audio {
            snes.set_audio_sample_rate(audio_out.sample_rate());
        } else {
            snes.set_audio_sample_rate(32_000);
        }

        Self {
            snes,
            frame_texture: None,
            status_line: "Drop a .sfc/.smc file or click Open ROM".to_string(),
            loaded_rom: None,
            audio,
            frame_interval: Duration::from_secs_f64(1.0 / NTSC_FRAME_RATE_HZ),
            high_refresh_interval: Duration::from_secs_f64(1.0 / HIGH_REFRESH_RATE_HZ),
            next_frame_at: None,
            paused: false,
            update_dt_ema: None,
            estimated_refresh_hz: 60.0,
            audio_target_buffer_ms: 7,
            audio_max_buffer_ms: 10,
        }
    }

    fn load_rom(&mut self, path: &Path) {
        match self.snes.load_cartridge_from_path(path) {
            Ok(()) => {
                self.loaded_rom = Some(path.to_path_buf());
                let mapping = self
                    .snes
                    .cartridge_mapping()
                    .map(|m| format!("{m:?}"))
                    .unwrap_or_default();
                self.status_line = format!(
                    "Loaded \"{}\" ({mapping})",
                    self.snes.cartridge_title().unwrap_or("ROM"),
                );
                self.frame_texture = None;
                self.next_frame_at = None;
                self.snes.run();
            }
            Err(err) => {
                self.status_line = format!("Failed to load ROM: {err:#}");
            }
        }
    }

    fn open_rom_dialog(&mut self) {
        if let Some(path) = rfd::FileDialog::new()
            .add_filter("Super Famicom ROM", &["sfc", "smc"])
            .set_title("Open ROM")
            .pick_file()
        {
            self.load_rom(&path);
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|input| input.raw.dropped_files.clone());
        for file in dropped {
            if let Some(path) = file.path {
                let supported = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| {
                        ext.eq_ignore_ascii_case("sfc") || ext.eq_ignore_ascii_case("smc")
                    })
                    .unwrap_or(false);

                if supported {
                    self.load_rom(&path);
                } else {
                    self.status_line = format!("Unsupported file: {}", path.display());
                }
            }
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let open_shortcut = ctx.input(|i| i.modifiers.command && i.key_pressed(Key::O));
        if open_shortcut {
            self.open_rom_dialog();
        }

        let reset = ctx.input(|i| i.key_pressed(Key::R));
        if reset && self.snes.has_cartridge() {
            self.snes.reset();
            self.next_frame_at = None;
            self.status_line = "Reset complete".to_string();
        }

        let pause_toggle = ctx.input(|i| i.key_pressed(Key::P));
        if pause_toggle && self.snes.has_cartridge() {
            self.paused = !self.paused;
        }
    }

    fn forward_controller_input(&mut self, ctx: &egui::Context) {
        ctx.input(|input| {
            for (key, button) in KEY_BINDINGS {
                self.snes.set_button(button, input.key_down(key));
            }
        });
    }

    fn update_texture(&mut self, ctx: &egui::Context) {
        let image = ColorImage::from_rgba_unmultiplied(
            [FRAME_WIDTH, FRAME_HEIGHT],
            self.snes.frame_buffer(),
        );

        if let Some(texture) = self.frame_texture.as_mut() {
            texture.set(image, TextureOptions::NEAREST);
        } else {
            self.frame_texture =
                Some(ctx.load_texture("snes-frame", image, TextureOptions::NEAREST));
        }
    }

    fn run_frame_with_audio(&mut self) {
        self.snes.run();
        let audio_samples = self.snes.take_audio_samples();
        if let Some(audio) = &self.audio {
            audio.push_samples(&audio_samples);
        }
    }

    fn queued_audio_frames(&self) -> usize {
        if let Some(audio) = &self.audio {
            audio.queued_frames()
        } else {
            0
        }
    }

    fn update_refresh_estimate_and_latency(&mut self, now: Instant) {
        if let Some(prev) = self.next_frame_at {
            let dt = now.saturating_duration_since(prev).as_secs_f64();
            if (0.0005..=0.1).contains(&dt) {
                let ema = self.update_dt_ema.unwrap_or(dt);
                let next_ema = ema * 0.9 + dt * 0.1;
                self.update_dt_ema = Some(next_ema);
                let hz = (1.0 / next_ema).clamp(30.0, 360.0);
                self.estimated_refresh_hz = hz;
            }
        }

        let (target_ms, max_ms, poll_hz) = if self.estimated_refresh_hz >= 170.0 {
            (4, 7, 1000.0)
        } else if self.estimated_refresh_hz >= 110.0 {
            (5, 8, 600.0)
        } else if self.estimated_refresh_hz >= 80.0 {
            (6, 9, 360.0)
        } else {
            (7, 10, 240.0)
        };

        self.audio_target_buffer_ms = target_ms;
        self.audio_max_buffer_ms = max_ms;
        self.high_refresh_interval = Duration::from_secs_f64(1.0 / poll_hz);
    }
}

impl eframe::App for SnesApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_dropped_files(ctx);
        self.handle_shortcuts(ctx);
        self.forward_controller_input(ctx);

        let now = Instant::now();
        self.update_refresh_estimate_and_latency(now);

        if self.snes.has_cartridge() && !self.paused {
            let mut next = self.next_frame_at.unwrap_or(now);
            let mut ran_frames = 0u32;

            let sample_rate = self
                .audio
                .as_ref()
                .map(|audio| audio.sample_rate() as usize);
            if let Some(sample_rate) = sample_rate {
                let max_frames = sample_rate * self.audio_max_buffer_ms / 1000;

                while Instant::now() >= next
                    && self.queued_audio_frames() < max_frames
                    && ran_frames < MAX_FRAMES_PER_UPDATE
                {
                    self.run_frame_with_audio();
                    ran_frames += 1;
                    next += self.frame_interval;
                }
            } else {
                while Instant::now() >= next && ran_frames < MAX_FRAMES_PER_UPDATE {
                    self.snes.run();
                    let _ = self.snes.take_audio_samples();
                    ran_frames += 1;
                    next += self.frame_interval;
                }
            }

            if ran_frames == 0 && now > next + self.frame_interval {
                next = now;
            }

            self.next_frame_at = Some(next);
        }

        self.update_texture(ctx);

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Open ROM").clicked() {
                    self.open_rom_dialog();
                }

                let reset_enabled = self.snes.has_cartridge();
                if ui
                    .add_enabled(reset_enabled, egui::Button::new("Reset (R)"))
                    .clicked()
                {
                    self.snes.reset();
                    self.next_frame_at = None;
                    self.status_line = "Reset complete".to_string();
                }

                if ui
                    .add_enabled(
                        self.snes.has_cartridge(),
                        egui::Button::new(if self.paused {
                            "Resume (P)"
                        } else {
                            "Pause (P)"
                        }),
                    )
                    .clicked()
                {
                    self.paused = !self.paused;
                }

                if let Some(path) = &self.loaded_rom {
                    ui.separator();
                    ui.label(path.display().to_string());
                }
            });
        });

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.label(&self.status_line);
                ui.separator();
                if let Some(audio) = &self.audio {
                    ui.label(format!(
                        "Audio: {} Hz (queue {} ms, target {}-{} ms, display ~{:.0} Hz)",
                        audio.sample_rate(),
                        (audio.queued_frames() * 1000) / audio.sample_rate() as usize,
                        self.audio_target_buffer_ms,
                        self.audio_max_buffer_ms,
                        self.estimated_refresh_hz
                    ));
                } else {
                    ui.label("Audio: unavailable");
                }
                ui.separator();
                ui.label(
                    "Controls: WASD move, K=A J=B I=X U=Y, Q/E shoulders, Enter=Start, Backspace=Select, P=Pause",
                );
            });

            ui.separator();
            let (a, x, y, sp, dp, p, emulation) = self.snes.debug_cpu_regs();
            let debug = self.snes.debug_counters();
            let ppu_debug = self.snes.debug_ppu_counters();
            ui.collapsing("Debug", |ui| {
                ui.monospace(format!(
                    "CPU A={:04X} X={:04X} Y={:04X} SP={:04X} DP={:04X} P={:02X} PC={:06X} e={} halted={}",
                    a,
                    x,
                    y,
                    sp,
                    dp,
                    p,
                    self.snes.debug_pc(),
                    emulation as u8,
                    self.snes.debug_halted()
                ));
                ui.monospace(format!(
                    "Core frames={} cpu_steps={} cycles={} nmi={} irq={} dma={} ({} bytes)",
                    debug.frames,
                    debug.cpu_steps,
                    self.snes.debug_total_cycles(),
                    debug.nmi_serviced,
                    debug.irq_serviced,
                    debug.dma_transfers,
                    debug.dma_bytes
                ));
                ui.monospace(format!(
                    "Bus reads wram={} regs={} sram={} cart={} | writes wram={} regs={} sram={}",
                    debug.reads_wram,
                    debug.reads_regs,
                    debug.reads_sram,
                    debug.reads_cart,
                    debug.writes_wram,
                    debug.writes_regs,
                    debug.writes_sram
                ));
                ui.monospace(format!(
                    "Faults map_miss={} sram_oob={} decode_miss={} (last ${:02X} @ ${:06X}) checksum_warn={}",
                    debug.mapping_misses,
                    debug.sram_out_of_bounds,
                    debug.decode_misses,
                    debug.last_decode_miss_opcode,
                    debug.last_decode_miss_pc,
                    debug.checksum_warnings
                ));
                ui.monospace(format!(
                    "PPU frames={} vram_writes={} cgram_commits={} oam_writes={} reg_writes={}",
                    ppu_debug.frames_rendered,
                    ppu_debug.vram_word_writes,
                    ppu_debug.cgram_commits,
                    ppu_debug.oam_writes,
                    ppu_debug.reg_writes
                ));

                let events = self.snes.debug_recent_events(8);
                if !events.is_empty() {
                    ui.separator();
                    ui.label("Recent events:");
                    for event in events {
                        ui.monospace(event);
                    }
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                let available = ui.available_size();
                let scale_x = (available.x / FRAME_WIDTH as f32).max(1.0);
                let scale_y = (available.y / FRAME_HEIGHT as f32).max(1.0);
                let scale = scale_x.min(scale_y).floor().max(1.0);
                let target =
                    egui::vec2(FRAME_WIDTH as f32 * scale, FRAME_HEIGHT as f32 * scale);

                if let Some(texture) = &self.frame_texture {
                    ui.add(egui::Image::new(texture).fit_to_exact_size(target));
                }

                ui.add_space(8.0);
                ui.label("Drag and drop a cartridge image to start.");
            });
        });

        if let Some(next) = self.next_frame_at {
            let wait = next.saturating_duration_since(Instant::now());
            ctx.request_repaint_after(wait.min(self.high_refresh_interval));
        } else {
            ctx.request_repaint_after(self.high_refresh_interval);
        }
    }
}
