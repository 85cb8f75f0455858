use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use cathode16::snes::{Button, Snes};
use sha1::{Digest, Sha1};

/// Serial-order button bits for a recorded input trace: one little-endian
/// u16 per frame, bit 0 = B through bit 11 = R.
const TRACE_BUTTONS: [Button; 12] = [
    Button::B,
    Button::Y,
    Button::Select,
    Button::Start,
    Button::Up,
    Button::Down,
    Button::Left,
    Button::Right,
    Button::A,
    Button::X,
    Button::L,
    Button::R,
];

#[derive(Debug, Clone)]
struct Config {
    roms: Vec<PathBuf>,
    frames: u32,
    input_trace: Option<Vec<u16>>,
    check_determinism: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roms: Vec::new(),
            frames: 60,
            input_trace: None,
            check_determinism: false,
        }
    }
}

fn parse_args() -> Result<Config> {
    let mut cfg = Config::default();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args
                    .next()
                    .context("--frames requires an integer, e.g. --frames 120")?;
                cfg.frames = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid --frames value: {value}"))?;
            }
            "--input-trace" => {
                let value = args
                    .next()
                    .context("--input-trace requires base64 data (u16 LE per frame)")?;
                let bytes = BASE64_STANDARD
                    .decode(value.as_bytes())
                    .context("invalid base64 in --input-trace")?;
                let trace = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                cfg.input_trace = Some(trace);
            }
            "--check-determinism" => cfg.check_determinism = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            rom => cfg.roms.push(PathBuf::from(rom)),
        }
    }

    if cfg.roms.is_empty() {
        print_usage();
        bail!("no ROM paths given");
    }
    Ok(cfg)
}

fn print_usage() {
    eprintln!(
        "usage: rom_test_runner [--frames N] [--input-trace BASE64] [--check-determinism] ROM..."
    );
}

fn apply_trace_frame(snes: &mut Snes, trace: Option<&[u16]>, frame: u32) {
    let Some(trace) = trace else { return };
    let mask = trace.get(frame as usize).copied().unwrap_or(0);
    for (bit, button) in TRACE_BUTTONS.iter().enumerate() {
        snes.set_button(*button, mask & (1 << bit) != 0);
    }
}

fn run_rom(image: &[u8], frames: u32, trace: Option<&[u16]>) -> Result<(Snes, String)> {
    let mut snes = Snes::new();
    snes.load_cartridge(image)
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    for frame in 0..frames {
        apply_trace_frame(&mut snes, trace, frame);
        snes.run();
    }
    let mut hasher = Sha1::new();
    hasher.update(snes.frame_buffer());
    let hash = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    Ok((snes, hash))
}

fn main() -> Result<()> {
    let cfg = parse_args()?;
    let mut failures = 0usize;

    for rom_path in &cfg.roms {
        let image = fs::read(rom_path)
            .with_context(|| format!("failed to read {}", rom_path.display()))?;

        let started = Instant::now();
        let (snes, hash) = match run_rom(&image, cfg.frames, cfg.input_trace.as_deref()) {
            Ok(result) => result,
            Err(err) => {
                println!("{}: LOAD FAILED: {err:#}", rom_path.display());
                failures += 1;
                continue;
            }
        };
        let elapsed = started.elapsed();

        let counters = snes.debug_counters();
        let mapping = snes
            .cartridge_mapping()
            .map(|m| format!("{m:?}"))
            .unwrap_or_default();
        println!(
            "{}: \"{}\" {mapping} frames={} fb_sha1={} ({:.2}s)",
            rom_path.display(),
            snes.cartridge_title().unwrap_or(""),
            cfg.frames,
            hash,
            elapsed.as_secs_f64(),
        );
        println!(
            "  steps={} map_miss={} sram_oob={} decode_miss={} dma={} nmi={} checksum_warn={}",
            counters.cpu_steps,
            counters.mapping_misses,
            counters.sram_out_of_bounds,
            counters.decode_misses,
            counters.dma_transfers,
            counters.nmi_serviced,
            counters.checksum_warnings,
        );

        if cfg.check_determinism {
            let (_, second_hash) = run_rom(&image, cfg.frames, cfg.input_trace.as_deref())?;
            if second_hash == hash {
                println!("  determinism: OK");
            } else {
                println!("  determinism: MISMATCH ({second_hash})");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} ROM(s) failed");
    }
    Ok(())
}
