/*
 * Synthetic Pulse Sender
 *
 * Stands in for the radar digitizer: connects to a capture listener and streams
 * synthetic Pulse Frames, then the end-of-stream sentinel.
 *
 * Each pulse carries noise plus one echo whose range walks outward across the
 * sweep. The rotation reference count advances every `--pulses-per-sweep` pulses,
 * so the capture side sees one sweep per simulated rotation.
 */

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use radar_capture::frame::{encode_end_of_stream, encode_pulse, FrameLayout, PulseHeader};
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser)]
#[command(name = "pulse-sender")]
#[command(about = "Stream synthetic radar pulses to a capture listener", long_about = None)]
struct Args {
    /// Capture listener address
    #[arg(long, default_value = "127.0.0.1:12345")]
    addr: String,

    /// Pulses to send before the end-of-stream frame
    #[arg(long, default_value = "10000")]
    pulses: u64,

    /// Samples per pulse; must match the capture configuration
    #[arg(long, default_value = "512")]
    samples: usize,

    /// Pulses per simulated antenna rotation
    #[arg(long, default_value = "3857")]
    pulses_per_sweep: u32,

    /// Digitizer clock rate, Hz
    #[arg(long, default_value = "125000000")]
    clock_hz: u32,

    /// Pulse repetition frequency, Hz
    #[arg(long, default_value = "1800")]
    prf: u32,

    /// Azimuth reference pulses per rotation
    #[arg(long, default_value = "2048")]
    azimuth_refs: u32,

    /// Sample bit depth
    #[arg(long, default_value = "14")]
    bits: u8,

    /// Sleep between pulses, microseconds (0 sends as fast as possible)
    #[arg(long, default_value = "0")]
    pace_us: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let layout = FrameLayout::new(args.samples)?;
    let pulses_per_sweep = args.pulses_per_sweep.max(1);
    let ticks_per_pulse = args.clock_hz / args.prf.max(1);
    let max_sample = (1u32 << args.bits.clamp(1, 16)) - 1;

    let mut stream = TcpStream::connect(&args.addr)
        .with_context(|| format!("connecting to {}", args.addr))?;
    stream.set_nodelay(true)?;
    println!("Connected to {}", args.addr);

    let mut rng = rand::thread_rng();
    let mut frame = vec![0u8; layout.frame_len()];
    let mut samples = vec![0u16; args.samples];
    let mut rotation = PulseHeader::pulse();

    for i in 0..args.pulses {
        let in_sweep = (i % u64::from(pulses_per_sweep)) as u32;
        if in_sweep == 0 {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
            rotation.rotation_ref_sec = now.as_secs() as u32;
            rotation.rotation_ref_nsec = now.subsec_nanos();
            rotation.rotation_ref_count = (i / u64::from(pulses_per_sweep)) as u32;
        }

        let echo_at = (in_sweep as usize * args.samples) / pulses_per_sweep as usize;
        for (j, sample) in samples.iter_mut().enumerate() {
            let noise = rng.gen_range(0..=max_sample / 16);
            let echo = if j.abs_diff(echo_at) < 4 { max_sample / 2 } else { 0 };
            *sample = (noise + echo).min(max_sample) as u16;
        }

        let header = PulseHeader {
            trigger_count: in_sweep,
            trigger_clock: in_sweep.wrapping_mul(ticks_per_pulse),
            azimuth_ref_count: (u64::from(in_sweep) * u64::from(args.azimuth_refs)
                / u64::from(pulses_per_sweep)) as u32,
            ..rotation
        };
        encode_pulse(&layout, &header, &samples, &mut frame);
        stream.write_all(&frame)?;

        if args.pace_us > 0 {
            thread::sleep(Duration::from_micros(args.pace_us));
        }
    }

    encode_end_of_stream(&layout, &mut frame);
    stream.write_all(&frame)?;
    stream.flush()?;
    println!(
        "Sent {} pulses in {} sweeps",
        args.pulses,
        args.pulses.div_ceil(u64::from(pulses_per_sweep))
    );
    Ok(())
}
