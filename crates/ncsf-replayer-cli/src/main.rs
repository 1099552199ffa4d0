//! Command-line NCSF player
//!
//! Loads an NCSF file (resolving its `_lib` chain against sibling files),
//! picks the sequence, measures the song length when the tags don't carry
//! one, and either renders to WAV or plays through the default audio
//! device.

mod args;
mod audio;
mod wav;

use args::CliArgs;
use audio::AudioOutput;
use ncsf_replayer::{song_length, GainAnalyzer, NcsfStream, StreamOptions, TimingOptions};
use sdat_core::{Ncsf, Sdat, SdatError, TagCollection};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

fn main() {
    let args = CliArgs::parse();
    if args.show_help {
        CliArgs::print_help();
        return;
    }
    let file_path = match &args.file_path {
        Some(path) => path.clone(),
        None => {
            CliArgs::print_help();
            std::process::exit(1);
        }
    };

    if let Err(message) = run(&args, &file_path) {
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }
}

fn run(args: &CliArgs, file_path: &str) -> Result<(), String> {
    let path = Path::new(file_path);
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let ncsf = Ncsf::parse(&bytes).map_err(|e| e.to_string())?;

    // Library chain: `_lib` values name sibling files.
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let program = ncsf
        .resolve_program(
            &mut |name: &str| {
                std::fs::read(dir.join(name)).map_err(SdatError::from)
            },
            false,
        )
        .map_err(|e| e.to_string())?;
    let sdat = Arc::new(Sdat::parse(&program).map_err(|e| e.to_string())?);

    let sequence = args
        .sequence
        .or_else(|| ncsf.sequence_number().map(|n| n as usize))
        .unwrap_or(0);

    if args.show_info {
        print_info(&ncsf, &sdat, sequence);
        return Ok(());
    }

    let mut tags = ncsf.tags.clone();
    if let Some(length) = &args.length {
        tags.set("length", length);
    }
    if let Some(fade) = &args.fade {
        tags.set("fade", fade);
    }

    let mut options = StreamOptions {
        sample_rate: args.sample_rate,
        interpolation: args.interpolation,
        skip_silence_on_start_sec: args.skip_silence,
        volume_type: args.volume_type,
        peak_type: args.peak_type,
        play_forever: args.play_forever,
        volume_multiplier: args.volume,
        channel_mutes: args.channel_mutes,
        track_mutes: args.track_mutes,
        ..Default::default()
    };

    // No tagged or flagged length: measure it, falling back to the
    // defaults when the song defeats measurement.
    if !args.play_forever && tags.length_ms().is_none() {
        match song_length(&sdat, sequence, &TimingOptions::default()) {
            Some(length) => {
                println!(
                    "Measured length: {:.1}s ({})",
                    length.seconds,
                    match length.kind {
                        ncsf_replayer::LengthKind::Loop => "loops",
                        ncsf_replayer::LengthKind::End => "ends",
                    }
                );
                options.default_length_ms = (length.seconds * 1000.0) as i32;
            }
            None => println!(
                "Could not measure song length; using {}s + {}s fade",
                options.default_length_ms / 1000,
                options.default_fade_ms / 1000
            ),
        }
    }

    let mut stream =
        NcsfStream::new(sdat, sequence, &tags, options).map_err(|e| e.to_string())?;

    if args.replaygain {
        return analyze_replaygain(&mut stream);
    }
    match &args.output {
        Some(output) => wav::export_to_wav(&mut stream, Path::new(output), args.bits),
        None => play_live(&mut stream, args.sample_rate),
    }
}

/// Render the whole stream through the loudness analyzer and print the
/// tags a tagging tool would write.
fn analyze_replaygain(stream: &mut NcsfStream) -> Result<(), String> {
    let mut analyzer = GainAnalyzer::new(stream.sample_rate()).map_err(|e| e.to_string())?;
    let mut bytes = [0u8; 4096];
    let mut samples = [0.0f32; 1024];
    loop {
        let got = stream
            .read(&mut bytes)
            .map_err(|e| format!("render failed: {}", e))?;
        if got == 0 {
            break;
        }
        let count = got / 4;
        for (slot, chunk) in samples[..count].iter_mut().zip(bytes[..got].chunks_exact(4)) {
            *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        analyzer.process_interleaved(&samples[..count]);
    }
    let (gain, peak) = analyzer
        .finish_track()
        .ok_or_else(|| "not enough audio for a loudness estimate".to_string())?;
    println!("replaygain_track_gain={:.2} dB", gain);
    println!("replaygain_track_peak={:.6}", peak);
    Ok(())
}

fn play_live(stream: &mut NcsfStream, sample_rate: u32) -> Result<(), String> {
    let output = AudioOutput::open(sample_rate)?;
    let mut bytes = [0u8; 4096];
    let mut samples = [0.0f32; 1024];
    loop {
        let got = stream
            .read(&mut bytes)
            .map_err(|e| format!("render failed: {}", e))?;
        if got == 0 {
            break;
        }
        let count = got / 4;
        for (slot, chunk) in samples[..count].iter_mut().zip(bytes[..got].chunks_exact(4)) {
            *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        output.write_blocking(&samples[..count]);
    }
    output.drain();
    Ok(())
}

fn print_info(ncsf: &Ncsf, sdat: &Sdat, sequence: usize) {
    print_tags(&ncsf.tags);

    let count = sdat.sequences.len();
    println!("Sequences: {}", count);
    for (index, entry) in sdat.sequences.iter().enumerate() {
        if entry.is_none() {
            continue;
        }
        let name = sdat
            .symbols
            .as_ref()
            .and_then(|symbols| symbols.sequence_name(index))
            .unwrap_or("<unnamed>");
        let marker = if index == sequence { "*" } else { " " };
        println!("  {}{:4}  {}", marker, index, name);
    }

    match ncsf.tags.length_ms() {
        Some(ms) => println!("Tagged length: {:.3}s", ms as f64 / 1000.0),
        None => match song_length(sdat, sequence, &TimingOptions::default()) {
            Some(length) => println!("Measured length: {:.1}s", length.seconds),
            None => println!("Length: unknown"),
        },
    }
}

fn print_tags(tags: &TagCollection) {
    if tags.is_empty() {
        println!("No tags");
        return;
    }
    println!("Tags:");
    for (key, value) in tags.iter() {
        for line in value.split('\n') {
            println!("  {} = {}", key, line);
        }
    }
}
