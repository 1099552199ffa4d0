//! Song length measurement
//!
//! A second, non-rendering pass over the sequence: the interpreter runs
//! with notes suppressed while every track records a timeline of Loop
//! (backward `Goto`) and End markers. A song is measured once every used
//! track has either looped the required number of times or ended; a hard
//! `max_seconds` bound caps runaway sequences.
//!
//! When the interpreter pass reports End, the trailing release tail is
//! invisible to it, so a fallback render pass generates (but never emits)
//! samples and declares the true end after 20 consecutive seconds of
//! exact digital silence.
//!
//! Every failure is reported as `None` ("unable to compute"), never
//! propagated.

use crate::generator::SampleGenerator;
use crate::interp::Interpolation;
use crate::player::{Player, TrackEvent, TrackEventKind};
use crate::tables::SECONDS_PER_CLOCK_CYCLE;
use crate::track::NO_TRACK;
use sdat_core::Sdat;

/// Seconds of exact-zero output that end the fallback render pass.
const SILENT_TAIL_SECONDS: f64 = 20.0;

/// Sample rate used by the fallback render pass.
const SCAN_SAMPLE_RATE: u32 = 44100;

/// Bounds for a length measurement.
#[derive(Debug, Clone)]
pub struct TimingOptions {
    /// Required loop count before a looping track counts as measured.
    pub loops: u32,
    /// Hard cap on simulated playback time.
    pub max_seconds: f64,
}

impl Default for TimingOptions {
    fn default() -> Self {
        TimingOptions {
            loops: 2,
            max_seconds: 6000.0,
        }
    }
}

/// How a song's length terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    /// The song loops; the time covers the required loop count.
    Loop,
    /// The song ends on its own.
    End,
}

/// A measured song length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SongLength {
    /// Measured time in seconds.
    pub seconds: f64,
    /// Loop or natural end.
    pub kind: LengthKind,
}

/// Measure a sequence's length. `None` means the length could not be
/// computed within the configured bounds.
pub fn song_length(sdat: &Sdat, sequence: usize, options: &TimingOptions) -> Option<SongLength> {
    let first = interpreter_scan(sdat, sequence, options)?;
    if first.kind == LengthKind::Loop {
        return Some(first);
    }
    // The interpreter pass cannot see release tails; render silently and
    // look for the real end. Fall back to the opcode time when the render
    // pass hits its own bounds.
    Some(render_scan(sdat, sequence, options).unwrap_or(first))
}

/// Pass one: interpreter only, notes suppressed.
fn interpreter_scan(sdat: &Sdat, sequence: usize, options: &TimingOptions) -> Option<SongLength> {
    let mut player = Player::new(sdat, sequence).ok()?;
    player.set_do_notes(false);
    player.set_record_events(true);

    let max_cycles = (options.max_seconds / SECONDS_PER_CLOCK_CYCLE) as u64;
    for _ in 0..max_cycles {
        player.sequence_main();
        if player.finished() {
            break;
        }
        let running = running_tracks(&player);
        if satisfied(player.events(), &running, options.loops) {
            break;
        }
    }

    let running = running_tracks(&player);
    evaluate(player.events(), &running, options.loops)
}

fn running_tracks(player: &Player) -> [bool; 16] {
    let mut running = [false; 16];
    for (slot, flag) in running.iter_mut().enumerate() {
        *flag = player.track_ids[slot] != NO_TRACK;
    }
    running
}

/// Every still-running track has looped enough times.
fn satisfied(events: &[TrackEvent], running: &[bool; 16], loops: u32) -> bool {
    let mut any = false;
    for (slot, &is_running) in running.iter().enumerate() {
        if !is_running {
            continue;
        }
        any = true;
        let count = events
            .iter()
            .filter(|e| e.track == slot as u8 && e.kind == TrackEventKind::Loop)
            .count() as u32;
        if count < loops {
            return false;
        }
    }
    any || !events.is_empty()
}

/// Fold the recorded timeline into a single length.
fn evaluate(events: &[TrackEvent], running: &[bool; 16], loops: u32) -> Option<SongLength> {
    let mut loop_time: Option<f64> = None;
    let mut end_time: Option<f64> = None;

    for slot in 0..16u8 {
        let track_events: Vec<&TrackEvent> =
            events.iter().filter(|e| e.track == slot).collect();
        if track_events.is_empty() {
            // A track still running without any marker defeats the
            // measurement.
            if running[slot as usize] {
                return None;
            }
            continue;
        }

        if let Some(end) = track_events.iter().find(|e| e.kind == TrackEventKind::End) {
            end_time = Some(end_time.map_or(end.seconds, |t: f64| t.max(end.seconds)));
            continue;
        }
        let nth_loop = track_events
            .iter()
            .filter(|e| e.kind == TrackEventKind::Loop)
            .nth(loops.saturating_sub(1) as usize)?;
        loop_time = Some(loop_time.map_or(nth_loop.seconds, |t: f64| t.max(nth_loop.seconds)));
    }

    match (loop_time, end_time) {
        (Some(loop_at), Some(end_at)) => {
            // Mixed outcome: report whichever happens later.
            if loop_at >= end_at {
                Some(SongLength {
                    seconds: loop_at,
                    kind: LengthKind::Loop,
                })
            } else {
                Some(SongLength {
                    seconds: end_at,
                    kind: LengthKind::End,
                })
            }
        }
        (Some(loop_at), None) => Some(SongLength {
            seconds: loop_at,
            kind: LengthKind::Loop,
        }),
        (None, Some(end_at)) => Some(SongLength {
            seconds: end_at,
            kind: LengthKind::End,
        }),
        (None, None) => None,
    }
}

/// Pass two: full synthesis, output discarded, end declared after a long
/// run of exact-zero stereo frames.
fn render_scan(sdat: &Sdat, sequence: usize, options: &TimingOptions) -> Option<SongLength> {
    let mut player = Player::new(sdat, sequence).ok()?;
    let mut generator = SampleGenerator::new(SCAN_SAMPLE_RATE, Interpolation::None, 0);

    let max_frames = (options.max_seconds * SCAN_SAMPLE_RATE as f64) as u64;
    let silent_limit = (SILENT_TAIL_SECONDS * SCAN_SAMPLE_RATE as f64) as u64;
    let mut silent_run = 0u64;
    let mut frames = 0u64;

    while frames < max_frames {
        let (left, right) = generator.next_frame(&mut player);
        frames += 1;
        if left == 0.0 && right == 0.0 {
            silent_run += 1;
            if silent_run >= silent_limit && player.finished() {
                let end = frames - silent_run;
                return Some(SongLength {
                    seconds: end as f64 / SCAN_SAMPLE_RATE as f64,
                    kind: LengthKind::End,
                });
            }
        } else {
            silent_run = 0;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_event(track: u8, seconds: f64) -> TrackEvent {
        TrackEvent {
            track,
            seconds,
            kind: TrackEventKind::Loop,
        }
    }

    fn end_event(track: u8, seconds: f64) -> TrackEvent {
        TrackEvent {
            track,
            seconds,
            kind: TrackEventKind::End,
        }
    }

    #[test]
    fn test_all_tracks_looped() {
        let events = vec![
            loop_event(0, 10.0),
            loop_event(0, 20.0),
            loop_event(1, 12.0),
            loop_event(1, 24.0),
        ];
        let mut running = [false; 16];
        running[0] = true;
        running[1] = true;
        assert!(satisfied(&events, &running, 2));
        let length = evaluate(&events, &running, 2).unwrap();
        assert_eq!(length.kind, LengthKind::Loop);
        // Max of the per-track second-loop times.
        assert_eq!(length.seconds, 24.0);
    }

    #[test]
    fn test_all_tracks_ended() {
        let events = vec![end_event(0, 30.0), end_event(3, 45.5)];
        let running = [false; 16];
        let length = evaluate(&events, &running, 2).unwrap();
        assert_eq!(length.kind, LengthKind::End);
        assert_eq!(length.seconds, 45.5);
    }

    #[test]
    fn test_mixed_outcome_picks_later() {
        let mut running = [false; 16];
        running[1] = true;
        // Track 0 ends at 3s, track 1 loops twice by 5s: Loop at 5s wins.
        let events = vec![
            end_event(0, 3.0),
            loop_event(1, 2.0),
            loop_event(1, 5.0),
        ];
        let length = evaluate(&events, &running, 2).unwrap();
        assert_eq!(length.kind, LengthKind::Loop);
        assert_eq!(length.seconds, 5.0);

        // Track 1 ending later flips the outcome.
        let events = vec![
            loop_event(0, 2.0),
            loop_event(0, 4.0),
            end_event(1, 9.0),
        ];
        let mut running = [false; 16];
        running[0] = true;
        let length = evaluate(&events, &running, 2).unwrap();
        assert_eq!(length.kind, LengthKind::End);
        assert_eq!(length.seconds, 9.0);
    }

    #[test]
    fn test_insufficient_loops_is_unmeasured() {
        let events = vec![loop_event(0, 10.0)];
        let mut running = [false; 16];
        running[0] = true;
        assert!(!satisfied(&events, &running, 2));
        assert!(evaluate(&events, &running, 2).is_none());
    }

    #[test]
    fn test_running_track_without_events_blocks() {
        let events = vec![end_event(0, 5.0)];
        let mut running = [false; 16];
        running[2] = true;
        assert!(evaluate(&events, &running, 2).is_none());
    }

    #[test]
    fn test_no_events_no_length() {
        let events: Vec<TrackEvent> = Vec::new();
        let running = [false; 16];
        assert!(evaluate(&events, &running, 2).is_none());
    }
}
