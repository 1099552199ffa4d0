//! Process-wide random source for the `Random` and `RandomizeVariable`
//! opcodes
//!
//! A single 32-bit LCG (`state * 1664525 + 1013904223`) shared by every
//! player in the process; each draw returns the high 16 bits. The state is
//! seeded to 0x12345678 at player startup so renders are bit-identical
//! across runs and platforms. Nothing reseeds it implicitly.

use std::sync::Mutex;

/// The startup seed used for reproducible playback.
pub const DEFAULT_SEED: u32 = 0x12345678;

static STATE: Mutex<u32> = Mutex::new(DEFAULT_SEED);

/// Serializes unit tests that depend on the process-wide state.
#[cfg(test)]
pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Reset the generator. Call once at startup (players do this when
/// constructed for rendering from the top).
pub fn init(seed: u32) {
    *STATE.lock().unwrap() = seed;
}

/// Draw the next 16-bit value.
pub fn next16() -> u16 {
    let mut state = STATE.lock().unwrap();
    *state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    (*state >> 16) as u16
}

/// Uniform draw in `low..=high` as used by the `Random` argument prefix:
/// `low + ((rand16 * (high - low + 1)) >> 16)`.
pub fn ranged(low: i16, high: i16) -> i32 {
    let span = (high as i32 - low as i32).wrapping_add(1);
    low as i32 + ((next16() as i32).wrapping_mul(span) >> 16)
}

/// Signed draw for `RandomizeVariable`:
/// `sign(arg) * ((rand16 * (|arg| + 1)) >> 16)`.
pub fn signed_scaled(arg: i16) -> i16 {
    let negative = arg < 0;
    let magnitude = (arg as i32).abs();
    let mut value = (next16() as i32).wrapping_mul(magnitude + 1) >> 16;
    if negative {
        value = -value;
    }
    value as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproducible_stream() {
        let _guard = TEST_LOCK.lock().unwrap();
        init(DEFAULT_SEED);
        let first: Vec<u16> = (0..4).map(|_| next16()).collect();
        init(DEFAULT_SEED);
        let second: Vec<u16> = (0..4).map(|_| next16()).collect();
        assert_eq!(first, second);
        // Known first value for the documented constants.
        assert_eq!(
            first[0],
            ((0x12345678u32
                .wrapping_mul(1_664_525)
                .wrapping_add(1_013_904_223))
                >> 16) as u16
        );
    }

    #[test]
    fn test_ranged_bounds() {
        let _guard = TEST_LOCK.lock().unwrap();
        init(DEFAULT_SEED);
        for _ in 0..1000 {
            let v = ranged(-5, 5);
            assert!((-5..=5).contains(&v));
        }
    }

    #[test]
    fn test_signed_scaled_sign() {
        let _guard = TEST_LOCK.lock().unwrap();
        init(DEFAULT_SEED);
        for _ in 0..1000 {
            assert!(signed_scaled(10) >= 0);
            assert!(signed_scaled(-10) <= 0);
            assert!(signed_scaled(10) <= 10);
        }
    }
}
