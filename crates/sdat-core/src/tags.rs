//! NCSF tag footer
//!
//! Tags live after the compressed program block as an optional `[TAG]`
//! marker followed by LF-delimited `key=value` lines. Keys are
//! case-insensitive and insertion-ordered; repeating a key continues the
//! previous value on a new line. Values are decoded as Latin-1 unless a
//! `utf8=1` tag is present, in which case the whole footer is re-decoded
//! as UTF-8 from scratch.

use crate::{Result, SdatError};

/// Marker that introduces the tag footer.
pub const TAG_MARKER: &[u8] = b"[TAG]";

/// Ordered, case-insensitive tag collection.
///
/// Keys are stored lowercase. Multi-line values are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagCollection {
    entries: Vec<(String, String)>,
}

impl TagCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        TagCollection::default()
    }

    /// Parse a tag footer (the bytes following `[TAG]`).
    ///
    /// If the parsed tags contain `utf8=1` the footer is re-parsed from
    /// scratch with UTF-8 decoding instead of Latin-1.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let tags = Self::parse_with(raw, false)?;
        if tags.get("utf8").map(|v| v == "1").unwrap_or(false) {
            return Self::parse_with(raw, true);
        }
        Ok(tags)
    }

    fn parse_with(raw: &[u8], utf8: bool) -> Result<Self> {
        let mut tags = TagCollection::new();
        for line in raw.split(|&b| b == b'\n') {
            let line = trim_tag_bytes(line);
            if line.is_empty() {
                continue;
            }
            let eq = match line.iter().position(|&b| b == b'=') {
                Some(i) => i,
                None => continue,
            };
            let key = decode(trim_tag_bytes(&line[..eq]), utf8)?.to_lowercase();
            let value = decode(trim_tag_bytes(&line[eq + 1..]), utf8)?;
            if key.is_empty() {
                continue;
            }
            tags.append(&key, &value);
        }
        Ok(tags)
    }

    /// Serialize as a footer including the `[TAG]` marker.
    ///
    /// Multi-line values become repeated `key=value` lines, which is how
    /// they round-trip back through [`TagCollection::parse`].
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(TAG_MARKER);
        for (key, value) in &self.entries {
            for line in value.split('\n') {
                out.extend_from_slice(key.as_bytes());
                out.push(b'=');
                out.extend_from_slice(line.as_bytes());
                out.push(b'\n');
            }
        }
        out
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the collection has no tags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a tag value (case-insensitive key).
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a tag, replacing any previous value, preserving position.
    pub fn set(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key, value.to_string()));
        }
    }

    /// Append to a tag: new keys are inserted, existing keys gain a new line.
    pub fn append(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1.push('\n');
            entry.1.push_str(value);
        } else {
            self.entries.push((key, value.to_string()));
        }
    }

    /// Iterate `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `length` tag in milliseconds, if present and well-formed.
    pub fn length_ms(&self) -> Option<i32> {
        self.get("length").and_then(parse_time_ms)
    }

    /// `fade` tag in milliseconds, if present and well-formed.
    pub fn fade_ms(&self) -> Option<i32> {
        self.get("fade").and_then(parse_time_ms)
    }

    /// `volume` tag as a linear factor.
    pub fn volume(&self) -> Option<f64> {
        self.get("volume").and_then(|v| v.trim().parse().ok())
    }

    /// ReplayGain gain in dB (`replaygain_track_gain` / `replaygain_album_gain`,
    /// optional `" dB"` suffix).
    pub fn replaygain_gain_db(&self, album: bool) -> Option<f64> {
        let key = if album {
            "replaygain_album_gain"
        } else {
            "replaygain_track_gain"
        };
        self.get(key).and_then(|v| {
            let v = v.trim();
            let v = v.strip_suffix("dB").unwrap_or(v).trim();
            v.parse().ok()
        })
    }

    /// ReplayGain linear peak (`replaygain_track_peak` / `replaygain_album_peak`).
    pub fn replaygain_peak(&self, album: bool) -> Option<f64> {
        let key = if album {
            "replaygain_album_peak"
        } else {
            "replaygain_track_peak"
        };
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Library chain in overlay order: `_lib` first, then `_lib2`, `_lib3`, …
    /// ascending while present.
    pub fn lib_chain(&self) -> Vec<String> {
        let mut libs = Vec::new();
        if let Some(lib) = self.get("_lib") {
            libs.push(lib.to_string());
        }
        let mut n = 2u32;
        while let Some(lib) = self.get(&format!("_lib{}", n)) {
            libs.push(lib.to_string());
            n += 1;
        }
        libs
    }
}

/// Strip PSF-style whitespace (anything <= 0x20) from both ends.
fn trim_tag_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b > 0x20).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b > 0x20).map_or(0, |i| i + 1);
    if start >= end {
        &[]
    } else {
        &bytes[start..end]
    }
}

fn decode(bytes: &[u8], utf8: bool) -> Result<String> {
    if utf8 {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SdatError::MalformedNcsf("tag footer is not valid UTF-8".into()))
    } else {
        Ok(bytes.iter().map(|&b| b as char).collect())
    }
}

/// Parse `HH:MM:SS.fff`, `MM:SS.fff` or plain seconds into milliseconds.
fn parse_time_ms(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut seconds = 0.0f64;
    for part in s.split(':') {
        let v: f64 = part.trim().parse().ok()?;
        seconds = seconds * 60.0 + v;
    }
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let tags = TagCollection::parse(b"title=Hi\nlength=1:30\n").unwrap();
        assert_eq!(tags.get("title"), Some("Hi"));
        assert_eq!(tags.get("TITLE"), Some("Hi"));
        assert_eq!(tags.length_ms(), Some(90000));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let tags = TagCollection::parse(b"zebra=1\nalpha=2\nmango=3\n").unwrap();
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zebra", "alpha", "mango"]);
    }

    #[test]
    fn test_multiline_value() {
        let tags = TagCollection::parse(b"comment=line one\ncomment=line two\n").unwrap();
        assert_eq!(tags.get("comment"), Some("line one\nline two"));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_round_trip() {
        let mut tags = TagCollection::new();
        tags.set("title", "Hi");
        tags.set("length", "1:30");
        tags.set("utf8", "1");
        let written = tags.write();
        assert!(written.starts_with(TAG_MARKER));
        let reparsed = TagCollection::parse(&written[TAG_MARKER.len()..]).unwrap();
        assert_eq!(reparsed, tags);
        assert_eq!(reparsed.length_ms(), Some(90000));
    }

    #[test]
    fn test_utf8_redecode() {
        // "é" in UTF-8 is 0xC3 0xA9; Latin-1 would read it as two chars
        let mut raw = b"title=caf\xC3\xA9\nutf8=1\n".to_vec();
        let tags = TagCollection::parse(&raw).unwrap();
        assert_eq!(tags.get("title"), Some("café"));

        // Without the utf8 tag the bytes stay Latin-1
        raw = b"title=caf\xC3\xA9\n".to_vec();
        let tags = TagCollection::parse(&raw).unwrap();
        assert_eq!(tags.get("title"), Some("caf\u{c3}\u{a9}"));
    }

    #[test]
    fn test_time_formats() {
        assert_eq!(parse_time_ms("90"), Some(90000));
        assert_eq!(parse_time_ms("1:30"), Some(90000));
        assert_eq!(parse_time_ms("0:01:30.5"), Some(90500));
        assert_eq!(parse_time_ms("2.25"), Some(2250));
        assert_eq!(parse_time_ms("bogus"), None);
    }

    #[test]
    fn test_replaygain_suffix() {
        let tags =
            TagCollection::parse(b"replaygain_track_gain=-6.24 dB\nreplaygain_track_peak=0.988\n")
                .unwrap();
        assert_eq!(tags.replaygain_gain_db(false), Some(-6.24));
        assert_eq!(tags.replaygain_peak(false), Some(0.988));
        assert_eq!(tags.replaygain_gain_db(true), None);
    }

    #[test]
    fn test_lib_chain_order() {
        let tags =
            TagCollection::parse(b"_lib2=b.ncsflib\n_lib=a.ncsflib\n_lib3=c.ncsflib\n").unwrap();
        assert_eq!(tags.lib_chain(), vec!["a.ncsflib", "b.ncsflib", "c.ncsflib"]);
    }
}
