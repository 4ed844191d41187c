// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Text clean-up applied between the raw process stream and the emulator.
//
// Certain emoji (especially with VARIATION SELECTOR-16) confuse width
// calculations downstream and make the rest of the line disappear. They are
// replaced with fixed ASCII tags so nothing after them is lost.

use std::borrow::Cow;

const VARIATION_SELECTOR_16: char = '\u{FE0F}';

/// Replacement tag for a problematic codepoint, if it has one
fn replacement_for(ch: char) -> Option<&'static str> {
    let tag = match ch {
        '\u{26A0}' => "[!]",  // WARNING SIGN
        '\u{274C}' => "[X]",  // CROSS MARK
        '\u{2705}' => "[v]",  // WHITE HEAVY CHECK MARK
        '\u{2757}' => "[!]",  // HEAVY EXCLAMATION MARK
        '\u{26A1}' => "[*]",  // HIGH VOLTAGE
        '\u{1F525}' => "[*]", // FIRE
        '\u{1F480}' => "[X]", // SKULL
        '\u{23F0}' => "[T]",  // ALARM CLOCK
        '\u{1F6A8}' => "[!]", // POLICE CAR LIGHT
        '\u{1F4DD}' => "[N]", // MEMO
        '\u{1F4CA}' => "[#]", // BAR CHART
        '\u{2728}' => "[*]",  // SPARKLES
        '\u{1F3AF}' => "[O]", // DIRECT HIT
        '\u{1F514}' => "[B]", // BELL
        '\u{1F4A1}' => "[i]", // LIGHT BULB
        '\u{1F50D}' => "[?]", // MAGNIFYING GLASS
        '\u{1F4CC}' => "[P]", // PUSHPIN
        '\u{1F6D1}' => "[S]", // STOP SIGN
        '\u{2B50}' => "[*]",  // STAR
        '\u{1F4BB}' => "[C]", // LAPTOP
        '\u{1F4C1}' => "[D]", // FOLDER
        '\u{1F4C4}' => "[F]", // PAGE
        '\u{1F517}' => "[L]", // LINK
        _ => return None,
    };
    Some(tag)
}

fn needs_sanitizing(ch: char) -> bool {
    ch == VARIATION_SELECTOR_16 || replacement_for(ch).is_some()
}

/// Replace problematic emoji with ASCII tags and drop stray variation selectors.
///
/// Borrows when the text contains nothing to replace.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    if !text.chars().any(needs_sanitizing) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if ch == VARIATION_SELECTOR_16 {
            continue;
        }
        match replacement_for(ch) {
            Some(tag) => out.push_str(tag),
            None => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Collapse every run of three or more line breaks down to two.
///
/// Both `\n` and `\r\n` count as a line break; the kept breaks retain their
/// original form.
pub fn collapse_newlines(text: &str) -> Cow<'_, str> {
    if !text.contains('\n') {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut run = 0usize;
    let mut collapsed = false;
    let mut rest = text;
    while !rest.is_empty() {
        let brk = if rest.starts_with("\r\n") {
            Some(2)
        } else if rest.starts_with('\n') {
            Some(1)
        } else {
            None
        };

        match brk {
            Some(len) => {
                run += 1;
                if run <= 2 {
                    out.push_str(&rest[..len]);
                } else {
                    collapsed = true;
                }
                rest = &rest[len..];
            }
            None => {
                run = 0;
                let ch_len = rest.chars().next().map_or(1, char::len_utf8);
                out.push_str(&rest[..ch_len]);
                rest = &rest[ch_len..];
            }
        }
    }

    if collapsed {
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Incremental UTF-8 decoder for a byte stream delivered in arbitrary chunks.
///
/// A multi-byte sequence split across reads is held back until its remaining
/// bytes arrive. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut input = bytes.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = input.split_at(err.valid_up_to());
                    // valid_up_to guarantees this prefix is UTF-8
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &after[bad..];
                        }
                        None => {
                            // Truncated sequence at the end of the chunk
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is held back at end of stream
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_text_after_emoji() {
        let input = "\u{26A0}\u{FE0F} disk almost full: 95% used";
        assert_eq!(sanitize(input), "[!] disk almost full: 95% used");

        let input = "build \u{2705} done \u{1F525} hot \u{1F517} link";
        assert_eq!(sanitize(input), "build [v] done [*] hot [L] link");
    }

    #[test]
    fn test_sanitize_borrows_clean_text() {
        let input = "plain output line\n";
        assert!(matches!(sanitize(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_sanitize_drops_stray_variation_selector() {
        assert_eq!(sanitize("a\u{FE0F}b"), "ab");
        assert_eq!(sanitize("\u{2764}\u{FE0F}"), "\u{2764}");
    }

    #[test]
    fn test_collapse_newlines() {
        assert_eq!(collapse_newlines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_newlines("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_newlines("a\r\n\r\n\r\n\r\nb\n"), "a\r\n\r\nb\n");
        assert_eq!(collapse_newlines("\n\n\n"), "\n\n");
        assert_eq!(collapse_newlines("héllo\n\n\n\nwörld"), "héllo\n\nwörld");
    }

    #[test]
    fn test_collapse_any_run_length() {
        for n in 3..40 {
            let text = format!("top{}bottom", "\n".repeat(n));
            assert_eq!(collapse_newlines(&text), "top\n\nbottom", "run of {}", n);
        }
    }

    #[test]
    fn test_decoder_reassembles_split_sequences() {
        let bytes = "\u{1F525} ok".as_bytes();
        let mut decoder = ChunkDecoder::new();
        let mut out = decoder.decode(&bytes[..2]);
        assert_eq!(out, "");
        out.push_str(&decoder.decode(&bytes[2..]));
        assert_eq!(out, "\u{1F525} ok");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = ChunkDecoder::new();
        assert_eq!(decoder.decode(b"ok\xFFdone"), "ok\u{FFFD}done");
        assert_eq!(decoder.decode(b"tail\xE2\x82"), "tail");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
