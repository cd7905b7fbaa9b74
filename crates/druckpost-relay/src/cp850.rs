// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Code Page 850 (Multilingual Latin-1) encoding.
//
// Receipt printers in their default character table expect single-byte CP850.
// ASCII passes through unchanged; the upper half is looked up in the table
// below.  Unlike a lossy printer-side conversion, a character with no CP850
// representation is an error: printing `?` silently would hide a bad payload.

use druckpost_core::error::{DruckpostError, Result};

/// Unicode code points for CP850 bytes 0x80..=0xFF, in byte order.
const CP850_HIGH: [char; 128] = [
    // 0x80
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    // 0x90
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', 'ø', '£', 'Ø', '×', 'ƒ',
    // 0xA0
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '®', '¬', '½', '¼', '¡', '«', '»',
    // 0xB0
    '░', '▒', '▓', '│', '┤', 'Á', 'Â', 'À', '©', '╣', '║', '╗', '╝', '¢', '¥', '┐',
    // 0xC0
    '└', '┴', '┬', '├', '─', '┼', 'ã', 'Ã', '╚', '╔', '╩', '╦', '╠', '═', '╬', '¤',
    // 0xD0
    'ð', 'Ð', 'Ê', 'Ë', 'È', 'ı', 'Í', 'Î', 'Ï', '┘', '┌', '█', '▄', '¦', 'Ì', '▀',
    // 0xE0
    'Ó', 'ß', 'Ô', 'Ò', 'õ', 'Õ', 'µ', 'þ', 'Þ', 'Ú', 'Û', 'Ù', 'ý', 'Ý', '¯', '´',
    // 0xF0
    '\u{00AD}', '±', '‗', '¾', '¶', '§', '÷', '¸', '°', '¨', '·', '¹', '³', '²', '■',
    '\u{00A0}',
];

/// Encode a string as CP850 bytes.
///
/// Fails on the first character that CP850 cannot represent.
pub fn encode(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    for (offset, ch) in s.char_indices() {
        if ch.is_ascii() {
            out.push(ch as u8);
        } else if let Some(byte) = unicode_to_cp850(ch) {
            out.push(byte);
        } else {
            return Err(DruckpostError::Transform(format!(
                "character '{ch}' (U+{:04X}) at byte {offset} has no CP850 representation",
                ch as u32
            )));
        }
    }
    Ok(out)
}

/// Decode CP850 bytes back to a string.  Every byte is defined, so this
/// cannot fail.
#[cfg(test)]
fn decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP850_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

fn unicode_to_cp850(ch: char) -> Option<u8> {
    CP850_HIGH
        .iter()
        .position(|&c| c == ch)
        .map(|idx| 0x80 + idx as u8)
}
