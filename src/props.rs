// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Packed key-value span: the variable-length property region of a message.
//
// Entries are concatenated `name=value\0` strings; the span length counts
// every byte including terminators. Entries keep their first-seen order, and
// re-setting a name rewrites its value in place, shifting the remaining span
// bytes left or right by the length delta. The match scan runs over every
// byte offset (not entry boundaries) and does not stop after the first hit,
// so a name that occurs more than once may be rewritten more than once;
// behavior under duplicate names is unspecified.

use crate::error::{BusError, Result};

/// Look up `name` in the packed span, returning its value bytes.
pub fn get<'a>(span: &'a [u8], name: &str) -> Option<&'a [u8]> {
    let name = name.as_bytes();
    if name.is_empty() {
        return None;
    }
    let mut off = 0;
    while off < span.len() {
        if let Some((value_off, value_len)) = match_at(span, off, name) {
            return Some(&span[value_off..value_off + value_len]);
        }
        off += 1;
    }
    None
}

/// Set `name` to `value` inside `tail`.
///
/// `tail` starts at the span's first byte and extends over all the space the
/// span may legally grow into; `len` is the current span length and `budget`
/// the maximum allowed one. Returns the new span length. Fails with
/// `OutOfRange` before touching the buffer when the result would exceed
/// `budget`.
pub fn set(tail: &mut [u8], len: usize, budget: usize, name: &str, value: &str) -> Result<usize> {
    let name_b = name.as_bytes();
    let value_b = value.as_bytes();
    debug_assert!(budget <= tail.len());

    let mut cur_len = len;
    let mut off = 0;
    let mut found = false;

    while off < cur_len {
        let Some((value_off, old_vlen)) = match_at(&tail[..cur_len], off, name_b) else {
            off += 1;
            continue;
        };
        let new_len = cur_len - old_vlen + value_b.len();
        if new_len > budget {
            return Err(BusError::OutOfRange("property value does not fit the message"));
        }
        // Shift the rest of the span (including this entry's terminator) by
        // the value delta, then write the new value over the gap.
        tail.copy_within(value_off + old_vlen..cur_len, value_off + value_b.len());
        tail[value_off..value_off + value_b.len()].copy_from_slice(value_b);
        cur_len = new_len;
        found = true;
        off = value_off + value_b.len() + 1;
    }

    if !found {
        let added = name_b.len() + 1 + value_b.len() + 1;
        let new_len = cur_len + added;
        if new_len > budget {
            return Err(BusError::OutOfRange("property entry does not fit the message"));
        }
        let mut w = cur_len;
        tail[w..w + name_b.len()].copy_from_slice(name_b);
        w += name_b.len();
        tail[w] = b'=';
        w += 1;
        tail[w..w + value_b.len()].copy_from_slice(value_b);
        w += value_b.len();
        tail[w] = 0;
        cur_len = new_len;
    }

    Ok(cur_len)
}

/// If `name=` occurs at `off`, return the value's offset and length
/// (up to the next terminator or the end of the span).
fn match_at(span: &[u8], off: usize, name: &[u8]) -> Option<(usize, usize)> {
    let rest = &span[off..];
    if rest.len() < name.len() + 1 || &rest[..name.len()] != name || rest[name.len()] != b'=' {
        return None;
    }
    let value_off = off + name.len() + 1;
    let value_len = span[value_off..]
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(span.len() - value_off);
    Some((value_off, value_len))
}
