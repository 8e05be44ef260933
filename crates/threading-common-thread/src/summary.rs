// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::bml::Bml;
use crate::error::BmlError;

pub const SUMMARY_MAX_BYTES: usize = 256;

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
	if s.len() <= max_bytes {
		return s;
	}
	let mut end = max_bytes;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

/// Truncates to `max_bytes` and appends an ellipsis when anything was cut.
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
	let t = truncate_utf8(s, max_bytes);
	if t.len() == s.len() {
		s.to_string()
	} else {
		format!("{t}…")
	}
}

/// Single-line plain-text summary of message markup.
pub fn summary_from_text(markup: &str) -> Result<String, BmlError> {
	let plain = Bml::parse(markup)?.plain_text();
	let plain = plain.replace('\n', " ").replace("  ", " ");
	Ok(truncate_with_ellipsis(&plain, SUMMARY_MAX_BYTES))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn short_text_is_unchanged() {
		assert_eq!(summary_from_text("hello").unwrap(), "hello");
	}

	#[test]
	fn markup_and_newlines_are_flattened() {
		let s = summary_from_text("Hi <ref type=\"entity\" id=\"e1\">Joe</ref>\nhow are you?").unwrap();
		assert_eq!(s, "Hi Joe how are you?");
	}

	#[test]
	fn long_text_is_truncated_with_ellipsis() {
		let text = "a".repeat(300);
		let s = summary_from_text(&text).unwrap();
		assert_eq!(s, format!("{}…", "a".repeat(SUMMARY_MAX_BYTES)));
	}

	#[test]
	fn truncation_respects_char_boundaries() {
		let s = "ééé";
		assert_eq!(truncate_utf8(s, 3), "é");
		assert_eq!(truncate_utf8(s, 1), "");
		assert_eq!(truncate_utf8(s, 6), "ééé");
	}

	proptest! {
		#[test]
		fn truncated_output_is_valid_prefix(s in "\\PC{0,400}", max in 0usize..300) {
			let t = truncate_utf8(&s, max);
			prop_assert!(t.len() <= max);
			prop_assert!(s.starts_with(t));
			if s.len() > max {
				let next = s[t.len()..].chars().next().map(char::len_utf8).unwrap_or(0);
				prop_assert!(t.len() + next > max);
			}
		}
	}
}
