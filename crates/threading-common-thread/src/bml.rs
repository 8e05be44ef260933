// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded markup for message text.
//!
//! Message text is plain text with two inline elements:
//!
//! - `<ref type="entity" id="...">Name</ref>` mentions an entity
//! - `<a href="...">label</a>` links somewhere
//!
//! Elements do not nest. A `<` that does not open or close an element and an
//! `&` that does not start a character reference are kept as literal text, so
//! ordinary SMS or email bodies parse without escaping.

use std::fmt::Write as _;

use crate::error::BmlError;
use crate::model::{Reference, ReferenceType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
	Text(String),
	Ref {
		ref_type: ReferenceType,
		id: String,
		text: String,
	},
	Anchor {
		href: String,
		text: String,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bml(pub Vec<Node>);

impl Bml {
	pub fn parse(s: &str) -> Result<Self, BmlError> {
		Parser::new(s).parse()
	}

	/// Text with all markup removed.
	pub fn plain_text(&self) -> String {
		let mut out = String::new();
		for node in &self.0 {
			match node {
				Node::Text(t) => out.push_str(t),
				Node::Ref { text, .. } | Node::Anchor { text, .. } => out.push_str(text),
			}
		}
		out
	}

	/// Canonical serialization. `Bml::parse(b.format())` yields `b`.
	pub fn format(&self) -> String {
		let mut out = String::new();
		for node in &self.0 {
			match node {
				Node::Text(t) => out.push_str(&escape_text(t)),
				Node::Ref { ref_type, id, text } => {
					let _ = write!(
						out,
						"<ref id=\"{}\" type=\"{}\">{}</ref>",
						escape_attr(id),
						ref_type.markup_name(),
						escape_text(text)
					);
				}
				Node::Anchor { href, text } => {
					let _ = write!(out, "<a href=\"{}\">{}</a>", escape_attr(href), escape_text(text));
				}
			}
		}
		out
	}

	/// Every `ref` element in document order.
	pub fn references(&self) -> Vec<Reference> {
		self
			.0
			.iter()
			.filter_map(|n| match n {
				Node::Ref { ref_type, id, .. } => Some(Reference {
					ref_type: *ref_type,
					id: id.clone(),
				}),
				_ => None,
			})
			.collect()
	}
}

pub fn escape_text(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			_ => out.push(c),
		}
	}
	out
}

fn escape_attr(s: &str) -> String {
	escape_text(s).replace('"', "&quot;")
}

struct Parser<'a> {
	src: &'a str,
	pos: usize,
	nodes: Vec<Node>,
	text: String,
}

struct Tag {
	name: String,
	closing: bool,
	self_closing: bool,
	attrs: Vec<(String, String)>,
}

impl Tag {
	fn attr(&self, name: &str) -> Option<&str> {
		self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
	}

	fn required(&self, name: &str) -> Result<&str, BmlError> {
		self.attr(name).ok_or_else(|| BmlError::MissingAttribute {
			element: self.name.clone(),
			attribute: name.to_string(),
		})
	}
}

impl<'a> Parser<'a> {
	fn new(src: &'a str) -> Self {
		Self {
			src,
			pos: 0,
			nodes: Vec::new(),
			text: String::new(),
		}
	}

	fn rest(&self) -> &'a str {
		&self.src[self.pos..]
	}

	fn parse(mut self) -> Result<Bml, BmlError> {
		while let Some(c) = self.rest().chars().next() {
			match c {
				'<' if self.starts_tag() => {
					let tag = self.parse_tag()?;
					if tag.closing {
						return Err(BmlError::MismatchedClose {
							expected: String::new(),
							found: tag.name,
						});
					}
					self.flush_text();
					let inner = if tag.self_closing {
						String::new()
					} else {
						self.parse_inner(&tag.name)?
					};
					let node = match tag.name.as_str() {
						"ref" => {
							let ref_type = tag.required("type")?;
							let ref_type = ReferenceType::from_markup(ref_type)
								.ok_or_else(|| BmlError::UnsupportedRefType(ref_type.to_string()))?;
							Node::Ref {
								ref_type,
								id: tag.required("id")?.to_string(),
								text: inner,
							}
						}
						"a" => Node::Anchor {
							href: tag.required("href")?.to_string(),
							text: inner,
						},
						other => return Err(BmlError::UnknownElement(other.to_string())),
					};
					self.nodes.push(node);
				}
				'&' => {
					let ch = self.parse_entity()?;
					self.text.push_str(&ch);
				}
				_ => {
					self.text.push(c);
					self.pos += c.len_utf8();
				}
			}
		}
		self.flush_text();
		Ok(Bml(self.nodes))
	}

	fn flush_text(&mut self) {
		if !self.text.is_empty() {
			self.nodes.push(Node::Text(std::mem::take(&mut self.text)));
		}
	}

	fn starts_tag(&self) -> bool {
		let mut chars = self.rest().chars().skip(1);
		match chars.next() {
			Some('/') => matches!(chars.next(), Some(c) if c.is_ascii_alphabetic()),
			Some(c) => c.is_ascii_alphabetic(),
			None => false,
		}
	}

	/// Reads element content up to the matching close tag.
	fn parse_inner(&mut self, name: &str) -> Result<String, BmlError> {
		let mut inner = String::new();
		loop {
			let c = self.rest().chars().next().ok_or(BmlError::UnexpectedEof)?;
			match c {
				'<' if self.starts_tag() => {
					let tag = self.parse_tag()?;
					if !tag.closing {
						return Err(BmlError::Nested(tag.name));
					}
					if tag.name != name {
						return Err(BmlError::MismatchedClose {
							expected: name.to_string(),
							found: tag.name,
						});
					}
					return Ok(inner);
				}
				'&' => inner.push_str(&self.parse_entity()?),
				_ => {
					inner.push(c);
					self.pos += c.len_utf8();
				}
			}
		}
	}

	fn parse_tag(&mut self) -> Result<Tag, BmlError> {
		let start = self.pos;
		let bytes = self.src.as_bytes();
		let mut i = self.pos + 1;
		let closing = bytes.get(i) == Some(&b'/');
		if closing {
			i += 1;
		}
		let name_start = i;
		while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
			i += 1;
		}
		let name = self.src[name_start..i].to_ascii_lowercase();
		let mut attrs = Vec::new();
		let mut self_closing = false;
		loop {
			while i < bytes.len() && bytes[i].is_ascii_whitespace() {
				i += 1;
			}
			match bytes.get(i) {
				None => return Err(BmlError::UnexpectedEof),
				Some(b'>') => {
					i += 1;
					break;
				}
				Some(b'/') if !closing && bytes.get(i + 1) == Some(&b'>') => {
					self_closing = true;
					i += 2;
					break;
				}
				Some(c) if c.is_ascii_alphabetic() && !closing => {
					let key_start = i;
					while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'-') {
						i += 1;
					}
					let key = self.src[key_start..i].to_ascii_lowercase();
					while i < bytes.len() && bytes[i].is_ascii_whitespace() {
						i += 1;
					}
					if bytes.get(i) != Some(&b'=') {
						return Err(BmlError::Malformed(start));
					}
					i += 1;
					while i < bytes.len() && bytes[i].is_ascii_whitespace() {
						i += 1;
					}
					let quote = match bytes.get(i) {
						Some(q @ (b'"' | b'\'')) => *q,
						None => return Err(BmlError::UnexpectedEof),
						_ => return Err(BmlError::Malformed(start)),
					};
					i += 1;
					let value_start = i;
					while i < bytes.len() && bytes[i] != quote {
						i += 1;
					}
					if i >= bytes.len() {
						return Err(BmlError::UnexpectedEof);
					}
					let value = unescape(&self.src[value_start..i])?;
					i += 1;
					attrs.push((key, value));
				}
				Some(_) => return Err(BmlError::Malformed(start)),
			}
		}
		self.pos = i;
		Ok(Tag {
			name,
			closing,
			self_closing,
			attrs,
		})
	}

	fn parse_entity(&mut self) -> Result<String, BmlError> {
		let rest = self.rest();
		match entity_at(rest)? {
			Some((decoded, len)) => {
				self.pos += len;
				Ok(decoded)
			}
			None => {
				self.pos += 1;
				Ok("&".to_string())
			}
		}
	}
}

/// Decodes a character reference at the start of `s` (which begins with `&`).
/// Returns `None` when the `&` is not followed by a reference-shaped name.
fn entity_at(s: &str) -> Result<Option<(String, usize)>, BmlError> {
	let body = &s[1..];
	let end = match body.find(';') {
		Some(end) if end > 0 && end <= 10 => end,
		_ => return Ok(None),
	};
	let name = &body[..end];
	if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '#') {
		return Ok(None);
	}
	let decoded = match name {
		"amp" => "&".to_string(),
		"lt" => "<".to_string(),
		"gt" => ">".to_string(),
		"quot" => "\"".to_string(),
		"apos" => "'".to_string(),
		_ => {
			let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
				u32::from_str_radix(hex, 16).ok()
			} else if let Some(dec) = name.strip_prefix('#') {
				dec.parse::<u32>().ok()
			} else {
				None
			};
			code
				.and_then(char::from_u32)
				.map(|c| c.to_string())
				.ok_or_else(|| BmlError::InvalidEntity(name.to_string()))?
		}
	};
	Ok(Some((decoded, end + 2)))
}

fn unescape(s: &str) -> Result<String, BmlError> {
	let mut out = String::with_capacity(s.len());
	let mut i = 0;
	while i < s.len() {
		let rest = &s[i..];
		if rest.starts_with('&') {
			if let Some((decoded, len)) = entity_at(rest)? {
				out.push_str(&decoded);
				i += len;
				continue;
			}
		}
		let c = rest.chars().next().ok_or(BmlError::UnexpectedEof)?;
		out.push(c);
		i += c.len_utf8();
	}
	Ok(out)
}
