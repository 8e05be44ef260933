// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BmlError {
	#[error("unexpected end of markup")]
	UnexpectedEof,

	#[error("unknown element <{0}>")]
	UnknownElement(String),

	#[error("element <{element}> is missing attribute '{attribute}'")]
	MissingAttribute { element: String, attribute: String },

	#[error("unsupported ref type '{0}'")]
	UnsupportedRefType(String),

	#[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
	MismatchedClose { expected: String, found: String },

	#[error("nested element <{0}> is not allowed")]
	Nested(String),

	#[error("invalid character entity '&{0};'")]
	InvalidEntity(String),

	#[error("malformed element at byte {0}")]
	Malformed(usize),
}

#[derive(Debug, Error)]
pub enum ModelError {
	#[error("unknown item type: {0}")]
	UnknownItemType(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid value for {field}: {value}")]
	InvalidValue { field: &'static str, value: String },
}
