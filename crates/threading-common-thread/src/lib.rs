// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod batch;
pub mod bml;
pub mod clock;
pub mod error;
pub mod model;
pub mod query;
pub mod scheduled;
pub mod summary;
pub mod triggered;

pub use batch::*;
pub use bml::{Bml, Node};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::*;
pub use model::*;
pub use query::*;
pub use scheduled::*;
pub use summary::{summary_from_text, truncate_utf8, truncate_with_ellipsis, SUMMARY_MAX_BYTES};
pub use triggered::*;

pub use threading_common_id::{
	BatchJobId, BatchTaskId, SavedMessageId, SavedQueryId, ScheduledMessageId, ThreadId, ThreadItemId,
	TriggeredMessageId, TriggeredMessageItemId,
};
