// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deckhand Identity - identity provider plane adapter.
//!
//! One client, one contract: app customer groups, their members, and the
//! teardown of client/connection artefacts on app removal.

#![warn(missing_docs)]

pub mod client;
pub mod error;

pub use client::{GroupMember, IdentityClient, IdentityConfig, MemberPage, PER_PAGE};
pub use error::{IdentityError, IdentityErrorKind};
