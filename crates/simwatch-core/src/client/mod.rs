// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Boundary to the authority.

pub mod mock;
pub mod traits;

pub use mock::{MockAuthorityClient, MockCall, MockConnector};
pub use traits::*;
