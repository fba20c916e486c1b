// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Purchase notifications.
//!
//! Notifications are a side effect of committed state transitions. Delivery is
//! best effort: the engine logs a failed [`Notifier::notify`] and moves on, the
//! transition that caused it stands.

use crate::base::{ClienteId, CompraId, EventoId, ProductoraId};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Tells the productora a compra awaits review.
    ProofSubmitted {
        compra_id: CompraId,
        evento_id: EventoId,
        productora_id: ProductoraId,
    },
    PurchaseAccepted {
        compra_id: CompraId,
        cliente_id: ClienteId,
    },
    PurchaseRejected {
        compra_id: CompraId,
        cliente_id: ClienteId,
    },
    PurchaseCancelled {
        compra_id: CompraId,
        cliente_id: ClienteId,
    },
}

impl Notification {
    pub fn compra_id(&self) -> CompraId {
        match self {
            Self::ProofSubmitted { compra_id, .. }
            | Self::PurchaseAccepted { compra_id, .. }
            | Self::PurchaseRejected { compra_id, .. }
            | Self::PurchaseCancelled { compra_id, .. } => *compra_id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound message channel (email in production).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Lock-free, ordered notification outbox.
///
/// The engine pushes; a delivery worker drains.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: SegQueue<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    /// Removes and returns everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Notifier for Outbox {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.queue.push(notification.clone());
        Ok(())
    }
}
