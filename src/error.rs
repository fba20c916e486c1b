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

//! Error types for inventory and purchase processing.

use crate::base::{CompraId, EntradaId, EventoId};
use crate::purchase::{EstadoCompra, EstadoTicket};
use thiserror::Error;

/// Ticket code generator errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeError {
    /// Code is not 7 characters with a single space at index 3
    #[error("ticket code must look like \"XXX XXX\"")]
    Format,

    /// One of the six code characters is outside `[0-9A-Z]`
    #[error("invalid ticket code character {0:?}")]
    InvalidCharacter(char),

    /// `"ZZZ ZZZ"` has no successor
    #[error("ticket code space exhausted")]
    CapacityExhausted,
}

/// Purchase lifecycle errors.
///
/// Every variant aborts the enclosing transaction: no partial stock change and
/// no orphan tickets survive an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("compra {0} not found")]
    CompraNotFound(CompraId),

    #[error("entrada {0} not found")]
    EntradaNotFound(EntradaId),

    #[error("evento {0} not found")]
    EventoNotFound(EventoId),

    #[error("ticket {0} not found")]
    TicketNotFound(String),

    /// Requested quantity exceeds the stock read under lock
    #[error("insufficient stock: Quedan {remaining}")]
    InsufficientStock { remaining: u32 },

    /// The evento has already finished
    #[error("evento {0} has already finished")]
    EventExpired(EventoId),

    /// The compra's estado precludes the operation
    #[error("compra {compra} is already in state {estado}")]
    InvalidStateTransition { compra: CompraId, estado: EstadoCompra },

    /// Caller is neither the buyer nor the owning productora
    #[error("caller does not own this resource")]
    OwnershipViolation,

    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// `precio × quantity` does not fit in a decimal
    #[error("monto overflows for {quantity} units")]
    AmountOverflow { quantity: u32 },

    #[error("payment proof reference is empty")]
    InvalidProof,

    #[error("invalid evento: {0}")]
    InvalidEvento(&'static str),

    #[error("invalid pagination (page starts at 1, limit between 1 and {max_limit})")]
    InvalidPagination { max_limit: u32 },

    /// A ticket of the compra was already scanned at the door
    #[error("ticket {0} has already been used")]
    TicketAlreadyUsed(String),

    #[error("ticket {codigo} cannot be validated in state {estado}")]
    TicketNotValidatable { codigo: String, estado: EstadoTicket },

    /// Unique index on ticket codes rejected the commit
    #[error("duplicate ticket code {0}")]
    DuplicateTicketCode(String),

    /// A transaction requested a row out of the global lock order
    #[error("lock order violated: {0}")]
    LockOrder(&'static str),

    #[error(transparent)]
    Code(#[from] CodeError),
}
