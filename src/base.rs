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

//! Core identifier types for the actors and rows of the ticket inventory.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Buyer account identifier.
    ClienteId
);
row_id!(
    /// Organizer account identifier. Productoras own eventos and review compras.
    ProductoraId
);
row_id!(
    /// Event identifier.
    EventoId
);
row_id!(
    /// Ticket tier identifier.
    EntradaId
);
row_id!(
    /// Purchase identifier.
    ///
    /// Ordering matters: transactions lock compras in ascending id order.
    CompraId
);
row_id!(
    /// Ticket row identifier. Not to be confused with the human-readable
    /// [`TicketCode`](crate::TicketCode).
    TicketId
);

/// Identity asserted by the caller of an engine operation.
///
/// The engine trusts the identity but re-verifies that it owns the rows it
/// touches before mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "lowercase")]
pub enum Actor {
    Cliente(ClienteId),
    Productora(ProductoraId),
    /// Background jobs and operators.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Cliente(id) => write!(f, "cliente {id}"),
            Actor::Productora(id) => write!(f, "productora {id}"),
            Actor::System => f.write_str("system"),
        }
    }
}
