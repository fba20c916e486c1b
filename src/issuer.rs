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

//! Ticket batch issuer.

use crate::base::{ClienteId, CompraId, EntradaId, TicketId};
use crate::code::TicketCode;
use crate::error::CodeError;
use crate::purchase::{EstadoTicket, Ticket};
use chrono::{DateTime, Utc};

/// What a batch of tickets belongs to.
#[derive(Debug, Clone, Copy)]
pub struct Batch {
    pub compra_id: CompraId,
    pub entrada_id: EntradaId,
    pub cliente_id: ClienteId,
    pub quantity: u32,
    pub issued_at: DateTime<Utc>,
}

/// Mints `batch.quantity` reserved tickets with sequential codes following
/// `last_code`.
///
/// Pure orchestration: stock is the caller's business, and the caller must
/// hold the code sequence lock for as long as the batch may be committed.
/// `next_id` supplies row ids.
///
/// # Errors
///
/// [`CodeError::CapacityExhausted`] if the code space runs out mid-batch; no
/// tickets are returned in that case.
pub fn issue_batch(
    batch: &Batch,
    last_code: Option<TicketCode>,
    mut next_id: impl FnMut() -> TicketId,
) -> Result<Vec<Ticket>, CodeError> {
    let mut tickets = Vec::with_capacity(batch.quantity as usize);
    let mut previous = last_code;

    for _ in 0..batch.quantity {
        let codigo = TicketCode::successor(previous.as_ref())?;
        tickets.push(Ticket {
            id: next_id(),
            codigo,
            estado: EstadoTicket::Reservado,
            cliente_id: batch.cliente_id,
            entrada_id: batch.entrada_id,
            compra_id: batch.compra_id,
            created_at: batch.issued_at,
            updated_at: batch.issued_at,
        });
        previous = Some(codigo);
    }

    Ok(tickets)
}
