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

//! Read paths over compras.
//!
//! Listings never include unfinished reservations unless a buyer explicitly
//! asks for them: an `INICIADA` compra is not a purchase yet.

use crate::base::{Actor, ClienteId, CompraId, EventoId, ProductoraId};
use crate::engine::Engine;
use crate::error::PurchaseError;
use crate::purchase::{Compra, EstadoCompra};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;

/// Listing filter. `page` starts at 1; `limit` falls back to the configured
/// default page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompraFilter {
    pub estado: Option<EstadoCompra>,
    pub page: u32,
    pub limit: Option<u32>,
}

impl Default for CompraFilter {
    fn default() -> Self {
        Self {
            estado: None,
            page: 1,
            limit: None,
        }
    }
}

impl CompraFilter {
    pub fn estado(estado: EstadoCompra) -> Self {
        Self {
            estado: Some(estado),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matches across all pages.
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

impl Engine {
    /// A buyer's compras, newest first.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InvalidPagination`] for page 0 or an out-of-range limit.
    pub fn list_compras_cliente(
        &self,
        cliente_id: ClienteId,
        filter: CompraFilter,
    ) -> Result<Page<Compra>, PurchaseError> {
        let limit = self.page_limit(&filter)?;
        let compras = self.store().compras_where(|compra| {
            compra.cliente_id == cliente_id && matches_estado(compra.estado, filter.estado)
        });
        Ok(paginate(compras, filter.page, limit))
    }

    /// Compras across every evento of a productora, newest first.
    /// Reservations are never listed here.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InvalidPagination`] for page 0 or an out-of-range limit.
    pub fn list_compras_productora(
        &self,
        productora_id: ProductoraId,
        filter: CompraFilter,
    ) -> Result<Page<Compra>, PurchaseError> {
        let limit = self.page_limit(&filter)?;
        let eventos: BTreeSet<EventoId> = self
            .store()
            .eventos_where(|evento| evento.productora_id == productora_id)
            .iter()
            .map(|evento| evento.id)
            .collect();

        let compras = self.store().compras_where(|compra| {
            eventos.contains(&compra.evento_id)
                && compra.estado != EstadoCompra::Iniciada
                && matches_estado(compra.estado, filter.estado)
        });
        Ok(paginate(compras, filter.page, limit))
    }

    /// One compra, visible to its buyer, the owning productora and the system.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::CompraNotFound`] - unknown compra.
    /// - [`PurchaseError::OwnershipViolation`] - anyone else.
    pub fn get_compra(&self, actor: Actor, compra_id: CompraId) -> Result<Compra, PurchaseError> {
        let compra = self
            .store()
            .compra(compra_id)
            .ok_or(PurchaseError::CompraNotFound(compra_id))?;
        match actor {
            Actor::Cliente(cliente_id) if compra.cliente_id != cliente_id => {
                Err(PurchaseError::OwnershipViolation)
            }
            Actor::Productora(productora_id) => {
                self.ensure_owner(productora_id, compra.evento_id)?;
                Ok(compra)
            }
            _ => Ok(compra),
        }
    }

    fn page_limit(&self, filter: &CompraFilter) -> Result<u32, PurchaseError> {
        let max_limit = self.config().max_page_limit;
        let limit = filter.limit.unwrap_or(self.config().default_page_limit);
        if filter.page == 0 || limit == 0 || limit > max_limit {
            return Err(PurchaseError::InvalidPagination { max_limit });
        }
        Ok(limit)
    }
}

/// Without an explicit estado, reservations are hidden.
fn matches_estado(estado: EstadoCompra, wanted: Option<EstadoCompra>) -> bool {
    match wanted {
        Some(wanted) => estado == wanted,
        None => estado != EstadoCompra::Iniciada,
    }
}

fn paginate(mut compras: Vec<Compra>, page: u32, limit: u32) -> Page<Compra> {
    compras.sort_by_key(|compra| Reverse((compra.created_at, compra.id)));
    let total = compras.len();
    let skip = (page as usize - 1).saturating_mul(limit as usize);
    let items = compras.into_iter().skip(skip).take(limit as usize).collect();
    Page {
        items,
        total,
        page,
        limit,
    }
}
