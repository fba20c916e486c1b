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

//! Inventory rows: eventos and their entradas.
//!
//! Stock moves in two directions only. [`Entrada::reserve`] and
//! [`Evento::reserve`] take units out when a compra is initiated;
//! [`Entrada::restore`] and [`Evento::restore`] put them back when a compra is
//! rejected, cancelled or reaped. Restoration is clamped to the original
//! allocation so a double restore can never mint stock.
//!
//! Both rows must move in the same transaction: `stock_entradas` mirrors the
//! sum of the evento's entrada stocks.

use crate::base::{EntradaId, EventoId, ProductoraId};
use crate::error::PurchaseError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ticket tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrada {
    pub id: EntradaId,
    pub evento_id: EventoId,
    pub tipo: String,
    pub precio: Decimal,
    /// Original allocation. Never changes after creation.
    pub cantidad: u32,
    /// Remaining sellable units.
    pub stock: u32,
}

impl Entrada {
    fn assert_invariants(&self) {
        debug_assert!(
            self.stock <= self.cantidad,
            "Invariant violated: entrada {} stock {} exceeds cantidad {}",
            self.id,
            self.stock,
            self.cantidad
        );
    }

    /// Takes `quantity` units out of stock.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InsufficientStock`] carrying the exact remaining count.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), PurchaseError> {
        if self.stock < quantity {
            return Err(PurchaseError::InsufficientStock {
                remaining: self.stock,
            });
        }
        self.stock -= quantity;
        self.assert_invariants();
        Ok(())
    }

    /// Puts up to `quantity` units back, never above `cantidad`.
    ///
    /// Returns the number of units actually restored.
    pub fn restore(&mut self, quantity: u32) -> u32 {
        let before = self.stock;
        self.stock = self.stock.saturating_add(quantity).min(self.cantidad);
        self.assert_invariants();
        self.stock - before
    }

    /// Units currently held by reservations or sold.
    pub fn committed(&self) -> u32 {
        self.cantidad - self.stock
    }
}

/// Event with its aggregate stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evento {
    pub id: EventoId,
    pub productora_id: ProductoraId,
    pub nombre: String,
    pub inicio_at: DateTime<Utc>,
    pub fin_at: DateTime<Utc>,
    /// Sum of the entradas' `cantidad` at creation time.
    pub capacidad: u32,
    /// Mirrors the sum of the entradas' `stock`.
    pub stock_entradas: u32,
    pub entradas: Vec<EntradaId>,
}

impl Evento {
    fn assert_invariants(&self) {
        debug_assert!(
            self.stock_entradas <= self.capacidad,
            "Invariant violated: evento {} stock {} exceeds capacidad {}",
            self.id,
            self.stock_entradas,
            self.capacidad
        );
    }

    /// Purchases are forbidden once `fin_at` has passed.
    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        self.fin_at <= now
    }

    /// Takes `quantity` units out of the aggregate stock.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InsufficientStock`] if the aggregate has drifted below
    /// the entrada stock being reserved.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), PurchaseError> {
        if self.stock_entradas < quantity {
            return Err(PurchaseError::InsufficientStock {
                remaining: self.stock_entradas,
            });
        }
        self.stock_entradas -= quantity;
        self.assert_invariants();
        Ok(())
    }

    /// Puts up to `quantity` units back, never above `capacidad`.
    pub fn restore(&mut self, quantity: u32) -> u32 {
        let before = self.stock_entradas;
        self.stock_entradas = self
            .stock_entradas
            .saturating_add(quantity)
            .min(self.capacidad);
        self.assert_invariants();
        self.stock_entradas - before
    }
}

/// Ticket tier requested when creating an evento.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NuevaEntrada {
    pub tipo: String,
    pub precio: Decimal,
    pub cantidad: u32,
}

/// Evento creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NuevoEvento {
    pub productora_id: ProductoraId,
    pub nombre: String,
    pub inicio_at: DateTime<Utc>,
    pub fin_at: DateTime<Utc>,
    pub entradas: Vec<NuevaEntrada>,
}

impl NuevoEvento {
    /// Checks the request and returns the evento's capacidad.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InvalidEvento`] naming the first rule broken.
    pub fn validate(&self) -> Result<u32, PurchaseError> {
        if self.entradas.is_empty() {
            return Err(PurchaseError::InvalidEvento("at least one entrada is required"));
        }
        if self.fin_at <= self.inicio_at {
            return Err(PurchaseError::InvalidEvento("fin_at must be after inicio_at"));
        }

        let mut capacidad: u32 = 0;
        for entrada in &self.entradas {
            if entrada.cantidad == 0 {
                return Err(PurchaseError::InvalidEvento("cantidad must be at least 1"));
            }
            if entrada.precio < Decimal::ZERO {
                return Err(PurchaseError::InvalidEvento("precio cannot be negative"));
            }
            capacidad = capacidad
                .checked_add(entrada.cantidad)
                .ok_or(PurchaseError::InvalidEvento("capacidad overflow"))?;
        }
        Ok(capacidad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn entrada(cantidad: u32, stock: u32) -> Entrada {
        Entrada {
            id: EntradaId(1),
            evento_id: EventoId(1),
            tipo: "General".to_string(),
            precio: dec!(1500.00),
            cantidad,
            stock,
        }
    }

    fn evento(capacidad: u32, stock_entradas: u32) -> Evento {
        let now = Utc::now();
        Evento {
            id: EventoId(1),
            productora_id: ProductoraId(1),
            nombre: "Recital".to_string(),
            inicio_at: now,
            fin_at: now + Duration::hours(4),
            capacidad,
            stock_entradas,
            entradas: vec![EntradaId(1)],
        }
    }

    #[test]
    fn reserve_decrements_stock() {
        let mut entrada = entrada(10, 10);
        entrada.reserve(7).unwrap();
        assert_eq!(entrada.stock, 3);
        assert_eq!(entrada.committed(), 7);
    }

    #[test]
    fn reserve_reports_remaining_stock() {
        let mut entrada = entrada(10, 3);
        assert_eq!(
            entrada.reserve(5),
            Err(PurchaseError::InsufficientStock { remaining: 3 })
        );
        assert_eq!(entrada.stock, 3);
    }

    #[test]
    fn reserve_whole_stock() {
        let mut entrada = entrada(10, 3);
        entrada.reserve(3).unwrap();
        assert_eq!(entrada.stock, 0);
    }

    #[test]
    fn restore_is_clamped_to_cantidad() {
        let mut entrada = entrada(10, 8);
        assert_eq!(entrada.restore(5), 2);
        assert_eq!(entrada.stock, 10);
        assert_eq!(entrada.restore(u32::MAX), 0);
        assert_eq!(entrada.stock, 10);
    }

    #[test]
    fn evento_restore_is_clamped_to_capacidad() {
        let mut evento = evento(20, 19);
        assert_eq!(evento.restore(4), 1);
        assert_eq!(evento.stock_entradas, 20);
    }

    #[test]
    fn evento_reserve_checks_aggregate() {
        let mut evento = evento(20, 2);
        assert_eq!(
            evento.reserve(3),
            Err(PurchaseError::InsufficientStock { remaining: 2 })
        );
        evento.reserve(2).unwrap();
        assert_eq!(evento.stock_entradas, 0);
    }

    #[test]
    fn evento_finishes_at_fin_at() {
        let evento = evento(1, 1);
        assert!(!evento.is_finished(evento.fin_at - Duration::seconds(1)));
        assert!(evento.is_finished(evento.fin_at));
    }

    #[test]
    fn nuevo_evento_validation() {
        let now = Utc::now();
        let mut request = NuevoEvento {
            productora_id: ProductoraId(1),
            nombre: "Festival".to_string(),
            inicio_at: now,
            fin_at: now + Duration::days(1),
            entradas: vec![
                NuevaEntrada {
                    tipo: "General".to_string(),
                    precio: dec!(100),
                    cantidad: 50,
                },
                NuevaEntrada {
                    tipo: "VIP".to_string(),
                    precio: dec!(250),
                    cantidad: 10,
                },
            ],
        };
        assert_eq!(request.validate(), Ok(60));

        request.entradas[1].cantidad = 0;
        assert_eq!(
            request.validate(),
            Err(PurchaseError::InvalidEvento("cantidad must be at least 1"))
        );

        request.entradas[1].cantidad = 10;
        request.fin_at = now;
        assert_eq!(
            request.validate(),
            Err(PurchaseError::InvalidEvento("fin_at must be after inicio_at"))
        );

        request.fin_at = now + Duration::days(1);
        request.entradas.clear();
        assert!(request.validate().is_err());
    }
}
