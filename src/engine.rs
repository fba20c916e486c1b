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

//! Purchase lifecycle engine.
//!
//! The [`Engine`] drives every compra through its review state machine and
//! keeps entrada and evento stock consistent while many buyers compete for the
//! same tier.
//!
//! # Operations
//!
//! - **Reservation**: locks the entrada (and its evento), re-reads stock under
//!   the lock, takes the units and mints the tickets in one transaction.
//! - **Proof of payment**: the buyer attaches a proof; the compra waits for review.
//! - **Accept**: the productora confirms; tickets become ready to scan.
//! - **Reject / Cancel**: the productora (or the system, for cancellation)
//!   refuses the compra; stock goes back, clamped to the original allocation.
//! - **Validate**: a ticket is scanned at the door.
//!
//! # Thread Safety
//!
//! Correctness under contention comes from row locks held by store
//! transactions, not from any engine-level mutex. Two reservations against the
//! same entrada serialize on its lock and the second one re-validates against
//! the stock the first one left.

use crate::base::{Actor, ClienteId, CompraId, EntradaId, EventoId, ProductoraId};
use crate::clock::{Clock, SystemClock};
use crate::code::TicketCode;
use crate::config::EngineConfig;
use crate::error::PurchaseError;
use crate::inventory::{Entrada, Evento, NuevoEvento};
use crate::issuer::{Batch, issue_batch};
use crate::notify::{Notification, Notifier, Outbox};
use crate::purchase::{Compra, EstadoCompra, Ticket};
use crate::store::{Store, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Ticket inventory and purchase lifecycle manager.
///
/// # Invariants
///
/// - `0 <= entrada.stock <= entrada.cantidad` and
///   `0 <= evento.stock_entradas <= evento.capacidad`.
/// - Entrada and evento stock change in the same transaction.
/// - Ticket codes are globally unique and issued sequentially.
/// - Compras only move forward: `INICIADA` → `PENDIENTE` → `ACEPTADA` or
///   `RECHAZADA`, with `CANCELADA` reachable from any estado still holding stock.
pub struct Engine {
    store: Store,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
}

impl Engine {
    /// Engine on the system clock with default configuration and an in-process
    /// [`Outbox`] for notifications.
    pub fn new() -> Self {
        Self::with_parts(
            EngineConfig::default(),
            Arc::new(SystemClock),
            Arc::new(Outbox::new()),
        )
    }

    pub fn with_parts(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Engine {
            store: Store::new(),
            clock,
            notifier,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn entrada(&self, id: EntradaId) -> Option<Entrada> {
        self.store.entrada(id)
    }

    pub fn evento(&self, id: EventoId) -> Option<Evento> {
        self.store.evento(id)
    }

    /// Creates an evento with its entradas, all stock available.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::InvalidEvento`] if the request breaks a catalog rule.
    pub fn create_evento(&self, request: NuevoEvento) -> Result<Evento, PurchaseError> {
        let capacidad = request.validate()?;
        let evento_id = self.store.next_evento_id();

        let entradas: Vec<Entrada> = request
            .entradas
            .into_iter()
            .map(|entrada| Entrada {
                id: self.store.next_entrada_id(),
                evento_id,
                tipo: entrada.tipo,
                precio: entrada.precio,
                cantidad: entrada.cantidad,
                stock: entrada.cantidad,
            })
            .collect();

        let evento = Evento {
            id: evento_id,
            productora_id: request.productora_id,
            nombre: request.nombre,
            inicio_at: request.inicio_at,
            fin_at: request.fin_at,
            capacidad,
            stock_entradas: capacidad,
            entradas: entradas.iter().map(|entrada| entrada.id).collect(),
        };

        self.store.insert_evento(evento.clone(), entradas);
        info!(evento = %evento.id, productora = %evento.productora_id, capacidad, "evento created");
        Ok(evento)
    }

    /// Reserves `quantity` units of an entrada for a buyer.
    ///
    /// Creates an `INICIADA` compra with its reserved tickets. Stock is taken
    /// immediately; the compra must receive a proof of payment before the
    /// reservation timeout or the reaper reclaims it.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::InvalidQuantity`] - `quantity` is zero.
    /// - [`PurchaseError::EntradaNotFound`] - unknown entrada.
    /// - [`PurchaseError::EventExpired`] - the evento has finished.
    /// - [`PurchaseError::InsufficientStock`] - fewer units left than requested.
    /// - [`PurchaseError::AmountOverflow`] - `precio × quantity` is not representable.
    /// - [`PurchaseError::Code`] - the ticket code space is exhausted.
    pub fn initiate_reservation(
        &self,
        cliente_id: ClienteId,
        entrada_id: EntradaId,
        quantity: u32,
    ) -> Result<Compra, PurchaseError> {
        if quantity == 0 {
            return Err(PurchaseError::InvalidQuantity);
        }
        let now = self.clock.now();

        let mut tx = self.store.begin();
        tx.lock_inventory(&[entrada_id])?;

        let (precio, evento_id) = {
            let entrada = tx
                .entrada(entrada_id)
                .ok_or(PurchaseError::EntradaNotFound(entrada_id))?;
            (entrada.precio, entrada.evento_id)
        };
        let monto = precio
            .checked_mul(Decimal::from(quantity))
            .ok_or(PurchaseError::AmountOverflow { quantity })?;
        let evento = tx
            .evento(evento_id)
            .ok_or(PurchaseError::EventoNotFound(evento_id))?;
        if evento.is_finished(now) {
            return Err(PurchaseError::EventExpired(evento_id));
        }

        // Stock is re-read here, under the lock.
        tx.entrada_mut(entrada_id)
            .ok_or(PurchaseError::EntradaNotFound(entrada_id))?
            .reserve(quantity)?;
        tx.evento_mut(evento_id)
            .ok_or(PurchaseError::EventoNotFound(evento_id))?
            .reserve(quantity)?;

        let compra_id = self.store.next_compra_id();
        let last_code = tx.lock_sequence();
        let batch = Batch {
            compra_id,
            entrada_id,
            cliente_id,
            quantity,
            issued_at: now,
        };
        let tickets = issue_batch(&batch, last_code, || self.store.next_ticket_id())?;
        if let Some(last) = tickets.last() {
            tx.advance_sequence(last.codigo);
        }

        let compra = Compra {
            id: compra_id,
            cliente_id,
            evento_id,
            estado: EstadoCompra::Iniciada,
            comprobante_transferencia: None,
            monto,
            created_at: now,
            updated_at: now,
            tickets,
        };
        tx.insert_compra(compra.clone());
        tx.commit()?;

        info!(
            compra = %compra.id,
            cliente = %cliente_id,
            entrada = %entrada_id,
            quantity,
            monto = %compra.monto,
            "reservation created"
        );
        Ok(compra)
    }

    /// Attaches the buyer's proof of payment and puts the compra up for review.
    ///
    /// `comprobante` is the reference returned by the asset store.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::CompraNotFound`] - unknown or already reaped compra.
    /// - [`PurchaseError::OwnershipViolation`] - the compra belongs to someone else.
    /// - [`PurchaseError::InvalidStateTransition`] - a proof was already attached
    ///   or the compra was closed.
    /// - [`PurchaseError::InvalidProof`] - blank reference.
    pub fn attach_proof(
        &self,
        cliente_id: ClienteId,
        compra_id: CompraId,
        comprobante: impl Into<String>,
    ) -> Result<Compra, PurchaseError> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let compra = tx.lock_compra(compra_id)?;
        if compra.cliente_id != cliente_id {
            return Err(PurchaseError::OwnershipViolation);
        }
        compra.attach_proof(comprobante.into(), now)?;
        let compra = compra.clone();
        tx.commit()?;

        info!(compra = %compra_id, cliente = %cliente_id, "payment proof attached");
        if let Some(evento) = self.store.evento(compra.evento_id) {
            self.notify(Notification::ProofSubmitted {
                compra_id,
                evento_id: evento.id,
                productora_id: evento.productora_id,
            });
        }
        Ok(compra)
    }

    /// Accepts a reviewed compra. No stock moves: it was taken at reservation.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::CompraNotFound`] - unknown compra.
    /// - [`PurchaseError::OwnershipViolation`] - the evento belongs to another productora.
    /// - [`PurchaseError::InvalidStateTransition`] - the compra is not `PENDIENTE`.
    pub fn accept_purchase(
        &self,
        productora_id: ProductoraId,
        compra_id: CompraId,
    ) -> Result<Compra, PurchaseError> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let compra = tx.lock_compra(compra_id)?;
        self.ensure_owner(productora_id, compra.evento_id)?;
        compra.accept(now)?;
        let compra = compra.clone();
        tx.commit()?;

        info!(compra = %compra_id, productora = %productora_id, "compra accepted");
        self.notify(Notification::PurchaseAccepted {
            compra_id,
            cliente_id: compra.cliente_id,
        });
        Ok(compra)
    }

    /// Rejects a reviewed compra and gives its units back to stock.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::accept_purchase`].
    pub fn reject_purchase(
        &self,
        productora_id: ProductoraId,
        compra_id: CompraId,
    ) -> Result<Compra, PurchaseError> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let compra = tx.lock_compra(compra_id)?;
        self.ensure_owner(productora_id, compra.evento_id)?;
        compra.reject(now)?;
        let compra = compra.clone();
        let restored = restore_stock(&mut tx, &compra.tickets_by_entrada())?;
        tx.commit()?;

        info!(compra = %compra_id, productora = %productora_id, restored, "compra rejected");
        self.notify(Notification::PurchaseRejected {
            compra_id,
            cliente_id: compra.cliente_id,
        });
        Ok(compra)
    }

    /// Cancels a compra outside the review flow and gives its units back.
    ///
    /// Allowed for the owning productora and for [`Actor::System`].
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::CompraNotFound`] - unknown compra.
    /// - [`PurchaseError::OwnershipViolation`] - buyers and foreign productoras.
    /// - [`PurchaseError::InvalidStateTransition`] - already rejected or cancelled.
    /// - [`PurchaseError::TicketAlreadyUsed`] - a ticket was scanned at the door.
    pub fn cancel_purchase(&self, actor: Actor, compra_id: CompraId) -> Result<Compra, PurchaseError> {
        let now = self.clock.now();
        let mut tx = self.store.begin();
        let compra = tx.lock_compra(compra_id)?;
        match actor {
            Actor::Productora(productora_id) => self.ensure_owner(productora_id, compra.evento_id)?,
            Actor::System => {}
            Actor::Cliente(_) => return Err(PurchaseError::OwnershipViolation),
        }
        compra.cancel(now)?;
        let compra = compra.clone();
        let restored = restore_stock(&mut tx, &compra.tickets_by_entrada())?;
        tx.commit()?;

        info!(compra = %compra_id, %actor, restored, "compra cancelled");
        self.notify(Notification::PurchaseCancelled {
            compra_id,
            cliente_id: compra.cliente_id,
        });
        Ok(compra)
    }

    /// Scans a ticket at the door.
    ///
    /// # Errors
    ///
    /// - [`PurchaseError::Code`] - malformed code.
    /// - [`PurchaseError::TicketNotFound`] - no live ticket with that code.
    /// - [`PurchaseError::OwnershipViolation`] - ticket for another productora's evento.
    /// - [`PurchaseError::TicketNotValidatable`] - not accepted, or already used.
    pub fn validate_ticket(
        &self,
        productora_id: ProductoraId,
        codigo: &str,
    ) -> Result<Ticket, PurchaseError> {
        let code: TicketCode = codigo.parse()?;
        let not_found = || PurchaseError::TicketNotFound(code.to_string());
        let compra_id = self.store.compra_for_code(&code).ok_or_else(not_found)?;

        let now = self.clock.now();
        let mut tx = self.store.begin();
        let compra = tx.lock_compra(compra_id).map_err(|_| not_found())?;
        self.ensure_owner(productora_id, compra.evento_id)?;
        let ticket = compra
            .tickets
            .iter_mut()
            .find(|ticket| ticket.codigo == code)
            .ok_or_else(not_found)?;
        ticket.validate(now)?;
        let ticket = ticket.clone();
        tx.commit()?;

        info!(ticket = %code, compra = %compra_id, "ticket validated");
        Ok(ticket)
    }

    /// Evento ownership. The productora of an evento never changes, so a
    /// snapshot read is enough.
    pub(crate) fn ensure_owner(
        &self,
        productora_id: ProductoraId,
        evento_id: EventoId,
    ) -> Result<(), PurchaseError> {
        let evento = self
            .store
            .evento(evento_id)
            .ok_or(PurchaseError::EventoNotFound(evento_id))?;
        if evento.productora_id != productora_id {
            return Err(PurchaseError::OwnershipViolation);
        }
        Ok(())
    }

    pub(crate) fn notify(&self, notification: Notification) {
        if let Err(error) = self.notifier.notify(&notification) {
            warn!(compra = %notification.compra_id(), %error, "notification dropped");
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Gives reserved units back to their entradas and eventos.
///
/// `groups` maps each entrada to the number of units to return. Locks the
/// entradas and their eventos, so every compra involved must already be locked.
/// Both levels are clamped to their original allocation. Returns the number of
/// entrada units actually restored.
pub(crate) fn restore_stock(
    tx: &mut Transaction<'_>,
    groups: &BTreeMap<EntradaId, u32>,
) -> Result<u32, PurchaseError> {
    let entrada_ids: Vec<EntradaId> = groups.keys().copied().collect();
    tx.lock_inventory(&entrada_ids)?;

    let mut restored = 0;
    let mut per_evento: BTreeMap<EventoId, u32> = BTreeMap::new();
    for (&entrada_id, &count) in groups {
        let entrada = tx
            .entrada_mut(entrada_id)
            .ok_or(PurchaseError::EntradaNotFound(entrada_id))?;
        restored += entrada.restore(count);
        *per_evento.entry(entrada.evento_id).or_insert(0) += count;
    }
    for (evento_id, count) in per_evento {
        tx.evento_mut(evento_id)
            .ok_or(PurchaseError::EventoNotFound(evento_id))?
            .restore(count);
    }
    Ok(restored)
}
