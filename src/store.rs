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

//! Inventory store.
//!
//! Rows are kept in [`DashMap`]s of `Arc<Mutex<_>>`. The per-row mutex is the
//! lock-for-update primitive: a [`Transaction`] acquires row locks, mutates the
//! rows in place, and keeps the locks until it is committed or dropped.
//!
//! # Transactions
//!
//! - Every row is snapshotted when first locked. Dropping a transaction without
//!   calling [`Transaction::commit`] restores all snapshots, so an error after
//!   partial writes leaves no trace.
//! - New compras and deletions are staged and only become visible on commit.
//! - The ticket code unique index is checked before anything is applied.
//!
//! # Lock order
//!
//! Compras, then eventos, then entradas, then the ticket code sequence, each
//! level in ascending id order. No thread blocks on a row mutex while holding a
//! DashMap reference: row `Arc`s are cloned out of the map before locking.

use crate::base::{CompraId, EntradaId, EventoId, TicketId};
use crate::code::TicketCode;
use crate::error::PurchaseError;
use crate::inventory::{Entrada, Evento};
use crate::purchase::Compra;
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, MutexGuard, RawMutex};
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Row<T> = Arc<Mutex<T>>;
type RowGuard<T> = ArcMutexGuard<RawMutex, T>;

/// Durable record of eventos, entradas and compras.
#[derive(Debug, Default)]
pub struct Store {
    eventos: DashMap<EventoId, Row<Evento>>,
    entradas: DashMap<EntradaId, Row<Entrada>>,
    compras: DashMap<CompraId, Row<Compra>>,
    /// Entrada to evento foreign keys. Written once at catalog creation.
    entrada_evento: DashMap<EntradaId, EventoId>,
    /// Unique index over every live ticket code.
    codes: DashMap<TicketCode, CompraId>,
    /// Last ticket code issued anywhere in the system.
    last_code: Mutex<Option<TicketCode>>,
    evento_seq: AtomicU64,
    entrada_seq: AtomicU64,
    compra_seq: AtomicU64,
    ticket_seq: AtomicU64,
}

fn row<K: Eq + Hash, T>(map: &DashMap<K, Row<T>>, id: &K) -> Option<Row<T>> {
    map.get(id).map(|entry| Arc::clone(entry.value()))
}

fn is_live<K: Eq + Hash, T>(map: &DashMap<K, Row<T>>, id: &K, row: &Row<T>) -> bool {
    map.get(id)
        .is_some_and(|entry| Arc::ptr_eq(entry.value(), row))
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_evento_id(&self) -> EventoId {
        EventoId(self.evento_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn next_entrada_id(&self) -> EntradaId {
        EntradaId(self.entrada_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn next_compra_id(&self) -> CompraId {
        CompraId(self.compra_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn next_ticket_id(&self) -> TicketId {
        TicketId(self.ticket_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Adds a freshly created evento and its entradas.
    ///
    /// Entradas become reachable before the evento so a concurrent reader
    /// following `evento.entradas` never hits a dangling id.
    pub(crate) fn insert_evento(&self, evento: Evento, entradas: Vec<Entrada>) {
        for entrada in entradas {
            self.entrada_evento.insert(entrada.id, entrada.evento_id);
            self.entradas
                .insert(entrada.id, Arc::new(Mutex::new(entrada)));
        }
        self.eventos.insert(evento.id, Arc::new(Mutex::new(evento)));
    }

    /// Snapshot of an evento.
    pub fn evento(&self, id: EventoId) -> Option<Evento> {
        row(&self.eventos, &id).map(|row| row.lock().clone())
    }

    /// Snapshot of an entrada. Blocks while a transaction holds it.
    pub fn entrada(&self, id: EntradaId) -> Option<Entrada> {
        row(&self.entradas, &id).map(|row| row.lock().clone())
    }

    /// Snapshot of a live compra. Blocks while a transaction holds it.
    pub fn compra(&self, id: CompraId) -> Option<Compra> {
        let row = row(&self.compras, &id)?;
        let compra = row.lock();
        is_live(&self.compras, &id, &row).then(|| compra.clone())
    }

    /// Snapshots of every entrada, ordered by id.
    pub fn entradas(&self) -> Vec<Entrada> {
        let rows: Vec<Row<Entrada>> = self
            .entradas
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut entradas: Vec<Entrada> = rows.iter().map(|row| row.lock().clone()).collect();
        entradas.sort_by_key(|entrada| entrada.id);
        entradas
    }

    /// Snapshots of every evento matching `filter`.
    pub fn eventos_where(&self, filter: impl Fn(&Evento) -> bool) -> Vec<Evento> {
        let rows: Vec<Row<Evento>> = self
            .eventos
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        rows.iter()
            .map(|row| row.lock().clone())
            .filter(|evento| filter(evento))
            .collect()
    }

    /// Snapshots of every live compra matching `filter`.
    pub fn compras_where(&self, filter: impl Fn(&Compra) -> bool) -> Vec<Compra> {
        let rows: Vec<(CompraId, Row<Compra>)> = self
            .compras
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        rows.into_iter()
            .filter_map(|(id, row)| {
                let compra = row.lock();
                (is_live(&self.compras, &id, &row) && filter(&*compra)).then(|| compra.clone())
            })
            .collect()
    }

    /// Compra that owns the ticket with `code`.
    pub fn compra_for_code(&self, code: &TicketCode) -> Option<CompraId> {
        self.codes.get(code).map(|entry| *entry.value())
    }

    pub fn evento_of(&self, entrada: EntradaId) -> Option<EventoId> {
        self.entrada_evento.get(&entrada).map(|entry| *entry.value())
    }

    /// Last ticket code committed.
    pub fn last_code(&self) -> Option<TicketCode> {
        *self.last_code.lock()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            compras: BTreeMap::new(),
            eventos: BTreeMap::new(),
            entradas: BTreeMap::new(),
            sequence: None,
            inserted: Vec::new(),
            deleted: BTreeSet::new(),
            committed: false,
        }
    }
}

/// A locked row and its value at lock time.
struct Held<T> {
    guard: RowGuard<T>,
    before: T,
}

impl<T: Clone> Held<T> {
    fn new(guard: RowGuard<T>) -> Self {
        let before = (*guard).clone();
        Self { guard, before }
    }

    fn rollback(&mut self) {
        std::mem::swap(&mut *self.guard, &mut self.before);
    }
}

/// Unit of work over the store.
///
/// See the [module documentation](self) for the lock order every caller must
/// follow. Out-of-order acquisition fails with [`PurchaseError::LockOrder`]
/// before blocking on the row.
pub struct Transaction<'s> {
    store: &'s Store,
    compras: BTreeMap<CompraId, Held<Compra>>,
    eventos: BTreeMap<EventoId, Held<Evento>>,
    entradas: BTreeMap<EntradaId, Held<Entrada>>,
    sequence: Option<(MutexGuard<'s, Option<TicketCode>>, Option<TicketCode>)>,
    inserted: Vec<Compra>,
    deleted: BTreeSet<CompraId>,
    committed: bool,
}

impl<'s> Transaction<'s> {
    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Locks one compra.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::CompraNotFound`] if it does not exist or was deleted
    /// while this transaction waited for the lock, [`PurchaseError::LockOrder`]
    /// if inventory rows or a higher compra are already held.
    pub fn lock_compra(&mut self, id: CompraId) -> Result<&mut Compra, PurchaseError> {
        self.lock_compras(&[id])?;
        self.compra_mut(id).ok_or(PurchaseError::CompraNotFound(id))
    }

    /// Locks every listed compra that still exists, in ascending id order.
    ///
    /// Returns the ids actually held.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::LockOrder`] if inventory rows or a higher compra are
    /// already held. Locks taken before the error stay held until the
    /// transaction is dropped.
    pub fn lock_compras(&mut self, ids: &[CompraId]) -> Result<Vec<CompraId>, PurchaseError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            if self.compras.contains_key(&id) {
                held.push(id);
                continue;
            }
            if !(self.eventos.is_empty() && self.entradas.is_empty() && self.sequence.is_none()) {
                return Err(PurchaseError::LockOrder("compra requested after inventory rows"));
            }
            if self.compras.keys().next_back().is_some_and(|last| *last > id) {
                return Err(PurchaseError::LockOrder("compra requested after a higher id"));
            }

            let Some(row) = row(&self.store.compras, &id) else {
                continue;
            };
            let guard = row.lock_arc();
            if !is_live(&self.store.compras, &id, &row) {
                continue;
            }
            self.compras.insert(id, Held::new(guard));
            held.push(id);
        }
        Ok(held)
    }

    /// Locks the given entradas and the eventos they belong to.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::EntradaNotFound`] or [`PurchaseError::EventoNotFound`]
    /// for a dangling id, [`PurchaseError::LockOrder`] if a higher evento or
    /// entrada or the code sequence is already held. Locks taken before the
    /// error stay held until the transaction is dropped.
    pub fn lock_inventory(&mut self, entrada_ids: &[EntradaId]) -> Result<(), PurchaseError> {
        let entrada_ids: BTreeSet<EntradaId> = entrada_ids.iter().copied().collect();
        let mut evento_ids = BTreeSet::new();
        for id in &entrada_ids {
            let evento = self
                .store
                .evento_of(*id)
                .ok_or(PurchaseError::EntradaNotFound(*id))?;
            evento_ids.insert(evento);
        }

        for id in evento_ids {
            if self.eventos.contains_key(&id) {
                continue;
            }
            if !(self.entradas.is_empty() && self.sequence.is_none()) {
                return Err(PurchaseError::LockOrder("evento requested after entradas"));
            }
            if self.eventos.keys().next_back().is_some_and(|last| *last > id) {
                return Err(PurchaseError::LockOrder("evento requested after a higher id"));
            }
            let row = row(&self.store.eventos, &id).ok_or(PurchaseError::EventoNotFound(id))?;
            self.eventos.insert(id, Held::new(row.lock_arc()));
        }

        for id in entrada_ids {
            if self.entradas.contains_key(&id) {
                continue;
            }
            if self.sequence.is_some() {
                return Err(PurchaseError::LockOrder("entrada requested after the code sequence"));
            }
            if self.entradas.keys().next_back().is_some_and(|last| *last > id) {
                return Err(PurchaseError::LockOrder("entrada requested after a higher id"));
            }
            let row = row(&self.store.entradas, &id).ok_or(PurchaseError::EntradaNotFound(id))?;
            self.entradas.insert(id, Held::new(row.lock_arc()));
        }
        Ok(())
    }

    /// Locks the ticket code sequence and returns the last issued code.
    pub fn lock_sequence(&mut self) -> Option<TicketCode> {
        if self.sequence.is_none() {
            let guard = self.store.last_code.lock();
            let before = *guard;
            self.sequence = Some((guard, before));
        }
        self.sequence.as_ref().and_then(|(guard, _)| **guard)
    }

    /// Records `code` as the last issued one. Requires [`Self::lock_sequence`].
    pub fn advance_sequence(&mut self, code: TicketCode) {
        debug_assert!(self.sequence.is_some(), "sequence advanced without its lock");
        if let Some((guard, _)) = self.sequence.as_mut() {
            **guard = Some(code);
        }
    }

    pub fn compra(&self, id: CompraId) -> Option<&Compra> {
        self.compras.get(&id).map(|held| &*held.guard)
    }

    pub fn compra_mut(&mut self, id: CompraId) -> Option<&mut Compra> {
        self.compras.get_mut(&id).map(|held| &mut *held.guard)
    }

    pub fn evento(&self, id: EventoId) -> Option<&Evento> {
        self.eventos.get(&id).map(|held| &*held.guard)
    }

    pub fn evento_mut(&mut self, id: EventoId) -> Option<&mut Evento> {
        self.eventos.get_mut(&id).map(|held| &mut *held.guard)
    }

    pub fn entrada(&self, id: EntradaId) -> Option<&Entrada> {
        self.entradas.get(&id).map(|held| &*held.guard)
    }

    pub fn entrada_mut(&mut self, id: EntradaId) -> Option<&mut Entrada> {
        self.entradas.get_mut(&id).map(|held| &mut *held.guard)
    }

    /// Stages a new compra; it becomes visible on commit.
    pub fn insert_compra(&mut self, compra: Compra) {
        self.inserted.push(compra);
    }

    /// Stages deletion of a locked compra and its tickets.
    pub fn delete_compra(&mut self, id: CompraId) {
        debug_assert!(self.compras.contains_key(&id), "compra {id} deleted without its lock");
        self.deleted.insert(id);
    }

    /// Applies staged inserts and deletes, then releases every lock.
    ///
    /// # Errors
    ///
    /// [`PurchaseError::DuplicateTicketCode`] if a staged ticket code is already
    /// indexed. Nothing is applied and all rows roll back.
    pub fn commit(mut self) -> Result<(), PurchaseError> {
        for compra in &self.inserted {
            if let Some(ticket) = compra
                .tickets
                .iter()
                .find(|ticket| self.store.codes.contains_key(&ticket.codigo))
            {
                return Err(PurchaseError::DuplicateTicketCode(ticket.codigo.to_string()));
            }
        }

        for compra in std::mem::take(&mut self.inserted) {
            for ticket in &compra.tickets {
                self.store.codes.insert(ticket.codigo, compra.id);
            }
            self.store
                .compras
                .insert(compra.id, Arc::new(Mutex::new(compra)));
        }

        for id in std::mem::take(&mut self.deleted) {
            if let Some(held) = self.compras.get(&id) {
                for ticket in &held.guard.tickets {
                    self.store.codes.remove(&ticket.codigo);
                }
            }
            self.store.compras.remove(&id);
        }

        self.committed = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for held in self.compras.values_mut() {
            held.rollback();
        }
        for held in self.eventos.values_mut() {
            held.rollback();
        }
        for held in self.entradas.values_mut() {
            held.rollback();
        }
        if let Some((guard, before)) = self.sequence.as_mut() {
            **guard = *before;
        }
        if !self.compras.is_empty() || !self.entradas.is_empty() {
            tracing::debug!(
                compras = self.compras.len(),
                entradas = self.entradas.len(),
                "transaction rolled back"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ClienteId, ProductoraId};
    use crate::purchase::EstadoCompra;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::thread;

    fn seeded() -> (Store, EntradaId) {
        let store = Store::new();
        let now = Utc::now();
        let evento_id = store.next_evento_id();
        let entrada_id = store.next_entrada_id();
        store.insert_evento(
            Evento {
                id: evento_id,
                productora_id: ProductoraId(1),
                nombre: "Obra".to_string(),
                inicio_at: now,
                fin_at: now + Duration::days(1),
                capacidad: 10,
                stock_entradas: 10,
                entradas: vec![entrada_id],
            },
            vec![Entrada {
                id: entrada_id,
                evento_id,
                tipo: "Platea".to_string(),
                precio: dec!(20),
                cantidad: 10,
                stock: 10,
            }],
        );
        (store, entrada_id)
    }

    fn empty_compra(store: &Store) -> Compra {
        let now = Utc::now();
        Compra {
            id: store.next_compra_id(),
            cliente_id: ClienteId(1),
            evento_id: EventoId(1),
            estado: EstadoCompra::Iniciada,
            comprobante_transferencia: None,
            monto: dec!(0),
            created_at: now,
            updated_at: now,
            tickets: Vec::new(),
        }
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (store, entrada_id) = seeded();
        {
            let mut tx = store.begin();
            tx.lock_inventory(&[entrada_id]).unwrap();
            tx.entrada_mut(entrada_id).unwrap().reserve(4).unwrap();
            tx.evento_mut(EventoId(1)).unwrap().reserve(4).unwrap();
            tx.lock_sequence();
            tx.advance_sequence(TicketCode::FIRST);
        }
        assert_eq!(store.entrada(entrada_id).unwrap().stock, 10);
        assert_eq!(store.evento(EventoId(1)).unwrap().stock_entradas, 10);
        assert_eq!(store.last_code(), None);
    }

    #[test]
    fn commit_publishes_changes() {
        let (store, entrada_id) = seeded();
        let mut tx = store.begin();
        tx.lock_inventory(&[entrada_id]).unwrap();
        tx.entrada_mut(entrada_id).unwrap().reserve(4).unwrap();
        let compra = empty_compra(&store);
        let compra_id = compra.id;
        tx.insert_compra(compra);
        assert!(store.compras_where(|_| true).is_empty());
        tx.commit().unwrap();

        assert_eq!(store.entrada(entrada_id).unwrap().stock, 6);
        assert!(store.compra(compra_id).is_some());
    }

    #[test]
    fn delete_removes_compra_and_codes() {
        let (store, _) = seeded();
        let mut compra = empty_compra(&store);
        let compra_id = compra.id;
        compra.tickets = crate::issuer::issue_batch(
            &crate::issuer::Batch {
                compra_id,
                entrada_id: EntradaId(1),
                cliente_id: ClienteId(1),
                quantity: 2,
                issued_at: Utc::now(),
            },
            None,
            || store.next_ticket_id(),
        )
        .unwrap();
        let mut tx = store.begin();
        tx.insert_compra(compra);
        tx.commit().unwrap();
        assert_eq!(store.compra_for_code(&TicketCode::FIRST), Some(compra_id));

        let mut tx = store.begin();
        tx.lock_compra(compra_id).unwrap();
        tx.delete_compra(compra_id);
        tx.commit().unwrap();

        assert!(store.compra(compra_id).is_none());
        assert_eq!(store.compra_for_code(&TicketCode::FIRST), None);
        assert!(matches!(
            store.begin().lock_compra(compra_id),
            Err(PurchaseError::CompraNotFound(_))
        ));
    }

    #[test]
    fn duplicate_codes_abort_commit() {
        let (store, _) = seeded();
        let mut first = empty_compra(&store);
        let mut second = empty_compra(&store);
        let batch = |compra_id| crate::issuer::Batch {
            compra_id,
            entrada_id: EntradaId(1),
            cliente_id: ClienteId(1),
            quantity: 1,
            issued_at: Utc::now(),
        };
        first.tickets = crate::issuer::issue_batch(&batch(first.id), None, || TicketId(1)).unwrap();
        second.tickets =
            crate::issuer::issue_batch(&batch(second.id), None, || TicketId(2)).unwrap();
        let second_id = second.id;

        let mut tx = store.begin();
        tx.insert_compra(first);
        tx.commit().unwrap();

        let mut tx = store.begin();
        tx.insert_compra(second);
        assert_eq!(
            tx.commit(),
            Err(PurchaseError::DuplicateTicketCode("000 000".to_string()))
        );
        assert!(store.compra(second_id).is_none());
    }

    #[test]
    fn unknown_entrada_is_not_found() {
        let (store, _) = seeded();
        let mut tx = store.begin();
        assert_eq!(
            tx.lock_inventory(&[EntradaId(99)]),
            Err(PurchaseError::EntradaNotFound(EntradaId(99)))
        );
    }

    #[test]
    fn out_of_order_locks_are_refused() {
        let (store, entrada_id) = seeded();
        let compra = empty_compra(&store);
        let compra_id = compra.id;
        let mut tx = store.begin();
        tx.insert_compra(compra);
        tx.commit().unwrap();

        let mut tx = store.begin();
        tx.lock_inventory(&[entrada_id]).unwrap();
        assert!(matches!(
            tx.lock_compra(compra_id),
            Err(PurchaseError::LockOrder(_))
        ));
        drop(tx);

        let mut tx = store.begin();
        tx.lock_sequence();
        assert!(matches!(
            tx.lock_inventory(&[entrada_id]),
            Err(PurchaseError::LockOrder(_))
        ));
        drop(tx);

        // Nothing was left locked by the refused requests.
        let mut tx = store.begin();
        tx.lock_compra(compra_id).unwrap();
        tx.lock_inventory(&[entrada_id]).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn row_lock_serializes_writers() {
        let (store, entrada_id) = seeded();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let mut tx = store.begin();
                        tx.lock_inventory(&[entrada_id]).unwrap();
                        let stock = tx.entrada(entrada_id).unwrap().stock;
                        thread::yield_now();
                        if stock > 0 {
                            tx.entrada_mut(entrada_id).unwrap().reserve(1).unwrap();
                            tx.commit().unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.entrada(entrada_id).unwrap().stock, 0);
    }
}
