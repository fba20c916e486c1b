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

//! Abandoned-reservation reaper.
//!
//! A reservation that never receives a proof of payment holds stock for
//! nobody. Once an `INICIADA` compra outlives the reservation timeout the
//! reaper deletes it together with its tickets and gives the units back.
//!
//! [`Engine::reap_abandoned`] is one sweep and can be driven by any scheduler.
//! [`Reaper::spawn`] runs it on a ticker in a background thread; failures are
//! logged and retried on the next tick.

use crate::base::CompraId;
use crate::engine::{Engine, restore_stock};
use crate::error::PurchaseError;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use crossbeam::channel::{self, Sender};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Compras deleted.
    pub compras: usize,
    /// Tickets deleted with them.
    pub tickets: usize,
    /// Entrada units put back into stock.
    pub restored: u32,
}

impl Engine {
    /// Deletes every `INICIADA` compra older than the reservation timeout and
    /// restores its stock, all in one transaction.
    ///
    /// Running it twice in a row restores nothing the second time.
    ///
    /// # Errors
    ///
    /// Any store error aborts the whole sweep; nothing is deleted or restored.
    pub fn reap_abandoned(&self) -> Result<ReapReport, PurchaseError> {
        sweep(self.store(), self.now(), self.config().reservation_window())
    }
}

fn sweep(store: &Store, now: DateTime<Utc>, timeout: Duration) -> Result<ReapReport, PurchaseError> {
    let candidates: Vec<CompraId> = store
        .compras_where(|compra| compra.is_abandoned(now, timeout))
        .iter()
        .map(|compra| compra.id)
        .collect();
    if candidates.is_empty() {
        return Ok(ReapReport::default());
    }

    let mut tx = store.begin();
    let mut report = ReapReport::default();
    let mut groups: BTreeMap<_, u32> = BTreeMap::new();

    for id in tx.lock_compras(&candidates)? {
        let Some(compra) = tx.compra(id) else {
            continue;
        };
        // A proof may have been attached since the scan.
        if !compra.is_abandoned(now, timeout) {
            continue;
        }
        for (entrada_id, count) in compra.tickets_by_entrada() {
            *groups.entry(entrada_id).or_insert(0) += count;
        }
        report.compras += 1;
        report.tickets += compra.tickets.len();
        tx.delete_compra(id);
    }

    report.restored = restore_stock(&mut tx, &groups)?;
    tx.commit()?;
    Ok(report)
}

/// Background sweeper.
pub struct Reaper;

impl Reaper {
    /// Starts sweeping every `engine.config().sweep_interval`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(engine: Arc<Engine>) -> io::Result<ReaperHandle> {
        let interval = engine.config().sweep_interval;
        let (stop, stopped) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("reaper".to_string())
            .spawn(move || {
                info!(?interval, "reaper started");
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => run_once(&engine),
                        recv(stopped) -> _ => break,
                    }
                }
                info!("reaper stopped");
            })?;

        Ok(ReaperHandle {
            stop,
            handle: Some(handle),
        })
    }
}

fn run_once(engine: &Engine) {
    match engine.reap_abandoned() {
        Ok(report) if report.compras > 0 => info!(
            compras = report.compras,
            tickets = report.tickets,
            restored = report.restored,
            "abandoned reservations reclaimed"
        ),
        Ok(_) => debug!("no abandoned reservations"),
        Err(error) => error!(%error, "reaper sweep failed, retrying next tick"),
    }
}

/// Stops the reaper when shut down or dropped.
pub struct ReaperHandle {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stops the thread and waits for an in-flight sweep to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("reaper thread panicked");
            }
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{ClienteId, ProductoraId};
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::inventory::{NuevaEntrada, NuevoEvento};
    use crate::notify::Outbox;
    use crate::purchase::EstadoCompra;
    use rust_decimal_macros::dec;

    fn engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Engine::with_parts(
            EngineConfig::default(),
            clock.clone(),
            Arc::new(Outbox::new()),
        );
        (engine, clock)
    }

    fn seed(engine: &Engine, cantidad: u32) -> crate::base::EntradaId {
        let now = engine.now();
        let evento = engine
            .create_evento(NuevoEvento {
                productora_id: ProductoraId(1),
                nombre: "Festival".to_string(),
                inicio_at: now + Duration::days(1),
                fin_at: now + Duration::days(2),
                entradas: vec![NuevaEntrada {
                    tipo: "Campo".to_string(),
                    precio: dec!(50),
                    cantidad,
                }],
            })
            .unwrap();
        evento.entradas[0]
    }

    #[test]
    fn sweep_ignores_fresh_reservations() {
        let (engine, clock) = engine();
        let entrada = seed(&engine, 10);
        engine.initiate_reservation(ClienteId(1), entrada, 4).unwrap();

        clock.advance(Duration::minutes(60));
        assert_eq!(engine.reap_abandoned().unwrap(), ReapReport::default());
        assert_eq!(engine.entrada(entrada).unwrap().stock, 6);
    }

    #[test]
    fn sweep_reclaims_expired_reservations() {
        let (engine, clock) = engine();
        let entrada = seed(&engine, 10);
        let compra = engine.initiate_reservation(ClienteId(1), entrada, 4).unwrap();

        clock.advance(Duration::minutes(61));
        let report = engine.reap_abandoned().unwrap();
        assert_eq!(
            report,
            ReapReport {
                compras: 1,
                tickets: 4,
                restored: 4,
            }
        );
        assert!(engine.store().compra(compra.id).is_none());
        assert_eq!(engine.entrada(entrada).unwrap().stock, 10);
        assert_eq!(engine.evento(compra.evento_id).unwrap().stock_entradas, 10);
    }

    #[test]
    fn sweep_spares_compras_with_proof() {
        let (engine, clock) = engine();
        let entrada = seed(&engine, 10);
        let compra = engine.initiate_reservation(ClienteId(1), entrada, 2).unwrap();
        engine.attach_proof(ClienteId(1), compra.id, "proof.png").unwrap();

        clock.advance(Duration::hours(5));
        assert_eq!(engine.reap_abandoned().unwrap().compras, 0);
        let kept = engine.store().compra(compra.id).unwrap();
        assert_eq!(kept.estado, EstadoCompra::Pendiente);
        assert_eq!(engine.entrada(entrada).unwrap().stock, 8);
    }
}
