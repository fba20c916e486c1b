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

//! # Boleteria
//!
//! This library manages ticket inventory for an event sales platform: buyers
//! reserve units of a ticket tier, attach a proof of payment, and the
//! organizer accepts or rejects the purchase. Stock stays consistent while
//! many buyers compete for the same tier.
//!
//! ## Core Components
//!
//! - [`Engine`]: Purchase lifecycle manager (reserve, attach proof, accept, reject, cancel)
//! - [`Store`]: Row store with lock-for-update transactions and rollback
//! - [`TicketCode`]: Sequential base-36 ticket codes (`"000 000"` .. `"ZZZ ZZZ"`)
//! - [`Reaper`]: Background reclaim of reservations that never got a proof
//! - [`PurchaseError`]: Error kinds reported to callers
//!
//! ## Example
//!
//! ```
//! use boleteria_rs::{ClienteId, Engine, EstadoCompra, NuevaEntrada, NuevoEvento, ProductoraId};
//! use chrono::{Duration, Utc};
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//! let now = Utc::now();
//! let evento = engine
//!     .create_evento(NuevoEvento {
//!         productora_id: ProductoraId(1),
//!         nombre: "Recital".to_string(),
//!         inicio_at: now + Duration::days(7),
//!         fin_at: now + Duration::days(7) + Duration::hours(3),
//!         entradas: vec![NuevaEntrada {
//!             tipo: "General".to_string(),
//!             precio: dec!(1500.00),
//!             cantidad: 10,
//!         }],
//!     })
//!     .unwrap();
//! let entrada = evento.entradas[0];
//!
//! // Reserve three units, then pay for them
//! let compra = engine.initiate_reservation(ClienteId(7), entrada, 3).unwrap();
//! assert_eq!(compra.monto, dec!(4500.00));
//! assert_eq!(engine.entrada(entrada).unwrap().stock, 7);
//!
//! engine.attach_proof(ClienteId(7), compra.id, "comprobantes/7.png").unwrap();
//! let compra = engine.accept_purchase(ProductoraId(1), compra.id).unwrap();
//! assert_eq!(compra.estado, EstadoCompra::Aceptada);
//! ```
//!
//! ## Thread Safety
//!
//! Every operation that touches stock holds the entrada's row lock from
//! validation to mutation, so concurrent reservations never oversell.

mod base;
mod clock;
pub mod code;
mod config;
mod engine;
pub mod error;
mod inventory;
mod issuer;
pub mod notify;
mod purchase;
mod query;
mod reaper;
pub mod store;

pub use base::{Actor, ClienteId, CompraId, EntradaId, EventoId, ProductoraId, TicketId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use code::{TicketCode, generate_next};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{CodeError, PurchaseError};
pub use inventory::{Entrada, Evento, NuevaEntrada, NuevoEvento};
pub use issuer::{Batch, issue_batch};
pub use notify::{Notification, Notifier, NotifyError, Outbox};
pub use purchase::{Compra, EstadoCompra, EstadoTicket, Ticket};
pub use query::{CompraFilter, Page};
pub use reaper::{ReapReport, Reaper, ReaperHandle};
pub use store::{Store, Transaction};
