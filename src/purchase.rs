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

//! Purchase records and their review lifecycle.
//!
//! A compra follows a state machine; its tickets mirror each step with their
//! own estado so they can later be validated one by one:
//!
//! | Compra | Tickets | Reached by |
//! |--------|---------|------------|
//! | [`Iniciada`] | [`Reservado`] | reservation (stock already taken) |
//! | [`Pendiente`] | [`Pendiente`](EstadoTicket::Pendiente) | buyer attaches proof of payment |
//! | [`Aceptada`] | [`PendienteValidacion`] | productora accepts |
//! | [`Rechazada`] | [`Rechazado`] | productora rejects (stock restored) |
//! | [`Cancelada`] | [`Cancelado`] | productora or system cancels (stock restored) |
//!
//! An [`Iniciada`] compra that never receives a proof is deleted by the reaper
//! instead of reaching a terminal estado.
//!
//! [`Iniciada`]: EstadoCompra::Iniciada
//! [`Pendiente`]: EstadoCompra::Pendiente
//! [`Aceptada`]: EstadoCompra::Aceptada
//! [`Rechazada`]: EstadoCompra::Rechazada
//! [`Cancelada`]: EstadoCompra::Cancelada
//! [`Reservado`]: EstadoTicket::Reservado
//! [`PendienteValidacion`]: EstadoTicket::PendienteValidacion
//! [`Rechazado`]: EstadoTicket::Rechazado
//! [`Cancelado`]: EstadoTicket::Cancelado

use crate::base::{ClienteId, CompraId, EntradaId, EventoId, TicketId};
use crate::code::TicketCode;
use crate::error::PurchaseError;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstadoCompra {
    Iniciada,
    Pendiente,
    Aceptada,
    Rechazada,
    Cancelada,
}

impl fmt::Display for EstadoCompra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Iniciada => "INICIADA",
            Self::Pendiente => "PENDIENTE",
            Self::Aceptada => "ACEPTADA",
            Self::Rechazada => "RECHAZADA",
            Self::Cancelada => "CANCELADA",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstadoTicket {
    Reservado,
    Pendiente,
    PendienteValidacion,
    Validado,
    Rechazado,
    Cancelado,
}

impl fmt::Display for EstadoTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reservado => "RESERVADO",
            Self::Pendiente => "PENDIENTE",
            Self::PendienteValidacion => "PENDIENTE_VALIDACION",
            Self::Validado => "VALIDADO",
            Self::Rechazado => "RECHAZADO",
            Self::Cancelado => "CANCELADO",
        })
    }
}

/// One purchased unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub codigo: TicketCode,
    pub estado: EstadoTicket,
    pub cliente_id: ClienteId,
    pub entrada_id: EntradaId,
    pub compra_id: CompraId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Door check: only accepted tickets can be scanned, and only once.
    pub fn validate(&mut self, now: DateTime<Utc>) -> Result<(), PurchaseError> {
        if self.estado != EstadoTicket::PendienteValidacion {
            return Err(PurchaseError::TicketNotValidatable {
                codigo: self.codigo.to_string(),
                estado: self.estado,
            });
        }
        self.estado = EstadoTicket::Validado;
        self.updated_at = now;
        Ok(())
    }
}

/// Purchase row. Owns its tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compra {
    pub id: CompraId,
    pub cliente_id: ClienteId,
    pub evento_id: EventoId,
    pub estado: EstadoCompra,
    pub comprobante_transferencia: Option<String>,
    pub monto: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tickets: Vec<Ticket>,
}

impl Compra {
    fn require(&self, allowed: &[EstadoCompra]) -> Result<(), PurchaseError> {
        if allowed.contains(&self.estado) {
            Ok(())
        } else {
            Err(PurchaseError::InvalidStateTransition {
                compra: self.id,
                estado: self.estado,
            })
        }
    }

    fn transition(&mut self, estado: EstadoCompra, tickets: EstadoTicket, now: DateTime<Utc>) {
        self.estado = estado;
        self.updated_at = now;
        for ticket in &mut self.tickets {
            ticket.estado = tickets;
            ticket.updated_at = now;
        }
    }

    /// `Iniciada` → `Pendiente`. One proof per compra.
    pub fn attach_proof(
        &mut self,
        comprobante: String,
        now: DateTime<Utc>,
    ) -> Result<(), PurchaseError> {
        self.require(&[EstadoCompra::Iniciada])?;
        if comprobante.trim().is_empty() {
            return Err(PurchaseError::InvalidProof);
        }
        self.comprobante_transferencia = Some(comprobante);
        self.transition(EstadoCompra::Pendiente, EstadoTicket::Pendiente, now);
        Ok(())
    }

    /// `Pendiente` → `Aceptada`.
    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<(), PurchaseError> {
        self.require(&[EstadoCompra::Pendiente])?;
        self.transition(
            EstadoCompra::Aceptada,
            EstadoTicket::PendienteValidacion,
            now,
        );
        Ok(())
    }

    /// `Pendiente` → `Rechazada`. The caller restores stock.
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), PurchaseError> {
        self.require(&[EstadoCompra::Pendiente])?;
        self.transition(EstadoCompra::Rechazada, EstadoTicket::Rechazado, now);
        Ok(())
    }

    /// Any estado that still holds stock → `Cancelada`. The caller restores stock.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), PurchaseError> {
        self.require(&[
            EstadoCompra::Iniciada,
            EstadoCompra::Pendiente,
            EstadoCompra::Aceptada,
        ])?;
        if let Some(used) = self
            .tickets
            .iter()
            .find(|ticket| ticket.estado == EstadoTicket::Validado)
        {
            return Err(PurchaseError::TicketAlreadyUsed(used.codigo.to_string()));
        }
        self.transition(EstadoCompra::Cancelada, EstadoTicket::Cancelado, now);
        Ok(())
    }

    /// A reservation that never got a proof and has outlived `timeout`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.estado == EstadoCompra::Iniciada && now.signed_duration_since(self.created_at) > timeout
    }

    /// Ticket count per entrada, in ascending entrada order.
    pub fn tickets_by_entrada(&self) -> BTreeMap<EntradaId, u32> {
        let mut groups = BTreeMap::new();
        for ticket in &self.tickets {
            *groups.entry(ticket.entrada_id).or_insert(0) += 1;
        }
        groups
    }

    pub fn cantidad(&self) -> u32 {
        self.tickets.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn compra(entradas: &[u64]) -> Compra {
        let now = Utc::now();
        let mut code = TicketCode::FIRST;
        let tickets = entradas
            .iter()
            .enumerate()
            .map(|(i, entrada)| {
                let ticket = Ticket {
                    id: TicketId(i as u64 + 1),
                    codigo: code,
                    estado: EstadoTicket::Reservado,
                    cliente_id: ClienteId(7),
                    entrada_id: EntradaId(*entrada),
                    compra_id: CompraId(1),
                    created_at: now,
                    updated_at: now,
                };
                code = code.next().unwrap();
                ticket
            })
            .collect();
        Compra {
            id: CompraId(1),
            cliente_id: ClienteId(7),
            evento_id: EventoId(1),
            estado: EstadoCompra::Iniciada,
            comprobante_transferencia: None,
            monto: dec!(300),
            created_at: now,
            updated_at: now,
            tickets,
        }
    }

    #[test]
    fn full_review_lifecycle() {
        let mut compra = compra(&[1, 1]);
        let now = Utc::now();

        compra.attach_proof("s3://comprobantes/1.png".into(), now).unwrap();
        assert_eq!(compra.estado, EstadoCompra::Pendiente);
        assert!(compra.tickets.iter().all(|t| t.estado == EstadoTicket::Pendiente));

        compra.accept(now).unwrap();
        assert_eq!(compra.estado, EstadoCompra::Aceptada);
        assert!(
            compra
                .tickets
                .iter()
                .all(|t| t.estado == EstadoTicket::PendienteValidacion)
        );
    }

    #[test]
    fn attach_proof_only_once() {
        let mut compra = compra(&[1]);
        let now = Utc::now();
        compra.attach_proof("proof".into(), now).unwrap();

        let result = compra.attach_proof("again".into(), now);
        assert_eq!(
            result,
            Err(PurchaseError::InvalidStateTransition {
                compra: CompraId(1),
                estado: EstadoCompra::Pendiente,
            })
        );
        assert_eq!(compra.comprobante_transferencia.as_deref(), Some("proof"));
    }

    #[test]
    fn blank_proof_is_rejected() {
        let mut compra = compra(&[1]);
        assert_eq!(
            compra.attach_proof("  ".into(), Utc::now()),
            Err(PurchaseError::InvalidProof)
        );
        assert_eq!(compra.estado, EstadoCompra::Iniciada);
    }

    #[test]
    fn review_requires_pending_proof() {
        let mut compra = compra(&[1]);
        let now = Utc::now();
        assert!(matches!(
            compra.accept(now),
            Err(PurchaseError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            compra.reject(now),
            Err(PurchaseError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn reject_marks_tickets() {
        let mut compra = compra(&[1, 2]);
        let now = Utc::now();
        compra.attach_proof("proof".into(), now).unwrap();
        compra.reject(now).unwrap();
        assert_eq!(compra.estado, EstadoCompra::Rechazada);
        assert!(compra.tickets.iter().all(|t| t.estado == EstadoTicket::Rechazado));
        assert!(compra.cancel(now).is_err());
    }

    #[test]
    fn cancel_refuses_used_tickets() {
        let mut compra = compra(&[1, 1]);
        let now = Utc::now();
        compra.attach_proof("proof".into(), now).unwrap();
        compra.accept(now).unwrap();
        compra.tickets[1].validate(now).unwrap();

        assert_eq!(
            compra.cancel(now),
            Err(PurchaseError::TicketAlreadyUsed("000 001".to_string()))
        );
        assert_eq!(compra.estado, EstadoCompra::Aceptada);
    }

    #[test]
    fn ticket_validates_once() {
        let mut compra = compra(&[1]);
        let now = Utc::now();
        assert!(compra.tickets[0].validate(now).is_err());

        compra.attach_proof("proof".into(), now).unwrap();
        compra.accept(now).unwrap();
        compra.tickets[0].validate(now).unwrap();
        assert_eq!(
            compra.tickets[0].validate(now),
            Err(PurchaseError::TicketNotValidatable {
                codigo: "000 000".to_string(),
                estado: EstadoTicket::Validado,
            })
        );
    }

    #[test]
    fn abandoned_after_timeout() {
        let compra = compra(&[1]);
        let timeout = Duration::hours(1);
        assert!(!compra.is_abandoned(compra.created_at + Duration::minutes(60), timeout));
        assert!(compra.is_abandoned(compra.created_at + Duration::minutes(61), timeout));
    }

    #[test]
    fn groups_tickets_by_entrada() {
        let compra = compra(&[2, 1, 2, 2]);
        let groups: Vec<_> = compra.tickets_by_entrada().into_iter().collect();
        assert_eq!(groups, vec![(EntradaId(1), 1), (EntradaId(2), 3)]);
        assert_eq!(compra.cantidad(), 4);
    }

    #[test]
    fn estado_display_and_serde_agree() {
        assert_eq!(EstadoCompra::Iniciada.to_string(), "INICIADA");
        assert_eq!(
            serde_json::to_string(&EstadoTicket::PendienteValidacion).unwrap(),
            "\"PENDIENTE_VALIDACION\""
        );
    }
}
