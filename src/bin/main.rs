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

use boleteria_rs::{
    Actor, ClienteId, CompraId, Engine, EngineConfig, EntradaId, ManualClock, NuevaEntrada,
    NuevoEvento, Outbox, ProductoraId, PurchaseError,
};
use chrono::{DateTime, Duration as Span, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Ticket sales replay - Process catalog and operation CSV files
///
/// Creates the eventos listed in the catalog, replays buyer and organizer
/// operations against them on a simulated clock, and writes the remaining
/// stock of every entrada to stdout.
#[derive(Parser, Debug)]
#[command(name = "boleteria-rs")]
#[command(about = "Replays ticket sales and prints remaining stock", long_about = None)]
struct Args {
    /// Path to the catalog CSV
    ///
    /// Expected format: evento,productora,nombre,tipo,precio,cantidad,dias
    #[arg(value_name = "CATALOG")]
    catalog: PathBuf,

    /// Path to the operations CSV
    ///
    /// Expected format: minuto,op,actor,target,cantidad,comprobante
    #[arg(value_name = "OPERATIONS")]
    operations: PathBuf,

    /// Minutes an unpaid reservation holds its stock
    #[arg(long, env = "BOLETERIA_RESERVATION_TIMEOUT_MINS", default_value_t = 60)]
    reservation_timeout_mins: u64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "BOLETERIA_LOG", default_value = "info")]
    log: String,
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log);

    let config = EngineConfig {
        reservation_timeout: Duration::from_secs(args.reservation_timeout_mins.saturating_mul(60)),
        ..EngineConfig::default()
    };
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));
    let engine = Engine::with_parts(config, clock.clone(), Arc::new(Outbox::new()));

    let catalog = open(&args.catalog);
    if let Err(e) = load_catalog(&engine, BufReader::new(catalog), start) {
        error!(error = %e, "error loading catalog");
        process::exit(1);
    }

    let operations = open(&args.operations);
    if let Err(e) = replay(&engine, &clock, BufReader::new(operations), start) {
        error!(error = %e, "error replaying operations");
        process::exit(1);
    }

    if let Err(e) = write_inventory(&engine, std::io::stdout()) {
        error!(error = %e, "error writing output");
        process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(path: &Path) -> File {
    match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %path.display(), error = %e, "error opening file");
            process::exit(1);
        }
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Raw catalog row. Rows sharing an `evento` label form one evento.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    evento: String,
    productora: u64,
    nombre: String,
    tipo: String,
    precio: Decimal,
    cantidad: u32,
    /// Days from the start of the replay until the evento ends.
    dias: i64,
}

/// Creates the catalog's eventos in order of first appearance.
///
/// Entrada ids are assigned in file order starting at 1. Malformed rows and
/// invalid eventos are logged and skipped. Returns the number of eventos created.
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn load_catalog<R: Read>(
    engine: &Engine,
    reader: R,
    start: DateTime<Utc>,
) -> Result<usize, csv::Error> {
    let mut eventos: Vec<(String, NuevoEvento)> = Vec::new();

    for result in csv_reader(reader).deserialize::<CatalogRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed catalog row");
                continue;
            }
        };

        let Some(fin_at) =
            Span::try_days(record.dias).and_then(|dias| start.checked_add_signed(dias))
        else {
            warn!(evento = %record.evento, dias = record.dias, "skipping catalog row out of range");
            continue;
        };

        let entrada = NuevaEntrada {
            tipo: record.tipo,
            precio: record.precio,
            cantidad: record.cantidad,
        };
        match eventos.iter_mut().find(|(label, _)| *label == record.evento) {
            Some((_, evento)) => evento.entradas.push(entrada),
            None => eventos.push((
                record.evento,
                NuevoEvento {
                    productora_id: ProductoraId(record.productora),
                    nombre: record.nombre,
                    inicio_at: start,
                    fin_at,
                    entradas: vec![entrada],
                },
            )),
        }
    }

    let mut created = 0;
    for (label, evento) in eventos {
        match engine.create_evento(evento) {
            Ok(_) => created += 1,
            Err(e) => warn!(evento = %label, error = %e, "skipping invalid evento"),
        }
    }
    Ok(created)
}

/// Raw operation row.
///
/// Fields: `minuto, op, actor, target, cantidad, comprobante`
#[derive(Debug, Deserialize)]
struct OperationRecord {
    minuto: i64,
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    actor: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    target: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    cantidad: Option<u32>,
    comprobante: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Reservar {
        cliente: ClienteId,
        entrada: EntradaId,
        cantidad: u32,
    },
    Comprobante {
        cliente: ClienteId,
        compra: CompraId,
        comprobante: String,
    },
    Aceptar {
        productora: ProductoraId,
        compra: CompraId,
    },
    Rechazar {
        productora: ProductoraId,
        compra: CompraId,
    },
    Cancelar {
        productora: ProductoraId,
        compra: CompraId,
    },
    Barrer,
}

impl OperationRecord {
    /// Returns `None` for unknown ops or missing required fields.
    fn into_operation(self) -> Option<Operation> {
        match self.op.to_lowercase().as_str() {
            "reservar" => Some(Operation::Reservar {
                cliente: ClienteId(self.actor?),
                entrada: EntradaId(self.target?),
                cantidad: self.cantidad?,
            }),
            "comprobante" => Some(Operation::Comprobante {
                cliente: ClienteId(self.actor?),
                compra: CompraId(self.target?),
                comprobante: self.comprobante.filter(|c| !c.is_empty())?,
            }),
            "aceptar" => Some(Operation::Aceptar {
                productora: ProductoraId(self.actor?),
                compra: CompraId(self.target?),
            }),
            "rechazar" => Some(Operation::Rechazar {
                productora: ProductoraId(self.actor?),
                compra: CompraId(self.target?),
            }),
            "cancelar" => Some(Operation::Cancelar {
                productora: ProductoraId(self.actor?),
                compra: CompraId(self.target?),
            }),
            "barrer" => Some(Operation::Barrer),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, operation: Operation) -> Result<(), PurchaseError> {
    match operation {
        Operation::Reservar {
            cliente,
            entrada,
            cantidad,
        } => engine
            .initiate_reservation(cliente, entrada, cantidad)
            .map(drop),
        Operation::Comprobante {
            cliente,
            compra,
            comprobante,
        } => engine.attach_proof(cliente, compra, comprobante).map(drop),
        Operation::Aceptar { productora, compra } => {
            engine.accept_purchase(productora, compra).map(drop)
        }
        Operation::Rechazar { productora, compra } => {
            engine.reject_purchase(productora, compra).map(drop)
        }
        Operation::Cancelar { productora, compra } => engine
            .cancel_purchase(Actor::Productora(productora), compra)
            .map(drop),
        Operation::Barrer => engine.reap_abandoned().map(|report| {
            info!(compras = report.compras, restored = report.restored, "sweep finished");
        }),
    }
}

/// Replays operations in file order, moving the clock to `start + minuto`
/// before each one.
///
/// Malformed rows and failed operations are logged and skipped.
/// Returns the number of operations that succeeded.
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn replay<R: Read>(
    engine: &Engine,
    clock: &ManualClock,
    reader: R,
    start: DateTime<Utc>,
) -> Result<usize, csv::Error> {
    let mut applied = 0;

    for (line, result) in csv_reader(reader).deserialize::<OperationRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed operation row");
                continue;
            }
        };
        let Some(at) =
            Span::try_minutes(record.minuto).and_then(|minuto| start.checked_add_signed(minuto))
        else {
            warn!(line = line + 1, minuto = record.minuto, "skipping operation out of range");
            continue;
        };
        clock.set(at);

        let Some(operation) = record.into_operation() else {
            warn!(line = line + 1, "skipping invalid operation");
            continue;
        };
        match apply(engine, operation) {
            Ok(()) => applied += 1,
            Err(e) => warn!(line = line + 1, error = %e, "operation failed"),
        }
    }

    Ok(applied)
}

/// Output row per entrada.
#[derive(Debug, Serialize)]
struct InventoryRecord {
    entrada: u64,
    evento: u64,
    tipo: String,
    cantidad: u32,
    stock: u32,
}

/// Writes the stock of every entrada as CSV, ordered by entrada id.
///
/// # CSV Format
///
/// Columns: `entrada, evento, tipo, cantidad, stock`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_inventory<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for entrada in engine.store().entradas() {
        wtr.serialize(InventoryRecord {
            entrada: entrada.id.0,
            evento: entrada.evento_id.0,
            tipo: entrada.tipo,
            cantidad: entrada.cantidad,
            stock: entrada.stock,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boleteria_rs::EstadoCompra;
    use std::io::Cursor;

    const CATALOG: &str = "evento,productora,nombre,tipo,precio,cantidad,dias\n\
                           rock,1,Rock Fest,General,100.00,10,3\n\
                           rock,1,Rock Fest,VIP,250.00,2,3\n\
                           teatro,2,Hamlet,Platea,80.00,5,1\n";

    fn setup() -> (Engine, Arc<ManualClock>, DateTime<Utc>) {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Engine::with_parts(
            EngineConfig::default(),
            clock.clone(),
            Arc::new(Outbox::new()),
        );
        let created = load_catalog(&engine, Cursor::new(CATALOG), start).unwrap();
        assert_eq!(created, 2);
        (engine, clock, start)
    }

    fn stock(engine: &Engine, entrada: u64) -> u32 {
        engine.entrada(EntradaId(entrada)).unwrap().stock
    }

    #[test]
    fn catalog_groups_rows_by_evento() {
        let (engine, _, _) = setup();
        let entradas = engine.store().entradas();
        assert_eq!(entradas.len(), 3);
        assert_eq!(entradas[0].evento_id, entradas[1].evento_id);
        assert_ne!(entradas[1].evento_id, entradas[2].evento_id);
        assert_eq!(entradas[1].tipo, "VIP");
    }

    #[test]
    fn replay_reservation_and_review() {
        let (engine, clock, start) = setup();
        let ops = "minuto,op,actor,target,cantidad,comprobante\n\
                   0,reservar,7,1,7,\n\
                   1,reservar,8,1,5,\n\
                   2,reservar,8,1,3,\n\
                   3,comprobante,7,1,,proof-7.png\n\
                   4,rechazar,1,1,,\n";

        let applied = replay(&engine, &clock, Cursor::new(ops), start).unwrap();

        // The second reservation fails for lack of stock.
        assert_eq!(applied, 4);
        assert_eq!(stock(&engine, 1), 7);
        let rejected = engine.get_compra(Actor::System, CompraId(1)).unwrap();
        assert_eq!(rejected.estado, EstadoCompra::Rechazada);
    }

    #[test]
    fn replay_sweep_uses_simulated_minutes() {
        let (engine, clock, start) = setup();
        let ops = "minuto,op,actor,target,cantidad,comprobante\n\
                   0,reservar,7,3,2,\n\
                   30,barrer,,,,\n\
                   61,barrer,,,,\n";

        replay(&engine, &clock, Cursor::new(ops), start).unwrap();

        assert_eq!(stock(&engine, 3), 5);
        assert!(engine.store().compra(CompraId(1)).is_none());
    }

    #[test]
    fn skip_invalid_operations() {
        let (engine, clock, start) = setup();
        let ops = "minuto,op,actor,target,cantidad,comprobante\n\
                   0,reservar,7,1,,\n\
                   0,unknown,1,1,1,\n\
                   x,reservar,7,1,1,\n\
                   0,reservar,7,1,1,\n";

        let applied = replay(&engine, &clock, Cursor::new(ops), start).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(stock(&engine, 1), 9);
    }

    #[test]
    fn skip_rows_out_of_time_range() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Engine::with_parts(
            EngineConfig::default(),
            clock.clone(),
            Arc::new(Outbox::new()),
        );
        let catalog = "evento,productora,nombre,tipo,precio,cantidad,dias\n\
                       eterno,1,Eterno,General,10.00,4,9999999999999\n\
                       rock,1,Rock Fest,General,100.00,10,3\n";

        let created = load_catalog(&engine, Cursor::new(catalog), start).unwrap();
        assert_eq!(created, 1);
        assert_eq!(engine.store().entradas().len(), 1);

        let ops = "minuto,op,actor,target,cantidad,comprobante\n\
                   9223372036854775807,reservar,7,1,1,\n\
                   0,reservar,7,1,2,\n";
        let applied = replay(&engine, &clock, Cursor::new(ops), start).unwrap();

        assert_eq!(applied, 1);
        assert_eq!(stock(&engine, 1), 8);
        assert_eq!(engine.now(), start);
    }

    #[test]
    fn write_inventory_to_csv() {
        let (engine, clock, start) = setup();
        let ops = "minuto,op,actor,target,cantidad,comprobante\n0,reservar,7,2,2,\n";
        replay(&engine, &clock, Cursor::new(ops), start).unwrap();

        let mut output = Vec::new();
        write_inventory(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(lines[0], "entrada,evento,tipo,cantidad,stock");
        assert_eq!(lines[1], "1,1,General,10,10");
        assert_eq!(lines[2], "2,1,VIP,2,0");
        assert_eq!(lines[3], "3,2,Platea,5,5");
    }
}
