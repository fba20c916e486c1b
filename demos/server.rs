//! Simple REST API server example for the ticketing engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /eventos` - Create an evento with its entradas
//! - `GET /eventos/:id` - Get an evento
//! - `GET /entradas/:id` - Get an entrada and its remaining stock
//! - `POST /reservas` - Reserve units of an entrada
//! - `GET /compras/:id` - Get a compra (as buyer, productora or system)
//! - `POST /compras/:id/comprobante` - Attach a proof of payment
//! - `POST /compras/:id/aceptar` - Accept a compra under review
//! - `POST /compras/:id/rechazar` - Reject a compra under review
//! - `POST /compras/:id/cancelar` - Cancel a compra
//! - `POST /tickets/validar` - Scan a ticket at the door
//! - `GET /clientes/:id/compras` - A buyer's compras
//! - `GET /productoras/:id/compras` - Compras across a productora's eventos
//!
//! ## Example Usage
//!
//! ```bash
//! # Create an evento
//! curl -X POST http://localhost:3000/eventos \
//!   -H "Content-Type: application/json" \
//!   -d '{"productora_id": 1, "nombre": "Rock Fest",
//!        "inicio_at": "2030-01-10T20:00:00Z", "fin_at": "2030-01-11T02:00:00Z",
//!        "entradas": [{"tipo": "General", "precio": "1500.00", "cantidad": 10}]}'
//!
//! # Reserve three tickets
//! curl -X POST http://localhost:3000/reservas \
//!   -H "Content-Type: application/json" \
//!   -d '{"cliente_id": 7, "entrada_id": 1, "cantidad": 3}'
//!
//! # Attach the proof of payment
//! curl -X POST http://localhost:3000/compras/1/comprobante \
//!   -H "Content-Type: application/json" \
//!   -d '{"cliente_id": 7, "comprobante": "proofs/7/transfer.png"}'
//!
//! # Accept it
//! curl -X POST http://localhost:3000/compras/1/aceptar \
//!   -H "Content-Type: application/json" -d '{"productora_id": 1}'
//!
//! # List the productora's pending compras
//! curl "http://localhost:3000/productoras/1/compras?estado=PENDIENTE&page=1&limit=20"
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use boleteria_rs::{
    Actor, ClienteId, Compra, CompraFilter, CompraId, Engine, EntradaId, EstadoCompra, Evento,
    EventoId, NuevoEvento, Page, ProductoraId, PurchaseError, Reaper, Ticket,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

/// Request body for reservations.
///
/// ```json
/// {"cliente_id": 7, "entrada_id": 1, "cantidad": 3}
/// ```
#[derive(Debug, Deserialize)]
pub struct ReservaRequest {
    pub cliente_id: u64,
    pub entrada_id: u64,
    pub cantidad: u32,
}

#[derive(Debug, Deserialize)]
pub struct ComprobanteRequest {
    pub cliente_id: u64,
    /// Reference returned by the asset store after the upload.
    pub comprobante: String,
}

/// Request body for review and cancellation.
#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub productora_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ValidarRequest {
    pub productora_id: u64,
    pub codigo: String,
}

/// Query string for listings: `?estado=PENDIENTE&page=1&limit=20`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub estado: Option<EstadoCompra>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl From<ListQuery> for CompraFilter {
    fn from(query: ListQuery) -> Self {
        CompraFilter {
            estado: query.estado,
            page: query.page.unwrap_or(1),
            limit: query.limit,
        }
    }
}

/// Query string naming who is asking: `?cliente=7` or `?productora=1`.
#[derive(Debug, Deserialize)]
pub struct ViewerQuery {
    pub cliente: Option<u64>,
    pub productora: Option<u64>,
}

impl From<ViewerQuery> for Actor {
    fn from(query: ViewerQuery) -> Self {
        match (query.cliente, query.productora) {
            (Some(id), _) => Actor::Cliente(ClienteId(id)),
            (None, Some(id)) => Actor::Productora(ProductoraId(id)),
            (None, None) => Actor::System,
        }
    }
}

/// Response body for entradas.
#[derive(Debug, Serialize)]
pub struct EntradaResponse {
    pub id: u64,
    pub evento_id: u64,
    pub tipo: String,
    pub precio: rust_decimal::Decimal,
    pub cantidad: u32,
    pub stock: u32,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the ticketing engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `PurchaseError` into HTTP responses.
pub struct AppError(PurchaseError);

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PurchaseError::CompraNotFound(_) => (StatusCode::NOT_FOUND, "COMPRA_NOT_FOUND"),
            PurchaseError::EntradaNotFound(_) => (StatusCode::NOT_FOUND, "ENTRADA_NOT_FOUND"),
            PurchaseError::EventoNotFound(_) => (StatusCode::NOT_FOUND, "EVENTO_NOT_FOUND"),
            PurchaseError::TicketNotFound(_) => (StatusCode::NOT_FOUND, "TICKET_NOT_FOUND"),
            PurchaseError::InsufficientStock { .. } => {
                (StatusCode::CONFLICT, "INSUFFICIENT_STOCK")
            }
            PurchaseError::EventExpired(_) => (StatusCode::GONE, "EVENT_EXPIRED"),
            PurchaseError::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
            }
            PurchaseError::OwnershipViolation => (StatusCode::FORBIDDEN, "OWNERSHIP_VIOLATION"),
            PurchaseError::InvalidQuantity => (StatusCode::BAD_REQUEST, "INVALID_QUANTITY"),
            PurchaseError::AmountOverflow { .. } => (StatusCode::BAD_REQUEST, "AMOUNT_OVERFLOW"),
            PurchaseError::InvalidProof => (StatusCode::BAD_REQUEST, "INVALID_PROOF"),
            PurchaseError::InvalidEvento(_) => (StatusCode::BAD_REQUEST, "INVALID_EVENTO"),
            PurchaseError::InvalidPagination { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_PAGINATION")
            }
            PurchaseError::TicketAlreadyUsed(_) => (StatusCode::CONFLICT, "TICKET_ALREADY_USED"),
            PurchaseError::TicketNotValidatable { .. } => {
                (StatusCode::CONFLICT, "TICKET_NOT_VALIDATABLE")
            }
            PurchaseError::Code(_) => (StatusCode::BAD_REQUEST, "INVALID_TICKET_CODE"),
            PurchaseError::DuplicateTicketCode(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DUPLICATE_TICKET_CODE")
            }
            PurchaseError::LockOrder(_) => (StatusCode::INTERNAL_SERVER_ERROR, "LOCK_ORDER"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /eventos - Create an evento.
async fn create_evento(
    State(state): State<AppState>,
    Json(request): Json<NuevoEvento>,
) -> Result<(StatusCode, Json<Evento>), AppError> {
    let evento = state.engine.create_evento(request)?;
    Ok((StatusCode::CREATED, Json(evento)))
}

/// GET /eventos/:id - Get an evento.
async fn get_evento(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Evento>, AppError> {
    let evento_id = EventoId(id);
    state
        .engine
        .evento(evento_id)
        .map(Json)
        .ok_or(AppError(PurchaseError::EventoNotFound(evento_id)))
}

/// GET /entradas/:id - Get an entrada with its stock.
async fn get_entrada(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<EntradaResponse>, AppError> {
    let entrada_id = EntradaId(id);
    state
        .engine
        .entrada(entrada_id)
        .map(|entrada| {
            Json(EntradaResponse {
                id: entrada.id.0,
                evento_id: entrada.evento_id.0,
                tipo: entrada.tipo,
                precio: entrada.precio,
                cantidad: entrada.cantidad,
                stock: entrada.stock,
            })
        })
        .ok_or(AppError(PurchaseError::EntradaNotFound(entrada_id)))
}

/// POST /reservas - Reserve units of an entrada.
async fn create_reserva(
    State(state): State<AppState>,
    Json(request): Json<ReservaRequest>,
) -> Result<(StatusCode, Json<Compra>), AppError> {
    let compra = state.engine.initiate_reservation(
        ClienteId(request.cliente_id),
        EntradaId(request.entrada_id),
        request.cantidad,
    )?;
    Ok((StatusCode::CREATED, Json(compra)))
}

/// GET /compras/:id - Get a compra.
async fn get_compra(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(viewer): Query<ViewerQuery>,
) -> Result<Json<Compra>, AppError> {
    Ok(Json(state.engine.get_compra(viewer.into(), CompraId(id))?))
}

/// POST /compras/:id/comprobante - Attach a proof of payment.
async fn attach_comprobante(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ComprobanteRequest>,
) -> Result<Json<Compra>, AppError> {
    let compra = state.engine.attach_proof(
        ClienteId(request.cliente_id),
        CompraId(id),
        request.comprobante,
    )?;
    Ok(Json(compra))
}

/// POST /compras/:id/aceptar - Accept a compra.
async fn accept_compra(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Compra>, AppError> {
    let productora = ProductoraId(request.productora_id);
    Ok(Json(state.engine.accept_purchase(productora, CompraId(id))?))
}

/// POST /compras/:id/rechazar - Reject a compra.
async fn reject_compra(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Compra>, AppError> {
    let productora = ProductoraId(request.productora_id);
    Ok(Json(state.engine.reject_purchase(productora, CompraId(id))?))
}

/// POST /compras/:id/cancelar - Cancel a compra.
async fn cancel_compra(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Compra>, AppError> {
    let actor = Actor::Productora(ProductoraId(request.productora_id));
    Ok(Json(state.engine.cancel_purchase(actor, CompraId(id))?))
}

/// POST /tickets/validar - Scan a ticket.
async fn validate_ticket(
    State(state): State<AppState>,
    Json(request): Json<ValidarRequest>,
) -> Result<Json<Ticket>, AppError> {
    let productora = ProductoraId(request.productora_id);
    Ok(Json(state.engine.validate_ticket(productora, &request.codigo)?))
}

/// GET /clientes/:id/compras - A buyer's compras.
async fn list_cliente_compras(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Compra>>, AppError> {
    let page = state
        .engine
        .list_compras_cliente(ClienteId(id), query.into())?;
    Ok(Json(page))
}

/// GET /productoras/:id/compras - Compras across a productora's eventos.
async fn list_productora_compras(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Compra>>, AppError> {
    let page = state
        .engine
        .list_compras_productora(ProductoraId(id), query.into())?;
    Ok(Json(page))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/eventos", post(create_evento))
        .route("/eventos/{id}", get(get_evento))
        .route("/entradas/{id}", get(get_entrada))
        .route("/reservas", post(create_reserva))
        .route("/compras/{id}", get(get_compra))
        .route("/compras/{id}/comprobante", post(attach_comprobante))
        .route("/compras/{id}/aceptar", post(accept_compra))
        .route("/compras/{id}/rechazar", post(reject_compra))
        .route("/compras/{id}/cancelar", post(cancel_compra))
        .route("/tickets/validar", post(validate_ticket))
        .route("/clientes/{id}/compras", get(list_cliente_compras))
        .route("/productoras/{id}/compras", get(list_productora_compras))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let engine = Arc::new(Engine::new());
    let _reaper = Reaper::spawn(engine.clone()).unwrap();
    let state = AppState { engine };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!("ticketing API server running on http://127.0.0.1:3000");
    println!("Endpoints:");
    println!("  POST /eventos                    - Create an evento");
    println!("  GET  /eventos/:id                - Get an evento");
    println!("  GET  /entradas/:id               - Get an entrada");
    println!("  POST /reservas                   - Reserve tickets");
    println!("  GET  /compras/:id                - Get a compra");
    println!("  POST /compras/:id/comprobante    - Attach proof of payment");
    println!("  POST /compras/:id/aceptar        - Accept a compra");
    println!("  POST /compras/:id/rechazar       - Reject a compra");
    println!("  POST /compras/:id/cancelar       - Cancel a compra");
    println!("  POST /tickets/validar            - Validate a ticket");
    println!("  GET  /clientes/:id/compras       - List a buyer's compras");
    println!("  GET  /productoras/:id/compras    - List a productora's compras");

    axum::serve(listener, app).await.unwrap();
}
