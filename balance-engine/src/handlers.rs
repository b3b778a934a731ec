use crate::errors::EngineError;
use crate::metrics;
use crate::models::{
    AmountRequest, BalanceQuery, BalanceResponse, CreateAccountRequest,
    CreateReservationRequest, HistoryRequest, HistorySort, ReportRequest,
    ReservationIdRequest, ReservationResponse, TransferRequest,
};
use crate::services::Services;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

type ServicesData = web::Data<Arc<Services>>;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "balance-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn create_account(
    services: ServicesData,
    request: web::Json<CreateAccountRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    services.account.create_account(request.user_id).await?;

    Ok(HttpResponse::Created().json(BalanceResponse {
        user_id: request.user_id,
        balance: rust_decimal::Decimal::ZERO,
    }))
}

pub async fn get_balance(
    services: ServicesData,
    query: web::Query<BalanceQuery>,
) -> Result<HttpResponse, EngineError> {
    let balance = services.account.get_balance(query.user_id).await?;

    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id: query.user_id,
        balance,
    }))
}

pub async fn deposit(
    services: ServicesData,
    request: web::Json<AmountRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let balance = services
        .account
        .deposit(request.user_id, request.amount)
        .await?;

    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id: request.user_id,
        balance,
    }))
}

pub async fn withdraw(
    services: ServicesData,
    request: web::Json<AmountRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let balance = services
        .account
        .withdraw(request.user_id, request.amount)
        .await?;

    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id: request.user_id,
        balance,
    }))
}

pub async fn transfer(
    services: ServicesData,
    request: web::Json<TransferRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let receipt = services
        .account
        .transfer(request.from, request.to, request.amount)
        .await?;

    Ok(HttpResponse::Ok().json(receipt))
}

pub async fn create_reservation(
    services: ServicesData,
    request: web::Json<CreateReservationRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let reservation_id = services
        .reservation
        .create_reservation(
            request.user_id,
            request.product_id,
            request.order_id,
            request.amount,
        )
        .await?;

    Ok(HttpResponse::Created().json(ReservationResponse { reservation_id }))
}

pub async fn cancel_reservation(
    services: ServicesData,
    request: web::Json<ReservationIdRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let reservation = services
        .reservation
        .cancel_reservation(request.reservation_id)
        .await?;

    Ok(HttpResponse::Ok().json(reservation))
}

/// Confirm a reservation as revenue
pub async fn revenue_reservation(
    services: ServicesData,
    request: web::Json<ReservationIdRequest>,
) -> Result<HttpResponse, EngineError> {
    request.validate()?;
    let reservation = services
        .reservation
        .revenue_reservation(request.reservation_id)
        .await?;

    Ok(HttpResponse::Ok().json(reservation))
}

pub async fn get_reservation(
    services: ServicesData,
    reservation_id: web::Path<i64>,
) -> Result<HttpResponse, EngineError> {
    let reservation = services
        .reservation
        .get_reservation(reservation_id.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(reservation))
}

pub async fn get_history(
    services: ServicesData,
    query: web::Query<HistoryRequest>,
) -> Result<HttpResponse, EngineError> {
    query.validate()?;
    let operations = services
        .operation
        .get_history(
            query.user_id,
            HistorySort::parse(query.sort.as_deref()),
            query.offset,
            query.limit,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "user_id": query.user_id,
        "operations": operations,
    })))
}

/// Monthly revenue report as `product_id;amount` CSV
pub async fn create_report(
    services: ServicesData,
    query: web::Query<ReportRequest>,
) -> Result<HttpResponse, EngineError> {
    query.validate()?;
    let report = services
        .operation
        .create_report(query.year, query.month)
        .await?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            "Content-Disposition",
            format!(
                "attachment; filename=\"report-{}-{:02}.csv\"",
                report.year, report.month
            ),
        ))
        .body(report.to_csv()?))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/accounts")
                    .route("/create", web::post().to(create_account))
                    .route("/balance", web::get().to(get_balance))
                    .route("/deposit", web::post().to(deposit))
                    .route("/withdraw", web::post().to(withdraw))
                    .route("/transfer", web::post().to(transfer)),
            )
            .service(
                web::scope("/reservations")
                    .route("/create", web::post().to(create_reservation))
                    .route("/cancel", web::post().to(cancel_reservation))
                    .route("/revenue", web::post().to(revenue_reservation))
                    .route("/{reservation_id}", web::get().to(get_reservation)),
            )
            .service(
                web::scope("/operations")
                    .route("/history", web::get().to(get_history))
                    .route("/report", web::get().to(create_report)),
            ),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
