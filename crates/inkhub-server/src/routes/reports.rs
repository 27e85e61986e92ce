use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use inkhub_core::reports::SalesReport;

use crate::error::ApiResult;
use crate::extract::AdminUser;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/sales-report", get(sales_report))
}

async fn sales_report(
    State(market): State<AppState>,
    _admin: AdminUser,
) -> ApiResult<Json<SalesReport>> {
    Ok(Json(market.sales_report()?))
}
