//! Order endpoints: lookup with cache/db timing headers, strict upsert

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::Serialize;

use chrono::{DateTime, Utc};
use shared::{Delivery, Item, Order, Payment};

use crate::error::ApiError;
use crate::observability::{append_server_timing, set_if_pos};
use crate::state::AppState;

/// GET /order/{uid}
pub async fn get_order(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, ApiError> {
    if uid.is_empty() {
        return Err(ApiError::MissingOrderId);
    }

    let (order, stats) = state.service.get_by_uid_with_stats(&uid).await?;

    let mut response = json_response(&order)?;
    let headers = response.headers_mut();
    append_server_timing(headers, "cache", stats.cache_ms, "");
    append_server_timing(headers, "db", stats.db_ms, "");
    append_server_timing(headers, "source", 0.0, stats.source.as_str());
    headers.insert("X-Source", HeaderValue::from_static(stats.source.as_str()));
    set_if_pos(headers, "X-Cache-Time", stats.cache_ms);
    set_if_pos(headers, "X-DB-Time", stats.db_ms);
    Ok(response)
}

/// GET /order/ — an order id is always required
pub async fn missing_order_id() -> ApiError {
    ApiError::MissingOrderId
}

/// POST /order/
///
/// Requires `Content-Type: application/json`; the body is decoded strictly
/// (unknown fields rejected at any nesting level), unlike the tolerant
/// ingest path.
pub async fn upsert_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("application/json")
    {
        return Err(ApiError::UnsupportedMediaType);
    }

    let payload: OrderPayload = serde_json::from_slice(&body).map_err(|err| {
        tracing::warn!(error = %err, "rejecting order payload");
        ApiError::BadJson
    })?;
    let order: Order = payload.into();
    order
        .validate()
        .map_err(|err| ApiError::Validation(err.to_string()))?;

    let stats = state
        .service
        .upsert_with_stats(&order)
        .await
        .map_err(|_| ApiError::Service)?;

    let mut response = json_response(&order)?;
    append_server_timing(response.headers_mut(), "db_write", stats.db_write_ms, "");
    Ok(response)
}

/// 2-space indented UTF-8 JSON, matching what the dashboard expects
fn json_response<T: Serialize>(value: &T) -> Result<Response, ApiError> {
    let mut body = serde_json::to_string_pretty(value).map_err(|err| {
        tracing::error!(error = %err, "response encoding failed");
        ApiError::Service
    })?;
    body.push('\n');
    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        )],
        body,
    )
        .into_response())
}

// Strict mirrors of the shared model: same shape and defaults, but unknown
// fields are a hard error. Ingest keeps the tolerant shared types.

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct OrderPayload {
    order_uid: String,
    track_number: String,
    entry: String,
    delivery: DeliveryPayload,
    payment: PaymentPayload,
    items: Vec<ItemPayload>,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    #[serde(rename = "shardkey")]
    shard_key: String,
    sm_id: i32,
    date_created: Option<DateTime<Utc>>,
    oof_shard: String,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct DeliveryPayload {
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: String,
    email: String,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct PaymentPayload {
    transaction: String,
    request_id: String,
    currency: String,
    provider: String,
    amount: i64,
    payment_dt: i64,
    bank: String,
    delivery_cost: i64,
    goods_total: i64,
    custom_fee: i64,
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct ItemPayload {
    chrt_id: i64,
    track_number: String,
    price: i64,
    rid: String,
    name: String,
    sale: i64,
    size: String,
    total_price: i64,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl From<OrderPayload> for Order {
    fn from(p: OrderPayload) -> Self {
        Order {
            order_uid: p.order_uid,
            track_number: p.track_number,
            entry: p.entry,
            delivery: Delivery {
                name: p.delivery.name,
                phone: p.delivery.phone,
                zip: p.delivery.zip,
                city: p.delivery.city,
                address: p.delivery.address,
                region: p.delivery.region,
                email: p.delivery.email,
            },
            payment: Payment {
                transaction: p.payment.transaction,
                request_id: p.payment.request_id,
                currency: p.payment.currency,
                provider: p.payment.provider,
                amount: p.payment.amount,
                payment_dt: p.payment.payment_dt,
                bank: p.payment.bank,
                delivery_cost: p.payment.delivery_cost,
                goods_total: p.payment.goods_total,
                custom_fee: p.payment.custom_fee,
            },
            items: p
                .items
                .into_iter()
                .map(|it| Item {
                    chrt_id: it.chrt_id,
                    track_number: it.track_number,
                    price: it.price,
                    rid: it.rid,
                    name: it.name,
                    sale: it.sale,
                    size: it.size,
                    total_price: it.total_price,
                    nm_id: it.nm_id,
                    brand: it.brand,
                    status: it.status,
                })
                .collect(),
            locale: p.locale,
            internal_signature: p.internal_signature,
            customer_id: p.customer_id,
            delivery_service: p.delivery_service,
            shard_key: p.shard_key,
            sm_id: p.sm_id,
            date_created: p.date_created,
            oof_shard: p.oof_shard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_payload_rejects_unknown_top_level_field() {
        let json = r#"{"order_uid":"A","surprise":1}"#;
        assert!(serde_json::from_str::<OrderPayload>(json).is_err());
    }

    #[test]
    fn strict_payload_rejects_unknown_nested_field() {
        let json = r#"{"order_uid":"A","payment":{"amount":1,"tip":5}}"#;
        assert!(serde_json::from_str::<OrderPayload>(json).is_err());
    }

    #[test]
    fn strict_payload_tolerates_missing_fields() {
        let json = r#"{"order_uid":"A","items":[{"chrt_id":1}]}"#;
        let payload: OrderPayload = serde_json::from_str(json).unwrap();
        let order: Order = payload.into();
        assert_eq!(order.order_uid, "A");
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].chrt_id, 1);
    }
}
