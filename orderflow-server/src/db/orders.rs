//! Order repository: transactional multi-table upsert and composite read
//!
//! The four relations (order, delivery, payment, items) are written inside a
//! single transaction; items are replaced wholesale on every upsert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Delivery, Item, Order, Payment};
use sqlx::PgPool;

use super::{OrderStore, Tables};
use crate::error::StoreError;

pub struct OrderRepo {
    pool: PgPool,
    tables: Tables,
}

impl OrderRepo {
    pub fn new(pool: PgPool, tables: Tables) -> Self {
        Self { pool, tables }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_uid: String,
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i32,
    date_created: Option<DateTime<Utc>>,
    oof_shard: String,
}

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: String,
    email: String,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Delivery {
            name: row.name,
            phone: row.phone,
            zip: row.zip,
            city: row.city,
            address: row.address,
            region: row.region,
            email: row.email,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
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

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            transaction: row.transaction,
            request_id: row.request_id,
            currency: row.currency,
            provider: row.provider,
            amount: row.amount,
            payment_dt: row.payment_dt,
            bank: row.bank,
            delivery_cost: row.delivery_cost,
            goods_total: row.goods_total,
            custom_fee: row.custom_fee,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
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

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            chrt_id: row.chrt_id,
            track_number: row.track_number,
            price: row.price,
            rid: row.rid,
            name: row.name,
            sale: row.sale,
            size: row.size,
            total_price: row.total_price,
            nm_id: row.nm_id,
            brand: row.brand,
            status: row.status,
        }
    }
}

#[async_trait]
impl OrderStore for OrderRepo {
    async fn upsert(&self, o: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (order_uid, track_number, entry, locale, internal_signature,
                customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_uid) DO UPDATE SET
                track_number = EXCLUDED.track_number,
                entry = EXCLUDED.entry,
                locale = EXCLUDED.locale,
                internal_signature = EXCLUDED.internal_signature,
                customer_id = EXCLUDED.customer_id,
                delivery_service = EXCLUDED.delivery_service,
                shardkey = EXCLUDED.shardkey,
                sm_id = EXCLUDED.sm_id,
                date_created = EXCLUDED.date_created,
                oof_shard = EXCLUDED.oof_shard
            "#,
            self.tables.qualified(&self.tables.order)
        ))
        .bind(&o.order_uid)
        .bind(&o.track_number)
        .bind(&o.entry)
        .bind(&o.locale)
        .bind(&o.internal_signature)
        .bind(&o.customer_id)
        .bind(&o.delivery_service)
        .bind(&o.shard_key)
        .bind(o.sm_id)
        .bind(o.date_created)
        .bind(&o.oof_shard)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (order_uid, name, phone, zip, city, address, region, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (order_uid) DO UPDATE SET
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                zip = EXCLUDED.zip,
                city = EXCLUDED.city,
                address = EXCLUDED.address,
                region = EXCLUDED.region,
                email = EXCLUDED.email
            "#,
            self.tables.qualified(&self.tables.delivery)
        ))
        .bind(&o.order_uid)
        .bind(&o.delivery.name)
        .bind(&o.delivery.phone)
        .bind(&o.delivery.zip)
        .bind(&o.delivery.city)
        .bind(&o.delivery.address)
        .bind(&o.delivery.region)
        .bind(&o.delivery.email)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (order_uid, transaction, request_id, currency, provider, amount,
                payment_dt, bank, delivery_cost, goods_total, custom_fee)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (order_uid) DO UPDATE SET
                transaction = EXCLUDED.transaction,
                request_id = EXCLUDED.request_id,
                currency = EXCLUDED.currency,
                provider = EXCLUDED.provider,
                amount = EXCLUDED.amount,
                payment_dt = EXCLUDED.payment_dt,
                bank = EXCLUDED.bank,
                delivery_cost = EXCLUDED.delivery_cost,
                goods_total = EXCLUDED.goods_total,
                custom_fee = EXCLUDED.custom_fee
            "#,
            self.tables.qualified(&self.tables.payment)
        ))
        .bind(&o.order_uid)
        .bind(&o.payment.transaction)
        .bind(&o.payment.request_id)
        .bind(&o.payment.currency)
        .bind(&o.payment.provider)
        .bind(o.payment.amount)
        .bind(o.payment.payment_dt)
        .bind(&o.payment.bank)
        .bind(o.payment.delivery_cost)
        .bind(o.payment.goods_total)
        .bind(o.payment.custom_fee)
        .execute(&mut *tx)
        .await?;

        // Items are replace-on-upsert: clear, then bulk insert in order.
        sqlx::query(&format!(
            "DELETE FROM {} WHERE order_uid = $1",
            self.tables.qualified(&self.tables.item)
        ))
        .bind(&o.order_uid)
        .execute(&mut *tx)
        .await?;

        if !o.items.is_empty() {
            let order_uids: Vec<&str> = o.items.iter().map(|_| o.order_uid.as_str()).collect();
            let chrt_ids: Vec<i64> = o.items.iter().map(|it| it.chrt_id).collect();
            let track_numbers: Vec<&str> =
                o.items.iter().map(|it| it.track_number.as_str()).collect();
            let prices: Vec<i64> = o.items.iter().map(|it| it.price).collect();
            let rids: Vec<&str> = o.items.iter().map(|it| it.rid.as_str()).collect();
            let names: Vec<&str> = o.items.iter().map(|it| it.name.as_str()).collect();
            let sales: Vec<i64> = o.items.iter().map(|it| it.sale).collect();
            let sizes: Vec<&str> = o.items.iter().map(|it| it.size.as_str()).collect();
            let total_prices: Vec<i64> = o.items.iter().map(|it| it.total_price).collect();
            let nm_ids: Vec<i64> = o.items.iter().map(|it| it.nm_id).collect();
            let brands: Vec<&str> = o.items.iter().map(|it| it.brand.as_str()).collect();
            let statuses: Vec<i32> = o.items.iter().map(|it| it.status).collect();

            sqlx::query(&format!(
                r#"
                INSERT INTO {} (order_uid, chrt_id, track_number, price, rid, name,
                    sale, size, total_price, nm_id, brand, status)
                SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::text[], $4::bigint[],
                    $5::text[], $6::text[], $7::bigint[], $8::text[], $9::bigint[],
                    $10::bigint[], $11::text[], $12::integer[])
                "#,
                self.tables.qualified(&self.tables.item)
            ))
            .bind(&order_uids)
            .bind(&chrt_ids)
            .bind(&track_numbers)
            .bind(&prices)
            .bind(&rids)
            .bind(&names)
            .bind(&sales)
            .bind(&sizes)
            .bind(&total_prices)
            .bind(&nm_ids)
            .bind(&brands)
            .bind(&statuses)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_uid(&self, uid: &str) -> Result<Order, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            r#"
            SELECT order_uid, track_number, entry, locale, internal_signature, customer_id,
                   delivery_service, shardkey, sm_id, date_created, oof_shard
            FROM {} WHERE order_uid = $1
            "#,
            self.tables.qualified(&self.tables.order)
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound);
        };

        // Absent sub-aggregates are empty, not an error.
        let delivery: Option<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            SELECT name, phone, zip, city, address, region, email
            FROM {} WHERE order_uid = $1
            "#,
            self.tables.qualified(&self.tables.delivery)
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        let payment: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            SELECT transaction, request_id, currency, provider, amount, payment_dt,
                   bank, delivery_cost, goods_total, custom_fee
            FROM {} WHERE order_uid = $1
            "#,
            self.tables.qualified(&self.tables.payment)
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        let items: Vec<ItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT chrt_id, track_number, price, rid, name, sale, size, total_price,
                   nm_id, brand, status
            FROM {} WHERE order_uid = $1
            ORDER BY id
            "#,
            self.tables.qualified(&self.tables.item)
        ))
        .bind(uid)
        .fetch_all(&self.pool)
        .await?;

        Ok(Order {
            order_uid: row.order_uid,
            track_number: row.track_number,
            entry: row.entry,
            locale: row.locale,
            internal_signature: row.internal_signature,
            customer_id: row.customer_id,
            delivery_service: row.delivery_service,
            shard_key: row.shardkey,
            sm_id: row.sm_id,
            date_created: row.date_created,
            oof_shard: row.oof_shard,
            delivery: delivery.map(Delivery::from).unwrap_or_default(),
            payment: payment.map(Payment::from).unwrap_or_default(),
            items: items.into_iter().map(Item::from).collect(),
        })
    }

    async fn recent_order_ids(&self, limit: i64) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar(&format!(
            r#"
            SELECT order_uid FROM {}
            ORDER BY date_created DESC NULLS LAST
            LIMIT $1
            "#,
            self.tables.qualified(&self.tables.order)
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
