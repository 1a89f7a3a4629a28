//! Database access layer

pub mod orders;

use async_trait::async_trait;
use shared::Order;

use crate::error::StoreError;

pub use orders::OrderRepo;

/// Storage capability consumed by the service layer and cache warm-up.
///
/// Production supplies [`OrderRepo`]; tests supply in-memory variants.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Transactionally write the order and all of its sub-aggregates
    async fn upsert(&self, order: &Order) -> Result<(), StoreError>;
    /// Compose the full aggregate, or [`StoreError::NotFound`]
    async fn get_by_uid(&self, uid: &str) -> Result<Order, StoreError>;
    /// Up to `limit` order UIDs, newest `date_created` first
    async fn recent_order_ids(&self, limit: i64) -> Result<Vec<String>, StoreError>;
}

/// Schema plus table names, configured per deployment
#[derive(Debug, Clone)]
pub struct Tables {
    pub schema: String,
    pub order: String,
    pub delivery: String,
    pub payment: String,
    pub item: String,
}

impl Tables {
    /// `"schema"."table"` with embedded double quotes escaped
    pub fn qualified(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", quote_ident(&self.schema), quote_ident(table))
    }
}

fn quote_ident(ident: &str) -> String {
    ident.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_quotes_schema_and_table() {
        let tables = Tables {
            schema: "orders".into(),
            order: "order".into(),
            delivery: "delivery".into(),
            payment: "payment".into(),
            item: "item".into(),
        };
        assert_eq!(tables.qualified(&tables.order), "\"orders\".\"order\"");
    }

    #[test]
    fn qualified_escapes_embedded_quotes() {
        let tables = Tables {
            schema: "we\"ird".into(),
            order: "t".into(),
            delivery: "t".into(),
            payment: "t".into(),
            item: "t".into(),
        };
        assert_eq!(tables.qualified("t"), "\"we\"\"ird\".\"t\"");
    }
}
