//! Order pricing
//!
//! Turns an untrusted order (query parameters of the checkout request) into an
//! exact decimal total. Unknown ids are skipped; quantities that do not parse
//! as a non-negative decimal are skipped too, so the total can never go below
//! zero. All arithmetic is `Decimal`, never `f64`.

use crate::catalog::{self, LineItem};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

/// Requested items for one checkout: `(item id, quantity)` pairs as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRequest {
    entries: Vec<(String, String)>,
}

impl OrderRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw key/value pairs (eg. a parsed query string)
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with_item(mut self, id: impl Into<String>, quantity: impl Into<String>) -> Self {
        self.entries.push((id.into(), quantity.into()));
        self
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the order back into query pairs (used for checkout links)
    pub fn to_query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Price an order against the shop catalog
pub fn calculate_price(order: &OrderRequest) -> Decimal {
    price_with(catalog::products(), order)
}

/// Price an order against an explicit catalog
pub fn price_with(catalog: &[LineItem], order: &OrderRequest) -> Decimal {
    let mut amount = Decimal::ZERO;

    for (id, quantity) in order.entries() {
        let Some(item) = catalog.iter().find(|p| p.id == id) else {
            continue;
        };

        let Some(quantity) = parse_quantity(quantity) else {
            debug!(item = %id, quantity = %quantity, "Skipping unparseable quantity");
            continue;
        };

        match quantity
            .checked_mul(item.price_usd)
            .and_then(|line| amount.checked_add(line))
        {
            Some(total) => amount = total,
            None => debug!(item = %id, "Skipping line that overflows the order total"),
        }
    }

    amount
}

fn parse_quantity(raw: &str) -> Option<Decimal> {
    let quantity = Decimal::from_str(raw.trim()).ok()?;
    if quantity.is_zero() {
        return Some(Decimal::ZERO);
    }
    if quantity.is_sign_negative() {
        return None;
    }
    Some(quantity)
}
