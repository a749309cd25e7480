//! Product catalog
//!
//! Immutable line items offered by the shop. Prices are exact decimals; the
//! checkout is priced in USD (settled in the USDC-like payment mint), the SOL
//! price is kept for display only.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// A catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    /// Identifier used as the query-parameter key at checkout
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Shown after the price, eg. `0.05 SOL/box`
    pub unit_name: &'static str,
    pub price_sol: Decimal,
    pub price_usd: Decimal,
}

static PRODUCTS: Lazy<Vec<LineItem>> = Lazy::new(|| {
    vec![
        LineItem {
            id: "box-of-cookies",
            name: "Box",
            description: "A box of homemade vanilla & oatmeal cookies",
            unit_name: "box",
            price_sol: dec!(0.05),
            price_usd: dec!(5),
        },
        LineItem {
            id: "basket-of-fruit",
            name: "Basket",
            description: "A fresh basket of fruit, sourced from our local farm",
            unit_name: "basket",
            price_sol: dec!(0.1),
            price_usd: dec!(10),
        },
    ]
});

/// All products offered by the shop
pub fn products() -> &'static [LineItem] {
    &PRODUCTS
}

/// Look up a product by id
pub fn find(id: &str) -> Option<&'static LineItem> {
    PRODUCTS.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let mut ids: Vec<_> = products().iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), products().len());
    }

    #[test]
    fn test_find() {
        assert_eq!(find("box-of-cookies").map(|p| p.price_usd), Some(dec!(5)));
        assert_eq!(find("basket-of-fruit").map(|p| p.price_usd), Some(dec!(10)));
        assert!(find("reference").is_none());
    }
}
