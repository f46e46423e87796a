// src/models/selectors.rs

//! CSS selector chains for reading product tiles off a listing page.

use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Selector chains for product tiles.
///
/// Each field is tried in order; the first selector that yields a
/// non-empty value wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TileSelectors {
    /// Tile containers, one match per product
    #[serde(default = "defaults::tile")]
    pub tile: Vec<String>,

    /// Class marking the element that carries product data attributes
    #[serde(default = "defaults::product_class")]
    pub product_class: String,

    /// How far up from a tile to look for `product_class`
    #[serde(default = "defaults::ancestor_depth")]
    pub ancestor_depth: usize,

    /// Product link
    #[serde(default = "defaults::link")]
    pub link: Vec<String>,

    /// Visible brand label, used when no attribute carries the brand
    #[serde(default = "defaults::brand")]
    pub brand: Vec<String>,

    /// Visible title, used when no attribute carries the name
    #[serde(default = "defaults::title")]
    pub title: Vec<String>,

    #[serde(default = "defaults::image")]
    pub image: Vec<String>,

    /// Crossed-out original price
    #[serde(default = "defaults::list_price")]
    pub list_price: Vec<String>,

    /// Current selling price
    #[serde(default = "defaults::sale_price")]
    pub sale_price: Vec<String>,

    /// Price block searched when either price is still missing
    #[serde(default = "defaults::price_scope")]
    pub price_scope: Vec<String>,

    /// Price values inside `price_scope`; the lowest is the sale price,
    /// the highest the list price
    #[serde(default = "defaults::price_value")]
    pub price_value: Vec<String>,

    /// Any match marks the tile out of stock
    #[serde(default = "defaults::out_of_stock")]
    pub out_of_stock: Vec<String>,
}

impl Default for TileSelectors {
    fn default() -> Self {
        Self {
            tile: defaults::tile(),
            product_class: defaults::product_class(),
            ancestor_depth: defaults::ancestor_depth(),
            link: defaults::link(),
            brand: defaults::brand(),
            title: defaults::title(),
            image: defaults::image(),
            list_price: defaults::list_price(),
            sale_price: defaults::sale_price(),
            price_scope: defaults::price_scope(),
            price_value: defaults::price_value(),
            out_of_stock: defaults::out_of_stock(),
        }
    }
}

impl TileSelectors {
    /// Parse every selector, failing on the first invalid one.
    pub fn compile(&self) -> Result<CompiledTileSelectors> {
        if self.tile.is_empty() {
            return Err(AppError::validation("tiles.tile needs at least one selector"));
        }
        Ok(CompiledTileSelectors {
            tile: parse_chain(&self.tile)?,
            link: parse_chain(&self.link)?,
            brand: parse_chain(&self.brand)?,
            title: parse_chain(&self.title)?,
            image: parse_chain(&self.image)?,
            list_price: parse_chain(&self.list_price)?,
            sale_price: parse_chain(&self.sale_price)?,
            price_scope: parse_chain(&self.price_scope)?,
            price_value: parse_chain(&self.price_value)?,
            out_of_stock: parse_chain(&self.out_of_stock)?,
        })
    }
}

/// Parsed form of [`TileSelectors`].
#[derive(Debug, Clone)]
pub struct CompiledTileSelectors {
    pub tile: Vec<Selector>,
    pub link: Vec<Selector>,
    pub brand: Vec<Selector>,
    pub title: Vec<Selector>,
    pub image: Vec<Selector>,
    pub list_price: Vec<Selector>,
    pub sale_price: Vec<Selector>,
    pub price_scope: Vec<Selector>,
    pub price_value: Vec<Selector>,
    pub out_of_stock: Vec<Selector>,
}

fn parse_chain(chain: &[String]) -> Result<Vec<Selector>> {
    chain
        .iter()
        .map(|s| Selector::parse(s).map_err(|e| AppError::selector(s, e.to_string())))
        .collect()
}

mod defaults {
    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub fn tile() -> Vec<String> {
        owned(&[
            "article.b-product_tile_item",
            "div.b-product",
            "li.product",
            "div.product-tile",
            "article.product-tile",
            "li.product-tile",
            "div.product-list__item",
            "li.grid-tile",
            "article.product",
        ])
    }
    pub fn product_class() -> String {
        "b-product".into()
    }
    pub fn ancestor_depth() -> usize {
        8
    }
    pub fn link() -> Vec<String> {
        owned(&[
            "a.b-product_tile-link[href]",
            "a.product-tile__link[href]",
            ".product-tile__name a[href]",
            ".product__name a[href]",
            "h3 a[href]",
            "a[href]",
        ])
    }
    pub fn brand() -> Vec<String> {
        owned(&[
            ".b-product_tile-brand h4",
            ".b-product_tile-brand",
            ".product-brand",
            ".product-tile__brand",
            ".product__brand",
        ])
    }
    pub fn title() -> Vec<String> {
        owned(&[
            ".b-product_tile-name",
            ".b-product_tile-title a",
            ".b-product_tile-title",
            "a.b-product_tile-title-link",
            ".product-name",
            ".product-tile__name",
            ".product__name",
            ".pdp-link a",
            "h3 a",
            "h3",
        ])
    }
    pub fn image() -> Vec<String> {
        owned(&["img[src]", "img[data-src]"])
    }
    pub fn list_price() -> Vec<String> {
        owned(&[
            "div.b-product_price-old span.b-product_price-value",
            "del .value[content]",
            ".strike-through.list .value",
            ".prices__value--original",
        ])
    }
    pub fn sale_price() -> Vec<String> {
        owned(&[
            "div.b-product_price-sales.m-reduced span.b-product_price-value",
            "div.b-product_price-sales span.b-product_price-value",
            ".discount-wrapper .sales .value",
            ".prices__value--discount",
            ".sales .value",
            ".price .value",
        ])
    }
    pub fn price_scope() -> Vec<String> {
        owned(&[
            ".product-tile__price",
            ".product-tile__prices",
            ".prices",
            ".product-price",
        ])
    }
    pub fn price_value() -> Vec<String> {
        owned(&[".value"])
    }
    pub fn out_of_stock() -> Vec<String> {
        owned(&[".out-of-stock", ".sold-out", ".no-stock"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_compile() {
        let compiled = TileSelectors::default().compile().unwrap();
        assert_eq!(compiled.tile.len(), 9);
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let selectors = TileSelectors {
            sale_price: vec!["div[".into()],
            ..Default::default()
        };
        let err = selectors.compile().unwrap_err();
        assert!(matches!(err, AppError::Selector { .. }));
    }

    #[test]
    fn test_empty_tile_chain_rejected() {
        let selectors = TileSelectors {
            tile: Vec::new(),
            ..Default::default()
        };
        assert!(selectors.compile().is_err());
    }
}
