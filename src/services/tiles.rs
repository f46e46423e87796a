// src/services/tiles.rs

//! Product tile parser.
//!
//! Reads one listing page into `ProductRecord`s. Every field is looked up
//! through a fallback chain: structured metadata first (`itemprop` meta
//! tags, `data-*` attributes, the `data-analytics` JSON blob), then the
//! visible markup.

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CompiledTileSelectors, ProductRecord, TileSelectors, parse_price};
use crate::utils::{extract_product_id, resolve_url};

/// Availability value written when a tile carries an out-of-stock marker.
pub const OUT_OF_STOCK: &str = "out_of_stock";

/// Values at or above this inside a price block are not prices.
const MAX_SCOPED_PRICE: f64 = 1_000_000.0;

/// Records parsed from one page.
#[derive(Debug, Default)]
pub struct ParsedPage {
    pub records: Vec<ProductRecord>,
    /// Tile containers found, including ones that yielded nothing useful
    pub tiles: usize,
}

/// `itemprop` meta tags.
#[derive(Debug, Clone)]
struct MetaSelectors {
    product_id: Selector,
    sku: Selector,
    name: Selector,
    image: Selector,
    currency: Selector,
    availability: Selector,
}

impl MetaSelectors {
    fn new() -> Result<Self> {
        let meta = |prop: &str| {
            let s = format!("meta[itemprop='{prop}']");
            Selector::parse(&s).map_err(|e| AppError::selector(&s, e.to_string()))
        };
        Ok(Self {
            product_id: meta("productID")?,
            sku: meta("sku")?,
            name: meta("name")?,
            image: meta("image")?,
            currency: meta("priceCurrency")?,
            availability: meta("availability")?,
        })
    }
}

/// Fields read from the `data-analytics` attribute.
#[derive(Debug, Default)]
struct Analytics {
    id: Option<String>,
    name: Option<String>,
    brand: Option<String>,
    category: Option<String>,
    department: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    availability: Option<String>,
}

impl Analytics {
    fn parse(raw: &str) -> Self {
        let Ok(data) = serde_json::from_str::<Value>(raw) else {
            return Self::default();
        };
        let Some(product) = data.get("product") else {
            return Self::default();
        };
        let text = |key: &str| match product.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        Self {
            id: text("id"),
            name: text("name"),
            brand: text("brand"),
            category: text("category"),
            department: text("departmentName"),
            price: match product.get("price") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => parse_price(s),
                _ => None,
            },
            currency: text("priceCurrency"),
            availability: text("availability"),
        }
    }
}

/// Parses product tiles with configurable selector chains.
#[derive(Debug, Clone)]
pub struct TileParser {
    selectors: CompiledTileSelectors,
    meta: MetaSelectors,
    product_class: String,
    ancestor_depth: usize,
    default_currency: String,
}

impl TileParser {
    pub fn new(selectors: &TileSelectors, default_currency: impl Into<String>) -> Result<Self> {
        Ok(Self {
            selectors: selectors.compile()?,
            meta: MetaSelectors::new()?,
            product_class: selectors.product_class.clone(),
            ancestor_depth: selectors.ancestor_depth,
            default_currency: default_currency.into(),
        })
    }

    /// Parse every tile on a page.
    ///
    /// Tiles come from the first tile selector that matches anything, so
    /// nested containers are not counted twice.
    pub fn parse_page(
        &self,
        html: &str,
        page_url: &Url,
        page_idx: u32,
        captured_at: DateTime<Utc>,
    ) -> ParsedPage {
        let document = Html::parse_document(html);

        let tiles: Vec<ElementRef> = self
            .selectors
            .tile
            .iter()
            .map(|sel| document.select(sel).collect::<Vec<_>>())
            .find(|found| !found.is_empty())
            .unwrap_or_default();

        let records = tiles
            .iter()
            .map(|tile| self.parse_tile(*tile, page_url, page_idx, captured_at))
            .collect();

        ParsedPage {
            records,
            tiles: tiles.len(),
        }
    }

    fn parse_tile(
        &self,
        tile: ElementRef,
        page_url: &Url,
        page_idx: u32,
        captured_at: DateTime<Utc>,
    ) -> ProductRecord {
        let product = self.product_element(tile);
        let attr = |name: &str| {
            clean(product.value().attr(name)).or_else(|| clean(tile.value().attr(name)))
        };
        let analytics = attr("data-analytics")
            .map(|raw| Analytics::parse(&raw))
            .unwrap_or_default();

        let url = first_match(tile, &self.selectors.link)
            .and_then(|a| a.value().attr("href"))
            .filter(|href| !href.trim().is_empty())
            .map(|href| resolve_url(page_url, href.trim()));

        let product_id = meta_content(product, &self.meta.product_id)
            .or_else(|| attr("data-pid"))
            .or_else(|| attr("data-cnstrc-item-id"))
            .or(analytics.id)
            .or_else(|| url.as_deref().and_then(extract_product_id));
        let sku = meta_content(product, &self.meta.sku).or_else(|| product_id.clone());

        let visible_brand = first_text(tile, &self.selectors.brand);
        let name = meta_content(product, &self.meta.name)
            .or_else(|| attr("data-cnstrc-item-name"))
            .or(analytics.name)
            .or_else(|| {
                let title = first_text(tile, &self.selectors.title);
                let joined = [visible_brand.as_deref(), title.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                clean(Some(joined.as_str()))
            });
        let brand = attr("data-brand").or(analytics.brand).or(visible_brand);

        let image_url = meta_content(product, &self.meta.image).or_else(|| {
            first_match(tile, &self.selectors.image)
                .and_then(|img| img.value().attr("src").or_else(|| img.value().attr("data-src")))
                .filter(|src| !src.trim().is_empty())
                .map(|src| resolve_url(page_url, src.trim()))
        });

        let price_currency = meta_content(product, &self.meta.currency)
            .or(analytics.currency)
            .or_else(|| Some(self.default_currency.clone()));

        let availability = if first_match(tile, &self.selectors.out_of_stock).is_some() {
            Some(OUT_OF_STOCK.to_string())
        } else {
            meta_content(product, &self.meta.availability).or(analytics.availability)
        };

        let list_price = first_price(tile, &self.selectors.list_price);
        let sale_price = first_price(tile, &self.selectors.sale_price);
        let scoped = if list_price.is_none() || sale_price.is_none() {
            scoped_prices(tile, &self.selectors.price_scope, &self.selectors.price_value)
        } else {
            Vec::new()
        };
        let list_price = list_price.or_else(|| scoped.last().copied());
        let sale_price = sale_price
            .or_else(|| scoped.first().copied())
            .or(analytics.price);

        let mut record = ProductRecord::new(captured_at).with_prices(list_price, sale_price);
        record.product_id = product_id;
        record.sku = sku;
        record.name = name;
        record.brand = brand;
        record.category = analytics.category;
        record.department = analytics.department;
        record.price_currency = price_currency;
        record.availability = availability;
        record.image_url = image_url;
        record.url = url;
        record.page_idx = Some(page_idx);
        record
    }

    /// Closest element (the tile itself or an ancestor) carrying the
    /// product class, or the tile when none is found.
    fn product_element<'a>(&self, tile: ElementRef<'a>) -> ElementRef<'a> {
        std::iter::once(tile)
            .chain(tile.ancestors().filter_map(ElementRef::wrap))
            .take(self.ancestor_depth.max(1))
            .find(|el| el.value().classes().any(|c| c == self.product_class))
            .unwrap_or(tile)
    }
}

/// Trim and collapse whitespace; blank becomes `None`.
fn clean(value: Option<&str>) -> Option<String> {
    let joined = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

fn element_text(el: ElementRef) -> Option<String> {
    clean(Some(el.text().collect::<Vec<_>>().join(" ").as_str()))
}

fn meta_content(scope: ElementRef, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .find_map(|m| clean(m.value().attr("content")))
}

fn first_match<'a>(scope: ElementRef<'a>, chain: &[Selector]) -> Option<ElementRef<'a>> {
    chain.iter().find_map(|sel| scope.select(sel).next())
}

fn first_text(scope: ElementRef, chain: &[Selector]) -> Option<String> {
    chain
        .iter()
        .find_map(|sel| scope.select(sel).find_map(element_text))
}

/// Price from the `content` attribute, else the element text.
fn first_price(scope: ElementRef, chain: &[Selector]) -> Option<f64> {
    chain.iter().find_map(|sel| {
        scope.select(sel).find_map(|el| {
            el.value()
                .attr("content")
                .and_then(parse_price)
                .or_else(|| element_text(el).as_deref().and_then(parse_price))
        })
    })
}

/// Distinct plausible prices inside the first matching price block,
/// ascending.
fn scoped_prices(tile: ElementRef, scope: &[Selector], values: &[Selector]) -> Vec<f64> {
    let Some(block) = first_match(tile, scope) else {
        return Vec::new();
    };

    let mut prices: Vec<f64> = values
        .iter()
        .flat_map(|sel| block.select(sel))
        .filter_map(|el| {
            el.value()
                .attr("content")
                .and_then(parse_price)
                .or_else(|| element_text(el).as_deref().and_then(parse_price))
        })
        .filter(|p| *p > 0.0 && *p < MAX_SCOPED_PRICE)
        .collect();
    prices.sort_by(f64::total_cmp);
    prices.dedup();
    prices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TileParser {
        TileParser::new(&TileSelectors::default(), "MXN").unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn page_url() -> Url {
        Url::parse("https://www.example.com/ofertas/?start=0&sz=200").unwrap()
    }

    const PALACIO_PAGE: &str = r#"
        <html><body>
        <div class="b-product" data-pid="41234567" data-brand="Coach"
             data-analytics='{"product":{"id":"41234567","name":"Bolsa Tabby","brand":"Coach","category":"Bolsas","departmentName":"Mujer","price":5990,"priceCurrency":"MXN","availability":"InStock"}}'>
          <article class="b-product_tile_item">
            <meta itemprop="productID" content="41234567">
            <meta itemprop="name" content="Bolsa Tabby de piel">
            <meta itemprop="image" content="https://cdn.example.com/41234567.jpg">
            <a class="b-product_tile-link" href="/coach-bolsa-tabby-41234567.html">ver</a>
            <div class="b-product_price-old"><span class="b-product_price-value" content="7990.00">$7,990.00</span></div>
            <div class="b-product_price-sales m-reduced"><span class="b-product_price-value">$5,990.00</span></div>
          </article>
        </div>
        <div class="b-product">
          <article class="b-product_tile_item">
            <div class="b-product_tile-brand"><h4>Nike</h4></div>
            <div class="b-product_tile-name">Tenis   Air Zoom</div>
            <a href="/nike-tenis-air-zoom-42000001.html">ver</a>
            <div class="b-product_price-sales"><span class="b-product_price-value">$2,499.00</span></div>
            <span class="sold-out">Agotado</span>
          </article>
        </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_structured_tile() {
        let page = parser().parse_page(PALACIO_PAGE, &page_url(), 0, now());
        assert_eq!(page.tiles, 2);

        let r = &page.records[0];
        assert_eq!(r.product_id.as_deref(), Some("41234567"));
        assert_eq!(r.sku.as_deref(), Some("41234567"));
        assert_eq!(r.name.as_deref(), Some("Bolsa Tabby de piel"));
        assert_eq!(r.brand.as_deref(), Some("Coach"));
        assert_eq!(r.category.as_deref(), Some("Bolsas"));
        assert_eq!(r.department.as_deref(), Some("Mujer"));
        assert_eq!(r.price_currency.as_deref(), Some("MXN"));
        assert_eq!(r.availability.as_deref(), Some("InStock"));
        assert_eq!(r.list_price, Some(7990.0));
        assert_eq!(r.sale_price, Some(5990.0));
        assert_eq!(r.discount_pct, Some(25.03));
        assert_eq!(
            r.url.as_deref(),
            Some("https://www.example.com/coach-bolsa-tabby-41234567.html")
        );
        assert_eq!(r.image_url.as_deref(), Some("https://cdn.example.com/41234567.jpg"));
        assert_eq!(r.page_idx, Some(0));
    }

    #[test]
    fn test_parse_visible_fallbacks() {
        let page = parser().parse_page(PALACIO_PAGE, &page_url(), 3, now());
        let r = &page.records[1];
        assert_eq!(r.product_id.as_deref(), Some("42000001"));
        assert_eq!(r.name.as_deref(), Some("Nike Tenis Air Zoom"));
        assert_eq!(r.brand.as_deref(), Some("Nike"));
        assert_eq!(r.list_price, None);
        assert_eq!(r.sale_price, Some(2499.0));
        assert_eq!(r.discount_pct, None);
        assert_eq!(r.availability.as_deref(), Some(OUT_OF_STOCK));
        assert_eq!(r.price_currency.as_deref(), Some("MXN"));
        assert_eq!(r.page_idx, Some(3));
    }

    #[test]
    fn test_alternate_tile_markup() {
        let html = r#"
            <ul>
              <li class="grid-tile">
                <div class="product-tile" data-pid="A100">
                  <a href="https://shop.example.com/p/abrigo.html">Abrigo</a>
                  <div class="product-name">Abrigo lana</div>
                  <del><span class="value" content="3000"></span></del>
                  <span class="sales"><span class="value">2,100</span></span>
                </div>
              </li>
            </ul>
        "#;
        let page = parser().parse_page(html, &page_url(), 0, now());
        assert_eq!(page.tiles, 1);
        let r = &page.records[0];
        assert_eq!(r.product_id.as_deref(), Some("A100"));
        assert_eq!(r.name.as_deref(), Some("Abrigo lana"));
        assert_eq!(r.list_price, Some(3000.0));
        assert_eq!(r.sale_price, Some(2100.0));
        assert_eq!(r.discount_pct, Some(30.0));
    }

    #[test]
    fn test_page_without_tiles() {
        let page = parser().parse_page("<html><body><p>Sin resultados</p></body></html>", &page_url(), 0, now());
        assert_eq!(page.tiles, 0);
        assert!(page.records.is_empty());
    }

    #[test]
    fn test_bad_analytics_json_is_ignored() {
        let html = r#"
            <div class="b-product" data-analytics="{not json">
              <a href="/x-12345678.html">x</a>
            </div>
        "#;
        let page = parser().parse_page(html, &page_url(), 0, now());
        assert_eq!(page.records[0].product_id.as_deref(), Some("12345678"));
    }

    #[test]
    fn test_price_block_fallback() {
        let html = r#"
            <article class="product-tile" data-pid="89001234">
              <h3><a href="/es-mx/mujer/vestido-lino-89001234.html">Vestido lino</a></h3>
              <div class="prices">
                <span class="value" content="1990.00">$1,990</span>
                <span class="value" content="1390.00">$1,390</span>
                <span class="value" content="1390.00">$1,390</span>
              </div>
            </article>
            <article class="product-tile" data-pid="89005678">
              <h3><a href="/es-mx/hombre/camisa-89005678.html">Camisa</a></h3>
              <div class="prices"><span class="value">$990</span></div>
            </article>
        "#;
        let page = parser().parse_page(html, &page_url(), 0, now());
        assert_eq!(page.tiles, 2);

        let reduced = &page.records[0];
        assert_eq!(reduced.name.as_deref(), Some("Vestido lino"));
        assert_eq!(reduced.list_price, Some(1990.0));
        assert_eq!(reduced.sale_price, Some(1390.0));
        assert_eq!(reduced.discount_pct, Some(30.15));

        let full = &page.records[1];
        assert_eq!(full.list_price, Some(990.0));
        assert_eq!(full.sale_price, Some(990.0));
        assert_eq!(full.discount_pct, None);
    }
}
