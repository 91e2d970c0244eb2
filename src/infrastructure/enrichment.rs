//! Product page enrichment rules
//!
//! [`PageEnricher`] implements the domain [`Enricher`] capability: it resolves
//! the product page of a record, fetches it through a [`PageSource`] and
//! applies the selector rules of the record's catalog variant.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::offer::FOTOS_IN_STOCK;
use crate::domain::{CatalogVariant, DecodedRecord, EnrichError, Enricher, Enrichment, Offer, Param};
use crate::infrastructure::http_client::PageSource;

/// Attribute values of this many bytes or more are not page attributes
const MAX_ATTRIBUTE_VALUE_BYTES: usize = 200;

pub struct PageEnricher {
    pages: Arc<dyn PageSource>,
    rules: RetailerRules,
}

impl PageEnricher {
    pub fn new(pages: Arc<dyn PageSource>) -> Result<Self, EnrichError> {
        Ok(Self {
            pages,
            rules: RetailerRules::compile()?,
        })
    }
}

#[async_trait]
impl Enricher for PageEnricher {
    async fn enrich(&self, record: &DecodedRecord) -> Result<Enrichment, EnrichError> {
        let url = product_url(record)?;
        let body = self.pages.fetch(&url).await?;
        let enrichment = self.rules.apply(record, &url, &body)?;
        debug!(id = record.id(), url = %url, "Record enriched");
        Ok(enrichment)
    }
}

/// Page URL of a record; query and fragment are dropped where the retailer
/// puts tracking parameters in the feed
pub fn product_url(record: &DecodedRecord) -> Result<String, EnrichError> {
    let raw = record
        .offer
        .url()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| EnrichError::MissingUrl(record.id().to_string()))?;

    match record.variant {
        CatalogVariant::Eldorado | CatalogVariant::Fotos => {
            let mut url = Url::parse(raw).map_err(|e| EnrichError::InvalidUrl(format!("{raw}: {e}")))?;
            url.set_query(None);
            url.set_fragment(None);
            Ok(url.into())
        }
        CatalogVariant::ShopArt | CatalogVariant::Go => Ok(raw.to_string()),
    }
}

fn compile(selector: &str) -> Result<Selector, EnrichError> {
    Selector::parse(selector).map_err(|e| EnrichError::Rules(format!("Invalid selector {selector}: {e}")))
}

/// Compiled selectors of every catalog variant
pub struct RetailerRules {
    whitespace: Regex,
    cell: Selector,

    shopart_name: Selector,

    eldorado_name: Selector,
    eldorado_description: Selector,
    eldorado_rows: Selector,
    eldorado_row_name: Selector,

    go_description: Selector,
    go_rows: Selector,
    go_row_name: Selector,
    go_row_value: Selector,

    fotos_rows: Selector,
    fotos_row_name: Selector,
    fotos_row_value: Selector,
}

impl RetailerRules {
    pub fn compile() -> Result<Self, EnrichError> {
        Ok(Self {
            whitespace: Regex::new(r"\s+").map_err(|e| EnrichError::Rules(e.to_string()))?,
            cell: compile("td")?,

            shopart_name: compile(".product-info .product_name")?,

            eldorado_name: compile(".pp-description .text-b-o-c span")?,
            eldorado_description: compile(".pp-description-text")?,
            eldorado_rows: compile(".pp-characteristics-table tr")?,
            eldorado_row_name: compile("th div div")?,

            go_description: compile(".product-description__item .text")?,
            go_rows: compile(".properties-table tr")?,
            go_row_name: compile(".properties-table__title")?,
            go_row_value: compile(".properties-table__td")?,

            fotos_rows: compile(".clear.properties.tab_div table tr.full.short")?,
            fotos_row_name: compile("td.name")?,
            fotos_row_value: compile("td.value")?,
        })
    }

    /// Extracts the variant's fields from a fetched product page
    pub fn apply(&self, record: &DecodedRecord, url: &str, body: &str) -> Result<Enrichment, EnrichError> {
        let page = Html::parse_document(body);
        match record.variant {
            CatalogVariant::ShopArt => {
                if self.first_text(page.root_element(), &self.shopart_name).is_none() {
                    return Err(EnrichError::MissingContent(url.to_string()));
                }
                Ok(Enrichment::default())
            }
            CatalogVariant::Eldorado => {
                let attributes = self.rows(&page, &self.eldorado_rows, |row| {
                    let label = self.first_text(row, &self.eldorado_row_name)?;
                    let name = label.strip_suffix(':').map_or(label.as_str(), str::trim_end);
                    if name.is_empty() {
                        return None;
                    }
                    let value = self.first_text(row, &self.cell).unwrap_or_default();
                    Some(Param::new(name, value))
                });
                Ok(Enrichment {
                    name: self.first_text(page.root_element(), &self.eldorado_name),
                    description: self.first_text(page.root_element(), &self.eldorado_description),
                    url: Some(url.to_string()),
                    attributes,
                    available: None,
                })
            }
            CatalogVariant::Go => {
                let attributes = self.rows(&page, &self.go_rows, |row| {
                    let name = self.first_text(row, &self.go_row_name)?;
                    let value = row.select(&self.go_row_value).last().map(|cell| self.text(cell))?;
                    (value.len() < MAX_ATTRIBUTE_VALUE_BYTES).then(|| Param::new(name, value))
                });
                Ok(Enrichment {
                    description: self.first_text(page.root_element(), &self.go_description),
                    attributes,
                    ..Enrichment::default()
                })
            }
            CatalogVariant::Fotos => {
                let attributes = self.rows(&page, &self.fotos_rows, |row| {
                    let name = self.first_text(row, &self.fotos_row_name)?;
                    let value = self.first_text(row, &self.fotos_row_value).unwrap_or_default();
                    (value.len() < MAX_ATTRIBUTE_VALUE_BYTES).then(|| Param::new(name, value))
                });
                let in_stock = match &record.offer {
                    Offer::PriceList(item) => item.stock.as_deref().map(str::trim) == Some(FOTOS_IN_STOCK),
                    Offer::Yml(_) => false,
                };
                Ok(Enrichment {
                    url: Some(url.to_string()),
                    attributes,
                    available: Some(in_stock),
                    ..Enrichment::default()
                })
            }
        }
    }

    /// Whitespace-collapsed text content of an element
    fn text(&self, element: ElementRef<'_>) -> String {
        let text: String = element.text().collect();
        self.whitespace.replace_all(text.trim(), " ").into_owned()
    }

    fn first_text(&self, scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
        scope
            .select(selector)
            .next()
            .map(|element| self.text(element))
            .filter(|text| !text.is_empty())
    }

    /// Attribute rows; `None` when the page has none so decoded params stay
    fn rows<F>(&self, page: &Html, selector: &Selector, extract: F) -> Option<Vec<Param>>
    where
        F: Fn(ElementRef<'_>) -> Option<Param>,
    {
        let params: Vec<Param> = page.select(selector).filter_map(extract).collect();
        (!params.is_empty()).then_some(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PriceListItem, YmlOffer};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages and records requested URLs
    #[derive(Default)]
    struct CannedPages {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageSource for CannedPages {
        async fn fetch(&self, url: &str) -> Result<String, EnrichError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| EnrichError::Status(404, url.to_string()))
        }
    }

    fn enricher(pages: &[(&str, &str)]) -> (PageEnricher, Arc<CannedPages>) {
        let source = Arc::new(CannedPages {
            pages: pages.iter().map(|(u, b)| ((*u).to_string(), (*b).to_string())).collect(),
            ..CannedPages::default()
        });
        (PageEnricher::new(source.clone()).unwrap(), source)
    }

    fn yml(variant: CatalogVariant, url: &str) -> DecodedRecord {
        DecodedRecord::new(
            variant,
            Offer::Yml(YmlOffer {
                id: "1".into(),
                url: Some(url.into()),
                ..YmlOffer::default()
            }),
        )
    }

    #[tokio::test]
    async fn shopart_requires_product_name() {
        let (enricher, _) = enricher(&[
            (
                "http://shopart/1",
                r#"<div class="product-info"><h1 class="product_name">Lens</h1></div>"#,
            ),
            ("http://shopart/2", "<html><body>gone</body></html>"),
        ]);

        let found = enricher
            .enrich(&yml(CatalogVariant::ShopArt, "http://shopart/1"))
            .await
            .unwrap();
        assert_eq!(found, Enrichment::default());

        let err = enricher
            .enrich(&yml(CatalogVariant::ShopArt, "http://shopart/2"))
            .await
            .unwrap_err();
        assert_eq!(err, EnrichError::MissingContent("http://shopart/2".into()));
    }

    #[tokio::test]
    async fn eldorado_extracts_name_description_and_table() {
        let page = r#"
            <div class="pp-description"><div class="text-b-o-c"><span> Fridge  X1 </span></div></div>
            <div class="pp-description-text">Cold
                and quiet</div>
            <table class="pp-characteristics-table">
              <tr><th><div><div>Color:</div></div></th><td>White</td></tr>
              <tr><th></th><td>orphan value</td></tr>
              <tr><th><div><div>Height:</div></div></th><td>180 cm</td><td>ignored</td></tr>
            </table>"#;
        let (enricher, source) = enricher(&[("http://eldorado/p/1", page)]);

        let enrichment = enricher
            .enrich(&yml(CatalogVariant::Eldorado, "http://eldorado/p/1?utm_source=feed#top"))
            .await
            .unwrap();
        assert_eq!(source.requested.lock().unwrap().as_slice(), ["http://eldorado/p/1"]);
        assert_eq!(enrichment.name.as_deref(), Some("Fridge X1"));
        assert_eq!(enrichment.description.as_deref(), Some("Cold and quiet"));
        assert_eq!(enrichment.url.as_deref(), Some("http://eldorado/p/1"));
        assert_eq!(
            enrichment.attributes,
            Some(vec![Param::new("Color", "White"), Param::new("Height", "180 cm")])
        );
    }

    #[tokio::test]
    async fn go_skips_long_attribute_values() {
        let long = "x".repeat(MAX_ATTRIBUTE_VALUE_BYTES);
        let page = format!(
            r#"<div class="product-description__item"><p class="text">Compact camera</p></div>
            <table class="properties-table">
              <tr><td class="properties-table__title">Zoom</td><td class="properties-table__td">a</td><td class="properties-table__td">10x</td></tr>
              <tr><td class="properties-table__title">Manual</td><td class="properties-table__td">{long}</td></tr>
            </table>"#
        );
        let (enricher, _) = enricher(&[("http://go/1?ref=feed", page.as_str())]);

        let enrichment = enricher
            .enrich(&yml(CatalogVariant::Go, "http://go/1?ref=feed"))
            .await
            .unwrap();
        assert_eq!(enrichment.description.as_deref(), Some("Compact camera"));
        assert_eq!(enrichment.attributes, Some(vec![Param::new("Zoom", "10x")]));
        assert_eq!(enrichment.url, None);
    }

    #[tokio::test]
    async fn fotos_sets_availability_from_stock() {
        let page = r#"<div class="clear properties tab_div"><table>
              <tr class="full short"><td class="name">Matrix</td><td class="value">24 MP</td></tr>
              <tr class="full"><td class="name">Hidden</td><td class="value">no</td></tr>
            </table></div>"#;
        let (enricher, _) = enricher(&[("http://fotos/item/5", page)]);

        let record = |stock: &str| {
            DecodedRecord::new(
                CatalogVariant::Fotos,
                Offer::PriceList(PriceListItem {
                    id: "5".into(),
                    url: Some("http://fotos/item/5?from=price".into()),
                    stock: Some(stock.into()),
                    ..PriceListItem::default()
                }),
            )
        };

        let in_stock = enricher.enrich(&record(FOTOS_IN_STOCK)).await.unwrap();
        assert_eq!(in_stock.available, Some(true));
        assert_eq!(in_stock.url.as_deref(), Some("http://fotos/item/5"));
        assert_eq!(in_stock.attributes, Some(vec![Param::new("Matrix", "24 MP")]));

        let on_order = enricher.enrich(&record("Под заказ")).await.unwrap();
        assert_eq!(on_order.available, Some(false));
    }

    #[tokio::test]
    async fn records_without_url_fail() {
        let (enricher, source) = enricher(&[]);
        let record = DecodedRecord::new(
            CatalogVariant::Go,
            Offer::Yml(YmlOffer {
                id: "9".into(),
                ..YmlOffer::default()
            }),
        );
        assert_eq!(
            enricher.enrich(&record).await.unwrap_err(),
            EnrichError::MissingUrl("9".into())
        );
        assert!(source.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_url_is_rejected_where_it_is_rewritten() {
        let err = product_url(&yml(CatalogVariant::Eldorado, "not a url")).unwrap_err();
        assert!(matches!(err, EnrichError::InvalidUrl(_)));
        assert_eq!(product_url(&yml(CatalogVariant::ShopArt, "/relative")).unwrap(), "/relative");
    }
}
