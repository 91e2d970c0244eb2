//! Product records decoded from catalog item elements
//!
//! Field names follow the tag names of the feeds so that a decoded record
//! serializes back to the same element shape. Elements missing from the input
//! stay missing in the output.

use serde::{Deserialize, Serialize};

use crate::domain::catalog::CatalogVariant;

/// Availability marker the Fotos feed uses for items in stock
pub const FOTOS_IN_STOCK: &str = "Склад";

/// `<param name="...">value</param>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "$text", default)]
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// `<offer>` element shared by the YML feeds (ShopArt, Eldorado, Go)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YmlOffer {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@available", default, skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
    #[serde(rename = "@bid", default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<String>,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(rename = "currencyId", default, skip_serializing_if = "Option::is_none")]
    pub currency_id: Option<String>,
    #[serde(rename = "categoryId", default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(rename = "picture", default, skip_serializing_if = "Vec::is_empty")]
    pub pictures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpa: Option<String>,

    #[serde(rename = "param", default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// `<item>` element of the Fotos price list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceListItem {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@available", default, skip_serializing_if = "Option::is_none")]
    pub available: Option<String>,
    #[serde(rename = "@bid", default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "image", default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(rename = "priceuah", default, skip_serializing_if = "Option::is_none")]
    pub price_uah: Option<String>,
    #[serde(rename = "categoryId", default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Stock location as text; replaced by the `available` attribute on enrichment
    #[serde(rename = "available", default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<String>,

    #[serde(rename = "param", default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// A decoded item of either document shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    Yml(YmlOffer),
    PriceList(PriceListItem),
}

impl Offer {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Yml(offer) => &offer.id,
            Self::PriceList(item) => &item.id,
        }
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Yml(offer) => offer.url.as_deref(),
            Self::PriceList(item) => item.url.as_deref(),
        }
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Yml(offer) => offer.description.as_deref(),
            Self::PriceList(item) => item.description.as_deref(),
        }
    }

    #[must_use]
    pub fn params(&self) -> &[Param] {
        match self {
            Self::Yml(offer) => &offer.params,
            Self::PriceList(item) => &item.params,
        }
    }

    #[must_use]
    pub fn available(&self) -> Option<&str> {
        match self {
            Self::Yml(offer) => offer.available.as_deref(),
            Self::PriceList(item) => item.available.as_deref(),
        }
    }
}

/// Fields produced by enriching one record from its product page.
/// `None` leaves the decoded value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub attributes: Option<Vec<Param>>,
    pub available: Option<bool>,
}

/// An item decoded from the input document, waiting for enrichment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub variant: CatalogVariant,
    pub offer: Offer,
}

impl DecodedRecord {
    #[must_use]
    pub const fn new(variant: CatalogVariant, offer: Offer) -> Self {
        Self { variant, offer }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.offer.id()
    }

    /// Applies the enrichment, overwriting the enriched fields
    #[must_use]
    pub fn enrich(self, enrichment: Enrichment) -> EnrichedRecord {
        let Enrichment {
            name,
            url,
            description,
            attributes,
            available,
        } = enrichment;

        let mut offer = self.offer;
        match &mut offer {
            Offer::Yml(o) => {
                if name.is_some() {
                    o.name = name;
                }
                if url.is_some() {
                    o.url = url;
                }
                if description.is_some() {
                    o.description = description;
                }
                if let Some(attributes) = attributes {
                    o.params = attributes;
                }
                if let Some(available) = available {
                    o.available = Some(available.to_string());
                }
            }
            Offer::PriceList(item) => {
                if name.is_some() {
                    item.name = name;
                }
                if url.is_some() {
                    item.url = url;
                }
                if description.is_some() {
                    item.description = description;
                }
                if let Some(attributes) = attributes {
                    item.params = attributes;
                }
                if let Some(available) = available {
                    item.available = Some(available.to_string());
                    item.stock = None;
                }
            }
        }

        EnrichedRecord {
            variant: self.variant,
            offer,
        }
    }
}

/// A record ready to be written to the output document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedRecord {
    pub variant: CatalogVariant,
    pub offer: Offer,
}

impl EnrichedRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        self.offer.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fotos_record() -> DecodedRecord {
        DecodedRecord::new(
            CatalogVariant::Fotos,
            Offer::PriceList(PriceListItem {
                id: "7".into(),
                available: Some("false".into()),
                stock: Some(FOTOS_IN_STOCK.into()),
                ..PriceListItem::default()
            }),
        )
    }

    #[test]
    fn empty_enrichment_keeps_record() {
        let record = fotos_record();
        let enriched = record.clone().enrich(Enrichment::default());
        assert_eq!(enriched.offer, record.offer);
    }

    #[test]
    fn availability_replaces_stock_element() {
        let enriched = fotos_record().enrich(Enrichment {
            available: Some(true),
            ..Enrichment::default()
        });
        let Offer::PriceList(item) = enriched.offer else {
            panic!("expected a price list item");
        };
        assert_eq!(item.available.as_deref(), Some("true"));
        assert_eq!(item.stock, None);
    }

    #[test]
    fn attributes_are_overwritten() {
        let record = DecodedRecord::new(
            CatalogVariant::Go,
            Offer::Yml(YmlOffer {
                id: "1".into(),
                params: vec![Param::new("old", "x")],
                ..YmlOffer::default()
            }),
        );
        let enriched = record.enrich(Enrichment {
            attributes: Some(vec![Param::new("Color", "Red")]),
            description: Some("text".into()),
            ..Enrichment::default()
        });
        assert_eq!(enriched.offer.params(), &[Param::new("Color", "Red")]);
        assert_eq!(enriched.offer.description(), Some("text"));
    }

    #[test]
    fn yml_offer_decodes_attributes_and_elements() {
        let xml = r#"<offer id="12" available="true" bid="3"><url>http://a/1</url><price>10</price><name>Cam</name><param name="Weight">1kg</param></offer>"#;
        let offer = CatalogVariant::ShopArt.decode(xml).unwrap();
        let Offer::Yml(offer) = offer else {
            panic!("expected a YML offer");
        };
        assert_eq!(offer.id, "12");
        assert_eq!(offer.bid.as_deref(), Some("3"));
        assert_eq!(offer.url.as_deref(), Some("http://a/1"));
        assert_eq!(offer.params, vec![Param::new("Weight", "1kg")]);
        assert_eq!(offer.vendor, None);
    }

    #[test]
    fn repeated_pictures_decode_and_serialize_back() {
        let xml = r#"<offer id="5"><url>http://a/5</url><picture>http://a/5/1.jpg</picture><picture>http://a/5/2.jpg</picture><name>Cam</name></offer>"#;
        let Offer::Yml(offer) = CatalogVariant::Go.decode(xml).unwrap() else {
            panic!("expected a YML offer");
        };
        assert_eq!(offer.pictures, ["http://a/5/1.jpg", "http://a/5/2.jpg"]);

        let written = quick_xml::se::to_string_with_root("offer", &offer).unwrap();
        assert_eq!(written.matches("<picture>").count(), 2);
    }

    #[test]
    fn interleaved_lists_decode() {
        let xml = r#"<offer id="6"><param name="A">1</param><name>Cam</name><param name="B">2</param><picture>p1</picture><vendor>V</vendor><picture>p2</picture></offer>"#;
        let Offer::Yml(offer) = CatalogVariant::Eldorado.decode(xml).unwrap() else {
            panic!("expected a YML offer");
        };
        assert_eq!(offer.params, vec![Param::new("A", "1"), Param::new("B", "2")]);
        assert_eq!(offer.pictures, ["p1", "p2"]);
        assert_eq!(offer.name.as_deref(), Some("Cam"));

        let xml = r#"<item id="7"><image>i1</image><name>Lens</name><image>i2</image><param name="A">1</param><vendor>V</vendor><param name="B">2</param></item>"#;
        let Offer::PriceList(item) = CatalogVariant::Fotos.decode(xml).unwrap() else {
            panic!("expected a price list item");
        };
        assert_eq!(item.images, ["i1", "i2"]);
        assert_eq!(item.params.len(), 2);
    }

    #[test]
    fn item_without_id_fails_to_decode() {
        assert!(CatalogVariant::Go.decode("<offer><url>x</url></offer>").is_err());
    }
}
