//! Catalog variants and their structural schema
//!
//! Every supported retailer feed is one of a closed set of variants. A variant
//! pairs the tag names of its document shape with the record decoder used for
//! its item elements; the enrichment rules live in the infrastructure layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::offer::{Offer, PriceListItem, YmlOffer};

/// Structural role of an element in a catalog document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The repeating product element
    Item,
    /// Element wrapping all items
    ItemCollection,
    /// Shop-level wrapper around the collection
    RootWrapper,
    /// Outermost document element
    OuterDocument,
}

/// Maps the structural roles to the concrete tag names of one document shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchemaDescriptor {
    pub item: &'static str,
    pub item_collection: &'static str,
    pub root_wrapper: &'static str,
    pub outer_document: &'static str,
}

impl SchemaDescriptor {
    /// Yandex Market Language shape: `yml_catalog > shop > offers > offer`
    pub const YML: SchemaDescriptor = SchemaDescriptor {
        item: "offer",
        item_collection: "offers",
        root_wrapper: "shop",
        outer_document: "yml_catalog",
    };

    /// Price-list shape: `price > catalog > items > item`
    pub const PRICE_LIST: SchemaDescriptor = SchemaDescriptor {
        item: "item",
        item_collection: "items",
        root_wrapper: "catalog",
        outer_document: "price",
    };

    /// Tag name bound to a role
    #[must_use]
    pub const fn tag(&self, role: Role) -> &'static str {
        match role {
            Role::Item => self.item,
            Role::ItemCollection => self.item_collection,
            Role::RootWrapper => self.root_wrapper,
            Role::OuterDocument => self.outer_document,
        }
    }

    /// Role of an element by its position: the outer document at the top
    /// level, the root wrapper directly inside it, the collection inside the
    /// wrapper and items inside the collection. `parent` is `None` at the top
    /// level and `Some(None)` under a non-structural element.
    #[must_use]
    pub fn role_at(&self, parent: Option<Option<Role>>, tag: &[u8]) -> Option<Role> {
        let role = match parent {
            None => Role::OuterDocument,
            Some(Some(Role::OuterDocument)) => Role::RootWrapper,
            Some(Some(Role::RootWrapper)) => Role::ItemCollection,
            Some(Some(Role::ItemCollection)) => Role::Item,
            Some(_) => return None,
        };
        (self.tag(role).as_bytes() == tag).then_some(role)
    }
}

/// Error returned when a job name does not select a known catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("There is no parser for file - {0}")]
pub struct UnknownCatalog(pub String);

/// The closed set of supported retailer catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogVariant {
    ShopArt,
    Eldorado,
    Go,
    Fotos,
}

impl CatalogVariant {
    pub const ALL: [CatalogVariant; 4] = [
        CatalogVariant::ShopArt,
        CatalogVariant::Eldorado,
        CatalogVariant::Go,
        CatalogVariant::Fotos,
    ];

    /// Selects the variant from a job (file) name: the part before the first `.`
    pub fn from_job_name(job_name: &str) -> Result<Self, UnknownCatalog> {
        let shop_id = job_name.split('.').next().unwrap_or_default();
        shop_id
            .parse()
            .map_err(|_| UnknownCatalog(job_name.to_string()))
    }

    #[must_use]
    pub const fn shop_id(self) -> &'static str {
        match self {
            Self::ShopArt => "shopart",
            Self::Eldorado => "eldorado",
            Self::Go => "go",
            Self::Fotos => "fotos",
        }
    }

    #[must_use]
    pub const fn schema(self) -> SchemaDescriptor {
        match self {
            Self::ShopArt | Self::Eldorado | Self::Go => SchemaDescriptor::YML,
            Self::Fotos => SchemaDescriptor::PRICE_LIST,
        }
    }

    /// Decodes one serialized item element into this variant's record type
    pub fn decode(self, element: &str) -> Result<Offer, quick_xml::DeError> {
        match self {
            Self::ShopArt | Self::Eldorado | Self::Go => {
                quick_xml::de::from_str::<YmlOffer>(element).map(Offer::Yml)
            }
            Self::Fotos => quick_xml::de::from_str::<PriceListItem>(element).map(Offer::PriceList),
        }
    }
}

impl FromStr for CatalogVariant {
    type Err = UnknownCatalog;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.shop_id() == s)
            .ok_or_else(|| UnknownCatalog(s.to_string()))
    }
}

impl fmt::Display for CatalogVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.shop_id())
    }
}
