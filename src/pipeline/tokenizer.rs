//! # Stream Tokenizer
//!
//! Reads a catalog document one XML event at a time. Item elements inside the
//! item collection are collected as a subtree and decoded into the job's
//! record type; everything else that belongs to the document structure is
//! forwarded unchanged to the assembler.
//!
//! Forwarding is decided by [`ForwardingPolicy`], a small state machine over
//! the document regions driven by the variant's [`SchemaDescriptor`]:
//!
//! ```text
//! Prologue --<collection>--> Collection --</collection>--> Epilogue
//! ```
//!
//! End tags of the item collection, root wrapper and outer document are never
//! forwarded; the assembler synthesizes them.

use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{CatalogVariant, DecodedRecord, JobInput, Role, SchemaDescriptor};
use crate::pipeline::state::ParserState;

/// A parsed unit of the input that is not part of an item element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralToken {
    pub event: Event<'static>,
    /// Set on the start tag of the outer document, root wrapper or item
    /// collection; their end tags are never forwarded
    pub opens: Option<Role>,
}

impl StructuralToken {
    #[must_use]
    pub const fn new(event: Event<'static>) -> Self {
        Self { event, opens: None }
    }

    #[must_use]
    pub const fn opening(event: Event<'static>, role: Role) -> Self {
        Self {
            event,
            opens: Some(role),
        }
    }
}

/// Maximum number of items decoded per job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLimit(Option<u64>);

impl ItemLimit {
    pub const UNLIMITED: ItemLimit = ItemLimit(None);

    /// Command-line convention: negative means unlimited
    #[must_use]
    pub fn from_flag(limit: i64) -> Self {
        Self(u64::try_from(limit).ok())
    }

    #[must_use]
    pub const fn at_most(limit: u64) -> Self {
        Self(Some(limit))
    }

    #[must_use]
    pub fn is_reached(self, decoded: u64) -> bool {
        self.0.is_some_and(|limit| decoded >= limit)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Malformed item element: {0}")]
    Item(String),
}

/// Why the tokenizer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfInput,
    LimitReached,
    Cancelled,
    DownstreamClosed,
    Malformed(TokenizeError),
}

/// What the tokenizer did with one job's input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizeSummary {
    pub decoded: u64,
    pub skipped: u64,
    pub forwarded: u64,
    pub stop: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Prologue,
    Collection,
    Epilogue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Forwarded; carries the structural role the element opens
    Forward(Option<Role>),
    Item,
    Drop,
}

/// Decides, event by event, what is forwarded, intercepted or dropped.
/// Roles are assigned by position and at most once per document, so a
/// nested element that happens to share a structural tag name is forwarded
/// like any other element.
#[derive(Debug)]
struct ForwardingPolicy {
    schema: SchemaDescriptor,
    region: Region,
    open: Vec<Option<Role>>,
    assigned: Vec<Role>,
}

impl ForwardingPolicy {
    fn new(schema: SchemaDescriptor) -> Self {
        Self {
            schema,
            region: Region::Prologue,
            open: Vec::new(),
            assigned: Vec::new(),
        }
    }

    fn role_of(&self, name: &[u8]) -> Option<Role> {
        self.schema
            .role_at(self.open.last().copied(), name)
            .filter(|role| *role == Role::Item || !self.assigned.contains(role))
    }

    fn on_start(&mut self, name: &[u8]) -> Disposition {
        let role = self.role_of(name);
        match role {
            Some(Role::Item) if self.region == Region::Collection => return Disposition::Item,
            Some(Role::ItemCollection) => self.region = Region::Collection,
            _ => {}
        }
        if let Some(role) = role {
            self.assigned.push(role);
        }
        self.open.push(role);
        Disposition::Forward(role.filter(|role| *role != Role::Item))
    }

    fn on_empty(&self, name: &[u8]) -> Disposition {
        if self.region == Region::Collection && self.role_of(name) == Some(Role::Item) {
            Disposition::Item
        } else {
            Disposition::Forward(None)
        }
    }

    fn on_end(&mut self) -> Disposition {
        match self.open.pop().flatten() {
            Some(Role::ItemCollection) => {
                self.region = Region::Epilogue;
                Disposition::Drop
            }
            Some(Role::RootWrapper | Role::OuterDocument) => Disposition::Drop,
            _ => Disposition::Forward(None),
        }
    }

    fn on_text(text: &[u8]) -> Disposition {
        if text.iter().all(u8::is_ascii_whitespace) {
            Disposition::Drop
        } else {
            Disposition::Forward(None)
        }
    }
}

/// Splits one document into decode tasks and structural tokens
pub struct StreamTokenizer {
    variant: CatalogVariant,
    limit: ItemLimit,
    state: Arc<ParserState>,
    records: mpsc::Sender<DecodedRecord>,
    structure: mpsc::Sender<StructuralToken>,
    cancel: CancellationToken,
}

impl StreamTokenizer {
    #[must_use]
    pub fn new(
        variant: CatalogVariant,
        limit: ItemLimit,
        state: Arc<ParserState>,
        records: mpsc::Sender<DecodedRecord>,
        structure: mpsc::Sender<StructuralToken>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            variant,
            limit,
            state,
            records,
            structure,
            cancel,
        }
    }

    /// Tokenizes the whole input. Consumes the tokenizer so both output
    /// queues close when it returns, and drops the input on every path.
    pub async fn run(self, input: JobInput) -> TokenizeSummary {
        self.state.set_reader_active(true);
        info!(variant = %self.variant, "Catalog reader started");

        let summary = self.tokenize(input).await;

        match &summary.stop {
            StopReason::Malformed(e) => error!(error = %e, "Catalog reader halted"),
            stop => debug!(?stop, "Catalog reader stopped"),
        }
        info!(
            decoded = summary.decoded,
            skipped = summary.skipped,
            forwarded = summary.forwarded,
            "Catalog reader finished"
        );
        self.state.set_reader_active(false);
        summary
    }

    async fn tokenize(&self, input: JobInput) -> TokenizeSummary {
        let mut reader = Reader::from_reader(input);
        let mut policy = ForwardingPolicy::new(self.variant.schema());
        let mut buf = Vec::new();
        let mut summary = TokenizeSummary {
            decoded: 0,
            skipped: 0,
            forwarded: 0,
            stop: StopReason::EndOfInput,
        };

        let stop = loop {
            buf.clear();
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break StopReason::Cancelled,
                event = reader.read_event_into_async(&mut buf) => event,
            };
            let event = match event {
                Ok(Event::Eof) => break StopReason::EndOfInput,
                Ok(event) => event.into_owned(),
                Err(e) => break StopReason::Malformed(TokenizeError::Malformed(e.to_string())),
            };

            let step = match event {
                Event::Start(start) => match policy.on_start(start.name().as_ref()) {
                    Disposition::Item => Step::Item(ItemElement::Open(start)),
                    Disposition::Forward(Some(role)) => {
                        Step::Forward(StructuralToken::opening(Event::Start(start), role))
                    }
                    Disposition::Forward(None) => Step::Forward(StructuralToken::new(Event::Start(start))),
                    Disposition::Drop => Step::Skip,
                },
                Event::Empty(start) => match policy.on_empty(start.name().as_ref()) {
                    Disposition::Item => Step::Item(ItemElement::Empty(start)),
                    Disposition::Forward(_) => Step::Forward(StructuralToken::new(Event::Empty(start))),
                    Disposition::Drop => Step::Skip,
                },
                Event::End(end) => match policy.on_end() {
                    Disposition::Forward(_) => Step::Forward(StructuralToken::new(Event::End(end))),
                    _ => Step::Skip,
                },
                Event::Text(text) => match ForwardingPolicy::on_text(&text) {
                    Disposition::Forward(_) => Step::Forward(StructuralToken::new(Event::Text(text))),
                    _ => Step::Skip,
                },
                Event::CData(data) => match ForwardingPolicy::on_text(&data) {
                    Disposition::Forward(_) => Step::Forward(StructuralToken::new(Event::CData(data))),
                    _ => Step::Skip,
                },
                // declaration, comments, processing instructions, doctype
                _ => Step::Skip,
            };

            match step {
                Step::Skip => {}
                Step::Forward(token) => {
                    if let Err(stop) = self.send(&self.structure, token).await {
                        break stop;
                    }
                    summary.forwarded += 1;
                }
                Step::Item(element) => {
                    if self.limit.is_reached(summary.decoded) {
                        break StopReason::LimitReached;
                    }
                    let raw = match element {
                        ItemElement::Open(start) => read_item(&mut reader, start).await,
                        ItemElement::Empty(start) => write_empty_item(start),
                    };
                    let raw = match raw {
                        Ok(raw) => raw,
                        Err(e @ TokenizeError::Malformed(_)) => break StopReason::Malformed(e),
                        Err(e) => {
                            warn!(error = %e, "Skipping unreadable item element");
                            summary.skipped += 1;
                            continue;
                        }
                    };
                    let Some(record) = self.decode(&raw) else {
                        summary.skipped += 1;
                        continue;
                    };
                    if let Err(stop) = self.send(&self.records, record).await {
                        break stop;
                    }
                    summary.decoded += 1;
                    self.state.record_decoded();
                    if self.limit.is_reached(summary.decoded) {
                        break StopReason::LimitReached;
                    }
                }
            }
        };

        summary.stop = stop;
        summary
    }

    fn decode(&self, raw: &[u8]) -> Option<DecodedRecord> {
        let element = match std::str::from_utf8(raw) {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, "Skipping item element with invalid UTF-8");
                return None;
            }
        };
        match self.variant.decode(element) {
            Ok(offer) => Some(DecodedRecord::new(self.variant, offer)),
            Err(e) => {
                warn!(error = %e, "Skipping item element that failed to decode");
                None
            }
        }
    }

    async fn send<T>(&self, queue: &mpsc::Sender<T>, value: T) -> Result<(), StopReason> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(StopReason::Cancelled),
            sent = queue.send(value) => sent.map_err(|_| StopReason::DownstreamClosed),
        }
    }
}

enum ItemElement {
    Open(BytesStart<'static>),
    Empty(BytesStart<'static>),
}

enum Step {
    Forward(StructuralToken),
    Item(ItemElement),
    Skip,
}

/// Collects the subtree of an item element, starting after its start tag
async fn read_item<R>(reader: &mut Reader<R>, start: BytesStart<'static>) -> Result<Vec<u8>, TokenizeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Start(start))
        .map_err(|e| TokenizeError::Item(e.to_string()))?;

    let mut buf = Vec::new();
    let mut depth = 1usize;
    while depth > 0 {
        buf.clear();
        let event = reader
            .read_event_into_async(&mut buf)
            .await
            .map_err(|e| TokenizeError::Malformed(e.to_string()))?;
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => {
                return Err(TokenizeError::Malformed(
                    "unexpected end of input inside an item element".to_string(),
                ));
            }
            _ => {}
        }
        writer
            .write_event(event)
            .map_err(|e| TokenizeError::Item(e.to_string()))?;
    }

    Ok(writer.into_inner())
}

fn write_empty_item(start: BytesStart<'static>) -> Result<Vec<u8>, TokenizeError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Empty(start))
        .map_err(|e| TokenizeError::Item(e.to_string()))?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Offer;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<yml_catalog date="2016-01-01">
  <shop>
    <name>Shop</name>
    <categories><category id="1">Cameras</category></categories>
    <offers>
      <offer id="1"><url>http://shop/1</url></offer>
      <offer><url>http://shop/no-id</url></offer>
      <offer id="2"><url>http://shop/2</url></offer>
      <offer id="3"/>
    </offers>
  </shop>
</yml_catalog>"#;

    async fn tokenize(
        document: &'static str,
        limit: ItemLimit,
    ) -> (TokenizeSummary, Vec<DecodedRecord>, Vec<StructuralToken>) {
        let (record_tx, mut record_rx) = mpsc::channel(64);
        let (token_tx, mut token_rx) = mpsc::channel(64);
        let state = Arc::new(ParserState::new());
        let tokenizer = StreamTokenizer::new(
            CatalogVariant::ShopArt,
            limit,
            state.clone(),
            record_tx,
            token_tx,
            CancellationToken::new(),
        );
        let summary = tokenizer
            .run(Box::new(std::io::Cursor::new(document.as_bytes())))
            .await;
        assert!(!state.is_reader_active());

        let mut records = Vec::new();
        while let Some(record) = record_rx.recv().await {
            records.push(record);
        }
        let mut tokens = Vec::new();
        while let Some(token) = token_rx.recv().await {
            tokens.push(token);
        }
        (summary, records, tokens)
    }

    fn names(tokens: &[StructuralToken]) -> Vec<String> {
        tokens
            .iter()
            .map(|token| match &token.event {
                Event::Start(e) => format!("<{}>", String::from_utf8_lossy(e.name().as_ref())),
                Event::End(e) => format!("</{}>", String::from_utf8_lossy(e.name().as_ref())),
                Event::Empty(e) => format!("<{}/>", String::from_utf8_lossy(e.name().as_ref())),
                Event::Text(t) => String::from_utf8_lossy(t).into_owned(),
                other => format!("{other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn splits_items_from_structure() {
        let (summary, records, tokens) = tokenize(FEED, ItemLimit::UNLIMITED).await;

        assert_eq!(summary.stop, StopReason::EndOfInput);
        assert_eq!(summary.decoded, 3);
        assert_eq!(summary.skipped, 1);
        let ids: Vec<_> = records.iter().map(DecodedRecord::id).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert!(matches!(&records[0].offer, Offer::Yml(o) if o.url.as_deref() == Some("http://shop/1")));

        assert_eq!(
            names(&tokens),
            [
                "<yml_catalog>",
                "<shop>",
                "<name>",
                "Shop",
                "</name>",
                "<categories>",
                "<category>",
                "Cameras",
                "</category>",
                "</categories>",
                "<offers>",
            ]
        );
        assert_eq!(summary.forwarded, 11);
    }

    #[tokio::test]
    async fn limit_stops_after_k_items() {
        let (summary, records, _) = tokenize(FEED, ItemLimit::at_most(1)).await;
        assert_eq!(summary.stop, StopReason::LimitReached);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn zero_limit_keeps_the_prologue() {
        let (summary, records, tokens) = tokenize(FEED, ItemLimit::at_most(0)).await;
        assert_eq!(summary.stop, StopReason::LimitReached);
        assert!(records.is_empty());
        assert_eq!(names(&tokens).last().map(String::as_str), Some("<offers>"));
    }

    #[tokio::test]
    async fn malformed_input_halts_the_reader() {
        let document = "<yml_catalog><shop><offers><offer id=\"1\"></offer></shop></yml_catalog>";
        let (summary, records, _) = tokenize(document, ItemLimit::UNLIMITED).await;
        assert!(matches!(summary.stop, StopReason::Malformed(_)));
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn item_tags_outside_the_collection_are_structure() {
        let document = "<yml_catalog><shop><offer id=\"9\">promo</offer><offers/></shop></yml_catalog>";
        let (summary, records, tokens) = tokenize(document, ItemLimit::UNLIMITED).await;
        assert_eq!(summary.decoded, 0);
        assert!(records.is_empty());
        assert_eq!(
            names(&tokens),
            ["<yml_catalog>", "<shop>", "<offer>", "promo", "</offer>", "<offers/>"]
        );
    }

    #[tokio::test]
    async fn structural_names_nested_in_the_prologue_keep_their_end_tags() {
        let (record_tx, mut record_rx) = mpsc::channel(8);
        let (token_tx, mut token_rx) = mpsc::channel(32);
        let document = r#"<price><catalog><currency><price>41.5</price></currency><items><item id="1"><name>Lens</name></item></items></catalog></price>"#;
        let summary = StreamTokenizer::new(
            CatalogVariant::Fotos,
            ItemLimit::UNLIMITED,
            Arc::new(ParserState::new()),
            record_tx,
            token_tx,
            CancellationToken::new(),
        )
        .run(Box::new(std::io::Cursor::new(document.as_bytes())))
        .await;
        assert_eq!(summary.decoded, 1);
        assert!(record_rx.recv().await.is_some());

        let mut tokens = Vec::new();
        while let Some(token) = token_rx.recv().await {
            tokens.push(token);
        }
        assert_eq!(
            names(&tokens),
            ["<price>", "<catalog>", "<currency>", "<price>", "41.5", "</price>", "</currency>", "<items>"]
        );
        let opens: Vec<_> = tokens.iter().map(|token| token.opens).collect();
        assert_eq!(
            opens,
            [
                Some(Role::OuterDocument),
                Some(Role::RootWrapper),
                None,
                None,
                None,
                None,
                None,
                Some(Role::ItemCollection),
            ]
        );
    }

    #[tokio::test]
    async fn structural_roles_are_assigned_once() {
        let document = r#"<yml_catalog><shop><offers><offer id="1"/></offers><offers><offer id="2"/></offers></shop></yml_catalog>"#;
        let (summary, records, tokens) = tokenize(document, ItemLimit::UNLIMITED).await;
        assert_eq!(summary.decoded, 1);
        assert_eq!(records[0].id(), "1");
        assert_eq!(
            names(&tokens),
            ["<yml_catalog>", "<shop>", "<offers>", "<offers>", "<offer/>", "</offers>"]
        );
        assert_eq!(tokens.iter().filter(|token| token.opens.is_some()).count(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_reader() {
        let (record_tx, _record_rx) = mpsc::channel(1);
        let (token_tx, _token_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = StreamTokenizer::new(
            CatalogVariant::Go,
            ItemLimit::UNLIMITED,
            Arc::new(ParserState::new()),
            record_tx,
            token_tx,
            cancel,
        )
        .run(Box::new(std::io::Cursor::new(FEED.as_bytes())))
        .await;
        assert_eq!(summary.stop, StopReason::Cancelled);
    }

    #[test]
    fn negative_flag_is_unlimited() {
        assert_eq!(ItemLimit::from_flag(-1), ItemLimit::UNLIMITED);
        assert!(!ItemLimit::from_flag(-5).is_reached(u64::MAX));
        assert!(ItemLimit::from_flag(2).is_reached(2));
        assert!(!ItemLimit::from_flag(2).is_reached(1));
    }
}
