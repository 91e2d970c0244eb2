//! # Document Assembler
//!
//! Merges the structural tokens and the enriched records of one job into the
//! output document, then hands the document to the sink.
//!
//! Both queues are drained in arrival order, structural tokens first when
//! both have something ready. The tokenizer always enqueues the prologue
//! before the first record, so the prologue lands ahead of every record.
//! Once both queues are closed the assembler closes every element it still
//! has open, innermost first: normally just the collection, root and outer
//! elements the tokenizer marked as opened, plus whatever a truncated input
//! left dangling.

use std::sync::Arc;

use quick_xml::events::{BytesDecl, BytesEnd, Event};
use quick_xml::writer::Writer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{EnrichedRecord, JobMeta, Offer, Role, SchemaDescriptor, Sink};
use crate::pipeline::PipelineError;
use crate::pipeline::state::ParserState;
use crate::pipeline::tokenizer::StructuralToken;

const INDENT_SIZE: usize = 2;

/// What went into one assembled document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblySummary {
    pub tokens: u64,
    pub records: u64,
    pub skipped: u64,
    pub document_bytes: usize,
}

pub struct DocumentAssembler {
    schema: SchemaDescriptor,
    state: Arc<ParserState>,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
}

impl DocumentAssembler {
    #[must_use]
    pub fn new(
        schema: SchemaDescriptor,
        state: Arc<ParserState>,
        sink: Arc<dyn Sink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            schema,
            state,
            sink,
            cancel,
        }
    }

    /// Builds the document and delivers it. Returns without delivering when
    /// cancelled.
    pub async fn run(
        self,
        job: JobMeta,
        structure: mpsc::Receiver<StructuralToken>,
        records: mpsc::Receiver<EnrichedRecord>,
    ) -> Result<AssemblySummary, PipelineError> {
        self.state.set_writer_active(true);
        let result = self.assemble(&job, structure, records).await;
        self.state.set_writer_active(false);
        result
    }

    async fn assemble(
        &self,
        job: &JobMeta,
        mut structure: mpsc::Receiver<StructuralToken>,
        mut records: mpsc::Receiver<EnrichedRecord>,
    ) -> Result<AssemblySummary, PipelineError> {
        let mut document = DocumentBuffer::new(self.schema);
        let mut structure_open = true;
        let mut records_open = true;

        while structure_open || records_open {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!(job = %job.name, "Assembly cancelled, nothing delivered");
                    return Err(PipelineError::Cancelled);
                }
                token = structure.recv(), if structure_open => match token {
                    Some(token) => document.write_token(token),
                    None => structure_open = false,
                },
                record = records.recv(), if records_open => match record {
                    Some(record) => document.write_record(&record),
                    None => records_open = false,
                },
            }
        }

        let (bytes, mut summary) = document.finish();
        summary.document_bytes = bytes.len();
        debug!(
            job = %job.name,
            tokens = summary.tokens,
            records = summary.records,
            skipped = summary.skipped,
            "Document assembled"
        );

        self.sink.deliver(job, bytes).await?;
        info!(job = %job.name, bytes = summary.document_bytes, "Document delivered");
        Ok(summary)
    }
}

/// Element left open in the output, with the structural role it carries
#[derive(Debug)]
struct OpenElement {
    name: String,
    role: Option<Role>,
}

/// Indented output buffer that tracks the elements it has open
struct DocumentBuffer {
    writer: Writer<Vec<u8>>,
    schema: SchemaDescriptor,
    open: Vec<OpenElement>,
    summary: AssemblySummary,
}

impl DocumentBuffer {
    fn new(schema: SchemaDescriptor) -> Self {
        let mut buffer = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', INDENT_SIZE),
            schema,
            open: Vec::new(),
            summary: AssemblySummary::default(),
        };
        let decl = Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None));
        if let Err(e) = buffer.writer.write_event(decl) {
            warn!(error = %e, "Failed to write the XML declaration");
        }
        buffer
    }

    fn write_token(&mut self, token: StructuralToken) {
        let StructuralToken { event, opens } = token;
        let opened = match &event {
            Event::Start(start) => Some(String::from_utf8_lossy(start.name().as_ref()).into_owned()),
            _ => None,
        };
        let closes = matches!(event, Event::End(_));

        match self.writer.write_event(event) {
            Ok(()) => {
                self.summary.tokens += 1;
                if let Some(name) = opened {
                    self.open.push(OpenElement { name, role: opens });
                } else if closes {
                    self.open.pop();
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping structural token that failed to encode");
                self.summary.skipped += 1;
            }
        }
    }

    fn write_record(&mut self, record: &EnrichedRecord) {
        let item = self.schema.item;
        let written = match &record.offer {
            Offer::Yml(offer) => self.writer.write_serializable(item, offer),
            Offer::PriceList(entry) => self.writer.write_serializable(item, entry),
        };
        match written {
            Ok(()) => self.summary.records += 1,
            Err(e) => {
                warn!(id = record.id(), error = %e, "Skipping record that failed to encode");
                self.summary.skipped += 1;
            }
        }
    }

    fn finish(mut self) -> (Vec<u8>, AssemblySummary) {
        while let Some(element) = self.open.pop() {
            if element.role.is_none() {
                warn!(element = %element.name, "Closing element left open by truncated input");
            }
            let end = Event::End(BytesEnd::new(element.name));
            if let Err(e) = self.writer.write_event(end) {
                warn!(role = ?element.role, error = %e, "Failed to close element");
            }
        }
        (self.writer.into_inner(), self.summary)
    }
}
