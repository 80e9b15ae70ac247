// src/extract/mod.rs
//! Tolerant DATEX II extraction: SOAP envelope → `SituationRecord`s.
//!
//! Structural misses never raise. They skip the narrowest enclosing scope
//! (record, then situation, then document), get logged, and are kept on the
//! stream as [`Diagnostic`]s so callers can count them.

pub mod timestamp;
pub mod tree;

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{RawFeedDocument, Situation, SituationRecord};
use tree::Element;

pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

const BODY: &str = "Body";
const LOGICAL_MODEL: &str = "d2LogicalModel";
const PAYLOAD_PUBLICATION: &str = "payloadPublication";
const SITUATION: &str = "situation";
const SITUATION_RECORD: &str = "situationRecord";
const EXTENSION_TAG: &str = "situationRecordExtension";

const START_PATH: [&str; 3] = ["validity", "validityTimeSpecification", "overallStartTime"];
const END_PATH: [&str; 3] = ["validity", "validityTimeSpecification", "overallEndTime"];

/// Where the town-name lookup for `Location` looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationScope {
    /// First `townName` descriptor anywhere in the document, for every record.
    #[default]
    Document,
    /// Inside the record first, document-wide as a fallback.
    RecordThenDocument,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    pub location_scope: LocationScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Document,
    Situation,
    Record,
}

impl Scope {
    fn as_str(self) -> &'static str {
        match self {
            Scope::Document => "document",
            Scope::Situation => "situation",
            Scope::Record => "record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Malformed(String),
    NoBody,
    NoLogicalModel,
    NoPayloadPublication,
    NoSituations,
    MissingSituationId,
    NoSituationRecords,
    MissingRecordId,
}

impl DiagnosticKind {
    pub fn scope(&self) -> Scope {
        match self {
            DiagnosticKind::Malformed(_)
            | DiagnosticKind::NoBody
            | DiagnosticKind::NoLogicalModel
            | DiagnosticKind::NoPayloadPublication
            | DiagnosticKind::NoSituations => Scope::Document,
            DiagnosticKind::MissingSituationId | DiagnosticKind::NoSituationRecords => {
                Scope::Situation
            }
            DiagnosticKind::MissingRecordId => Scope::Record,
        }
    }

    pub fn is_structural_miss(&self) -> bool {
        !matches!(self, DiagnosticKind::Malformed(_))
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Malformed(msg) => write!(f, "malformed xml: {msg}"),
            DiagnosticKind::NoBody => f.write_str("no body"),
            DiagnosticKind::NoLogicalModel => f.write_str("no d2LogicalModel"),
            DiagnosticKind::NoPayloadPublication => f.write_str("no payloadPublication"),
            DiagnosticKind::NoSituations => f.write_str("no situation"),
            DiagnosticKind::MissingSituationId => f.write_str("situation without id"),
            DiagnosticKind::NoSituationRecords => f.write_str("situation without situationRecord"),
            DiagnosticKind::MissingRecordId => f.write_str("situationRecord without id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub source_file: String,
    pub scope: Scope,
    pub kind: DiagnosticKind,
    /// Situation id (and record position) when the miss is below document level.
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub records: usize,
    pub structural_misses: usize,
    pub parse_errors: usize,
}

/// Situation whose records are being handed out.
struct OpenSituation {
    header: Situation,
    records: std::iter::Enumerate<std::vec::IntoIter<Element>>,
}

/// Lazy, single-pass sequence of records of one document.
///
/// Situations are split off the parsed publication up front and owned by the
/// stream; each record is built only when `next` asks for it.
pub struct RecordStream {
    source_file: String,
    options: ExtractOptions,
    document_location: Option<String>,
    situations: std::vec::IntoIter<Element>,
    current: Option<OpenSituation>,
    diagnostics: Vec<Diagnostic>,
    stats: ExtractStats,
}

pub fn extract(doc: RawFeedDocument) -> RecordStream {
    extract_with(doc, ExtractOptions::default())
}

pub fn extract_with(doc: RawFeedDocument, options: ExtractOptions) -> RecordStream {
    crate::metrics::describe_once();
    counter!("feed_documents_total").increment(1);
    let RawFeedDocument {
        source_file,
        content,
    } = doc;

    let mut stream = RecordStream {
        source_file,
        options,
        document_location: None,
        situations: Vec::new().into_iter(),
        current: None,
        diagnostics: Vec::new(),
        stats: ExtractStats::default(),
    };

    let mut root = match tree::parse(&content) {
        Ok(root) => root,
        Err(e) => {
            stream.report(DiagnosticKind::Malformed(e.to_string()), None);
            return stream;
        }
    };
    drop(content);

    // Looked up before situations are split off the tree.
    let location = town_name(&root);
    match split_situations(&mut root) {
        Ok(situations) => {
            stream.document_location = location;
            stream.situations = situations.into_iter();
            tracing::debug!(
                source_file = %stream.source_file,
                situations = stream.situations.len(),
                "feed document opened"
            );
        }
        Err(kind) => stream.report(kind, None),
    }
    stream
}

/// Walk body → logical model → publication and move every situation out.
fn split_situations(root: &mut Element) -> Result<Vec<Element>, DiagnosticKind> {
    let body = find_local_mut(root, BODY).ok_or(DiagnosticKind::NoBody)?;
    let model = body
        .children
        .iter_mut()
        .find(|c| c.name == LOGICAL_MODEL)
        .ok_or(DiagnosticKind::NoLogicalModel)?;
    let publication =
        find_local_mut(model, PAYLOAD_PUBLICATION).ok_or(DiagnosticKind::NoPayloadPublication)?;

    let mut situations = Vec::new();
    take_all(publication, SITUATION, &mut situations);
    if situations.is_empty() {
        return Err(DiagnosticKind::NoSituations);
    }
    Ok(situations)
}

fn find_local_mut<'a>(el: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    for child in el.children.iter_mut() {
        if child.name == name {
            return Some(child);
        }
        if let Some(found) = find_local_mut(child, name) {
            return Some(found);
        }
    }
    None
}

/// Move every descendant named `name` into `out`, in document order. A taken
/// element is not searched further.
fn take_all(el: &mut Element, name: &str, out: &mut Vec<Element>) {
    let children = std::mem::take(&mut el.children);
    for mut child in children {
        if child.name == name {
            out.push(child);
        } else {
            take_all(&mut child, name, out);
            el.children.push(child);
        }
    }
}

impl RecordStream {
    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn stats(&self) -> ExtractStats {
        self.stats
    }

    /// Document-wide town name, if the document has one.
    pub fn document_location(&self) -> Option<&str> {
        self.document_location.as_deref()
    }

    fn report(&mut self, kind: DiagnosticKind, context: Option<String>) {
        let scope = kind.scope();
        if kind.is_structural_miss() {
            self.stats.structural_misses += 1;
            counter!("feed_structural_miss_total", "scope" => scope.as_str()).increment(1);
            tracing::warn!(
                source_file = %self.source_file,
                scope = scope.as_str(),
                context = context.as_deref().unwrap_or_default(),
                "structural miss: {kind}"
            );
        } else {
            self.stats.parse_errors += 1;
            counter!("feed_parse_errors_total").increment(1);
            tracing::warn!(source_file = %self.source_file, "skipping document: {kind}");
        }
        self.diagnostics.push(Diagnostic {
            source_file: self.source_file.clone(),
            scope,
            kind,
            context,
        });
    }

    fn open_situation(&mut self, mut el: Element) -> Option<OpenSituation> {
        let Some(id) = el.attr("id").map(str::to_string) else {
            self.report(DiagnosticKind::MissingSituationId, None);
            return None;
        };
        let header = Situation {
            version: el.attr("version").unwrap_or_default().to_string(),
            severity: el.first_text("overallSeverity").map(str::to_string),
            version_time: el.first_text("situationVersionTime").map(str::to_string),
            id,
        };

        let mut records = Vec::new();
        take_all(&mut el, SITUATION_RECORD, &mut records);
        if records.is_empty() {
            self.report(DiagnosticKind::NoSituationRecords, Some(header.id));
            return None;
        }
        Some(OpenSituation {
            header,
            records: records.into_iter().enumerate(),
        })
    }
}

impl Iterator for RecordStream {
    type Item = SituationRecord;

    fn next(&mut self) -> Option<SituationRecord> {
        loop {
            let pending = self
                .current
                .as_mut()
                .and_then(|open| open.records.next().map(|r| (open.header.clone(), r)));

            match pending {
                Some((header, (idx, el))) => {
                    let ctx = RecordContext {
                        source_file: &self.source_file,
                        document_location: self.document_location.as_deref(),
                        options: self.options,
                    };
                    match build_record(header, &el, &ctx) {
                        Ok(record) => {
                            self.stats.records += 1;
                            counter!("feed_records_extracted_total").increment(1);
                            return Some(record);
                        }
                        Err((kind, situation_id)) => {
                            self.report(kind, Some(format!("{situation_id}#{idx}")));
                        }
                    }
                }
                None => {
                    self.current = None;
                    let situation = self.situations.next()?;
                    self.current = self.open_situation(situation);
                }
            }
        }
    }
}

struct RecordContext<'a> {
    source_file: &'a str,
    document_location: Option<&'a str>,
    options: ExtractOptions,
}

fn owned(v: Option<&str>) -> Option<String> {
    v.map(str::to_string)
}

fn build_record(
    situation: Situation,
    el: &Element,
    ctx: &RecordContext<'_>,
) -> Result<SituationRecord, (DiagnosticKind, String)> {
    let Some(record_id) = el.attr("id") else {
        return Err((DiagnosticKind::MissingRecordId, situation.id));
    };
    let record_type = el.attr_ns(XSI_NAMESPACE, "type").unwrap_or_default();

    let (latitude, longitude) = match el.find_local("pointCoordinates") {
        Some(pc) => (owned(pc.first_text("latitude")), owned(pc.first_text("longitude"))),
        None => (None, None),
    };

    let start_time = el.find_path(&START_PATH).and_then(Element::text);
    let end_time = el.find_path(&END_PATH).and_then(Element::text);

    let sub_type = el
        .find_first(|e| e.name.contains("Type") && e.name != EXTENSION_TAG)
        .and_then(Element::text);

    let location = match ctx.options.location_scope {
        LocationScope::Document => owned(ctx.document_location),
        LocationScope::RecordThenDocument => {
            town_name(el).or_else(|| owned(ctx.document_location))
        }
    };

    Ok(SituationRecord {
        record_id: record_id.to_string(),
        record_version: el.attr("version").unwrap_or_default().to_string(),
        status: derive_status(el, record_type),
        record_type: record_type.to_string(),
        queue_length: owned(el.first_text("queueLength")),
        latitude,
        longitude,
        road_number: owned(el.first_text("roadNumber")),
        start_display: timestamp::display_raw(start_time),
        end_display: timestamp::display_raw(end_time),
        is_ended: end_time.is_some(),
        start_time: owned(start_time),
        end_time: owned(end_time),
        sub_type: owned(sub_type),
        direction: owned(el.first_text("tpegDirection")),
        location,
        source_file: ctx.source_file.to_string(),
        situation,
    })
}

/// One step of the status chain: `probe` looks for a value in the record,
/// `render` turns a hit into the status string.
struct StatusRule {
    probe: fn(&Element, &str) -> Option<String>,
    render: fn(&str) -> String,
}

fn probe_mobility(rec: &Element, _: &str) -> Option<String> {
    owned(rec.first_text("mobility"))
}

fn probe_compliance(rec: &Element, _: &str) -> Option<String> {
    owned(rec.first_text("compliance"))
}

fn probe_works(_: &Element, record_type: &str) -> Option<String> {
    let t = record_type.to_lowercase();
    (t.contains("works") || t.contains("maintenance")).then(String::new)
}

fn probe_constriction(rec: &Element, _: &str) -> Option<String> {
    owned(rec.first_text("trafficConstrictionType"))
}

const STATUS_CHAIN: [StatusRule; 4] = [
    StatusRule {
        probe: probe_mobility,
        render: |v| format!("Vehicle {v}"),
    },
    StatusRule {
        probe: probe_compliance,
        render: |v| format!("Measure {v}"),
    },
    StatusRule {
        probe: probe_works,
        render: |_| "Works".to_string(),
    },
    StatusRule {
        probe: probe_constriction,
        render: |v| format!("Impact {v}"),
    },
];

pub const DEFAULT_STATUS: &str = "Ongoing";

/// First rule whose probe hits decides; later rules are never evaluated.
pub fn derive_status(record: &Element, record_type: &str) -> String {
    STATUS_CHAIN
        .iter()
        .find_map(|rule| (rule.probe)(record, record_type).map(|v| (rule.render)(&v)))
        .unwrap_or_else(|| DEFAULT_STATUS.to_string())
}

/// First `name` whose `tpegOtherPointDescriptorType` child says `townName`,
/// read through its French `value`.
fn town_name(scope: &Element) -> Option<String> {
    scope
        .find_all_local("name")
        .filter(|n| {
            n.children
                .iter()
                .any(|c| c.name == "tpegOtherPointDescriptorType" && c.text() == Some("townName"))
        })
        .find_map(|n| {
            n.find_first(|v| v.name == "value" && v.attr("lang") == Some("fr"))
                .and_then(Element::text)
        })
        .map(str::to_string)
}
