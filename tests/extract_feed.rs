// tests/extract_feed.rs
mod common;

use common::fixture;
use traffic_feed_ingest::extract::{extract, extract_with, DiagnosticKind, ExtractOptions, LocationScope, Scope};
use traffic_feed_ingest::model::{RawFeedDocument, SituationRecord};

fn records(name: &str) -> Vec<SituationRecord> {
    extract(fixture(name)).collect()
}

#[test]
fn prefixed_feed_yields_every_identified_record() {
    let mut stream = extract(fixture("feed_lyon.xml"));
    let recs: Vec<_> = stream.by_ref().collect();

    let keys: Vec<(&str, &str)> = recs
        .iter()
        .map(|r| (r.situation.id.as_str(), r.record_id.as_str()))
        .collect();
    assert_eq!(keys, vec![("S1", "R1"), ("S1", "R2"), ("S2", "R1"), ("S2", "R3")]);

    let stats = stream.stats();
    assert_eq!(stats.records, 4);
    assert_eq!(stats.structural_misses, 1);
    assert_eq!(stats.parse_errors, 0);
    let miss = &stream.diagnostics()[0];
    assert_eq!(miss.kind, DiagnosticKind::MissingRecordId);
    assert_eq!(miss.scope, Scope::Record);
    assert_eq!(miss.source_file, "feed_lyon.xml");
}

#[test]
fn accident_record_fields() {
    let recs = records("feed_lyon.xml");
    let r = &recs[0];
    assert_eq!(r.record_type, "ns2:Accident");
    assert_eq!(r.record_version, "2");
    assert_eq!(r.situation.version, "3");
    assert_eq!(r.situation.severity.as_deref(), Some("high"));
    assert_eq!(r.latitude.as_deref(), Some("45.75"));
    assert_eq!(r.longitude.as_deref(), Some("4.85"));
    assert_eq!(r.road_number.as_deref(), Some("A7"));
    assert_eq!(r.queue_length.as_deref(), Some("1200"));
    assert_eq!(r.start_time.as_deref(), Some("2023-01-01T10:00:00Z"));
    assert_eq!(r.end_time.as_deref(), Some("2023-01-01T12:30:00Z"));
    assert_eq!(r.start_display, "01/01/2023 10:00:00");
    assert_eq!(r.end_display, "01/01/2023 12:30:00");
    assert!(r.is_ended);
    assert_eq!(r.sub_type.as_deref(), Some("collision"));
    assert_eq!(r.direction.as_deref(), Some("positive"));
    assert_eq!(r.status, "Vehicle lowMobility");
    assert_eq!(r.location.as_deref(), Some("Lyon"));
    assert_eq!(r.source_file, "feed_lyon.xml");
}

#[test]
fn works_record_without_end_time() {
    let recs = records("feed_lyon.xml");
    let r = &recs[1];
    assert_eq!(r.status, "Works");
    assert_eq!(r.end_time, None);
    assert_eq!(r.end_display, "");
    assert!(!r.is_ended);
    assert_eq!(r.road_number, None);
    // Document-wide lookup: every record gets the document's town.
    assert_eq!(r.location.as_deref(), Some("Lyon"));
}

#[test]
fn record_scoped_location_falls_back_to_document() {
    let opts = ExtractOptions {
        location_scope: LocationScope::RecordThenDocument,
    };
    let recs: Vec<_> = extract_with(fixture("feed_lyon.xml"), opts).collect();
    assert!(recs.iter().all(|r| r.location.as_deref() == Some("Lyon")));
}

#[test]
fn default_namespace_and_other_prefixes_match_by_local_name() {
    let recs = records("feed_default_ns.xml");
    assert_eq!(recs.len(), 2);
    let r = &recs[0];
    assert_eq!(r.situation.id, "GRE-1");
    assert_eq!(r.record_type, "d2:RoadOrCarriagewayOrLaneManagement");
    assert_eq!(r.status, "Measure mandatory");
    assert_eq!(r.road_number.as_deref(), Some("A480"));
    assert_eq!(r.location.as_deref(), Some("Grenoble"));
    assert_eq!(r.sub_type.as_deref(), Some("laneClosures"));
    assert_eq!(recs[1].record_type, "Roadworks");
    assert_eq!(recs[1].status, "Works");
}

#[test]
fn missing_publication_is_a_structural_miss() {
    let mut stream = extract(fixture("no_publication.xml"));
    assert_eq!(stream.by_ref().count(), 0);
    assert_eq!(stream.diagnostics().len(), 1);
    assert_eq!(stream.diagnostics()[0].kind, DiagnosticKind::NoPayloadPublication);
    assert_eq!(stream.diagnostics()[0].scope, Scope::Document);
    assert_eq!(stream.stats().structural_misses, 1);
}

#[test]
fn malformed_document_is_skipped_with_a_parse_diagnostic() {
    let mut stream = extract(fixture("malformed.xml"));
    assert_eq!(stream.by_ref().count(), 0);
    assert_eq!(stream.stats().parse_errors, 1);
    assert!(matches!(stream.diagnostics()[0].kind, DiagnosticKind::Malformed(_)));
}

#[test]
fn non_xml_bytes_do_not_panic() {
    let doc = RawFeedDocument::new("junk.xml", vec![0xff, 0xfe, 0x00, 0x3c]);
    let mut stream = extract(doc);
    assert_eq!(stream.by_ref().count(), 0);
    assert_eq!(stream.diagnostics().len(), 1);
}

const SOAP_OPEN: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#;

fn soap(name: &str, body: &str) -> RawFeedDocument {
    RawFeedDocument::new(name, format!("{SOAP_OPEN}{body}</soap:Envelope>"))
}

fn publication(name: &str, situations: &str) -> RawFeedDocument {
    soap(
        name,
        &format!(
            r#"<soap:Body><d2:d2LogicalModel xmlns:d2="http://datex2.eu/schema/2/2_0"><d2:payloadPublication>{situations}</d2:payloadPublication></d2:d2LogicalModel></soap:Body>"#
        ),
    )
}

#[test]
fn document_level_misses_name_the_missing_element() {
    let cases = [
        (soap("no_body.xml", "<soap:Header/>"), DiagnosticKind::NoBody),
        (
            soap("no_model.xml", "<soap:Body><fault>busy</fault></soap:Body>"),
            DiagnosticKind::NoLogicalModel,
        ),
        (publication("no_situations.xml", "<publicationTime>t</publicationTime>"), DiagnosticKind::NoSituations),
    ];
    for (doc, expected) in cases {
        let mut stream = extract(doc);
        assert_eq!(stream.by_ref().count(), 0);
        let diags = stream.diagnostics();
        assert_eq!(diags.len(), 1, "{diags:?}");
        assert_eq!(diags[0].kind, expected);
        assert_eq!(diags[0].scope, Scope::Document);
        assert_eq!(diags[0].context, None);
        assert_eq!(stream.stats().structural_misses, 1);
    }
}

#[test]
fn situation_level_misses_skip_only_that_situation() {
    let doc = publication(
        "situations.xml",
        r#"<d2:situation version="1"><d2:situationRecord id="R1" version="1" xsi:type="d2:Accident"/></d2:situation>
           <d2:situation id="S9" version="1"><d2:overallSeverity>low</d2:overallSeverity></d2:situation>
           <d2:situation id="S10" version="1"><d2:situationRecord id="R1" version="1" xsi:type="d2:Accident"/></d2:situation>"#,
    );
    let mut stream = extract(doc);
    let recs: Vec<_> = stream.by_ref().collect();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].situation.id, "S10");

    let diags = stream.diagnostics();
    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].kind, DiagnosticKind::MissingSituationId);
    assert_eq!(diags[0].scope, Scope::Situation);
    assert_eq!(diags[1].kind, DiagnosticKind::NoSituationRecords);
    assert_eq!(diags[1].scope, Scope::Situation);
    assert_eq!(diags[1].context.as_deref(), Some("S9"));
    assert_eq!(stream.stats().structural_misses, 2);
    assert_eq!(stream.stats().records, 1);
}

#[test]
fn sub_type_skips_the_record_extension_tag() {
    let doc = publication(
        "extension.xml",
        r#"<d2:situation id="S1" version="1">
             <d2:situationRecord id="R1" version="1" xsi:type="d2:Accident">
               <d2:situationRecordExtension><d2:note>vendor</d2:note></d2:situationRecordExtension>
               <d2:accidentType>collision</d2:accidentType>
               <d2:vehicleType>lorry</d2:vehicleType>
             </d2:situationRecord>
           </d2:situation>"#,
    );
    let recs: Vec<_> = extract(doc).collect();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].sub_type.as_deref(), Some("collision"));
}
