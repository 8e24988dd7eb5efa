//! One-shot migration of the reagent dataset from the upstream layout
//! (objects keyed by 1-indexed decimal strings) to the array layout the
//! service loads (0-indexed positions, every id reference decremented).
//!
//! Running the migration twice double-decrements; it is not idempotent.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Color {
    pub hex: String,
    pub id: i64,
    pub name: String,
    pub simple: bool,
    pub simple_color_id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reagent {
    pub full_name: String,
    pub id: i64,
    pub name: String,
    pub short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_first_color: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Substance {
    pub common_name: String,
    pub id: i64,
    pub is_popular: bool,
    pub name: String,
    pub token: String,
    pub sid: i64,
    #[serde(default)]
    pub classes: Vec<String>,
}

/// Upstream result tuple: `[start_color_ids, end_color_ids, is_positive, description]`.
/// Either colour list may be `null`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceResultEntry(
    pub Option<Vec<i64>>,
    pub Option<Vec<i64>>,
    pub Option<bool>,
    pub String,
);

/// Converted result tuple, serialized as a 4-element array.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResultEntry(pub Vec<i64>, pub Vec<i64>, pub Option<bool>, pub String);

impl ResultEntry {
    pub fn start_color_ids(&self) -> &[i64] {
        &self.0
    }

    pub fn end_color_ids(&self) -> &[i64] {
        &self.1
    }

    pub fn is_positive(&self) -> Option<bool> {
        self.2
    }

    pub fn description(&self) -> &str {
        &self.3
    }
}

/// Results of one substance, keyed by 1-indexed reagent key.
pub type SourceSubstanceResults = BTreeMap<String, Vec<Option<SourceResultEntry>>>;

/// One (substance, reagent) cell: `None` when no reaction is recorded.
pub type ResultCell = Option<Vec<Option<ResultEntry>>>;

/// `substance_count` rows of exactly `reagent_count` cells.
pub type ResultsTable = Vec<Vec<ResultCell>>;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    pub colors: BTreeMap<String, Color>,
    pub reagents: BTreeMap<String, Reagent>,
    pub results: BTreeMap<String, SourceSubstanceResults>,
    pub substances: BTreeMap<String, Substance>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReagentDocument {
    pub colors: Vec<Color>,
    pub reagents: Vec<Reagent>,
    pub results: ResultsTable,
    pub substances: Vec<Substance>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CollectionCounts {
    pub colors: usize,
    pub reagents: usize,
    pub substances: usize,
    pub results: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversionReport {
    pub source: CollectionCounts,
    pub output: CollectionCounts,
    pub dropped_result_cells: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedResults {
    pub table: ResultsTable,
    pub dropped_cells: usize,
}

pub fn decrement_id(value: i64) -> i64 {
    value - 1
}

/// Order the values of a decimal-keyed object by the numeric value of the key.
pub fn convert_object_to_array<T, I>(mapping: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = (String, T)>,
{
    let mut keyed = Vec::new();
    for (key, value) in mapping {
        keyed.push((parse_key(&key)?, value));
    }
    keyed.sort_by_key(|(key, _)| *key);
    Ok(keyed.into_iter().map(|(_, value)| value).collect())
}

pub fn convert_color(color: Color) -> Color {
    Color {
        id: decrement_id(color.id),
        simple_color_id: decrement_id(color.simple_color_id),
        ..color
    }
}

pub fn convert_reagent(reagent: Reagent) -> Reagent {
    Reagent {
        id: decrement_id(reagent.id),
        ..reagent
    }
}

pub fn convert_substance(substance: Substance) -> Substance {
    Substance {
        id: decrement_id(substance.id),
        ..substance
    }
}

pub fn convert_result_entry(entry: Option<SourceResultEntry>) -> Option<ResultEntry> {
    let SourceResultEntry(start, end, is_positive, description) = entry?;
    Some(ResultEntry(
        decrement_all(start),
        decrement_all(end),
        is_positive,
        description,
    ))
}

/// Lay results out as one row per substance (ascending key) with a slot per reagent.
///
/// Reagent keys whose 0-indexed position falls outside `[0, reagent_count)` are
/// dropped and counted.
pub fn convert_results(
    results: BTreeMap<String, SourceSubstanceResults>,
    reagent_count: usize,
) -> Result<ConvertedResults> {
    let mut by_substance = Vec::with_capacity(results.len());
    for (substance_key, reagent_results) in results {
        by_substance.push((parse_key(&substance_key)?, substance_key, reagent_results));
    }
    by_substance.sort_by_key(|(key, _, _)| *key);

    let mut table = Vec::with_capacity(by_substance.len());
    let mut dropped_cells = 0usize;
    for (_, substance_key, reagent_results) in by_substance {
        let mut row: Vec<ResultCell> = vec![None; reagent_count];
        for (reagent_key, entries) in reagent_results {
            let index = decrement_id(parse_key(&reagent_key)?);
            match usize::try_from(index) {
                Ok(slot) if slot < reagent_count => {
                    row[slot] = Some(entries.into_iter().map(convert_result_entry).collect());
                }
                _ => {
                    warn!(
                        substance = %substance_key,
                        reagent = %reagent_key,
                        reagent_count,
                        "dropping result cell for out-of-range reagent"
                    );
                    dropped_cells += 1;
                }
            }
        }
        table.push(row);
    }

    Ok(ConvertedResults {
        table,
        dropped_cells,
    })
}

pub fn convert_document(source: SourceDocument) -> Result<(ReagentDocument, ConversionReport)> {
    let source_counts = CollectionCounts {
        colors: source.colors.len(),
        reagents: source.reagents.len(),
        substances: source.substances.len(),
        results: source.results.len(),
    };
    let reagent_count = source.reagents.len();

    let colors = convert_object_to_array(source.colors)
        .context("invalid colors key")?
        .into_iter()
        .map(convert_color)
        .collect::<Vec<_>>();
    let reagents = convert_object_to_array(source.reagents)
        .context("invalid reagents key")?
        .into_iter()
        .map(convert_reagent)
        .collect::<Vec<_>>();
    let results = convert_results(source.results, reagent_count).context("invalid results key")?;
    let substances = convert_object_to_array(source.substances)
        .context("invalid substances key")?
        .into_iter()
        .map(convert_substance)
        .collect::<Vec<_>>();

    let document = ReagentDocument {
        colors,
        reagents,
        results: results.table,
        substances,
    };
    let report = ConversionReport {
        source: source_counts,
        output: CollectionCounts {
            colors: document.colors.len(),
            reagents: document.reagents.len(),
            substances: document.substances.len(),
            results: document.results.len(),
        },
        dropped_result_cells: results.dropped_cells,
    };
    Ok((document, report))
}

pub fn load_source_document(input_path: &Path) -> Result<SourceDocument> {
    if !input_path.exists() {
        bail!("input file not found: {}", input_path.display());
    }
    let content = fs::read_to_string(input_path)
        .with_context(|| format!("failed to read {}", input_path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", input_path.display()))
}

/// Serialize with 4-space indentation.
pub fn render_document(document: &ReagentDocument) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    document
        .serialize(&mut serializer)
        .context("failed to serialize reagent document")?;
    Ok(buffer)
}

pub fn convert_reagents_file(input_path: &Path, output_path: &Path) -> Result<ConversionReport> {
    let source = load_source_document(input_path)?;
    info!(input = %input_path.display(), "converting reagent dataset");

    let (document, report) = convert_document(source)?;
    let rendered = render_document(&document)?;

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output_path, rendered)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    info!(output = %output_path.display(), "wrote converted reagent dataset");

    Ok(report)
}

fn decrement_all(ids: Option<Vec<i64>>) -> Vec<i64> {
    ids.unwrap_or_default().into_iter().map(decrement_id).collect()
}

fn parse_key(key: &str) -> Result<i64> {
    key.trim()
        .parse::<i64>()
        .with_context(|| format!("non-numeric key: {key:?}"))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use serde_json::{Value, json};
    use tempfile::tempdir;

    use super::*;

    fn source_fixture() -> Value {
        json!({
            "colors": {
                "2": {"hex": "#000000", "id": 2, "name": "Black", "simple": true, "simpleColorId": 2},
                "1": {"hex": "#FF0000", "id": 1, "name": "Red", "simple": false, "simpleColorId": 2}
            },
            "reagents": {
                "1": {"fullName": "Marquis reagent", "id": 1, "name": "Marquis", "shortName": "M"},
                "2": {"fullName": "Mecke reagent", "id": 2, "name": "Mecke", "shortName": "Me", "whiteFirstColor": true},
                "3": {"fullName": "Mandelin reagent", "id": 3, "name": "Mandelin", "shortName": "Ma"}
            },
            "results": {
                "2": {"3": [[[1], [], null, "no change"]]},
                "1": {
                    "1": [[[1, 2], [2], true, "purple"], null],
                    "4": [[[1], [1], false, "ignored"]]
                }
            },
            "substances": {
                "10": {"commonName": "Ten", "id": 10, "isPopular": false, "name": "Ten", "token": "ten", "sid": 100},
                "1": {"commonName": "MDMA", "id": 1, "isPopular": true, "name": "MDMA", "token": "mdma", "sid": 7, "classes": ["entactogen"]}
            }
        })
    }

    fn source_document() -> SourceDocument {
        serde_json::from_value(source_fixture()).expect("decode fixture")
    }

    #[test]
    fn object_to_array_orders_by_numeric_key() {
        let mapping = vec![
            ("3".to_string(), "C"),
            ("10".to_string(), "D"),
            ("1".to_string(), "A"),
            ("2".to_string(), "B"),
        ];
        let ordered = convert_object_to_array(mapping).expect("convert");
        assert_eq!(ordered, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn object_to_array_rejects_non_numeric_key() {
        let mapping = vec![("1".to_string(), 1), ("abc".to_string(), 2)];
        let error = convert_object_to_array(mapping).expect_err("must fail");
        assert!(error.to_string().contains("non-numeric key"));
        assert!(error.to_string().contains("abc"));
    }

    #[test]
    fn color_ids_and_references_are_decremented() {
        let color = convert_color(Color {
            hex: "#FF0000".to_string(),
            id: 1,
            name: "Red".to_string(),
            simple: false,
            simple_color_id: 5,
        });
        assert_eq!(color.id, 0);
        assert_eq!(color.simple_color_id, 4);
        assert_eq!(color.hex, "#FF0000");
    }

    #[test]
    fn reagent_optional_flag_is_only_emitted_when_present() {
        let document = source_document();
        let reagents = convert_object_to_array(document.reagents)
            .expect("convert")
            .into_iter()
            .map(convert_reagent)
            .collect::<Vec<_>>();

        let first = serde_json::to_value(&reagents[0]).expect("serialize");
        let second = serde_json::to_value(&reagents[1]).expect("serialize");
        assert!(first.get("whiteFirstColor").is_none());
        assert_eq!(second["whiteFirstColor"], json!(true));
        assert_eq!(second["id"], json!(1));
    }

    #[test]
    fn substance_classes_default_to_empty() {
        let substance: Substance = serde_json::from_value(json!({
            "commonName": "Ten", "id": 10, "isPopular": false,
            "name": "Ten", "token": "ten", "sid": 100
        }))
        .expect("decode");
        let converted = convert_substance(substance);
        assert_eq!(converted.id, 9);
        assert_eq!(converted.sid, 100);
        assert!(converted.classes.is_empty());
    }

    #[test]
    fn result_entry_decrements_colour_ids() {
        let entry: SourceResultEntry =
            serde_json::from_value(json!([[1, 2], [3], true, "desc"])).expect("decode");
        let converted = convert_result_entry(Some(entry)).expect("entry");
        assert_eq!(
            serde_json::to_value(&converted).expect("serialize"),
            json!([[0, 1], [2], true, "desc"])
        );
        assert_eq!(converted.start_color_ids(), &[0, 1]);
        assert_eq!(converted.description(), "desc");
    }

    #[test]
    fn null_result_entry_stays_null() {
        assert_eq!(convert_result_entry(None), None);
    }

    #[test]
    fn null_colour_lists_become_empty() {
        let entry: SourceResultEntry =
            serde_json::from_value(json!([null, [], null, "none"])).expect("decode");
        let converted = convert_result_entry(Some(entry)).expect("entry");
        assert_eq!(
            serde_json::to_value(&converted).expect("serialize"),
            json!([[], [], null, "none"])
        );
    }

    #[test]
    fn results_table_has_fixed_dimensions_and_null_gaps() {
        let document = source_document();
        let converted = convert_results(document.results, 3).expect("convert");

        assert_eq!(converted.table.len(), 2);
        assert!(converted.table.iter().all(|row| row.len() == 3));

        let first = &converted.table[0];
        let cell = first[0].as_ref().expect("reagent 1 cell");
        assert_eq!(cell.len(), 2);
        assert_eq!(cell[0].as_ref().expect("entry").start_color_ids(), &[0, 1]);
        assert_eq!(cell[1], None);
        assert_eq!(first[1], None);
        assert_eq!(first[2], None);

        let second = &converted.table[1];
        assert_eq!(second[0], None);
        assert_eq!(second[1], None);
        assert!(second[2].is_some());
    }

    #[test]
    fn out_of_range_reagent_keys_are_dropped() {
        let results = BTreeMap::from([(
            "1".to_string(),
            BTreeMap::from([
                ("0".to_string(), vec![None]),
                ("2".to_string(), vec![None]),
                ("3".to_string(), vec![None]),
            ]),
        )]);
        let converted = convert_results(results, 2).expect("convert");
        assert_eq!(converted.dropped_cells, 2);
        assert_eq!(converted.table, vec![vec![None, Some(vec![None])]]);
    }

    #[test]
    fn document_conversion_reports_counts() {
        let (document, report) = convert_document(source_document()).expect("convert");

        assert_eq!(
            document.colors.iter().map(|color| color.id).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(
            document
                .substances
                .iter()
                .map(|substance| substance.id)
                .collect::<Vec<_>>(),
            vec![0, 9]
        );
        assert_eq!(
            report.source,
            CollectionCounts {
                colors: 2,
                reagents: 3,
                substances: 2,
                results: 2,
            }
        );
        assert_eq!(report.output.results, 2);
        assert_eq!(report.dropped_result_cells, 1);
    }

    #[test]
    fn rendered_document_uses_stable_key_order_and_four_space_indent() {
        let (document, _) = convert_document(source_document()).expect("convert");
        let rendered = String::from_utf8(render_document(&document).expect("render")).expect("utf8");

        let positions = ["\"colors\"", "\"reagents\"", "\"results\"", "\"substances\""]
            .iter()
            .map(|key| rendered.find(key).expect("key present"))
            .collect::<Vec<_>>();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(rendered.starts_with("{\n    \"colors\": [\n        {\n            \"hex\""));
    }

    #[test]
    fn convert_file_writes_output() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("reagents.orig.json");
        let output = temp.path().join("out").join("reagents.json");
        fs::write(&input, source_fixture().to_string()).expect("write input");

        let report = convert_reagents_file(&input, &output).expect("convert");
        assert_eq!(report.output.colors, 2);

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&output).expect("read output"))
                .expect("parse output");
        assert_eq!(written["colors"][0]["simpleColorId"], json!(1));
        assert_eq!(written["results"][0][0][0], json!([[0, 1], [1], true, "purple"]));
        assert_eq!(written["substances"][1]["classes"], json!([]));
    }

    #[test]
    fn convert_file_reports_missing_input() {
        let temp = tempdir().expect("tempdir");
        let error = convert_reagents_file(
            &temp.path().join("missing.json"),
            &temp.path().join("out.json"),
        )
        .expect_err("must fail");
        assert!(error.to_string().contains("input file not found"));
    }

    #[test]
    fn convert_file_reports_malformed_json() {
        let temp = tempdir().expect("tempdir");
        let input = temp.path().join("broken.json");
        fs::write(&input, "{\"colors\": ").expect("write input");
        let error =
            convert_reagents_file(&input, &temp.path().join("out.json")).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
