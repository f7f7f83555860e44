//! HTML and payload parsing.
//!
//! Pure functions over fetched documents: no I/O, no fatal errors, only
//! best-effort extraction with documented fallbacks. Heterogeneous remoting
//! payloads are normalized into `CodeName` pairs here, at a single boundary;
//! raw field-name variance never leaks past this module.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A normalized code/name pair from a lookup endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeName {
    pub code: String,
    pub name: String,
}

/// One row of the search-results table, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRow {
    /// Raw link text, e.g. "12/2024".
    pub role_label: Option<String>,
    pub role_number: Option<String>,
    pub role_year: Option<String>,
    pub judge: Option<String>,
    pub procedure_type: Option<String>,
    pub next_hearing_date: Option<String>,
    /// Absolute detail link.
    pub detail_url: Option<String>,
    /// Opaque query parameters of the detail link. Round-tripped into the
    /// detail request verbatim; individual keys are never interpreted.
    pub detail_params: BTreeMap<String, String>,
}

/// Parsed search-results page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchRow>,
    /// Human-readable message when the result list is empty.
    pub message: Option<String>,
}

/// One date/description line from the case history section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub date: Option<String>,
    pub description: Option<String>,
    /// The original line, verbatim.
    pub raw_line: String,
}

/// A generic heading+list block from the detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailSection {
    pub title: String,
    pub items: Vec<String>,
}

/// Structured case detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRecord {
    /// Label/value pairs from the general definition list, keyed by the
    /// normalized label (or the raw label when normalization yields nothing).
    pub general: BTreeMap<String, Option<String>>,
    pub party_types: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub other_sections: Vec<DetailSection>,
}

/// Collapse non-breaking spaces and whitespace runs, then trim.
pub fn clean_text(value: &str) -> String {
    value
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Known detail labels and their canonical keys.
const DETAIL_LABEL_MAP: &[(&str, &str)] = &[
    ("Numero ruolo generale", "numeroRuoloGenerale"),
    ("Ritualità", "ritualita"),
    ("Oggetto del fascicolo", "oggettoDelFascicolo"),
    ("Giudice", "giudice"),
    ("Sezione", "sezione"),
    ("Data di iscrizione a ruolo", "dataIscrizioneARuolo"),
    ("Data citazione", "dataCitazione"),
    ("Data prossima udienza", "dataProssimaUdienza"),
    ("Sentenza", "sentenza"),
    ("Decreto ingiuntivo", "decretoIngiuntivo"),
    ("Stato del fascicolo", "statoDelFascicolo"),
];

/// Normalize a detail label into a canonical key.
///
/// Known labels go through the lookup table; unknown ones are folded to
/// ASCII, split into words and camel-cased. Returns `None` when nothing
/// usable remains (the caller then keeps the raw label).
pub fn normalize_detail_label(label: &str) -> Option<String> {
    if label.is_empty() {
        return None;
    }
    if let Some((_, key)) = DETAIL_LABEL_MAP.iter().find(|(raw, _)| *raw == label) {
        return Some((*key).to_string());
    }

    let mut ascii = String::with_capacity(label.len());
    for c in label.chars() {
        let folded = fold_diacritic(c);
        if folded.is_ascii_alphanumeric() {
            ascii.push(folded.to_ascii_lowercase());
        } else {
            ascii.push(' ');
        }
    }

    let words: Vec<&str> = ascii.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let mut key = String::new();
    for (index, word) in words.iter().enumerate() {
        if index == 0 {
            key.push_str(word);
        } else {
            let mut chars = word.chars();
            if let Some(first) = chars.next() {
                key.push(first.to_ascii_uppercase());
                key.push_str(chars.as_str());
            }
        }
    }
    Some(key)
}

/// Fold common Latin accented characters to their base letter.
///
/// The portal's labels are Italian; a table beats pulling in a full Unicode
/// normalization pass for a handful of vowels.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'Ç' => 'C',
        'Ñ' => 'N',
        other => other,
    }
}

/// Field names the lookup endpoints use for the code, in priority order.
const CODE_FIELDS: &[&str] = &["name", "codice", "id", "codiceUfficio", "codiceAmministrazione"];
/// Field names used for the display label.
const NAME_FIELDS: &[&str] = &["value", "denominazione", "descrizione", "descr", "label"];

/// Normalize a heterogeneous lookup payload into code/name pairs.
///
/// Entries without a resolvable, non-empty code are dropped.
pub fn map_to_code_name(payload: &Value) -> Vec<CodeName> {
    let Some(items) = payload.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let code = first_string_field(object, CODE_FIELDS)?;
            let code = code.trim().to_string();
            if code.is_empty() {
                return None;
            }
            let name = first_string_field(object, NAME_FIELDS)
                .map(|n| n.trim().to_string())
                .unwrap_or_default();
            Some(CodeName { code, name })
        })
        .collect()
}

fn first_string_field(object: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<String> {
    for field in fields {
        match object.get(*field) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

// ── Search results ──

const DEFAULT_NO_TABLE_MESSAGE: &str = "Risultati non disponibili";
const DEFAULT_EMPTY_MESSAGE: &str = "Nessun risultato trovato";

/// Parse the search-results page.
///
/// Absent table or an explicit empty-marker row yields an empty result list
/// plus a human-readable message; row order is preserved otherwise.
pub fn parse_search_results(html: &str, base: &str) -> SearchOutcome {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("#fascicoli").unwrap();

    let Some(table) = document.select(&table_sel).next() else {
        let message = first_clean_text(&document, "p.noElementFound")
            .or_else(|| first_clean_text(&document, "div.alert, p.message, div.messaggio"))
            .unwrap_or_else(|| DEFAULT_NO_TABLE_MESSAGE.to_string());
        return SearchOutcome {
            results: Vec::new(),
            message: Some(message),
        };
    };

    let row_sel = Selector::parse("tbody tr").unwrap();
    let rows: Vec<ElementRef> = table.select(&row_sel).collect();
    if rows.is_empty() || has_class(&rows[0], "empty") {
        let marker_sel = Selector::parse("tbody tr.empty .noElementFound").unwrap();
        let message = table
            .select(&marker_sel)
            .next()
            .map(|el| clean_text(&element_text(&el)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EMPTY_MESSAGE.to_string());
        return SearchOutcome {
            results: Vec::new(),
            message: Some(message),
        };
    }

    let cell_sel = Selector::parse("td").unwrap();
    let link_sel = Selector::parse("a").unwrap();
    let mut results = Vec::new();

    for row in rows {
        let cells: Vec<ElementRef> = row.select(&cell_sel).collect();
        if cells.is_empty() {
            continue;
        }

        let link = cells[0].select(&link_sel).next();
        let label = clean_text(&link.map(|l| element_text(&l)).unwrap_or_default());
        let (number, year) = split_role_label(&label);

        let mut detail_url = None;
        let mut detail_params = BTreeMap::new();
        if let Some(href) = link.and_then(|l| l.value().attr("href")).filter(|h| !h.is_empty()) {
            match url::Url::parse(base).and_then(|b| b.join(href)) {
                Ok(resolved) => {
                    for (key, value) in resolved.query_pairs() {
                        detail_params.insert(key.into_owned(), value.into_owned());
                    }
                    detail_url = Some(resolved.to_string());
                }
                Err(_) => detail_url = Some(href.to_string()),
            }
        }

        results.push(SearchRow {
            role_label: non_empty(label),
            role_number: number,
            role_year: year,
            judge: cells.get(1).map(|c| clean_text(&element_text(c))).and_then(non_empty),
            procedure_type: cells.get(2).map(|c| clean_text(&element_text(c))).and_then(non_empty),
            next_hearing_date: cells.get(3).map(|c| clean_text(&element_text(c))).and_then(non_empty),
            detail_url,
            detail_params,
        });
    }

    SearchOutcome {
        results,
        message: None,
    }
}

/// Split "12/2024" into number and year, trimming both halves.
fn split_role_label(label: &str) -> (Option<String>, Option<String>) {
    let mut parts = label.splitn(2, '/');
    let number = parts.next().map(|p| p.trim().to_string()).and_then(non_empty);
    let year = parts.next().map(|p| p.trim().to_string()).and_then(non_empty);
    (number, year)
}

// ── Case detail ──

/// Parse the case-detail fragment.
pub fn parse_detail(html: &str) -> DetailRecord {
    let document = Html::parse_document(html);
    let mut record = DetailRecord::default();

    let list_sel = Selector::parse("ul.dettaglioRuoloGenerale").unwrap();
    let li_sel = Selector::parse("li").unwrap();
    let strong_sel = Selector::parse("strong").unwrap();

    if let Some(list) = document.select(&list_sel).next() {
        for li in list.select(&li_sel) {
            let Some(strong) = li.select(&strong_sel).next() else {
                continue;
            };
            let raw_label = clean_text(&element_text(&strong))
                .trim_end_matches(':')
                .trim()
                .to_string();
            let value = clean_text(&text_without_tag(&li, "strong"));
            let key = normalize_detail_label(&raw_label).unwrap_or(raw_label);
            record.general.insert(key, non_empty(value));
        }
    }

    let section_sel = Selector::parse("div.dettaglioRuoloGenerale").unwrap();
    let mut sections = Vec::new();
    for section in document.select(&section_sel) {
        let Some(heading) = child_element(&section, "h3") else {
            continue;
        };
        let title = clean_text(&element_text(&heading))
            .trim_end_matches(':')
            .trim()
            .to_string();
        if title.is_empty() {
            continue;
        }
        let items = child_element(&section, "ul")
            .map(|ul| {
                ul.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "li")
                    .map(|li| clean_text(&element_text(&li)))
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        sections.push(DetailSection { title, items });
    }

    let party_re = Regex::new(r"(?i)tipologie.+parti").unwrap();
    let history_re = Regex::new(r"(?i)storico").unwrap();
    let party_index = sections.iter().position(|s| party_re.is_match(&s.title));
    let history_index = sections.iter().position(|s| history_re.is_match(&s.title));

    for (index, section) in sections.into_iter().enumerate() {
        if Some(index) == party_index {
            record.party_types = section.items;
        } else if Some(index) == history_index {
            record.history = section.items.iter().map(|item| split_history_line(item)).collect();
        } else {
            record.other_sections.push(section);
        }
    }

    record
}

/// Split a history line on its `" - "` separator into date and description,
/// keeping the original line verbatim.
fn split_history_line(line: &str) -> HistoryEntry {
    let separator = Regex::new(r"\s*-\s*").unwrap();
    let mut parts = separator.splitn(line, 2);
    let date = parts.next().map(|p| p.to_string()).and_then(non_empty);
    let description = parts
        .next()
        .map(|p| p.trim().to_string())
        .and_then(non_empty);
    HistoryEntry {
        date,
        description,
        raw_line: line.to_string(),
    }
}

// ── Helpers ──

fn element_text(element: &ElementRef) -> String {
    element.text().collect::<String>()
}

/// Text of an element excluding any child elements with the given tag name.
fn text_without_tag(element: &ElementRef, tag: &str) -> String {
    let mut out = String::new();
    for child in element.children() {
        if let Some(el) = ElementRef::wrap(child) {
            if el.value().name() == tag {
                continue;
            }
            out.push_str(&element_text(&el));
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
    out
}

/// First direct child element with the given tag name.
fn child_element<'a>(element: &ElementRef<'a>, tag: &str) -> Option<ElementRef<'a>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == tag)
}

fn has_class(element: &ElementRef, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

fn first_clean_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    document
        .select(&sel)
        .next()
        .map(|el| clean_text(&element_text(&el)))
        .filter(|s| !s.is_empty())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
