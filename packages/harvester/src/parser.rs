//! Division table parsing.
//!
//! Every page of the publication is a table of divisions, one row per entry.
//! The row class tells the level (`provincetr`, `citytr`, `countytr`,
//! `towntr`, `villagetr`). The province index lists links only; the code and
//! name tables list `[code, name]` cells with an optional link to the child
//! page; village tables list `[code, category, name]` (or `[code, name]` in
//! some years) and never link further.

use std::sync::LazyLock;

use encoding_rs::GB18030;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::is_raw_code;
use crate::error::{HarvesterError, Result};
use crate::types::{DivisionNode, Level};

#[allow(clippy::expect_used)] // Static selectors that are guaranteed to be valid
fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static PROVINCE_LINKS: LazyLock<Selector> = LazyLock::new(|| selector("tr.provincetr a"));
static CITY_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr.citytr"));
static COUNTY_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr.countytr"));
static TOWN_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr.towntr"));
static VILLAGE_ROWS: LazyLock<Selector> = LazyLock::new(|| selector("tr.villagetr"));
static CELLS: LazyLock<Selector> = LazyLock::new(|| selector("td"));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));

/// Province link target: `11.html`, optionally with a leading path.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static PROVINCE_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)([0-9]{2})\.html$").expect("valid regex"));

/// Entries found on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    /// Level of the listed entries. Usually the level that was asked for; a
    /// county page of a city without counties lists townships instead.
    pub level: Level,
    pub nodes: Vec<DivisionNode>,
}

/// Table layout of a page, selected by the level of the entries it lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    ProvinceIndex,
    CodeTable(Level),
    VillageTable,
}

impl Layout {
    fn for_level(level: Level) -> Self {
        match level {
            Level::Province => Self::ProvinceIndex,
            Level::City | Level::County | Level::Township => Self::CodeTable(level),
            Level::Village => Self::VillageTable,
        }
    }

    fn parse(self, doc: &Html, page_url: &Url) -> Result<Vec<DivisionNode>> {
        match self {
            Self::ProvinceIndex => parse_province_index(doc, page_url),
            Self::CodeTable(level) => parse_code_table(doc, level, page_url),
            Self::VillageTable => parse_village_table(doc, page_url),
        }
    }
}

/// Decode a page body.
///
/// Recent years are served as UTF-8, older ones as GB2312; GB18030 is a
/// superset of the latter and of GBK.
pub fn decode_page(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, had_errors) = GB18030.decode(bytes);
            if had_errors {
                tracing::debug!("page contains bytes outside GB18030");
            }
            text.into_owned()
        }
    }
}

/// Parse a page listing entries of `level`.
///
/// Links are resolved against `page_url`. Parent codes are left empty.
///
/// # Errors
/// `MalformedPage` when the rows for `level` are missing or a row has no
/// valid code or name.
pub fn parse_page(html: &str, level: Level, page_url: &Url) -> Result<ParsedPage> {
    let doc = Html::parse_document(html);

    match Layout::for_level(level).parse(&doc, page_url) {
        Err(HarvesterError::MalformedPage { .. })
            if level == Level::County && has_rows(&doc, Level::Township) =>
        {
            tracing::debug!(url = %page_url, "city page lists townships directly");
            let nodes = Layout::for_level(Level::Township).parse(&doc, page_url)?;
            Ok(ParsedPage {
                level: Level::Township,
                nodes,
            })
        }
        result => Ok(ParsedPage {
            level,
            nodes: result?,
        }),
    }
}

fn rows_selector(level: Level) -> &'static Selector {
    match level {
        Level::Province => &PROVINCE_LINKS,
        Level::City => &CITY_ROWS,
        Level::County => &COUNTY_ROWS,
        Level::Township => &TOWN_ROWS,
        Level::Village => &VILLAGE_ROWS,
    }
}

fn has_rows(doc: &Html, level: Level) -> bool {
    doc.select(rows_selector(level)).next().is_some()
}

fn parse_province_index(doc: &Html, page_url: &Url) -> Result<Vec<DivisionNode>> {
    let mut nodes = Vec::new();

    for link in doc.select(&PROVINCE_LINKS) {
        let href = link.value().attr("href").unwrap_or_default();
        let prefix = PROVINCE_HREF
            .captures(href)
            .and_then(|c| c.get(1))
            .ok_or_else(|| malformed(page_url, format!("unexpected province link '{href}'")))?
            .as_str();

        let name = element_text(link);
        if name.is_empty() {
            return Err(malformed(page_url, format!("province link '{href}' has no name")));
        }

        let node = DivisionNode::new(format!("{prefix}0000"), name, Level::Province)
            .with_child_url(resolve(page_url, href)?);
        nodes.push(node);
    }

    if nodes.is_empty() {
        return Err(malformed(page_url, "no province links"));
    }
    Ok(nodes)
}

fn parse_code_table(doc: &Html, level: Level, page_url: &Url) -> Result<Vec<DivisionNode>> {
    let mut nodes = Vec::new();

    for row in doc.select(rows_selector(level)) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
        let [code_cell, name_cell, ..] = cells.as_slice() else {
            return Err(malformed(page_url, format!("{level} row with fewer than 2 cells")));
        };

        let code = normalize_code(&element_text(*code_cell), level, page_url)?;
        let name = required_name(*name_cell, &code, page_url)?;

        let mut node = DivisionNode::new(code, name, level);
        if let Some(href) = row.select(&LINKS).find_map(|a| a.value().attr("href")) {
            node = node.with_child_url(resolve(page_url, href)?);
        }
        nodes.push(node);
    }

    if nodes.is_empty() {
        return Err(malformed(page_url, format!("no {level} rows")));
    }
    Ok(nodes)
}

fn parse_village_table(doc: &Html, page_url: &Url) -> Result<Vec<DivisionNode>> {
    let mut nodes = Vec::new();

    for row in doc.select(&VILLAGE_ROWS) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELLS).collect();
        let (code_cell, category_cell, name_cell) = match cells.as_slice() {
            [code, name] => (*code, None, *name),
            [code, category, name, ..] => (*code, Some(*category), *name),
            _ => return Err(malformed(page_url, "village row with fewer than 2 cells")),
        };

        let code = normalize_code(&element_text(code_cell), Level::Village, page_url)?;
        let name = required_name(name_cell, &code, page_url)?;

        let mut node = DivisionNode::new(code, name, Level::Village);
        if let Some(category) = category_cell.map(element_text).filter(|c| !c.is_empty()) {
            node = node.with_category(category);
        }
        nodes.push(node);
    }

    if nodes.is_empty() {
        return Err(malformed(page_url, "no village rows"));
    }
    Ok(nodes)
}

/// Truncate a raw 12-digit code to the length used at `level`.
fn normalize_code(raw: &str, level: Level, page_url: &Url) -> Result<String> {
    if !is_raw_code(raw) {
        return Err(malformed(page_url, format!("invalid {level} code '{raw}'")));
    }
    Ok(raw[..level.code_len()].to_string())
}

fn required_name(cell: ElementRef<'_>, code: &str, page_url: &Url) -> Result<String> {
    let name = element_text(cell);
    if name.is_empty() {
        return Err(malformed(page_url, format!("entry {code} has no name")));
    }
    Ok(name)
}

/// Text content with surrounding and repeated whitespace removed.
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(page_url: &Url, href: &str) -> Result<Url> {
    page_url
        .join(href)
        .map_err(|_| HarvesterError::InvalidUrl(format!("{page_url} + {href}")))
}

fn malformed(page_url: &Url, reason: impl Into<String>) -> HarvesterError {
    HarvesterError::MalformedPage {
        url: page_url.to_string(),
        reason: reason.into(),
    }
}
