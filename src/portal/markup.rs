//! Markup helpers shared by the portal parsers
//!
//! AllRis serves its web-service pages as loosely formed XML; everything else
//! is HTML. The XML is read into a small element tree with quick-xml in a
//! forgiving mode (mismatched end tags are tolerated, a parse error ends the
//! document early). HTML goes through scraper.

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Europe::Berlin;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{ElementRef, Selector};
use url::Url;

/// An element of a parsed XML document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First direct child with the given tag name
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Trimmed text of a direct child; empty text counts as absent
    pub fn field(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|text| !text.is_empty())
    }
}

/// Parses an XML document into its root element
///
/// Returns `None` when no element could be read at all.
pub fn parse_xml(xml: &str) -> Option<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                stack.push(XmlNode::named(name));
            }
            Ok(Event::Empty(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                attach(&mut stack, &mut root, XmlNode::named(name));
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                // Close up to the matching element; unmatched end tags are dropped
                if let Some(pos) = stack.iter().rposition(|n| n.name == name) {
                    while stack.len() > pos {
                        if let Some(node) = stack.pop() {
                            attach(&mut stack, &mut root, node);
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = match e.unescape() {
                    Ok(text) => text.to_string(),
                    Err(_) => String::from_utf8_lossy(e).to_string(),
                };
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        }
    }

    // Unclosed elements at the end of a truncated document
    while let Some(node) = stack.pop() {
        attach(&mut stack, &mut root, node);
    }

    root
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// All elements below `scope` matching a CSS selector
pub fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    scope.select(&selector).next()
}

/// Value of the first `input` below `scope` with the given name
pub fn input_value(scope: ElementRef<'_>, name: &str) -> Option<String> {
    select_all(scope, "input")
        .into_iter()
        .find(|input| input.value().attr("name") == Some(name))
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Makes a link absolute against the portal base URL
pub fn resolve_link(base_url: &str, href: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| base.join(href.trim()))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_url, href.trim()))
}

/// Concatenated text of an HTML element with whitespace collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rows of a table, looking through `thead`/`tbody` but not into nested tables
pub fn table_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

/// `th` and `td` cells of a row
pub fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "td" | "th"))
        .collect()
}

/// Parses a German date like `19.12.2012`
pub fn parse_german_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d.%m.%Y").ok()
}

/// Reads a membership period like `seit 01.05.2014` or
/// `01.05.2009 - 30.04.2014`
pub fn parse_date_span(raw: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if raw.contains("seit") {
        return (parts.last().and_then(|d| parse_german_date(d)), None);
    }
    if parts.is_empty() || raw.contains("Keine") {
        return (None, None);
    }
    (
        parts.first().and_then(|d| parse_german_date(d)),
        parts.last().and_then(|d| parse_german_date(d)),
    )
}

/// Parses a compact AllRis timestamp like `20121219T160000Z`
///
/// Despite the trailing `Z`, the portal writes local Berlin time.
pub fn parse_portal_timestamp(raw: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%dT%H%M%SZ").ok()?;
    Berlin
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use scraper::{Html, Selector};

    #[test]
    fn test_parse_xml_tree() {
        let root = parse_xml(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <list><special><saname>Ratssitzung</saname></special>\
             <item><id> 7 </id><name>M&#252;ller</name><empty/></item></list>",
        )
        .unwrap();

        assert_eq!(root.name, "list");
        assert_eq!(root.children.len(), 2);
        let item = &root.children[1];
        assert_eq!(item.field("id"), Some("7"));
        assert_eq!(item.field("name"), Some("Müller"));
        assert_eq!(item.field("empty"), None);
        assert_eq!(item.field("missing"), None);
    }

    #[test]
    fn test_parse_xml_keeps_head_elements() {
        let root = parse_xml("<root><head><sitext>Rat</sitext></head></root>").unwrap();
        assert_eq!(root.child("head").unwrap().field("sitext"), Some("Rat"));
    }

    #[test]
    fn test_parse_xml_truncated_document() {
        let root = parse_xml("<root><item><id>1</id></item><item><id>2</id>").unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].field("id"), Some("2"));
    }

    #[test]
    fn test_parse_xml_mismatched_end_tag() {
        let root = parse_xml("<root><a><b>x</a><c>y</c></root>").unwrap();
        assert_eq!(root.child("a").unwrap().child("b").unwrap().text, "x");
        assert_eq!(root.field("c"), Some("y"));
    }

    #[test]
    fn test_parse_xml_garbage() {
        assert!(parse_xml("").is_none());
        assert!(parse_xml("just text").is_none());
    }

    #[test]
    fn test_table_rows_skip_nested_tables() {
        let html = Html::parse_document(
            "<table id=\"t\"><tr><td>a</td><td><table><tr><td>inner</td></tr></table></td></tr>\
             <tr><th>b</th></tr></table>",
        );
        let table = html.select(&Selector::parse("#t").unwrap()).next().unwrap();
        let rows = table_rows(table);
        assert_eq!(rows.len(), 2);
        assert_eq!(row_cells(rows[0]).len(), 2);
        assert_eq!(element_text(row_cells(rows[1])[0]), "b");
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_german_date(" 19.12.2012 "),
            NaiveDate::from_ymd_opt(2012, 12, 19)
        );
        assert_eq!(parse_german_date("2012-12-19"), None);

        let ts = parse_portal_timestamp("20121219T160000Z").unwrap();
        assert_eq!(ts.day(), 19);
        assert_eq!(ts.hour(), 16);
        assert_eq!(ts.offset().local_minus_utc(), 3600);

        let summer = parse_portal_timestamp("20130701T090000Z").unwrap();
        assert_eq!(summer.offset().local_minus_utc(), 7200);
        assert!(parse_portal_timestamp("19.12.2012").is_none());
    }

    #[test]
    fn test_input_value_and_links() {
        let html = Html::parse_document(
            "<form><input name=\"KPLFDNR\" value=\"17\"><input name=\"AULFDNR\" value=\" \"></form>",
        );
        let root = html.root_element();
        assert_eq!(input_value(root, "KPLFDNR"), Some("17".to_string()));
        assert_eq!(input_value(root, "AULFDNR"), None);
        assert!(select_first(root, "form").is_some());
        assert!(select_first(root, "[[invalid").is_none());

        assert_eq!(
            resolve_link("https://ris.example.org/bi/", "vo020.asp?VOLFDNR=1"),
            "https://ris.example.org/bi/vo020.asp?VOLFDNR=1"
        );
        assert_eq!(
            resolve_link("https://ris.example.org/bi/", "https://other.example.org/x"),
            "https://other.example.org/x"
        );
    }

    #[test]
    fn test_parse_date_span() {
        assert_eq!(parse_date_span(""), (None, None));
        assert_eq!(parse_date_span("Keine Angabe"), (None, None));
        assert_eq!(
            parse_date_span("seit 01.05.2014"),
            (NaiveDate::from_ymd_opt(2014, 5, 1), None)
        );
        assert_eq!(
            parse_date_span("01.05.2009 - 30.04.2014"),
            (
                NaiveDate::from_ymd_opt(2009, 5, 1),
                NaiveDate::from_ymd_opt(2014, 4, 30)
            )
        );
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  "), "a b");
    }
}
