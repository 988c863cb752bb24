//! AllRis portals
//!
//! Overviews and meeting pages come from the XML web-service templates
//! (`selfaction=ws&template=xyz`); person memberships and papers are only
//! available as HTML. Papers frequently arrive with truncated markup on the
//! first request, which is reported as a retryable error.

use super::markup::{
    collapse_whitespace, element_text, input_value, parse_date_span, parse_german_date,
    parse_portal_timestamp, parse_xml, resolve_link, row_cells, select_all, select_first,
    table_rows, XmlNode,
};
use super::{
    canonical_party, parse_id, query_param, render, Attachment, ExtractError, Extraction, FollowUp,
    FollowUpTarget, Listing, Portal, RowResult,
};
use crate::config::{BodyConfig, PortalKind};
use crate::crawler::{FetchedPage, PageRequest};
use crate::entity::{
    composite_key, AgendaItem, Consultation, DomainRecord, EntityRef, EntityType, FileRecord,
    Meeting, Membership, Organization, Paper, Person, Sex,
};
use chrono::NaiveDate;
use regex::Regex;
use scraper::Html;
use std::collections::HashMap;
use std::sync::OnceLock;

const PERSON_LIST: &str = "{base}kp041.asp?template=xyz&selfaction=ws&showAll=true&\
PALFDNRM=1&kpdatfil=&filtdatum=filter&kpname=&kpsonst=&kpampa=99999999&kpfr=99999999&\
kpamfr=99999999&kpau=99999999&kpamau=99999999&searchForm=true&search=Suchen";
const PERSON_DETAIL: &str = "{base}kp020.asp?KPLFDNR={id}&history=true";
const MEETING_SEARCH: &str =
    "{base}si010.asp?selfaction=ws&template=xyz&kaldatvon={start}&kaldatbis={end}";
const MEETING_DETAIL: &str = "{base}to010.asp?selfaction=ws&template=xyz&SILFDNR={id}";
const MEETING_PAGE: &str = "{base}to010.asp?SILFDNR={id}&options=4";
const AGENDA_ITEM_DETAIL: &str = "{base}to020.asp?selfaction=ws&template=xyz&TOLFDNR={id}";
const PAPER_DETAIL: &str = "{base}vo020.asp?VOLFDNR={id}";
const FILE_DOWNLOAD: &str = "{base}do027.asp";

/// Membership section headings: classification and the form field holding
/// the organization id
const SECTION_TYPES: &[(&str, &str, &str)] = &[
    ("Rat der Stadt", "parliament", "PALFDNR"),
    ("Parlament", "parliament", "PALFDNR"),
    ("Fraktion", "organisation", "FRLFDNR"),
    ("Fraktionen", "parliament", "FRLFDNR"),
    ("Ausschüsse", "organization", "AULFDNR"),
    ("Stadtbezirk", "parliament", "PALFDNR"),
    ("BVV", "parliament", "PALFDNR"),
    ("Bezirksparlament", "parliament", "PALFDNR"),
    ("Bezirksverordnetenversammlung", "parliament", "PALFDNR"),
];

pub struct AllrisPortal {
    base_url: String,
    person_list: String,
    person_detail: String,
    meeting_search: String,
    meeting_detail: String,
    agenda_item_detail: String,
    paper_detail: String,
    file_download: String,
    party_alias: HashMap<String, String>,
}

impl AllrisPortal {
    pub fn new(body: &BodyConfig) -> Self {
        let urls = &body.scraper.urls;
        let pick = |configured: &Option<String>, default: &str| {
            configured.clone().unwrap_or_else(|| default.to_string())
        };

        Self {
            base_url: body.scraper.base_url.clone(),
            person_list: pick(&urls.person_list, PERSON_LIST),
            person_detail: pick(&urls.person_detail, PERSON_DETAIL),
            meeting_search: pick(&urls.meeting_search, MEETING_SEARCH),
            meeting_detail: pick(&urls.meeting_detail, MEETING_DETAIL),
            agenda_item_detail: pick(&urls.agenda_item_detail, AGENDA_ITEM_DETAIL),
            paper_detail: pick(&urls.paper_detail, PAPER_DETAIL),
            file_download: pick(&urls.file_download, FILE_DOWNLOAD),
            party_alias: body.party_alias.clone(),
        }
    }

    fn url(&self, template: &str, id: &str) -> String {
        render(template, &[("base", &self.base_url), ("id", id)])
    }

    fn person_row(&self, row: &XmlNode) -> RowResult {
        let id = row
            .field("kplfdnr")
            .and_then(parse_id)
            .ok_or_else(|| ExtractError::fatal("person row without kplfdnr"))?;

        let mut person = Person::new(id.to_string());
        let link = row.field("link_kp");
        person.original_url = link.map(|href| resolve_link(&self.base_url, href));
        person.title = row.field("adtit").map(str::to_string);
        person.sex = match row.field("antext1") {
            Some("Frau") => Some(Sex::Female),
            Some("Herr") => Some(Sex::Male),
            _ => None,
        };
        person.first_name = row.field("advname").map(str::to_string);
        person.last_name = row.field("adname").map(str::to_string);
        person.street = row.field("adstr").map(str::to_string);
        person.house_number = row.field("adhnr").map(str::to_string);
        person.postal_code = row.field("adplz").map(str::to_string);
        person.phone = row.field("adtel").map(str::to_string);
        person.mobile = row.field("adtel2").map(str::to_string);
        person.fax = row.field("adfax").map(str::to_string);
        person.email = row.field("ademail").map(str::to_string);
        person.website = row.field("adwww1").map(str::to_string);

        if let Some(raw_party) = row.field("kppartei") {
            let party = canonical_party(&self.party_alias, raw_party);
            person.memberships.push(Membership {
                original_id: composite_key(&[&id, &party]),
                organization: Organization {
                    original_id: party.clone(),
                    name: party,
                    classification: Some("party".to_string()),
                    original_url: None,
                },
                role: None,
                start_date: None,
                end_date: None,
            });
        }

        let has_link = link.is_some();
        if !has_link {
            tracing::info!("Person {} has no link", person.display_name());
        }

        let mut extraction = Extraction::new(DomainRecord::Person(person));
        if has_link {
            extraction
                .discovered
                .push(EntityRef::numeric(EntityType::Person, id));
        }
        Ok(extraction)
    }

    fn meeting_row(&self, row: &XmlNode) -> RowResult {
        let raw_id = row
            .field("silfdnr")
            .ok_or_else(|| ExtractError::fatal("meeting row without silfdnr"))?;
        let id = parse_id(raw_id)
            .ok_or_else(|| ExtractError::fatal(format!("invalid meeting id {:?}", raw_id)))?;

        let mut meeting = Meeting::new(id.to_string());
        meeting.original_url = Some(self.url(MEETING_PAGE, &id.to_string()));
        meeting.start = optional_timestamp(row.field("sisbvcs"))?;
        meeting.end = optional_timestamp(row.field("sisevcs"))?;
        meeting.name = row
            .field("sitext")
            .or_else(|| row.field("siname"))
            .map(str::to_string);
        meeting.organization_name = row.field("grname").map(str::to_string);

        let mut extraction = Extraction::new(DomainRecord::Meeting(meeting));
        extraction
            .discovered
            .push(EntityRef::numeric(EntityType::Meeting, id));
        Ok(extraction)
    }

    fn extract_person(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let main = select_first(document.root_element(), "#rismain_raw")
            .ok_or_else(|| ExtractError::retryable("person page has no main area"))?;

        let mut person = Person::new(key);
        person.original_url = Some(self.url(&self.person_detail, key));

        let table = main
            .children()
            .filter_map(scraper::ElementRef::wrap)
            .filter(|e| e.value().name() == "table")
            .nth(1);

        match table {
            Some(table) => {
                person.memberships = parse_memberships(key, table, &page.final_url)?;
            }
            None => tracing::info!("Membership table missing at {}", page.final_url),
        }

        Ok(Extraction::new(DomainRecord::Person(person)))
    }

    fn extract_meeting(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let root = parse_xml(page.text())
            .ok_or_else(|| ExtractError::retryable("meeting page is not XML"))?;
        if root.children.len() < 2 {
            return Err(ExtractError::retryable("meeting page is truncated"));
        }

        let mut meeting = Meeting::new(key);
        meeting.original_url = Some(self.url(MEETING_PAGE, key));

        let special = &root.children[0];
        meeting.meeting_type = special.field("saname").map(str::to_string);

        let head = &root.children[1];
        meeting.name = head.field("sitext").map(str::to_string);
        meeting.room = head.field("raname").map(str::to_string);
        meeting.address = head.field("raort").map(str::to_string);

        let mut discovered = Vec::new();
        let mut follow_ups = Vec::new();
        let items = root.children.get(2).map(|l| l.children.as_slice()).unwrap_or(&[]);

        for raw in items {
            let Some(item_id) = raw.field("tolfdnr").and_then(parse_id) else {
                tracing::warn!("Agenda item without id in meeting {}", key);
                continue;
            };

            let number: Vec<&str> = ["tofnum", "tofunum", "tofuunum"]
                .iter()
                .filter_map(|name| raw.field(name))
                .filter(|part| *part != "0")
                .collect();

            let public = raw
                .field("toostLang")
                .or_else(|| raw.field("toostlang"))
                .map(|value| value == "öffentlich")
                .unwrap_or(false);

            let mut item = AgendaItem {
                original_id: item_id.to_string(),
                number: (!number.is_empty()).then(|| number.join(".")),
                name: raw.field("totext1").map(str::to_string),
                public,
                ..Default::default()
            };

            // Papers with id 0 are placeholders
            if let Some(paper_id) = raw.field("volfdnr").and_then(parse_id) {
                item.consultation = Some(Consultation {
                    original_id: composite_key(&[&item_id, &paper_id]),
                    paper_id: paper_id.to_string(),
                    paper_name: None,
                });
                discovered.push(EntityRef::numeric(EntityType::Paper, paper_id));
            }

            follow_ups.push(FollowUp {
                target: FollowUpTarget::AgendaItem(meeting.agenda_items.len()),
                request: PageRequest::get(self.url(&self.agenda_item_detail, &item.original_id)),
            });
            meeting.agenda_items.push(item);
        }

        let mut extraction = Extraction::new(DomainRecord::Meeting(meeting));
        extraction.discovered = discovered;
        extraction.follow_ups = follow_ups;
        Ok(extraction)
    }

    fn extract_paper(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let root = document.root_element();
        let table = select_first(root, ".ko1 > table")
            .ok_or_else(|| ExtractError::retryable("paper page has no data table"))?;

        let mut paper = Paper::new(key);
        paper.original_url = Some(self.url(&self.paper_detail, key));

        let mut subject = None;
        let mut discovered = Vec::new();
        let mut dates: Vec<NaiveDate> = Vec::new();
        let mut consultation_list_next = false;

        for row in table_rows(table) {
            let cells = row_cells(row);
            let Some(first) = cells.first() else {
                continue;
            };

            if consultation_list_next {
                consultation_list_next = false;
                parse_consultations(*first, &mut dates, &mut discovered);
                continue;
            }

            let headline = element_text(*first);
            let headline = headline.split(':').next().unwrap_or("").trim().to_lowercase();
            let value = cells.get(1).map(|cell| element_text(*cell));

            match headline.as_str() {
                "betreff" => {
                    let raw = value.unwrap_or_default();
                    // A script comment sometimes leaks into the cell text
                    let text = raw.rsplit("-->").next().unwrap_or(&raw);
                    subject = Some(collapse_whitespace(text)).filter(|s| !s.is_empty());
                }
                "drucksache-art" => paper.paper_type = value.filter(|v| !v.is_empty()),
                "status" => {
                    if let Some(cell) = cells.get(3) {
                        for link in select_all(*cell, "a[href]") {
                            let related = link
                                .value()
                                .attr("href")
                                .and_then(|href| query_param(href, "VOLFDNR"));
                            if let Some(related) = related {
                                paper.related_papers.push(related);
                            }
                        }
                    }
                }
                "beratungsfolge" => consultation_list_next = true,
                _ => {}
            }
        }

        paper.name = Some(subject.ok_or_else(|| ExtractError::retryable("paper has no subject"))?);
        paper.published_date = dates.into_iter().min();

        let docs: Vec<&str> = body_regex()
            .captures_iter(page.text())
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if !docs.is_empty() {
            paper.description = Some(docs.join("\n"));
        }

        let mut attachments = Vec::new();

        if let Some(file_id) = input_value(root, "DOLFDNR") {
            let file = FileRecord {
                original_id: file_id.clone(),
                original_url: Some(self.url(&self.file_download, &file_id)),
                name: Some("Drucksache".to_string()),
                ..Default::default()
            };
            let request = PageRequest::post(
                self.url(&self.file_download, &file_id),
                vec![
                    ("DOLFDNR".to_string(), file_id.clone()),
                    ("options".to_string(), "64".to_string()),
                ],
            )
            .binary();
            paper.main_file = Some(file_id);
            attachments.push(Attachment { file, request });
        }

        for attachment in self.auxiliary_files(root, &page.final_url) {
            paper.auxiliary_files.push(attachment.file.original_id.clone());
            attachments.push(attachment);
        }

        let mut extraction = Extraction::new(DomainRecord::Paper(paper));
        extraction.discovered = discovered;
        extraction.attachments = attachments;
        Ok(extraction)
    }

    /// Files listed below the `Anlagen:` heading
    fn auxiliary_files(&self, root: scraper::ElementRef<'_>, page_url: &str) -> Vec<Attachment> {
        let Some(table) = select_first(root, "table.risdeco table.tk1 table.tk1 table.tk1") else {
            return Vec::new();
        };

        let rows = table_rows(table);
        let Some(start) = rows
            .iter()
            .position(|row| element_text(*row).starts_with("Anlagen:"))
        else {
            return Vec::new();
        };

        let mut attachments = Vec::new();
        for row in &rows[start + 1..] {
            let Some(link) = select_first(*row, "a[href]") else {
                continue;
            };
            let href = link.value().attr("href").unwrap_or_default();
            let tokens: Vec<&str> = href.split('/').collect();
            let id = match (
                tokens.get(4).and_then(|t| t.parse::<i64>().ok()),
                tokens.get(6).and_then(|t| t.parse::<i64>().ok()),
            ) {
                (Some(first), Some(second)) => composite_key(&[&first, &second]),
                _ => {
                    tracing::warn!("Attachment link {} without file id at {}", href, page_url);
                    continue;
                }
            };

            let url = resolve_link(&self.base_url, href);
            let name = element_text(link);
            attachments.push(Attachment {
                file: FileRecord {
                    original_id: id,
                    original_url: Some(url.clone()),
                    name: Some(name).filter(|n| !n.is_empty()),
                    ..Default::default()
                },
                request: PageRequest::get(url).binary(),
            });
        }
        attachments
    }
}

impl Portal for AllrisPortal {
    fn kind(&self) -> PortalKind {
        PortalKind::Allris
    }

    fn person_listing_request(&self) -> PageRequest {
        PageRequest::get(render(&self.person_list, &[("base", &self.base_url)]))
    }

    fn meeting_search_requests(&self, start: NaiveDate, end: NaiveDate) -> Vec<PageRequest> {
        let start = start.format("%d.%m.%Y").to_string();
        let end = end.format("%d.%m.%Y").to_string();
        vec![PageRequest::get(render(
            &self.meeting_search,
            &[("base", &self.base_url), ("start", &start), ("end", &end)],
        ))]
    }

    fn detail_request(&self, entity_type: EntityType, key: &str) -> Option<PageRequest> {
        let template = match entity_type {
            EntityType::Person => &self.person_detail,
            EntityType::Meeting => &self.meeting_detail,
            EntityType::Paper => &self.paper_detail,
            // Organizations only appear inside person pages
            EntityType::Organization | EntityType::File => return None,
        };
        Some(PageRequest::get(self.url(template, key)))
    }

    fn identifier_from_url(&self, entity_type: EntityType, url: &str) -> Option<String> {
        let param = match entity_type {
            EntityType::Person => "KPLFDNR",
            EntityType::Organization => "AULFDNR",
            EntityType::Meeting => "SILFDNR",
            EntityType::Paper => "VOLFDNR",
            EntityType::File => "DOLFDNR",
        };
        query_param(url, param)
            .as_deref()
            .and_then(parse_id)
            .map(|id| id.to_string())
    }

    fn extract_listing(
        &self,
        listing: Listing,
        page: &FetchedPage,
    ) -> Result<Vec<RowResult>, ExtractError> {
        match listing {
            Listing::Persons => {
                let root = parse_xml(page.text())
                    .ok_or_else(|| ExtractError::fatal("person overview is not XML"))?;
                // The first element is the special block, the second the list
                let list = root
                    .children
                    .get(1)
                    .ok_or_else(|| ExtractError::fatal("person overview has no list"))?;
                Ok(list.children.iter().map(|row| self.person_row(row)).collect())
            }
            Listing::Meetings => {
                let root = parse_xml(&unwrap_links(page.text()))
                    .ok_or_else(|| ExtractError::fatal("meeting overview is not XML"))?;
                let list = root.child("list").unwrap_or(&root);
                Ok(list.children.iter().map(|row| self.meeting_row(row)).collect())
            }
        }
    }

    fn extract(
        &self,
        entity_type: EntityType,
        key: &str,
        page: &FetchedPage,
    ) -> Result<Extraction, ExtractError> {
        match entity_type {
            EntityType::Person => self.extract_person(key, page),
            EntityType::Meeting => self.extract_meeting(key, page),
            EntityType::Paper => self.extract_paper(key, page),
            EntityType::Organization | EntityType::File => Err(ExtractError::fatal(format!(
                "AllRis has no {} detail page",
                entity_type
            ))),
        }
    }

    fn complete(
        &self,
        extraction: &mut Extraction,
        target: FollowUpTarget,
        page: &FetchedPage,
    ) -> Result<(), ExtractError> {
        let FollowUpTarget::AgendaItem(index) = target;
        let DomainRecord::Meeting(meeting) = &mut extraction.record else {
            return Err(ExtractError::fatal("agenda item outside a meeting"));
        };
        let item = meeting
            .agenda_items
            .get_mut(index)
            .ok_or_else(|| ExtractError::fatal(format!("no agenda item at {}", index)))?;

        let root = parse_xml(page.text())
            .ok_or_else(|| ExtractError::retryable("agenda item page is not XML"))?;
        let details = root
            .children
            .first()
            .ok_or_else(|| ExtractError::retryable("agenda item page is empty"))?;

        if let Some(name) = details.field("toptext") {
            item.name = Some(name.to_string());
        }
        if let Some(result) = details.field("totyp") {
            item.result = Some(result.to_string());
        }
        if let Some(resolution) = details.child("rtfWP").map(deep_text) {
            if !resolution.is_empty() {
                item.resolution_text = Some(resolution);
            }
        }

        if let Some(consultation) = item.consultation.as_mut() {
            consultation.paper_name = details.field("voname").map(str::to_string);
            if let Some(subject) = details.field("vobetr") {
                if item.name.as_deref() != Some(subject) {
                    tracing::warn!(
                        "Different values for name: {:?} and {:?} at agenda item {}",
                        item.name,
                        subject,
                        item.original_id
                    );
                }
            }
        }
        Ok(())
    }
}

/// Parses the membership table of a person page
///
/// Section headings switch the classification and the form field carrying
/// the organization id. Rows without a form inherit the previous
/// organization as long as the group name stays the same.
fn parse_memberships(
    person_id: &str,
    table: scraper::ElementRef<'_>,
    page_url: &str,
) -> Result<Vec<Membership>, ExtractError> {
    let mut classification = "parliament";
    let mut fields: Option<Vec<&str>> = Some(vec!["PALFDNR"]);
    let mut group_id: Option<i64> = None;
    let mut old_group_name: Option<String> = None;
    let mut memberships = Vec::new();

    for row in table_rows(table) {
        let cells = row_cells(row);
        let Some(first) = cells.first() else {
            continue;
        };

        if first.value().name() == "th" {
            let heading = element_text(*first);
            if let Some((_, class, field)) = SECTION_TYPES.iter().find(|(h, _, _)| *h == heading) {
                classification = *class;
                fields = Some(vec![*field]);
            } else if heading.contains("Wahlperiode") {
                classification = "parliament";
                fields = Some(vec!["KPLFDNR", "AULFDNR"]);
            } else if heading.contains("Auskünfte gemäß BVV") {
                break;
            } else {
                tracing::warn!(
                    "Unknown organization type {:?} at person page {}",
                    heading,
                    page_url
                );
                fields = None;
            }
            continue;
        }

        if element_text(row).contains("Keine Information") {
            continue;
        }
        // An empty row ends the membership list
        if cells.len() < 2 {
            break;
        }

        let group_name = element_text(cells[1]);
        let organization_id = match select_first(*first, "form") {
            Some(form) => {
                if let Some(fields) = &fields {
                    let found = fields
                        .iter()
                        .filter_map(|field| input_value(form, field))
                        .filter_map(|value| parse_id(&value))
                        .last();
                    match found {
                        Some(id) => group_id = Some(id),
                        None if fields.len() == 1 => {
                            return Err(ExtractError::retryable(format!(
                                "membership form without {} at {}",
                                fields[0], page_url
                            )))
                        }
                        None => {}
                    }
                }
                old_group_name = Some(group_name.clone());
                group_id
            }
            None if old_group_name.as_deref() == Some(group_name.as_str()) => group_id,
            None => {
                tracing::warn!(
                    "Group name differs but no form with a new group id: {:?}, old {:?} ({:?}) at {}",
                    group_name,
                    old_group_name,
                    group_id,
                    page_url
                );
                None
            }
        };

        let Some(organization_id) = organization_id else {
            tracing::warn!("Bad organization {:?} at {}", group_name, page_url);
            continue;
        };

        let role = cells
            .get(2)
            .map(|cell| element_text(*cell))
            .filter(|r| !r.is_empty());
        let raw_date = cells.get(3).map(|cell| element_text(*cell)).unwrap_or_default();
        let (start_date, end_date) = parse_date_span(&raw_date);

        memberships.push(Membership {
            original_id: composite_key(&[&person_id, &organization_id]),
            organization: Organization {
                original_id: organization_id.to_string(),
                name: group_name,
                classification: Some(classification.to_string()),
                original_url: None,
            },
            role,
            start_date,
            end_date,
        });
    }

    Ok(memberships)
}

/// Collects meeting dates and meeting ids from the consultation list
///
/// Rows with seven cells describe one meeting; the date may be wrapped in
/// a link and the meeting id sits in a form.
fn parse_consultations(
    cell: scraper::ElementRef<'_>,
    dates: &mut Vec<NaiveDate>,
    discovered: &mut Vec<EntityRef>,
) {
    let Some(list) = select_first(cell, "table") else {
        return;
    };

    for row in table_rows(list) {
        let cells = row_cells(row);
        if cells.len() != 7 {
            continue;
        }
        if let Some(date) = parse_german_date(&element_text(cells[1])) {
            dates.push(date);
        }
        if let Some(meeting_id) = select_first(cells[2], "input")
            .and_then(|input| input.value().attr("value"))
            .and_then(parse_id)
        {
            discovered.push(EntityRef::numeric(EntityType::Meeting, meeting_id));
        }
    }
}

fn optional_timestamp(
    raw: Option<&str>,
) -> Result<Option<chrono::DateTime<chrono::FixedOffset>>, ExtractError> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_portal_timestamp(raw)
            .map(Some)
            .ok_or_else(|| ExtractError::fatal(format!("invalid timestamp {:?}", raw))),
    }
}

/// Meeting overviews embed raw links inside XML text
fn unwrap_links(xml: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"<a href="([^"]*)" target="_blank" ?>"#).expect("link regex is valid")
    });
    re.replace_all(&xml.replace("</a>", ""), "$1").into_owned()
}

/// Paper text follows the data table as an embedded document
fn body_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<\?xml .*<body[ ]*>(.*)</body>").expect("body regex is valid"))
}

fn deep_text(node: &XmlNode) -> String {
    fn collect(node: &XmlNode, out: &mut String) {
        out.push_str(&node.text);
        out.push(' ');
        for child in &node.children {
            collect(child, out);
        }
    }
    let mut out = String::new();
    collect(node, &mut out);
    collapse_whitespace(&out)
}
