//! SessionNet portals
//!
//! All pages are HTML. Entities are linked through `__k*` query parameters
//! (`__kpenr` persons, `__kgrnr` organizations, `__ksinr` meetings,
//! `__kvonr` papers), which is what the parsers follow.

use super::markup::{
    element_text, parse_date_span, parse_german_date, resolve_link, row_cells, select_all,
    select_first, table_rows,
};
use super::{
    canonical_party, parse_id, query_param, render, Attachment, ExtractError, Extraction,
    Listing, Portal, RowResult,
};
use crate::config::{BodyConfig, PortalKind};
use crate::crawler::{FetchedPage, PageRequest};
use crate::entity::{
    composite_key, AgendaItem, Consultation, DomainRecord, EntityRef, EntityType, FileRecord,
    Meeting, Membership, Organization, Paper, Person,
};
use chrono::{Datelike, Months, NaiveDate};
use scraper::{ElementRef, Html};
use std::collections::HashMap;

const PERSON_LIST: &str = "{base}kp0041.asp?__cwpall=1";
const PERSON_DETAIL: &str = "{base}kp0050.asp?__kpenr={id}";
const ORGANIZATION_DETAIL: &str = "{base}kp0040.asp?__kgrnr={id}";
const MEETING_SEARCH: &str = "{base}si0046.asp?__cjahr={year}&__cmonat={month}";
const MEETING_DETAIL: &str = "{base}to0040.asp?__ksinr={id}";
const PAPER_DETAIL: &str = "{base}vo0050.asp?__kvonr={id}";
const FILE_DOWNLOAD: &str = "{base}getfile.asp?id={id}&type=do";

pub struct SessionNetPortal {
    base_url: String,
    person_list: String,
    person_detail: String,
    organization_detail: String,
    meeting_search: String,
    meeting_detail: String,
    paper_detail: String,
    file_download: String,
    party_alias: HashMap<String, String>,
}

/// First link below `scope` whose target contains `page` and carries `param`
fn linked_id<'a>(scope: ElementRef<'a>, page: &str, param: &str) -> Option<(i64, ElementRef<'a>)> {
    select_all(scope, "a[href]").into_iter().find_map(|link| {
        let href = link.value().attr("href")?;
        if !href.contains(page) {
            return None;
        }
        let id = query_param(href, param).as_deref().and_then(parse_id)?;
        Some((id, link))
    })
}

fn heading(document: &Html) -> Option<String> {
    select_first(document.root_element(), "h1")
        .map(element_text)
        .filter(|text| !text.is_empty())
}

impl SessionNetPortal {
    pub fn new(body: &BodyConfig) -> Self {
        let urls = &body.scraper.urls;
        let pick = |configured: &Option<String>, default: &str| {
            configured.clone().unwrap_or_else(|| default.to_string())
        };

        Self {
            base_url: body.scraper.base_url.clone(),
            person_list: pick(&urls.person_list, PERSON_LIST),
            person_detail: pick(&urls.person_detail, PERSON_DETAIL),
            organization_detail: pick(&urls.organization_detail, ORGANIZATION_DETAIL),
            meeting_search: pick(&urls.meeting_search, MEETING_SEARCH),
            meeting_detail: pick(&urls.meeting_detail, MEETING_DETAIL),
            paper_detail: pick(&urls.paper_detail, PAPER_DETAIL),
            file_download: pick(&urls.file_download, FILE_DOWNLOAD),
            party_alias: body.party_alias.clone(),
        }
    }

    fn url(&self, template: &str, id: &str) -> String {
        render(template, &[("base", &self.base_url), ("id", id)])
    }

    fn person_row(&self, row: ElementRef<'_>) -> Option<RowResult> {
        let link = select_all(row, "a[href]")
            .into_iter()
            .find(|a| a.value().attr("href").is_some_and(|h| h.contains("kp0050")))?;

        let href = link.value().attr("href").unwrap_or_default();
        let Some(id) = query_param(href, "__kpenr").as_deref().and_then(parse_id) else {
            return Some(Err(ExtractError::fatal(format!(
                "person link without id: {}",
                href
            ))));
        };

        let mut person = Person::new(id.to_string());
        person.original_url = Some(resolve_link(&self.base_url, href));

        // Listed as "Last, First"
        let name = element_text(link);
        match name.split_once(',') {
            Some((last, first)) => {
                person.last_name = Some(last.trim().to_string());
                person.first_name = Some(first.trim().to_string()).filter(|f| !f.is_empty());
            }
            None if !name.is_empty() => person.last_name = Some(name),
            None => {}
        }

        let cells = row_cells(row);
        if let Some(raw_party) = cells.get(1).map(|cell| element_text(*cell)) {
            if !raw_party.is_empty() {
                let party = canonical_party(&self.party_alias, &raw_party);
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
        }

        let mut extraction = Extraction::new(DomainRecord::Person(person));
        extraction
            .discovered
            .push(EntityRef::numeric(EntityType::Person, id));
        Some(Ok(extraction))
    }

    fn meeting_row(&self, row: ElementRef<'_>) -> Option<RowResult> {
        let link = select_all(row, "a[href]")
            .into_iter()
            .find(|a| a.value().attr("href").is_some_and(|h| h.contains("to0040")))?;

        let href = link.value().attr("href").unwrap_or_default();
        let Some(id) = query_param(href, "__ksinr").as_deref().and_then(parse_id) else {
            return Some(Err(ExtractError::fatal(format!(
                "meeting link without id: {}",
                href
            ))));
        };

        let mut meeting = Meeting::new(id.to_string());
        meeting.original_url = Some(resolve_link(&self.base_url, href));
        meeting.name = Some(element_text(link)).filter(|n| !n.is_empty());

        let mut extraction = Extraction::new(DomainRecord::Meeting(meeting));
        extraction
            .discovered
            .push(EntityRef::numeric(EntityType::Meeting, id));
        Some(Ok(extraction))
    }

    fn extract_person(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let title = heading(&document);
        let table = select_first(document.root_element(), "table.tl1");
        if title.is_none() && table.is_none() {
            return Err(ExtractError::retryable("person page is truncated"));
        }

        let mut person = Person::new(key);
        person.original_url = Some(self.url(&self.person_detail, key));

        for row in table.map(table_rows).unwrap_or_default() {
            let Some((organization_id, link)) = linked_id(row, "kp0040", "__kgrnr") else {
                continue;
            };
            let cells = row_cells(row);
            let role = cells
                .get(1)
                .map(|cell| element_text(*cell))
                .filter(|r| !r.is_empty());
            let (start_date, end_date) = cells
                .last()
                .map(|cell| parse_date_span(&element_text(*cell)))
                .unwrap_or((None, None));

            person.memberships.push(Membership {
                original_id: composite_key(&[&key, &organization_id]),
                organization: Organization {
                    original_id: organization_id.to_string(),
                    name: element_text(link),
                    classification: None,
                    original_url: Some(self.url(
                        &self.organization_detail,
                        &organization_id.to_string(),
                    )),
                },
                role,
                start_date,
                end_date,
            });
        }

        Ok(Extraction::new(DomainRecord::Person(person)))
    }

    fn extract_organization(
        &self,
        key: &str,
        page: &FetchedPage,
    ) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let name = heading(&document)
            .ok_or_else(|| ExtractError::retryable("organization page has no heading"))?;

        Ok(Extraction::new(DomainRecord::Organization(Organization {
            original_id: key.to_string(),
            name,
            classification: None,
            original_url: Some(self.url(&self.organization_detail, key)),
        })))
    }

    fn extract_meeting(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let name = heading(&document)
            .ok_or_else(|| ExtractError::retryable("meeting page has no heading"))?;

        let mut meeting = Meeting::new(key);
        meeting.original_url = Some(self.url(&self.meeting_detail, key));
        meeting.name = Some(name);

        let mut discovered = Vec::new();
        if let Some(table) = select_first(document.root_element(), "table.tl1") {
            for row in table_rows(table) {
                let Some((item_id, link)) = linked_id(row, "to0050", "__ktonr") else {
                    continue;
                };
                let number = row_cells(row)
                    .first()
                    .map(|cell| element_text(*cell))
                    .filter(|n| !n.is_empty());

                let mut item = AgendaItem {
                    original_id: item_id.to_string(),
                    number,
                    name: Some(element_text(link)).filter(|n| !n.is_empty()),
                    public: !element_text(row).contains("nichtöffentlich"),
                    ..Default::default()
                };

                if let Some((paper_id, paper_link)) = linked_id(row, "vo0050", "__kvonr") {
                    item.consultation = Some(Consultation {
                        original_id: composite_key(&[&item_id, &paper_id]),
                        paper_id: paper_id.to_string(),
                        paper_name: Some(element_text(paper_link)).filter(|n| !n.is_empty()),
                    });
                    discovered.push(EntityRef::numeric(EntityType::Paper, paper_id));
                }
                meeting.agenda_items.push(item);
            }
        }

        let mut extraction = Extraction::new(DomainRecord::Meeting(meeting));
        extraction.discovered = discovered;
        Ok(extraction)
    }

    fn extract_paper(&self, key: &str, page: &FetchedPage) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page.text());
        let root = document.root_element();
        let name =
            heading(&document).ok_or_else(|| ExtractError::retryable("paper page has no heading"))?;

        let mut paper = Paper::new(key);
        paper.original_url = Some(self.url(&self.paper_detail, key));
        paper.name = Some(name);

        // Key/value rows: <th>Label:</th><td>value</td>
        for row in select_all(root, "tr") {
            let cells = row_cells(row);
            if cells.len() < 2 || cells[0].value().name() != "th" {
                continue;
            }
            let label = element_text(cells[0]);
            let value = element_text(cells[1]);
            match label.trim_end_matches(':') {
                "Betreff" if !value.is_empty() => paper.name = Some(value),
                "Vorlage-Art" | "Art" if !value.is_empty() => paper.paper_type = Some(value),
                "Datum" => paper.published_date = parse_german_date(&value),
                _ => {}
            }
        }

        let mut discovered = Vec::new();
        for link in select_all(root, "a[href]") {
            let href = link.value().attr("href").unwrap_or_default();
            if href.contains("to0040") {
                let meeting_id = query_param(href, "__ksinr").as_deref().and_then(parse_id);
                if let Some(meeting_id) = meeting_id {
                    let meeting = EntityRef::numeric(EntityType::Meeting, meeting_id);
                    if !discovered.contains(&meeting) {
                        discovered.push(meeting);
                    }
                }
            }
        }

        let mut attachments: Vec<Attachment> = Vec::new();
        for link in select_all(root, "a[href]") {
            let href = link.value().attr("href").unwrap_or_default();
            if !href.contains("getfile") {
                continue;
            }
            let Some(file_id) = query_param(href, "id") else {
                tracing::warn!("File link {} without id at {}", href, page.final_url);
                continue;
            };
            if attachments.iter().any(|a| a.file.original_id == file_id) {
                continue;
            }

            let url = self.url(&self.file_download, &file_id);
            paper.auxiliary_files.push(file_id.clone());
            attachments.push(Attachment {
                file: FileRecord {
                    original_id: file_id,
                    original_url: Some(url.clone()),
                    name: Some(element_text(link)).filter(|n| !n.is_empty()),
                    ..Default::default()
                },
                request: PageRequest::get(url).binary(),
            });
        }

        let mut extraction = Extraction::new(DomainRecord::Paper(paper));
        extraction.discovered = discovered;
        extraction.attachments = attachments;
        Ok(extraction)
    }
}

impl Portal for SessionNetPortal {
    fn kind(&self) -> PortalKind {
        PortalKind::SessionNet
    }

    fn person_listing_request(&self) -> PageRequest {
        PageRequest::get(render(&self.person_list, &[("base", &self.base_url)]))
    }

    /// One calendar page per month of the range
    fn meeting_search_requests(&self, start: NaiveDate, end: NaiveDate) -> Vec<PageRequest> {
        let mut requests = Vec::new();
        let mut month = start.with_day(1).unwrap_or(start);
        while month <= end {
            let year = month.year().to_string();
            let number = month.month().to_string();
            requests.push(PageRequest::get(render(
                &self.meeting_search,
                &[("base", &self.base_url), ("year", &year), ("month", &number)],
            )));
            match month.checked_add_months(Months::new(1)) {
                Some(next) => month = next,
                None => break,
            }
        }
        requests
    }

    fn detail_request(&self, entity_type: EntityType, key: &str) -> Option<PageRequest> {
        let template = match entity_type {
            EntityType::Person => &self.person_detail,
            EntityType::Organization => &self.organization_detail,
            EntityType::Meeting => &self.meeting_detail,
            EntityType::Paper => &self.paper_detail,
            EntityType::File => return None,
        };
        Some(PageRequest::get(self.url(template, key)))
    }

    fn identifier_from_url(&self, entity_type: EntityType, url: &str) -> Option<String> {
        let param = match entity_type {
            EntityType::Person => "__kpenr",
            EntityType::Organization => "__kgrnr",
            EntityType::Meeting => "__ksinr",
            EntityType::Paper => "__kvonr",
            EntityType::File => "id",
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
        let document = Html::parse_document(page.text());
        let rows = select_all(document.root_element(), "tr");
        if rows.is_empty() {
            return Err(ExtractError::fatal("listing has no table rows"));
        }

        Ok(rows
            .into_iter()
            .filter_map(|row| match listing {
                Listing::Persons => self.person_row(row),
                Listing::Meetings => self.meeting_row(row),
            })
            .collect())
    }

    fn extract(
        &self,
        entity_type: EntityType,
        key: &str,
        page: &FetchedPage,
    ) -> Result<Extraction, ExtractError> {
        match entity_type {
            EntityType::Person => self.extract_person(key, page),
            EntityType::Organization => self.extract_organization(key, page),
            EntityType::Meeting => self.extract_meeting(key, page),
            EntityType::Paper => self.extract_paper(key, page),
            EntityType::File => Err(ExtractError::fatal("files have no detail page")),
        }
    }
}
