//! Crawl coordination
//!
//! The coordinator owns the three frontiers of a body and runs the phases of
//! a harvest:
//!
//! 1. Explicit seeds from the command line are crawled right away
//! 2. The seed phase reads the person overview and the meeting search
//! 3. The drain phase empties the person, meeting and paper queues, in that
//!    order, so refs discovered by persons and meetings are queued before the
//!    paper queue is drained
//! 4. Done jobs are garbage collected
//!
//! Everything happens sequentially on one task. A job is resolved only after
//! its unit of work is finished, so an interrupted run resumes where it
//! stopped.

use crate::config::Config;
use crate::crawler::fetcher::{FetchOutcome, FetchedPage, Fetcher, PageRequest};
use crate::entity::{DomainRecord, EntityRef, EntityType, FileRecord};
use crate::frontier::{Frontier, Job, QueueCounts};
use crate::portal::{build_portal, Attachment, Extraction, Listing, Portal};
use crate::storage::{lock, SharedStorage, Storage};
use crate::{RisError, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// What a single run should do, as chosen on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    /// Entities to crawl immediately
    pub seeds: Vec<EntityRef>,
    /// Inclusive date range for the seed phase
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Drain the queues even without a date range
    pub queue: bool,
}

impl RunPlan {
    /// A date range implies queue mode
    pub fn drains(&self) -> bool {
        self.queue || self.date_range.is_some()
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entities fetched and stored
    pub processed: u64,
    /// Entities behind the auth wall
    pub private: u64,
    /// Entities given up on (fetch failures, unexpected redirects, parse errors)
    pub failed: u64,
    pub records_saved: u64,
    pub files_saved: u64,
    /// Jobs newly added to a frontier
    pub jobs_discovered: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} private, {} failed, {} records and {} files saved, {} jobs discovered",
            self.processed,
            self.private,
            self.failed,
            self.records_saved,
            self.files_saved,
            self.jobs_discovered
        )
    }
}

/// Main harvest coordinator for one body
pub struct Coordinator<S> {
    config: Arc<Config>,
    storage: SharedStorage<S>,
    fetcher: Fetcher,
    portal: Box<dyn Portal>,
    persons: Frontier<S>,
    meetings: Frontier<S>,
    papers: Frontier<S>,
    summary: RunSummary,
}

impl<S: Storage> Coordinator<S> {
    /// Creates a coordinator with the portal variant and HTTP client the
    /// configuration asks for
    pub fn new(config: Config, storage: SharedStorage<S>) -> Result<Self> {
        let fetcher = Fetcher::new(config.scraper())?;
        let portal = build_portal(&config.body);
        Ok(Self::with_parts(Arc::new(config), storage, fetcher, portal))
    }

    pub fn with_parts(
        config: Arc<Config>,
        storage: SharedStorage<S>,
        fetcher: Fetcher,
        portal: Box<dyn Portal>,
    ) -> Self {
        let uid = config.body.uid.as_str();
        let kind = portal.kind();
        let persons = Frontier::for_entity(uid, kind, EntityType::Person, storage.clone());
        let meetings = Frontier::for_entity(uid, kind, EntityType::Meeting, storage.clone());
        let papers = Frontier::for_entity(uid, kind, EntityType::Paper, storage.clone());

        Self {
            config,
            storage,
            fetcher,
            portal,
            persons,
            meetings,
            papers,
            summary: RunSummary::default(),
        }
    }

    /// The frontier holding jobs of an entity type, if that type is queued
    pub fn frontier(&self, entity_type: EntityType) -> Option<&Frontier<S>> {
        match entity_type {
            EntityType::Person => Some(&self.persons),
            EntityType::Meeting => Some(&self.meetings),
            EntityType::Paper => Some(&self.papers),
            EntityType::Organization | EntityType::File => None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Pending and done counts of every frontier, in drain order
    pub fn queue_counts(&self) -> Result<Vec<(String, QueueCounts)>> {
        let mut counts = Vec::new();
        for entity_type in EntityType::QUEUED {
            if let Some(frontier) = self.frontier(entity_type) {
                counts.push((frontier.name().to_string(), frontier.counts()?));
            }
        }
        Ok(counts)
    }

    /// Builds a reference from a detail page URL
    pub fn resolve_url(&self, entity_type: EntityType, url: &str) -> Result<EntityRef> {
        self.portal
            .identifier_from_url(entity_type, url)
            .map(|identifier| EntityRef::from_url(entity_type, identifier, url))
            .ok_or_else(|| RisError::UnresolvableUrl {
                entity: entity_type,
                url: url.to_string(),
            })
    }

    /// Deletes every record and job of the body
    pub fn erase(&self) -> Result<()> {
        let uid = &self.config.body.uid;
        let mut storage = lock(&self.storage)?;
        let records = storage.erase_body(uid)?;
        let jobs = storage.delete_queues(&format!("{}/", uid))?;
        tracing::warn!("Erased {} records and {} jobs of body {}", records, jobs, uid);
        Ok(())
    }

    /// Runs the phases selected by the plan and returns the summary
    pub async fn run(&mut self, plan: &RunPlan) -> Result<RunSummary> {
        tracing::info!(
            "Starting harvest of {} ({})",
            self.config.body.uid,
            self.config.body.scraper.base_url
        );

        for seed in &plan.seeds {
            self.seed_explicit(seed).await?;
        }

        if let Some((start, end)) = plan.date_range {
            self.seed(start, end).await?;
        }

        if plan.drains() {
            self.drain().await?;
            self.garbage_collect()?;
        }

        tracing::info!("Harvest finished: {}", self.summary);
        Ok(self.summary)
    }

    /// Crawls one entity named on the command line
    pub async fn seed_explicit(&mut self, entity: &EntityRef) -> Result<()> {
        if entity.entity_type == EntityType::File {
            tracing::warn!("Files cannot be crawled on their own, skipping {}", entity);
            return Ok(());
        }
        tracing::info!("Crawling {}", entity);
        self.process_entity(entity.entity_type, &entity.identifier).await
    }

    /// Seed phase: person overview plus the meeting search for a date range
    pub async fn seed(&mut self, start: NaiveDate, end: NaiveDate) -> Result<()> {
        let request = self.portal.person_listing_request();
        tracing::info!("Getting person overview from {}", request.url);
        let outcome = self.fetcher.fetch(&request).await;
        self.seed_listing(Listing::Persons, &request, outcome).await?;

        for request in self.portal.meeting_search_requests(start, end) {
            tracing::info!("Getting meeting overview from {}", request.url);
            let outcome = self.fetcher.fetch_polite(&request).await;
            self.seed_listing(Listing::Meetings, &request, outcome).await?;
        }
        Ok(())
    }

    async fn seed_listing(
        &mut self,
        listing: Listing,
        request: &PageRequest,
        outcome: FetchOutcome,
    ) -> Result<()> {
        let page = match outcome {
            FetchOutcome::Success(page) => page,
            FetchOutcome::Redirected { final_url, .. } => {
                tracing::warn!("Overview {} redirected to {}", request.url, final_url);
                return Ok(());
            }
            FetchOutcome::Failure { reason } => {
                tracing::error!("Could not get overview {}: {}", request.url, reason);
                return Ok(());
            }
        };

        let rows = match self.portal.extract_listing(listing, &page) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("Unable to parse overview {}: {}", request.url, e);
                return Ok(());
            }
        };

        for (index, row) in rows.into_iter().enumerate() {
            match row {
                Ok(extraction) => self.store(extraction).await?,
                Err(e) => tracing::warn!("Skipping row {} of {}: {}", index, request.url, e),
            }
        }
        Ok(())
    }

    /// Drain phase: persons, then meetings, then papers
    pub async fn drain(&mut self) -> Result<()> {
        for entity_type in EntityType::QUEUED {
            let Some(frontier) = self.frontier(entity_type).cloned() else {
                continue;
            };
            tracing::info!("Draining {}", frontier.name());
            while frontier.has_next()? {
                let Some(job) = frontier.get()? else {
                    break;
                };
                self.process_job(entity_type, &job).await?;
                frontier.resolve(&job)?;
            }
        }
        Ok(())
    }

    /// Removes done jobs from all frontiers
    pub fn garbage_collect(&self) -> Result<u64> {
        let mut removed = 0;
        for entity_type in EntityType::QUEUED {
            if let Some(frontier) = self.frontier(entity_type) {
                removed += frontier.garbage_collect()?;
            }
        }
        tracing::info!("Garbage collected {} done jobs", removed);
        Ok(removed)
    }

    async fn process_job(&mut self, entity_type: EntityType, job: &Job) -> Result<()> {
        tracing::debug!("Job {} ({}) from {}", job.id, job.key, job.queue_name);
        self.process_entity(entity_type, &job.key).await
    }

    /// Fetches, parses and stores one entity
    ///
    /// Only storage errors are returned. Every other problem is logged and
    /// counted, and the entity is considered handled.
    async fn process_entity(&mut self, entity_type: EntityType, key: &str) -> Result<()> {
        let Some(request) = self.portal.detail_request(entity_type, key) else {
            tracing::warn!(
                "{} portals have no {} detail page, skipping {}",
                self.portal.kind().queue_prefix(),
                entity_type,
                key
            );
            self.summary.failed += 1;
            return Ok(());
        };

        tracing::info!("Getting {} {} from {}", entity_type, key, request.url);
        let parse_retries = self.config.retry().parse_retries;
        let mut retries = 0;

        loop {
            let outcome = if retries == 0 {
                self.fetcher.fetch(&request).await
            } else {
                self.fetcher.fetch_polite(&request).await
            };

            let page = match outcome {
                FetchOutcome::Success(page) => page,
                FetchOutcome::Redirected {
                    final_url,
                    requires_auth: true,
                } => {
                    tracing::info!("{} {} seems to be private ({})", entity_type, key, final_url);
                    self.summary.private += 1;
                    return Ok(());
                }
                FetchOutcome::Redirected { final_url, .. } => {
                    tracing::warn!(
                        "Strange redirect for {} {} from {} to {}",
                        entity_type,
                        key,
                        request.url,
                        final_url
                    );
                    self.summary.failed += 1;
                    return Ok(());
                }
                FetchOutcome::Failure { reason } => {
                    tracing::warn!("Could not get {} {}: {}", entity_type, key, reason);
                    self.summary.failed += 1;
                    return Ok(());
                }
            };

            match self.portal.extract(entity_type, key, &page) {
                Ok(extraction) => {
                    self.store(extraction).await?;
                    self.summary.processed += 1;
                    return Ok(());
                }
                Err(e) if e.retryable && retries < parse_retries => {
                    retries += 1;
                    tracing::info!(
                        "Try again: getting {} {} from {} ({}), retry {}/{}",
                        entity_type,
                        key,
                        request.url,
                        e,
                        retries,
                        parse_retries
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Failed getting {} {} from {}: {}",
                        entity_type,
                        key,
                        request.url,
                        e
                    );
                    self.summary.failed += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Completes, saves and follows an extraction
    async fn store(&mut self, mut extraction: Extraction) -> Result<()> {
        let follow_ups = std::mem::take(&mut extraction.follow_ups);
        for follow_up in follow_ups {
            tracing::debug!("Getting {}", follow_up.request.url);
            match self.fetcher.fetch_polite(&follow_up.request).await {
                FetchOutcome::Success(page) => {
                    if let Err(e) = self.portal.complete(&mut extraction, follow_up.target, &page) {
                        tracing::warn!("Unable to parse {}: {}", follow_up.request.url, e);
                    }
                }
                FetchOutcome::Redirected {
                    requires_auth: true,
                    ..
                } => tracing::info!("{} seems to be private", follow_up.request.url),
                FetchOutcome::Redirected { final_url, .. } => tracing::warn!(
                    "Strange redirect from {} to {}",
                    follow_up.request.url,
                    final_url
                ),
                FetchOutcome::Failure { reason } => {
                    tracing::warn!("Could not get {}: {}", follow_up.request.url, reason)
                }
            }
        }

        let id = self.save(&extraction.record)?;
        tracing::info!(
            "{} {} stored with id {}",
            extraction.record.entity_type(),
            extraction.record.original_id(),
            id
        );

        for attachment in extraction.attachments {
            self.download(attachment).await?;
        }

        for entity in &extraction.discovered {
            let created = match self.frontier(entity.entity_type) {
                Some(frontier) => frontier.add(&entity.identifier)?,
                None => {
                    tracing::debug!("No queue for {}, not following it", entity);
                    false
                }
            };
            if created {
                self.summary.jobs_discovered += 1;
            }
        }
        Ok(())
    }

    /// Downloads a file, then stores its metadata and content
    ///
    /// A failed download still stores the metadata known from the parent page.
    async fn download(&mut self, attachment: Attachment) -> Result<()> {
        let Attachment { mut file, request } = attachment;
        tracing::info!("Getting file {} from {}", file.original_id, request.url);

        match self.fetcher.fetch_polite(&request).await {
            FetchOutcome::Success(page) => {
                self.describe_file(&mut file, &page);
                let file_id = file.original_id.clone();
                let sha256 = file.sha256.clone().unwrap_or_default();
                self.save(&DomainRecord::File(file))?;

                lock(&self.storage)?.save_file_content(
                    &self.config.body.uid,
                    &file_id,
                    &sha256,
                    page.bytes(),
                )?;
                self.summary.files_saved += 1;
            }
            FetchOutcome::Redirected { final_url, requires_auth } => {
                if requires_auth {
                    tracing::info!("File {} seems to be private", file.original_id);
                } else {
                    tracing::warn!(
                        "Strange redirect for file {} to {}",
                        file.original_id,
                        final_url
                    );
                }
                self.save(&DomainRecord::File(file))?;
            }
            FetchOutcome::Failure { reason } => {
                tracing::error!("Error downloading file {}: {}", request.url, reason);
                self.save(&DomainRecord::File(file))?;
            }
        }
        Ok(())
    }

    /// Fills MIME type, checksum, size and filename from the download
    fn describe_file(&self, file: &mut FileRecord, page: &FetchedPage) {
        let bytes = page.bytes();
        file.size = Some(bytes.len() as u64);
        file.sha256 = Some(hex::encode(Sha256::digest(bytes)));
        file.mime_type = page.content_type.clone();

        let extension = page
            .content_type
            .as_deref()
            .and_then(|mime| self.config.body.extension_for(mime));
        if extension.is_none() {
            tracing::warn!(
                "No file extension configured for {:?} at file {}",
                page.content_type,
                file.original_id
            );
        }
        file.filename = Some(file.make_filename(extension));
    }

    fn save(&mut self, record: &DomainRecord) -> Result<i64> {
        let id = lock(&self.storage)?.save_record(&self.config.body.uid, record)?;
        self.summary.records_saved += 1;
        Ok(id)
    }
}
