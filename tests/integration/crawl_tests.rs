//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for an AllRis portal and run the
//! coordinator against a temporary SQLite database.

use ris_harvester::config::{
    BodyConfig, Config, FileExtension, OutputConfig, PortalKind, RetryConfig, ScraperConfig,
    UrlTemplates,
};
use ris_harvester::crawler::{Coordinator, FetchOutcome, Fetcher, PageRequest, RunPlan};
use ris_harvester::entity::EntityType;
use ris_harvester::frontier::QueueCounts;
use ris_harvester::storage::{open_shared, RecordStore, SharedStorage, SqliteStorage};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = "teststadt";

const PERSON_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<list>
  <special><count>1</count></special>
  <list>
    <person>
      <kplfdnr>17</kplfdnr><link_kp>kp020.asp?KPLFDNR=17</link_kp>
      <antext1>Frau</antext1><advname>Anna</advname><adname>Schmidt</adname>
      <kppartei>SPD</kppartei>
    </person>
  </list>
</list>"#;

const MEETING_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<root>
  <special/>
  <list>
    <item>
      <silfdnr>5672</silfdnr><sisbvcs>20121219T160000Z</sisbvcs><sisevcs>20121219T190000Z</sisevcs>
      <siname>Rat</siname><sitext>Sitzung des Rates</sitext>
      <silink><a href="to010.asp?SILFDNR=5672" target="_blank">Details</a></silink>
      <grname>Rat der Stadt</grname>
    </item>
  </list>
</root>"#;

const PERSON_PAGE: &str =
    r#"<html><body><div id="rismain_raw"><table><tr><td>Anna Schmidt</td></tr></table></div></body></html>"#;

const MEETING_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<meeting>
  <special><saname>Ratssitzung</saname></special>
  <head><sitext>Sitzung des Rates</sitext><raname>Ratssaal</raname></head>
  <list>
    <item><tofnum>3</tofnum><tofunum>0</tofunum><tofuunum>0</tofuunum><tolfdnr>900</tolfdnr>
      <toostLang>öffentlich</toostLang><volfdnr>42</volfdnr></item>
  </list>
</meeting>"#;

const AGENDA_ITEM_PAGE: &str = r#"<agendaitem><item><toptext>Haushalt 2013</toptext>
<totyp>beschlossen</totyp><voname>VO/0042/2012</voname><vobetr>Haushalt 2013</vobetr></item></agendaitem>"#;

const PAPER_PAGE: &str = r#"<html><body>
<table class="risdeco"><tr><td>
<table class="tk1"><tr><td class="ko1">
<table>
  <tr><td>Betreff:</td><td>Haushalt 2013</td></tr>
  <tr><td>Drucksache-Art:</td><td>Beschlussvorlage</td></tr>
  <tr><td>Beratungsfolge:</td></tr>
  <tr><td><table>
    <tr><td></td><td>19.12.2012</td><td><form><input name="SILFDNR" value="5672"></form></td><td>Rat</td><td>beschlossen</td><td></td><td></td></tr>
    <tr><td></td><td>04.12.2012</td><td><form><input name="SILFDNR" value="5600"></form></td><td>Finanzausschuss</td><td>empfohlen</td><td></td><td></td></tr>
  </table></td></tr>
</table>
<table class="tk1"><tr><td><table class="tk1">
  <tr><td>Anlagen:</td></tr>
  <tr><td><a href="___tmp/tmp/450810/xyz/881/Anlagen/12/Plan.pdf">Lageplan</a></td></tr>
</table></td></tr></table>
</td></tr></table>
</td></tr></table>
<form><input type="hidden" name="DOLFDNR" value="881"></form>
</body></html>"#;

const PDF: &[u8] = b"%PDF-1.4 Drucksache";

/// Creates a test configuration pointing at the mock portal
fn create_test_config(server_uri: &str, db_path: &str) -> Config {
    Config {
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
        body: BodyConfig {
            uid: BODY.to_string(),
            name: "Teststadt".to_string(),
            scraper: ScraperConfig {
                kind: PortalKind::Allris,
                base_url: format!("{}/bi/", server_uri),
                user_agent: "TestHarvester/1.0".to_string(),
                wait_time: 1, // Very short for testing
                auth_wall_marker: None,
                retry: RetryConfig {
                    max_attempts: 4,
                    backoff_factor: 1,
                    parse_retries: 3,
                },
                urls: UrlTemplates::default(),
            },
            party_alias: HashMap::new(),
            file_extensions: vec![FileExtension {
                mime_type: "application/pdf".to_string(),
                extension: "pdf".to_string(),
            }],
        },
    }
}

struct Harness {
    _dir: TempDir,
    storage: SharedStorage<SqliteStorage>,
    coordinator: Coordinator<SqliteStorage>,
}

fn harness(server: &MockServer) -> Harness {
    harness_at(&server.uri())
}

fn harness_at(server_uri: &str) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("ris.db");
    let config = create_test_config(server_uri, db_path.to_str().unwrap());
    let storage = open_shared(&db_path).expect("Failed to open database");
    let coordinator =
        Coordinator::new(config, storage.clone()).expect("Failed to create coordinator");
    Harness {
        _dir: dir,
        storage,
        coordinator,
    }
}

fn queue_only() -> RunPlan {
    RunPlan {
        queue: true,
        ..Default::default()
    }
}

async fn mount_page(server: &MockServer, page: &str, param: (&str, &str), body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/bi/{}", page)))
        .and(query_param(param.0, param.1))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_server_errors_are_retried_then_given_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/vo020.asp"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), "unused.db");
    let fetcher = Fetcher::new(config.scraper()).unwrap();
    let outcome = fetcher
        .fetch(&PageRequest::get(format!(
            "{}/bi/vo020.asp?VOLFDNR=42",
            server.uri()
        )))
        .await;

    assert!(matches!(outcome, FetchOutcome::Failure { .. }));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/vo020.asp"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.coordinator
        .frontier(EntityType::Paper)
        .unwrap()
        .add("42")
        .unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(
        h.coordinator.frontier(EntityType::Paper).unwrap().counts().unwrap(),
        QueueCounts::default()
    );
}

#[tokio::test]
async fn test_auth_wall_redirect_resolves_without_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/vo020.asp"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/bi/noauth.asp", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bi/noauth.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Keine Berechtigung"))
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.coordinator
        .frontier(EntityType::Paper)
        .unwrap()
        .add("42")
        .unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.private, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.records_saved, 0);

    let storage = h.storage.lock().unwrap();
    assert!(storage
        .load_record(BODY, EntityType::Paper, "42")
        .unwrap()
        .is_none());
    drop(storage);
    assert!(!h.coordinator.frontier(EntityType::Paper).unwrap().has_next().unwrap());
}

#[tokio::test]
async fn test_other_redirect_is_a_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/vo020.asp"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/bi/start.asp", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bi/start.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Startseite"))
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.coordinator
        .frontier(EntityType::Paper)
        .unwrap()
        .add("42")
        .unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.private, 0);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_refused_connection_fails_the_job() {
    // Bind and release a port so that nothing listens on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut h = harness_at(&format!("http://127.0.0.1:{}", port));
    let papers = h.coordinator.frontier(EntityType::Paper).unwrap().clone();
    papers.add("42").unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.records_saved, 0);
    assert!(!papers.has_next().unwrap());
}

#[tokio::test]
async fn test_redirected_file_download_is_kept() {
    let server = MockServer::start().await;
    mount_page(&server, "vo020.asp", ("VOLFDNR", "42"), PAPER_PAGE).await;
    Mock::given(method("POST"))
        .and(path("/bi/do027.asp"))
        .respond_with(
            ResponseTemplate::new(302).insert_header(
                "Location",
                format!("{}/bi/___tmp/tmp/881.pdf", server.uri()).as_str(),
            ),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bi/___tmp/tmp/881.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF, "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.coordinator
        .frontier(EntityType::Paper)
        .unwrap()
        .add("42")
        .unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.files_saved, 1);

    let storage = h.storage.lock().unwrap();
    let file = storage
        .load_record(BODY, EntityType::File, "881")
        .unwrap()
        .unwrap();
    assert_eq!(file["filename"], "Drucksache.pdf");
    assert_eq!(file["mime_type"], "application/pdf");
    assert_eq!(file["sha256"], hex::encode(Sha256::digest(PDF)));
}

#[tokio::test]
async fn test_malformed_overview_row_is_skipped() {
    let server = MockServer::start().await;
    let listing = r#"<?xml version="1.0" encoding="UTF-8"?>
<list>
  <special><count>3</count></special>
  <list>
    <person>
      <kplfdnr>17</kplfdnr><link_kp>kp020.asp?KPLFDNR=17</link_kp>
      <advname>Anna</advname><adname>Schmidt</adname>
    </person>
    <person>
      <link_kp>kp020.asp</link_kp><advname>Ohne</advname><adname>Nummer</adname>
    </person>
    <person>
      <kplfdnr>18</kplfdnr><link_kp>kp020.asp?KPLFDNR=18</link_kp>
      <advname>Bernd</advname><adname>Meier</adname>
    </person>
  </list>
</list>"#;
    Mock::given(method("GET"))
        .and(path("/bi/kp041.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let day = chrono::NaiveDate::from_ymd_opt(2012, 12, 1).unwrap();
    h.coordinator.seed(day, day).await.unwrap();

    {
        let storage = h.storage.lock().unwrap();
        for (key, last_name) in [("17", "Schmidt"), ("18", "Meier")] {
            let person = storage
                .load_record(BODY, EntityType::Person, key)
                .unwrap()
                .unwrap();
            assert_eq!(person["last_name"], last_name);
        }
    }

    let persons = h.coordinator.frontier(EntityType::Person).unwrap();
    assert_eq!(persons.counts().unwrap(), QueueCounts { pending: 2, done: 0 });
    assert_eq!(persons.get().unwrap().unwrap().key, "17");
}

#[tokio::test]
async fn test_truncated_page_is_fetched_again() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/vo020.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><p>Fehler"))
        .expect(4)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    h.coordinator
        .frontier(EntityType::Paper)
        .unwrap()
        .add("42")
        .unwrap();
    let summary = h.coordinator.run(&queue_only()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.records_saved, 0);
}

#[tokio::test]
async fn test_single_paper_job_lifecycle() {
    let server = MockServer::start().await;
    mount_page(&server, "vo020.asp", ("VOLFDNR", "42"), PAPER_PAGE).await;

    let mut h = harness(&server);
    let papers = h.coordinator.frontier(EntityType::Paper).unwrap().clone();
    assert!(papers.add("42").unwrap());
    assert!(papers.has_next().unwrap());

    h.coordinator.drain().await.unwrap();
    assert!(!papers.has_next().unwrap());
    assert_eq!(papers.counts().unwrap(), QueueCounts { pending: 0, done: 1 });

    // A done key is not queued again
    assert!(!papers.add("42").unwrap());

    assert_eq!(h.coordinator.garbage_collect().unwrap(), 1);
    assert_eq!(papers.counts().unwrap(), QueueCounts::default());

    let storage = h.storage.lock().unwrap();
    let paper = storage
        .load_record(BODY, EntityType::Paper, "42")
        .unwrap()
        .unwrap();
    assert_eq!(paper["name"], "Haushalt 2013");
}

#[tokio::test]
async fn test_interrupted_job_is_resumed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bi/kp020.asp"))
        .and(query_param("KPLFDNR", "17"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let persons = h.coordinator.frontier(EntityType::Person).unwrap().clone();
    persons.add("17").unwrap();

    // Read but never resolved, as after a crash
    let job = persons.get().unwrap().unwrap();
    assert_eq!(job.key, "17");

    let summary = h.coordinator.run(&queue_only()).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(persons.counts().unwrap(), QueueCounts::default());
}

#[tokio::test]
async fn test_full_allris_harvest() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/bi/kp041.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PERSON_LIST))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bi/si010.asp"))
        .and(query_param("kaldatvon", "01.12.2012"))
        .and(query_param("kaldatbis", "31.12.2012"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MEETING_LIST))
        .mount(&server)
        .await;
    mount_page(&server, "kp020.asp", ("KPLFDNR", "17"), PERSON_PAGE).await;
    mount_page(&server, "to010.asp", ("SILFDNR", "5672"), MEETING_PAGE).await;
    mount_page(&server, "to020.asp", ("TOLFDNR", "900"), AGENDA_ITEM_PAGE).await;
    mount_page(&server, "vo020.asp", ("VOLFDNR", "42"), PAPER_PAGE).await;
    Mock::given(method("POST"))
        .and(path("/bi/do027.asp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PDF, "application/pdf"))
        .mount(&server)
        .await;

    let mut h = harness(&server);
    let plan = RunPlan {
        date_range: chrono::NaiveDate::from_ymd_opt(2012, 12, 1)
            .zip(chrono::NaiveDate::from_ymd_opt(2012, 12, 31)),
        ..Default::default()
    };
    let summary = h.coordinator.run(&plan).await.unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.files_saved, 1);
    assert_eq!(summary.failed, 0);

    // Persons are drained before meetings, meetings before papers
    let requests = server.received_requests().await.unwrap();
    let first = |page: &str| {
        requests
            .iter()
            .position(|r| r.url.path() == format!("/bi/{}", page))
            .unwrap_or_else(|| panic!("{} was never requested", page))
    };
    assert!(first("kp041.asp") < first("kp020.asp"));
    assert!(first("kp020.asp") < first("to010.asp"));
    assert!(first("to010.asp") < first("to020.asp"));
    assert!(first("to020.asp") < first("vo020.asp"));
    assert!(first("vo020.asp") < first("do027.asp"));

    {
        let storage = h.storage.lock().unwrap();

        let person = storage
            .load_record(BODY, EntityType::Person, "17")
            .unwrap()
            .unwrap();
        assert_eq!(person["last_name"], "Schmidt");

        let meeting = storage
            .load_record(BODY, EntityType::Meeting, "5672")
            .unwrap()
            .unwrap();
        assert_eq!(meeting["organization_name"], "Rat der Stadt");
        assert_eq!(meeting["meeting_type"], "Ratssitzung");
        assert_eq!(meeting["agenda_items"][0]["name"], "Haushalt 2013");

        let file = storage
            .load_record(BODY, EntityType::File, "881")
            .unwrap()
            .unwrap();
        assert_eq!(file["filename"], "Drucksache.pdf");
        assert_eq!(file["mime_type"], "application/pdf");
        assert_eq!(file["sha256"], hex::encode(Sha256::digest(PDF)));

        // The attachment could not be downloaded; its metadata is kept
        let attachment = storage
            .load_record(BODY, EntityType::File, "881-12")
            .unwrap()
            .unwrap();
        assert_eq!(attachment["name"], "Lageplan");
        assert!(attachment.get("sha256").is_none());
    }

    // Found after the meeting queue was drained; left for the next run
    let meetings = h.coordinator.frontier(EntityType::Meeting).unwrap();
    assert_eq!(meetings.counts().unwrap(), QueueCounts { pending: 1, done: 0 });
    assert_eq!(meetings.get().unwrap().unwrap().key, "5600");
}
