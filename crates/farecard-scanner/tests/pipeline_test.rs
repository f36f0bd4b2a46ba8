//! End-to-end pipeline runs against a scripted in-memory portal.

use async_trait::async_trait;
use farecard_browser::{BrowserActions, BrowserError, LaneLauncher, WaitState};
use farecard_core::{AppConfig, Credentials, ExtractionStrategy, RecordOrigin};
use farecard_scanner::scripts::script_tag;
use farecard_scanner::{run_pipeline, Pipeline, ScrapeError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PASSWORD: &str = "correct-horse";

/// What the portal serves.
#[derive(Default)]
struct Scenario {
    options: Vec<(String, String)>,
    rows: HashMap<String, Vec<Vec<String>>>,
    ignores_selection: HashSet<String>,
    render_delay: Duration,
    static_signature: bool,
}

impl Scenario {
    fn option(mut self, id: &str, label: &str) -> Self {
        self.options.push((id.to_string(), label.to_string()));
        self
    }

    fn rows(mut self, id: &str, rows: Vec<Vec<String>>) -> Self {
        self.rows.insert(id.to_string(), rows);
        self
    }

    fn ignoring_selection_of(mut self, id: &str) -> Self {
        self.ignores_selection.insert(id.to_string());
        self
    }

    /// Data rows appear this long after login; the header row is always there.
    fn rendering_after(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// The table signature never changes, whatever is selected.
    fn with_static_signature(mut self) -> Self {
        self.static_signature = true;
        self
    }
}

const HEADER_ROW: &str =
    r#"<tr class="title"><td>Cartao</td><td>Matricula</td><td>Nome</td><td>Saldo</td></tr>"#;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn row_markup(cells: &[String]) -> String {
    let cells: String = cells.iter().map(|c| format!("<td>{}</td>", escape(c))).collect();
    format!("<tr>{cells}</tr>")
}

fn card(number: u32) -> Vec<String> {
    vec![
        format!("{number:04}"),
        format!("E{number}"),
        format!("Employee {number}"),
        format!("{number},50"),
    ]
}

fn cards(range: std::ops::RangeInclusive<u32>) -> Vec<Vec<String>> {
    range.map(card).collect()
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
    select_calls: AtomicUsize,
    shutdowns: AtomicUsize,
}

struct FakePortal {
    scenario: Arc<Scenario>,
    counters: Arc<Counters>,
}

impl FakePortal {
    fn new(scenario: Scenario) -> Self {
        Self {
            scenario: Arc::new(scenario),
            counters: Arc::new(Counters::default()),
        }
    }

    fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    fn open_now(&self) -> usize {
        self.counters.open_now.load(Ordering::SeqCst)
    }

    fn max_open(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LaneLauncher for FakePortal {
    type Page = FakePage;

    async fn open_lane(&self) -> farecard_browser::Result<FakePage> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(now, Ordering::SeqCst);

        let selected = self
            .scenario
            .options
            .first()
            .map(|(id, _)| id.clone())
            .unwrap_or_default();
        Ok(FakePage {
            scenario: Arc::clone(&self.scenario),
            counters: Arc::clone(&self.counters),
            state: Mutex::new(PageState {
                selected,
                ..PageState::default()
            }),
        })
    }

    async fn shutdown(&self) -> farecard_browser::Result<()> {
        self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct PageState {
    password: String,
    logged_in: bool,
    logged_in_at: Option<Instant>,
    login_rejected: bool,
    selected: String,
    details: bool,
    closed: bool,
}

struct FakePage {
    scenario: Arc<Scenario>,
    counters: Arc<Counters>,
    state: Mutex<PageState>,
}

impl FakePage {
    fn state(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().expect("page state")
    }

    fn current_rows(&self) -> Vec<Vec<String>> {
        let state = self.state();
        let rendered = state
            .logged_in_at
            .is_some_and(|at| at.elapsed() >= self.scenario.render_delay);
        if !state.logged_in || !rendered {
            return Vec::new();
        }
        self.scenario.rows.get(&state.selected).cloned().unwrap_or_default()
    }

    /// Markup of every rendered row, header first.
    fn current_row_markup(&self) -> Vec<String> {
        std::iter::once(HEADER_ROW.to_string())
            .chain(self.current_rows().iter().map(|cells| row_markup(cells)))
            .collect()
    }
}

#[async_trait]
impl BrowserActions for FakePage {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> farecard_browser::Result<()> {
        if self.state().closed {
            return Err(BrowserError::LaneClosed);
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        _selector: &str,
        _state: WaitState,
        _timeout: Duration,
    ) -> farecard_browser::Result<()> {
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> farecard_browser::Result<bool> {
        Ok(selector == "#lblErro" && self.state().login_rejected)
    }

    async fn fill_field(&self, selector: &str, value: &str) -> farecard_browser::Result<()> {
        if selector == "#txtSenha" {
            self.state().password = value.to_string();
        }
        Ok(())
    }

    async fn click(&self, _selector: &str) -> farecard_browser::Result<()> {
        Ok(())
    }

    async fn click_and_wait_for_navigation(
        &self,
        _selector: &str,
        _timeout: Duration,
    ) -> farecard_browser::Result<()> {
        let mut state = self.state();
        let accepted = state.password == PASSWORD;
        state.logged_in = accepted;
        state.logged_in_at = accepted.then(Instant::now);
        state.login_rejected = !accepted;
        Ok(())
    }

    async fn check(&self, _selector: &str) -> farecard_browser::Result<()> {
        self.state().details = true;
        Ok(())
    }

    async fn is_checked(&self, _selector: &str) -> farecard_browser::Result<bool> {
        Ok(self.state().details)
    }

    async fn select_option(&self, _selector: &str, value: &str) -> farecard_browser::Result<()> {
        self.counters.select_calls.fetch_add(1, Ordering::SeqCst);
        if !self.scenario.ignores_selection.contains(value) {
            self.state().selected = value.to_string();
        }
        Ok(())
    }

    async fn selected_value(&self, _selector: &str) -> farecard_browser::Result<Option<String>> {
        Ok(Some(self.state().selected.clone()))
    }

    async fn extract_text(&self, selector: &str) -> farecard_browser::Result<String> {
        if selector == "#lblErro" {
            return Ok("Invalid credentials".to_string());
        }
        Ok(String::new())
    }

    async fn evaluate(&self, script: &str) -> farecard_browser::Result<Value> {
        let tag = script_tag(script).unwrap_or_default();
        let value = match tag {
            "options" => Value::Array(
                self.scenario
                    .options
                    .iter()
                    .map(|(id, label)| json!({ "id": id, "label": label }))
                    .collect(),
            ),
            "signature" if self.scenario.static_signature => json!("static"),
            "signature" => {
                let state = self.state();
                json!(format!("{}|{}", state.selected, state.details))
            }
            "table-html" => json!(format!(
                r#"<table id="gridPedidos">{}</table>"#,
                self.current_row_markup().concat()
            )),
            "row-count" => json!(self.current_row_markup().len()),
            other => match other.strip_prefix("row:").and_then(|i| i.parse::<usize>().ok()) {
                Some(index) => json!(self.current_row_markup().get(index)),
                None => return Err(BrowserError::ScriptError(format!("unknown script {other}"))),
            },
        };
        Ok(value)
    }

    async fn close(&self) -> farecard_browser::Result<()> {
        let mut state = self.state();
        if !state.closed {
            state.closed = true;
            self.counters.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn test_config(max_parallel: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.partitions.max_parallel = max_parallel;
    config.partitions.signature_poll_interval_ms = 1;
    config.partitions.signature_poll_attempts = 3;
    config.retry.delay_ms = 1;
    config.timeouts.settle_ms = 1;
    config.timeouts.default_secs = 1;
    config
}

fn credentials() -> Credentials {
    Credentials::new("operator@example.com", PASSWORD).expect("valid credentials")
}

fn departments() -> Scenario {
    Scenario::default()
        .option("", "Selecione")
        .option("0", "Todos")
        .option("10", "HR")
        .option("20", "Sales")
        .rows("10", cards(1..=5))
        .rows("20", cards(6..=8))
        .rows("0", cards(1..=9))
}

#[tokio::test]
async fn test_partitions_reconciled_with_aggregate() {
    let portal = FakePortal::new(departments());
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 9);
    assert_eq!(result.partitions_processed, 2);
    assert_eq!(result.reconciled_extras, 1);

    let extra = result
        .records
        .iter()
        .find(|r| r.card_number == "0009")
        .expect("aggregate-only card");
    assert_eq!(extra.origin, RecordOrigin::ReconciledExtra);
    assert_eq!(
        result.records.iter().filter(|r| r.partition_label == "HR").count(),
        5
    );

    // primary, two partition lanes, aggregate lane
    assert_eq!(portal.opened(), 4);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_row_iteration_strategy_matches_bulk_scan() {
    let portal = FakePortal::new(departments());
    let mut config = test_config(2);
    config.extraction.strategy = ExtractionStrategy::RowIteration;

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 9);
    assert_eq!(result.reconciled_extras, 1);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_rejected_login_is_terminal() {
    let portal = FakePortal::new(departments());
    let config = test_config(2);
    let wrong = Credentials::new("operator@example.com", "wrong").expect("well-formed");

    let err = run_pipeline(&portal, &config, &wrong)
        .await
        .expect_err("login must fail");

    assert!(err.is_authentication(), "unexpected error: {err}");
    assert!(matches!(err, ScrapeError::Authentication { ref message } if message == "Invalid credentials"));
    assert_eq!(portal.counters.select_calls.load(Ordering::SeqCst), 0);
    assert_eq!(portal.opened(), 1);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_without_partitions_extracts_in_place() {
    let portal = FakePortal::new(Scenario::default().rows("", cards(1..=3)));
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 3);
    assert_eq!(result.reconciled_extras, 0);
    assert_eq!(portal.opened(), 1);
    assert_eq!(portal.open_now(), 0);
    assert_eq!(portal.counters.select_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rows_rendering_after_header_are_still_extracted() {
    let scenario = Scenario::default()
        .rows("", cards(1..=3))
        .rendering_after(Duration::from_millis(100));
    let portal = FakePortal::new(scenario);
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("rows arrive before the row timeout");

    assert_eq!(result.len(), 3);
    assert_eq!(result.rows_skipped, 0);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_header_row_is_not_a_record() {
    let portal = FakePortal::new(Scenario::default().rows("", cards(1..=2)));
    let mut config = test_config(2);
    config.extraction.strategy = ExtractionStrategy::RowIteration;

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 2);
    assert_eq!(result.rows_skipped, 0);
    assert!(result.records.iter().all(|r| r.card_number != "Cartao"));
}

#[tokio::test]
async fn test_unchanged_signature_after_selection_is_not_fatal() {
    let portal = FakePortal::new(departments().with_static_signature());
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("selection still confirmed through the selector value");

    assert_eq!(result.len(), 9);
    assert_eq!(result.partitions_processed, 2);
    assert_eq!(
        result.records.iter().filter(|r| r.partition_label == "Sales").count(),
        3
    );
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_single_partition_runs_inline() {
    let scenario = Scenario::default()
        .option("0", "Todos")
        .option("10", "HR")
        .rows("10", cards(1..=2))
        .rows("0", cards(1..=3));
    let portal = FakePortal::new(scenario);
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 3);
    assert_eq!(result.reconciled_extras, 1);
    assert_eq!(portal.opened(), 1);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_open_lanes_never_exceed_max_parallel() {
    let mut scenario = Scenario::default().option("", "Selecione");
    for id in 1..=5u32 {
        scenario = scenario
            .option(&id.to_string(), &format!("Dept {id}"))
            .rows(&id.to_string(), vec![card(id)]);
    }
    let portal = FakePortal::new(scenario);
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 5);
    assert_eq!(result.partitions_processed, 5);
    assert!(portal.max_open() <= 2, "max open lanes was {}", portal.max_open());
    // primary plus one per partition, no aggregate option
    assert_eq!(portal.opened(), 6);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_mismatched_partition_is_tolerated() {
    let scenario = departments()
        .option("30", "Ops")
        .rows("30", cards(20..=21))
        .ignoring_selection_of("20");
    let portal = FakePortal::new(scenario);
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("other partitions still succeed");

    assert_eq!(result.partitions_processed, 2);
    assert!(result.records.iter().all(|r| r.partition_label != "Sales"));
    // cards 6..=9 only come back through the aggregate listing
    assert_eq!(result.reconciled_extras, 4);
    assert_eq!(result.len(), 11);
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_chunk_with_every_partition_failing_escalates() {
    let scenario = departments()
        .ignoring_selection_of("10")
        .ignoring_selection_of("20");
    let portal = FakePortal::new(scenario);
    let config = test_config(2);

    let err = run_pipeline(&portal, &config, &credentials())
        .await
        .expect_err("whole chunk failed");

    match err {
        ScrapeError::AllPartitionsFailed { count, ref source } => {
            assert_eq!(count, 2);
            assert!(matches!(**source, ScrapeError::PartitionMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_malformed_rows_are_counted_not_fatal() {
    let rows = vec![
        card(1),
        vec!["0002".to_string(), "E2".to_string(), "Employee 2".to_string()],
        vec![
            "0003".to_string(),
            "E3".to_string(),
            "Employee 3".to_string(),
            "n/a".to_string(),
        ],
    ];
    let portal = FakePortal::new(Scenario::default().rows("", rows));
    let config = test_config(2);

    let result = run_pipeline(&portal, &config, &credentials())
        .await
        .expect("run succeeds");

    assert_eq!(result.len(), 2);
    assert_eq!(result.rows_skipped, 1);
    assert_eq!(result.warnings.len(), 1);
    let zeroed = result
        .records
        .iter()
        .find(|r| r.card_number == "0003")
        .expect("zero-balance record kept");
    assert!(zeroed.balance.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_nothing_extracted_is_an_error() {
    let portal = FakePortal::new(Scenario::default());
    let config = test_config(2);

    let err = run_pipeline(&portal, &config, &credentials())
        .await
        .expect_err("no rows anywhere");

    assert!(matches!(err, ScrapeError::ExtractionEmpty));
    assert_eq!(portal.open_now(), 0);
}

#[tokio::test]
async fn test_pipeline_handle_is_weak() {
    let portal = Arc::new(FakePortal::new(departments()));
    let pipeline = Pipeline::new(Arc::clone(&portal), test_config(2));
    let handle = pipeline.handle();

    let result = pipeline.run(&credentials()).await.expect("run succeeds");
    assert_eq!(result.len(), 9);

    pipeline.shutdown().await.expect("shutdown");
    assert_eq!(portal.counters.shutdowns.load(Ordering::SeqCst), 1);

    drop(pipeline);
    drop(portal);
    assert!(handle.upgrade().is_none());
}
