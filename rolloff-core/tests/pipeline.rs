//! End-to-end tests of orchestration, normalization, and persistence with scripted extractors.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rolloff_core::{
    ConcurrencyPolicy, ExtractError, Extractor, ExtractorSession, ExtractorStatus,
    JsonFileStore, MemoryStore, Normalizer, Orchestrator, Pipeline, PipelineError, PriceBounds,
    PriceSchedule, RawCompany, RawDumpsterSize, RawPricing, RawServiceArea, RetryPolicy,
    RunStatus, Scheduler, SnapshotStore, StateFactors, VendorId, VendorMeta, VendorPlugin,
    VendorRegistry,
};
use tokio::task::yield_now;
use tokio::time::{self, Instant, sleep};

#[derive(Debug, Clone, Copy)]
enum Script {
    Healthy,
    FlakyCompany(usize),
    BrokenCompany,
    FatalOpen,
    PanicsOnOpen,
    PanicsInSession,
}

#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Probe {
    opened: AtomicUsize,
    company_calls: AtomicUsize,
    closed: AtomicUsize,
}

struct ScriptedExtractor {
    meta: VendorMeta,
    script: Script,
    work: Duration,
    probe: Arc<Probe>,
    gauge: Arc<Gauge>,
}

struct ScriptedSession {
    vendor: String,
    script: Script,
    work: Duration,
    probe: Arc<Probe>,
    gauge: Arc<Gauge>,
}

fn unavailable() -> ExtractError {
    ExtractError::Status {
        status: 503,
        url: "https://vendor.test".to_owned(),
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn vendor(&self) -> &VendorMeta {
        &self.meta
    }

    async fn open(&self) -> Result<Box<dyn ExtractorSession>, ExtractError> {
        match self.script {
            Script::FatalOpen => {
                return Err(ExtractError::Session("tls handshake refused".to_owned()));
            }
            Script::PanicsOnOpen => panic!("{} could not build its client", self.meta.name),
            _ => {}
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            vendor: self.meta.name.clone(),
            script: self.script,
            work: self.work,
            probe: Arc::clone(&self.probe),
            gauge: Arc::clone(&self.gauge),
        }))
    }
}

impl ScriptedSession {
    async fn busy(&self) {
        self.gauge.enter();
        if !self.work.is_zero() {
            sleep(self.work).await;
        }
        self.gauge.leave();
    }
}

#[async_trait]
impl ExtractorSession for ScriptedSession {
    async fn company_info(&self) -> Result<RawCompany, ExtractError> {
        self.busy().await;
        let call = self.probe.company_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script {
            Script::FlakyCompany(failures) if call <= failures => Err(unavailable()),
            Script::BrokenCompany => Err(unavailable()),
            Script::PanicsInSession => panic!("{} returned malformed markup", self.vendor),
            _ => Ok(RawCompany {
                name: self.vendor.clone(),
                phone: Some("1-800-555-0100".to_owned()),
                ..RawCompany::default()
            }),
        }
    }

    async fn service_areas(&self) -> Result<Vec<RawServiceArea>, ExtractError> {
        self.busy().await;
        Ok(vec![
            RawServiceArea::new("Denver", "CO"),
            RawServiceArea::new("Boston", "MA"),
        ])
    }

    async fn dumpster_sizes(&self) -> Result<Vec<RawDumpsterSize>, ExtractError> {
        self.busy().await;
        Ok([10, 20]
            .into_iter()
            .map(|size_yards| RawDumpsterSize {
                size_yards,
                ..RawDumpsterSize::default()
            })
            .collect())
    }

    async fn prices(&self) -> Result<RawPricing, ExtractError> {
        self.busy().await;
        Ok(RawPricing::Schedule(PriceSchedule {
            base_fee: 150.0,
            per_yard: 15.0,
            state_factors: StateFactors::default(),
            additional_day_rate: Some(0.1),
            weight_overage_price: Some(60.0),
            rental_period_days: Some(14),
        }))
    }

    async fn close(&self) {
        self.probe.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fleet {
    plugins: Vec<VendorPlugin>,
    probes: Vec<Arc<Probe>>,
    gauge: Arc<Gauge>,
}

impl Fleet {
    fn new(scripts: &[Script], work: Duration) -> Self {
        let gauge = Arc::new(Gauge::default());
        let mut plugins = Vec::new();
        let mut probes = Vec::new();

        for (index, script) in scripts.iter().enumerate() {
            let meta = VendorMeta {
                id: VendorId(format!("vendor-{index}")),
                name: format!("Vendor {index}"),
                website: format!("https://vendor-{index}.test"),
            };
            let probe = Arc::new(Probe::default());
            probes.push(Arc::clone(&probe));
            plugins.push(VendorPlugin {
                extractor: Arc::new(ScriptedExtractor {
                    meta: meta.clone(),
                    script: *script,
                    work,
                    probe,
                    gauge: Arc::clone(&gauge),
                }),
                meta,
            });
        }

        Self {
            plugins,
            probes,
            gauge,
        }
    }

    fn orchestrator(
        self,
        concurrency: ConcurrencyPolicy,
        retry: RetryPolicy,
    ) -> (Orchestrator, Vec<Arc<Probe>>, Arc<Gauge>) {
        let registry = VendorRegistry::new(self.plugins).expect("unique vendors");
        let orchestrator = Orchestrator::new(
            &registry,
            Normalizer::new(PriceBounds::default()),
            concurrency,
            retry,
        );
        (orchestrator, self.probes, self.gauge)
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

fn company_calls(probes: &[Arc<Probe>], index: usize) -> usize {
    probes
        .get(index)
        .map_or(0, |probe| probe.company_calls.load(Ordering::SeqCst))
}

fn opens(probes: &[Arc<Probe>], index: usize) -> usize {
    probes
        .get(index)
        .map_or(0, |probe| probe.opened.load(Ordering::SeqCst))
}

fn closes(probes: &[Arc<Probe>], index: usize) -> usize {
    probes
        .get(index)
        .map_or(0, |probe| probe.closed.load(Ordering::SeqCst))
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_doubling_delays() {
    let (orchestrator, probes, _) = Fleet::new(&[Script::FlakyCompany(2)], Duration::ZERO)
        .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());

    let started = Instant::now();
    let report = orchestrator.run().await;

    assert_eq!(company_calls(&probes, 0), 3);
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(report.status(), RunStatus::Complete);

    let outcome = report.outcomes.first().expect("one outcome");
    assert_eq!(outcome.status, ExtractorStatus::Succeeded);
    // open, three company_info calls, then one call each for the other operations
    assert_eq!(outcome.attempts, 7);
    assert_eq!(closes(&probes, 0), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_extractor_is_excluded_and_run_is_partial() {
    let (orchestrator, probes, _) = Fleet::new(
        &[Script::Healthy, Script::BrokenCompany, Script::Healthy],
        Duration::ZERO,
    )
    .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());

    let report = orchestrator.run().await;

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(company_calls(&probes, 1), 3);
    assert_eq!(closes(&probes, 1), 1);

    let vendors: Vec<&str> = report
        .outcomes
        .iter()
        .map(|outcome| outcome.vendor.0.as_str())
        .collect();
    assert_eq!(vendors, vec!["vendor-0", "vendor-1", "vendor-2"]);

    let failed = report.outcomes.get(1).expect("failed outcome");
    assert_eq!(failed.status, ExtractorStatus::Failed);
    assert!(failed.error.is_some());

    let names: Vec<&str> = report
        .snapshot
        .companies
        .iter()
        .map(|company| company.name.as_str())
        .collect();
    assert_eq!(names, vec!["Vendor 0", "Vendor 2"]);
    assert_eq!(report.snapshot.prices.len(), 8);
}

#[tokio::test]
async fn fatal_open_is_not_retried() {
    let patient = RetryPolicy::new(5, Duration::from_secs(60));
    let (orchestrator, probes, _) = Fleet::new(&[Script::FatalOpen, Script::Healthy], Duration::ZERO)
        .orchestrator(ConcurrencyPolicy::Sequential, patient);

    let report = orchestrator.run().await;
    let outcome = report.outcomes.first().expect("outcome");

    assert_eq!(outcome.status, ExtractorStatus::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(closes(&probes, 0), 0);
    assert_eq!(report.status(), RunStatus::Partial);
}

#[tokio::test(start_paused = true)]
async fn bounded_run_never_exceeds_the_limit() {
    let scripts = [Script::Healthy; 6];
    let (orchestrator, _, gauge) = Fleet::new(&scripts, Duration::from_millis(50))
        .orchestrator(ConcurrencyPolicy::Bounded(2), quick_retry());

    let report = orchestrator.run().await;

    assert_eq!(report.status(), RunStatus::Complete);
    assert_eq!(report.outcomes.len(), 6);
    assert_eq!(report.snapshot.companies.len(), 6);
    assert_eq!(gauge.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_bound_still_completes() {
    let (orchestrator, _, gauge) = Fleet::new(&[Script::Healthy; 3], Duration::from_millis(5))
        .orchestrator(ConcurrencyPolicy::Bounded(0), quick_retry());

    let report = time::timeout(Duration::from_secs(60), orchestrator.run())
        .await
        .expect("run finishes");

    assert_eq!(report.status(), RunStatus::Complete);
    assert_eq!(gauge.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_extractor_fails_alone_in_sequence() {
    let (orchestrator, probes, _) = Fleet::new(
        &[Script::Healthy, Script::PanicsInSession, Script::Healthy],
        Duration::ZERO,
    )
    .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());

    let report = orchestrator.run().await;

    assert_eq!(report.status(), RunStatus::Partial);
    let failed = report.outcomes.get(1).expect("second outcome");
    assert_eq!(failed.status, ExtractorStatus::Failed);
    assert!(failed.error.as_deref().is_some_and(|error| error.contains("panicked")));
    assert_eq!(closes(&probes, 1), 1);
    assert_eq!(report.snapshot.companies.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn bounded_run_isolates_panics_and_exhausted_retries() {
    let (orchestrator, probes, _) = Fleet::new(
        &[
            Script::PanicsInSession,
            Script::PanicsOnOpen,
            Script::BrokenCompany,
            Script::Healthy,
        ],
        Duration::from_millis(5),
    )
    .orchestrator(ConcurrencyPolicy::Bounded(2), quick_retry());

    let report = orchestrator.run().await;

    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(report.outcomes.len(), 4);

    let failed: HashSet<&str> = report
        .outcomes
        .iter()
        .filter(|outcome| outcome.status == ExtractorStatus::Failed)
        .map(|outcome| outcome.vendor.0.as_str())
        .collect();
    assert_eq!(failed, HashSet::from(["vendor-0", "vendor-1", "vendor-2"]));
    assert!(report
        .outcomes
        .iter()
        .filter(|outcome| outcome.status == ExtractorStatus::Failed)
        .all(|outcome| outcome.error.is_some()));

    assert_eq!(company_calls(&probes, 2), 3);
    assert_eq!(closes(&probes, 0), 1);
    assert_eq!(closes(&probes, 2), 1);

    let names: Vec<&str> = report
        .snapshot
        .companies
        .iter()
        .map(|company| company.name.as_str())
        .collect();
    assert_eq!(names, vec!["Vendor 3"]);
}

#[tokio::test(start_paused = true)]
async fn snapshot_references_resolve_and_ids_are_unique() {
    let (orchestrator, _, _) = Fleet::new(&[Script::Healthy; 3], Duration::from_millis(5))
        .orchestrator(ConcurrencyPolicy::Bounded(3), quick_retry());

    let snapshot = orchestrator.run().await.snapshot;
    assert_eq!(snapshot.check_integrity(), Ok(()));

    let companies: HashSet<_> = snapshot.companies.iter().map(|company| &company.id).collect();
    let areas: HashSet<_> = snapshot.service_areas.iter().map(|area| &area.id).collect();
    let sizes: HashSet<_> = snapshot.dumpster_sizes.iter().map(|size| &size.id).collect();
    let prices: HashSet<_> = snapshot.prices.iter().map(|price| &price.id).collect();

    assert_eq!(companies.len(), snapshot.companies.len());
    assert_eq!(areas.len(), snapshot.service_areas.len());
    assert_eq!(sizes.len(), snapshot.dumpster_sizes.len());
    assert_eq!(prices.len(), snapshot.prices.len());

    for price in &snapshot.prices {
        assert!(companies.contains(&price.company_id));
        assert!(sizes.contains(&price.size_id));
        assert!(areas.contains(&price.service_area_id));
    }
}

#[tokio::test]
async fn pipeline_persists_and_reloads_the_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (orchestrator, _, _) = Fleet::new(&[Script::Healthy], Duration::ZERO)
        .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let shared: Arc<dyn SnapshotStore> = Arc::<JsonFileStore>::clone(&store);
    let pipeline = Pipeline::new(orchestrator, shared);

    let summary = pipeline.run_once().await.expect("refresh");
    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.prices, 4);

    let reopened = JsonFileStore::new(dir.path());
    let loaded = reopened.load().await;
    assert_eq!(loaded.last_updated, summary.saved_at);
    assert_eq!(*loaded, *store.load().await);

    let denver = reopened.query_by_city("denver", None).await.expect("query");
    assert_eq!(denver.prices.len(), 2);
    assert_eq!(denver.companies.len(), 1);
    assert_eq!(denver.dumpster_sizes.len(), 2);
    // 150 + 15 * 10, neutral state factor
    assert!(denver.prices.iter().any(|price| (price.base_price - 300.0).abs() < f64::EPSILON));

    let elsewhere = reopened.query_by_city("Denver", Some("NY")).await.expect("query");
    assert!(elsewhere.prices.is_empty());
    assert!(elsewhere.service_areas.is_empty());
}

#[tokio::test]
async fn failed_run_keeps_the_previous_snapshot() {
    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::default());

    let (healthy, _, _) = Fleet::new(&[Script::Healthy], Duration::ZERO)
        .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());
    Pipeline::new(healthy, Arc::clone(&store))
        .run_once()
        .await
        .expect("first refresh");
    let before = store.load().await;

    let (broken, _, _) = Fleet::new(&[Script::FatalOpen, Script::FatalOpen], Duration::ZERO)
        .orchestrator(ConcurrencyPolicy::Bounded(2), quick_retry());
    let result = Pipeline::new(broken, Arc::clone(&store))
        .run_once()
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::AllExtractorsFailed { failed: 2 })
    ));
    assert_eq!(store.load().await, before);
}

#[tokio::test]
async fn empty_store_loads_without_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::new(dir.path());
    let snapshot = store.load().await;

    assert!(snapshot.companies.is_empty());
    assert!(snapshot.service_areas.is_empty());
    assert!(snapshot.dumpster_sizes.is_empty());
    assert!(snapshot.prices.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopping_the_scheduler_closes_the_open_session() {
    let (orchestrator, probes, _) = Fleet::new(&[Script::Healthy], Duration::from_secs(60))
        .orchestrator(ConcurrencyPolicy::Sequential, quick_retry());
    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::default());
    let pipeline = Arc::new(Pipeline::new(orchestrator, Arc::clone(&store)));
    let scheduler = Scheduler::new(pipeline, Duration::from_secs(3600));

    scheduler.start().expect("start");
    for _ in 0..50 {
        yield_now().await;
    }
    assert_eq!(opens(&probes, 0), 1);

    scheduler.stop().await.expect("stop");

    assert_eq!(closes(&probes, 0), 1);
    assert_eq!(company_calls(&probes, 0), 1);
    assert!(!store.load().await.companies.is_empty());
}
