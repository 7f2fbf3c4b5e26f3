//! Background job reconciling the local catalog against the ERP, reporting progress as it goes.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use db::{
    DBService,
    models::{
        product::{Product, UpsertOutcome, UpsertProduct},
        sync_run::{SyncCounters, SyncRun},
    },
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use utils::progress::{ProgressEvent, SyncKind, SyncStatus, percent_of};
use uuid::Uuid;

use super::{
    erp::{ErpError, ErpProduct, ErpSource},
    exchange_rate::{ExchangeRateError, ExchangeRateService},
    progress::ProgressHub,
};

#[derive(Debug, Error)]
pub enum CatalogSyncError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("erp error: {0}")]
    Erp(#[from] ErpError),
    #[error("exchange rate error: {0}")]
    ExchangeRate(#[from] ExchangeRateError),
    #[error("a catalog sync is already running")]
    AlreadyRunning,
}

/// Releases the one-job-at-a-time flag when dropped, including on panic
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct CatalogSyncService {
    db: DBService,
    erp: Arc<dyn ErpSource>,
    rates: ExchangeRateService,
    progress: ProgressHub,
    catalog_currency: String,
    page_size: u32,
    running: Arc<AtomicBool>,
}

impl CatalogSyncService {
    pub fn new(
        db: DBService,
        erp: Arc<dyn ErpSource>,
        rates: ExchangeRateService,
        progress: ProgressHub,
        catalog_currency: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            db,
            erp,
            rates,
            progress,
            catalog_currency: catalog_currency.into(),
            page_size: page_size.max(1),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>, CatalogSyncError> {
        Ok(SyncRun::list_recent(&self.db.pool, limit).await?)
    }

    /// Fail runs a previous process left open. Called once at startup.
    pub async fn recover_interrupted(&self) -> Result<(), CatalogSyncError> {
        let failed = SyncRun::fail_interrupted(&self.db.pool).await?;
        if failed > 0 {
            warn!(failed, "Marked interrupted sync runs as failed");
        }
        Ok(())
    }

    /// Start a sync job in the background and return its run record immediately.
    /// The job keeps running when progress subscribers disconnect.
    pub async fn start(
        &self,
        kind: SyncKind,
        triggered_by: Option<Uuid>,
    ) -> Result<SyncRun, CatalogSyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CatalogSyncError::AlreadyRunning);
        }
        let guard = RunningGuard(self.running.clone());

        let run = SyncRun::create(&self.db.pool, kind, triggered_by).await?;
        info!(
            run_id = %run.id,
            kind = %kind,
            triggered_by = ?triggered_by,
            "Starting catalog sync"
        );

        // Announce before spawning so a subscriber that triggered the run sees it start
        self.progress.publish(ProgressEvent::running(
            Some(0.0),
            format!("Starting {kind} catalog sync"),
        ));

        let service = self.clone();
        let job_run = run.clone();
        tokio::spawn(async move {
            service.execute(job_run, guard).await;
        });

        Ok(run)
    }

    async fn execute(&self, run: SyncRun, guard: RunningGuard) {
        let mut counters = SyncCounters::default();
        let result = self.reconcile(&run, &mut counters).await;

        let (status, terminal_event) = match result {
            Ok(()) => {
                let summary = summarize(&counters);
                info!(run_id = %run.id, ?counters, "Catalog sync completed");
                (SyncStatus::Completed, ProgressEvent::completed(summary))
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, ?counters, "Catalog sync failed");
                (SyncStatus::Error, ProgressEvent::failed(format!("Sync failed: {e}")))
            }
        };

        if let Err(e) = SyncRun::finish(
            &self.db.pool,
            run.id,
            status,
            &counters,
            terminal_event.message.as_deref(),
        )
        .await
        {
            error!(run_id = %run.id, error = %e, "Failed to record sync run result");
        }

        // Announce while still holding the slot, so a run started afterwards never sees this end
        self.progress.publish(terminal_event);
        drop(guard);
    }

    async fn reconcile(
        &self,
        run: &SyncRun,
        counters: &mut SyncCounters,
    ) -> Result<(), CatalogSyncError> {
        let mut page = 1;

        loop {
            let batch = self.erp.fetch_page(page, self.page_size).await?;
            let batch_len = batch.items.len();
            debug!(run_id = %run.id, page, batch_len, total = batch.total, "Fetched ERP page");

            for item in &batch.items {
                self.apply(run, item, counters).await?;
                counters.processed += 1;
            }

            let processed = counters.processed as u64;
            let total = batch.total.max(processed);
            self.progress.publish(ProgressEvent::running(
                Some(percent_of(processed, total)),
                format!("Processed {processed} of {total} products"),
            ));

            if batch_len < self.page_size as usize || processed >= total {
                break;
            }
            page += 1;
        }

        if run.kind == SyncKind::Full {
            self.progress.publish(ProgressEvent::running(
                None,
                "Deactivating products missing from the ERP",
            ));
            counters.deactivated =
                Product::deactivate_not_seen_in(&self.db.pool, run.id).await? as i64;
        }

        Ok(())
    }

    async fn apply(
        &self,
        run: &SyncRun,
        item: &ErpProduct,
        counters: &mut SyncCounters,
    ) -> Result<(), CatalogSyncError> {
        let sku = item.sku.trim();
        if sku.is_empty() || !item.price.is_finite() || item.price < 0.0 {
            warn!(run_id = %run.id, sku = %item.sku, price = item.price, "Skipping invalid ERP product");
            counters.skipped += 1;
            // Still listed by the ERP, so a full sync must not deactivate it
            if run.kind == SyncKind::Full && !sku.is_empty() {
                Product::mark_seen(&self.db.pool, sku, run.id).await?;
            }
            return Ok(());
        }

        let price = self
            .rates
            .convert(item.price, &item.currency, &self.catalog_currency)
            .await?;
        let stock = item.stock.max(0);

        match run.kind {
            SyncKind::Manual => {
                let updated = Product::update_price_stock(
                    &self.db.pool,
                    sku,
                    price,
                    &self.catalog_currency,
                    stock,
                    run.id,
                )
                .await?;
                if updated {
                    counters.updated += 1;
                } else {
                    counters.skipped += 1;
                }
            }
            SyncKind::Full => {
                let data = UpsertProduct {
                    sku: sku.to_string(),
                    name: item.name.clone(),
                    description: item.description.clone(),
                    price,
                    currency: self.catalog_currency.clone(),
                    stock,
                };
                match Product::upsert(&self.db.pool, &data, run.id).await? {
                    UpsertOutcome::Created => counters.created += 1,
                    UpsertOutcome::Updated => counters.updated += 1,
                }
            }
        }

        Ok(())
    }
}

fn summarize(counters: &SyncCounters) -> String {
    format!(
        "Sync completed: {} processed, {} created, {} updated, {} deactivated, {} skipped",
        counters.processed, counters.created, counters.updated, counters.deactivated, counters.skipped
    )
}

#[cfg(test)]
mod tests {
    use std::{pin::pin, time::Duration};

    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::sync::Notify;

    use super::*;
    use crate::services::{
        erp::ErpPage,
        exchange_rate::RateSource,
    };

    struct FixedRates;

    #[async_trait]
    impl RateSource for FixedRates {
        async fn fetch_rate(&self, from: &str, to: &str) -> Result<f64, ExchangeRateError> {
            match (from, to) {
                ("USD", "ARS") => Ok(1000.0),
                _ => Err(ExchangeRateError::UnknownPair {
                    from: from.to_string(),
                    to: to.to_string(),
                }),
            }
        }
    }

    struct FakeErp {
        products: Vec<ErpProduct>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait]
    impl ErpSource for FakeErp {
        async fn fetch_page(&self, page: u32, page_size: u32) -> Result<ErpPage, ErpError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(ErpError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            let start = ((page - 1) * page_size) as usize;
            let items = self
                .products
                .iter()
                .skip(start)
                .take(page_size as usize)
                .cloned()
                .collect();
            Ok(ErpPage {
                items,
                total: self.products.len() as u64,
            })
        }
    }

    fn erp_product(sku: &str, price: f64, currency: &str) -> ErpProduct {
        ErpProduct {
            sku: sku.to_string(),
            name: format!("Product {sku}"),
            description: None,
            price,
            currency: currency.to_string(),
            stock: 3,
        }
    }

    fn service(db: &DBService, erp: FakeErp, page_size: u32) -> CatalogSyncService {
        CatalogSyncService::new(
            db.clone(),
            Arc::new(erp),
            ExchangeRateService::new(Arc::new(FixedRates), Duration::from_secs(60)),
            ProgressHub::new(),
            "ARS",
            page_size,
        )
    }

    async fn run_to_end(service: &CatalogSyncService, kind: SyncKind) -> Vec<ProgressEvent> {
        let mut stream = pin!(service.progress().subscribe());
        service.start(kind, None).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        wait_idle(service).await;
        events
    }

    /// The slot is released right after the terminal event goes out
    async fn wait_idle(service: &CatalogSyncService) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sync job never released its slot");
    }

    #[tokio::test]
    async fn full_sync_creates_converts_and_deactivates() {
        let db = DBService::in_memory().await.unwrap();
        Product::upsert(
            &db.pool,
            &UpsertProduct {
                sku: "GONE".to_string(),
                name: "Discontinued".to_string(),
                description: None,
                price: 1.0,
                currency: "ARS".to_string(),
                stock: 1,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let erp = FakeErp {
            products: vec![
                erp_product("A", 1.5, "USD"),
                erp_product("B", 200.0, "ARS"),
                erp_product("C", 2.0, "USD"),
            ],
            gate: None,
            fail: false,
        };
        let service = service(&db, erp, 2);

        let events = run_to_end(&service, SyncKind::Full).await;

        let last = events.last().unwrap();
        assert_eq!(last.status, SyncStatus::Completed);
        assert!(last.message.as_deref().unwrap().contains("3 created"));
        assert!(events.iter().any(|e| e.percent.is_none()));

        let a = Product::find_by_sku(&db.pool, "A").await.unwrap().unwrap();
        assert_eq!(a.price, 1500.0);
        assert_eq!(a.currency, "ARS");
        let gone = Product::find_by_sku(&db.pool, "GONE").await.unwrap().unwrap();
        assert!(!gone.active);

        let runs = service.recent_runs(10).await.unwrap();
        assert_eq!(runs[0].status, SyncStatus::Completed);
        assert_eq!(runs[0].created, 3);
        assert_eq!(runs[0].deactivated, 1);
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn manual_sync_only_touches_known_products() {
        let db = DBService::in_memory().await.unwrap();
        Product::upsert(
            &db.pool,
            &UpsertProduct {
                sku: "A".to_string(),
                name: "Known".to_string(),
                description: None,
                price: 1.0,
                currency: "ARS".to_string(),
                stock: 0,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let erp = FakeErp {
            products: vec![erp_product("A", 2.0, "USD"), erp_product("NEW", 1.0, "USD")],
            gate: None,
            fail: false,
        };
        let service = service(&db, erp, 100);

        run_to_end(&service, SyncKind::Manual).await;

        let a = Product::find_by_sku(&db.pool, "A").await.unwrap().unwrap();
        assert_eq!(a.price, 2000.0);
        assert_eq!(a.stock, 3);
        assert!(Product::find_by_sku(&db.pool, "NEW").await.unwrap().is_none());

        let run = &service.recent_runs(1).await.unwrap()[0];
        assert_eq!((run.updated, run.skipped), (1, 1));
    }

    #[tokio::test]
    async fn full_sync_keeps_listed_products_with_invalid_rows() {
        let db = DBService::in_memory().await.unwrap();
        Product::upsert(
            &db.pool,
            &UpsertProduct {
                sku: "KEEP".to_string(),
                name: "Still listed".to_string(),
                description: None,
                price: 7.0,
                currency: "ARS".to_string(),
                stock: 2,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let erp = FakeErp {
            products: vec![erp_product("KEEP", -1.0, "ARS")],
            gate: None,
            fail: false,
        };
        let service = service(&db, erp, 10);

        let events = run_to_end(&service, SyncKind::Full).await;

        assert_eq!(events.last().unwrap().status, SyncStatus::Completed);
        let keep = Product::find_by_sku(&db.pool, "KEEP").await.unwrap().unwrap();
        assert!(keep.active);
        assert_eq!(keep.price, 7.0);
        let run = &service.recent_runs(1).await.unwrap()[0];
        assert_eq!((run.skipped, run.deactivated), (1, 0));
    }

    #[tokio::test]
    async fn next_run_starts_after_previous_end_is_announced() {
        let db = DBService::in_memory().await.unwrap();
        let gate = Arc::new(Notify::new());
        let erp = FakeErp {
            products: vec![erp_product("A", 1.0, "ARS")],
            gate: Some(gate.clone()),
            fail: false,
        };
        let service = service(&db, erp, 10);
        let mut stream = pin!(service.progress().subscribe());

        service.start(SyncKind::Full, None).await.unwrap();
        gate.notify_one();
        wait_idle(&service).await;
        service.start(SyncKind::Manual, None).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap();
            seen.push((event.status, event.message.unwrap_or_default()));
        }

        let terminal = seen.iter().position(|(status, _)| status.is_terminal()).unwrap();
        let second_start = seen
            .iter()
            .position(|(_, message)| message == "Starting manual catalog sync")
            .unwrap();
        assert!(terminal < second_start);
        assert_eq!(seen[terminal].0, SyncStatus::Completed);
        gate.notify_one();
    }

    #[tokio::test]
    async fn erp_failure_ends_with_error_event() {
        let db = DBService::in_memory().await.unwrap();
        let erp = FakeErp {
            products: vec![],
            gate: None,
            fail: true,
        };
        let service = service(&db, erp, 10);

        let events = run_to_end(&service, SyncKind::Full).await;

        let last = events.last().unwrap();
        assert_eq!(last.status, SyncStatus::Error);
        assert!(last.message.as_deref().unwrap().contains("http 500"));
        assert_eq!(service.recent_runs(1).await.unwrap()[0].status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let db = DBService::in_memory().await.unwrap();
        let gate = Arc::new(Notify::new());
        let erp = FakeErp {
            products: vec![erp_product("A", 1.0, "ARS")],
            gate: Some(gate.clone()),
            fail: false,
        };
        let service = service(&db, erp, 10);
        let mut stream = pin!(service.progress().subscribe());

        service.start(SyncKind::Full, None).await.unwrap();
        let second = service.start(SyncKind::Manual, None).await;
        assert!(matches!(second, Err(CatalogSyncError::AlreadyRunning)));

        gate.notify_one();
        while let Some(event) = stream.next().await {
            if event.is_terminal() {
                break;
            }
        }
        wait_idle(&service).await;
        assert!(service.start(SyncKind::Manual, None).await.is_ok());
        gate.notify_one();
    }

    #[test]
    fn summary_lists_all_counters() {
        let counters = SyncCounters {
            processed: 4,
            created: 1,
            updated: 2,
            deactivated: 0,
            skipped: 1,
        };
        assert_eq!(
            summarize(&counters),
            "Sync completed: 4 processed, 1 created, 2 updated, 0 deactivated, 1 skipped"
        );
    }
}
