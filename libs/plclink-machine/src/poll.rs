//! Background poll loop
//!
//! One task per machine walks the registered blocks of every region on a
//! fixed cadence, refreshes the cached image, and announces each completed
//! pass. Connectivity is the verdict of the latest pass: true only when
//! every region scan succeeded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::region::Region;
use crate::scan::ScanRegistry;
use crate::store::RegionStore;

/// Delay between poll passes.
const PASS_INTERVAL: Duration = Duration::from_millis(20);
/// Interest lapses after this long without a touch.
const INTEREST_TTL: Duration = Duration::from_secs(600);
/// Stale interest is swept every this many passes.
const EXPIRE_EVERY: u64 = 10;
/// Upper bound on waiting for fresh data.
const UPDATE_CEILING: Duration = Duration::from_secs(5);

/// Per-machine scan driver. The poll loop calls `scan_region` once per
/// region per pass; implementations fetch the registered blocks and write
/// them into the store, returning false when the device did not answer.
#[async_trait]
pub(crate) trait Scanner: Send + Sync + 'static {
    fn core(&self) -> &MachineCore;
    async fn scan_region(&self, region: Region) -> bool;
}

struct PollRuntime {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// State shared by every machine type: the cached image, the interest
/// registry, the poll task handle, and the pass notifications.
pub struct MachineCore {
    label: String,
    pub(crate) store: RegionStore,
    pub(crate) registry: ScanRegistry,
    connected: AtomicBool,
    pass_tx: watch::Sender<u64>,
    on_data_updated: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    poll: Mutex<Option<PollRuntime>>,
}

impl MachineCore {
    pub(crate) fn new(label: impl Into<String>, store: RegionStore) -> Self {
        let (pass_tx, _) = watch::channel(0u64);
        Self {
            label: label.into(),
            store,
            registry: ScanRegistry::new(),
            connected: AtomicBool::new(false),
            pass_tx,
            on_data_updated: Mutex::new(None),
            poll: Mutex::new(None),
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_on_data_updated(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.on_data_updated.lock() = Some(Arc::from(callback));
    }

    /// Bump the pass counter and run the update callback, if any.
    fn notify_pass(&self) {
        self.pass_tx.send_modify(|n| *n = n.wrapping_add(1));
        let callback = self.on_data_updated.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Register interest and, when it added new coverage, wait for the
    /// poll loop to fetch it so the caller sees real data instead of the
    /// zeroed cache.
    pub(crate) async fn touch(
        &self,
        region: Region,
        start: usize,
        length: usize,
        block_size: usize,
    ) {
        if self.registry.register_interest(region, start, length, block_size) {
            self.wait_for_update().await;
        }
    }

    pub(crate) fn cached_words(&self, region: Region, start: usize, count: usize) -> Vec<u16> {
        self.store
            .words(region)
            .map(|s| s.get(start, count))
            .unwrap_or_default()
    }

    pub(crate) fn mirror_words(&self, region: Region, start: usize, values: &[u16]) {
        if let Some(store) = self.store.words(region) {
            store.set(start, values);
        }
    }

    pub(crate) fn cached_bit(&self, region: Region, index: usize) -> bool {
        self.store
            .bits(region)
            .and_then(|s| s.get(index, 1).first().copied())
            .unwrap_or(false)
    }

    pub(crate) fn mirror_bit(&self, region: Region, index: usize, value: bool) {
        if let Some(store) = self.store.bits(region) {
            store.set(index, &[value]);
        }
    }

    /// Wait until data registered just now has been through a full pass.
    ///
    /// Two pass notifications are needed: the first may come from a pass
    /// that was already under way when the interest was registered, the
    /// second is guaranteed to have started after it. Returns early after
    /// `UPDATE_CEILING` so a dead device cannot stall callers forever.
    pub(crate) async fn wait_for_update(&self) {
        let mut passes = self.pass_tx.subscribe();
        let deadline = tokio::time::Instant::now() + UPDATE_CEILING;
        for _ in 0..2 {
            match tokio::time::timeout_at(deadline, passes.changed()).await {
                Ok(Ok(())) => {}
                _ => return,
            }
        }
    }

    /// Replace the poll task. Any previous task is cancelled without join.
    pub(crate) fn spawn_poll<S: Scanner>(&self, scanner: Arc<S>) {
        let token = CancellationToken::new();
        let task = tokio::spawn(run_poll_loop(scanner, token.clone()));
        let old = self.poll.lock().replace(PollRuntime { token, task });
        if let Some(old) = old {
            old.token.cancel();
            old.task.abort();
        }
        info!(machine = %self.label, "poll loop started");
    }

    /// Cancel the poll task and wait for it to finish.
    pub(crate) async fn stop_poll(&self) {
        let runtime = self.poll.lock().take();
        if let Some(runtime) = runtime {
            runtime.token.cancel();
            let _ = runtime.task.await;
            info!(machine = %self.label, "poll loop stopped");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn run_poll_loop<S: Scanner>(scanner: Arc<S>, token: CancellationToken) {
    let mut pass: u64 = 0;
    loop {
        if pass > 0 {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(PASS_INTERVAL) => {}
            }
        }
        let core = scanner.core();
        let regions: Vec<Region> = core
            .store
            .bit_regions()
            .into_iter()
            .chain(core.store.word_regions())
            .collect();
        let mut all_ok = true;
        for region in regions {
            let ok = tokio::select! {
                _ = token.cancelled() => return,
                ok = scanner.scan_region(region) => ok,
            };
            all_ok &= ok;
        }
        let was = core.connected.swap(all_ok, Ordering::SeqCst);
        if was != all_ok {
            info!(machine = %core.label, connected = all_ok, "scan health changed");
        }
        pass = pass.wrapping_add(1);
        if pass % EXPIRE_EVERY == 0 {
            core.registry.expire_stale(INTEREST_TTL);
        }
        core.notify_pass();
    }
}
