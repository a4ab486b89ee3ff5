//! Cross-thread cancellation of chain runs
//!
//! A chain is run on a worker thread while the test thread cancels it:
//! - Plugins after the cancelled one are skipped, but every plugin gets `post_run`
//! - The next run starts with a fresh cancellation flag

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use lumen_core::PluginRegistry;
use lumen_plugin_api::{ChainError, Plugin, PluginChain, PluginError};

/// Waits for cancellation on its first run, returns at once afterwards
struct Measure {
    started: mpsc::Sender<()>,
    runs: usize,
    post_runs: Arc<AtomicUsize>,
}

impl Plugin for Measure {
    fn name(&self) -> &str {
        "Measure"
    }

    fn run(&mut self, chain: &PluginChain) -> Result<(), PluginError> {
        self.runs += 1;
        if self.runs > 1 {
            return Ok(());
        }

        let token = chain.cancel_token();
        let _ = self.started.send(());
        let deadline = Instant::now() + Duration::from_secs(5);
        while !token.is_cancelled() {
            if Instant::now() > deadline {
                return Err(PluginError::custom("cancellation never arrived"));
            }
            thread::sleep(Duration::from_millis(5));
        }
        Err(PluginError::Cancelled)
    }

    fn post_run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        self.post_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Counter {
    runs: Arc<AtomicUsize>,
    post_runs: Arc<AtomicUsize>,
}

impl Plugin for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    fn run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_run(&mut self, _chain: &PluginChain) -> Result<(), PluginError> {
        self.post_runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn cancel_from_another_thread_stops_the_run() {
    let (started_tx, started_rx) = mpsc::channel();
    let counter_runs = Arc::new(AtomicUsize::new(0));
    let post_runs = Arc::new(AtomicUsize::new(0));

    let mut registry = PluginRegistry::with_builtins();
    let measure = registry.load_static(
        Box::new(Measure {
            started: started_tx,
            runs: 0,
            post_runs: post_runs.clone(),
        }),
        None,
    );
    let counter = registry.load_static(
        Box::new(Counter {
            runs: counter_runs.clone(),
            post_runs: post_runs.clone(),
        }),
        None,
    );
    assert_eq!(registry.bring_up(), 4);

    let mut chain = registry.new_chain("measure", "calibrate");
    chain.append(measure).unwrap();
    chain.append(counter).unwrap();
    let chain = Arc::new(chain);

    let worker = {
        let chain = Arc::clone(&chain);
        thread::spawn(move || chain.run())
    };

    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("plugin should start running");
    chain.cancel();

    let result = worker.join().unwrap();
    assert!(matches!(result, Err(ChainError::Cancelled { .. })));
    assert!(chain.was_cancelled());
    assert_eq!(counter_runs.load(Ordering::SeqCst), 0);
    assert_eq!(post_runs.load(Ordering::SeqCst), 2);

    // A new run resets the flag and completes.
    chain.run().unwrap();
    assert!(!chain.was_cancelled());
    assert_eq!(counter_runs.load(Ordering::SeqCst), 1);
    assert_eq!(post_runs.load(Ordering::SeqCst), 4);
}

#[test]
fn cancel_before_run_is_cleared_by_run() {
    let mut registry = PluginRegistry::with_builtins();
    registry.bring_up();

    let chain = registry.new_chain("idle", "default");
    chain.cancel();
    assert!(chain.was_cancelled());

    chain.run().unwrap();
    assert!(!chain.was_cancelled());
}
