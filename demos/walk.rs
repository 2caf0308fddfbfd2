//! Demo application: worker threads on static and dynamic slots, then a
//! namespace walk of the totals.
//!
//! Run with:
//! ```bash
//! cargo run --example walk --features demo -- --help
//! ```

use clap::{Parser, ValueEnum};
use conteggi::{global, ReportHandler, ThreadSelector, WalkFlags, WalkQuery};
use std::thread;

/// Which thread data to report.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum SelectorChoice {
    #[default]
    All,
    Shared,
}

impl From<SelectorChoice> for ThreadSelector {
    fn from(choice: SelectorChoice) -> Self {
        match choice {
            SelectorChoice::All => ThreadSelector::All,
            SelectorChoice::Shared => ThreadSelector::Shared,
        }
    }
}

/// Demo application for conteggi - process-wide counter registry.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of long-lived workers on static slots
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Number of transient threads on dynamic slots
    #[arg(long, default_value = "4")]
    transient: usize,

    /// Number of unbound threads using the shared block
    #[arg(long, default_value = "1")]
    unbound: usize,

    /// Number of iterations per thread
    #[arg(long, default_value = "10000")]
    iterations: u64,

    /// Namespace to report (empty for all)
    #[arg(short, long, default_value = "")]
    prefix: String,

    /// Thread data to report
    #[arg(short, long, value_enum, default_value = "all")]
    selector: SelectorChoice,

    /// Skip counters that are zero
    #[arg(long)]
    skip_zero: bool,

    /// Print stored values, ignoring custom reports
    #[arg(long)]
    raw: bool,
}

/// Reports a request counter as total plus per-thread average.
struct PerThread {
    threads: u64,
}

impl ReportHandler for PerThread {
    fn report(
        &self,
        name: &str,
        value: u64,
        query: &WalkQuery<'_>,
        visitor: &mut dyn FnMut(&str, &str),
    ) {
        let avg = format!("{name}.per_thread");
        if query.matches(name) {
            visitor(name, &value.to_string());
        }
        if query.matches(&avg) {
            visitor(&avg, &(value / self.threads.max(1)).to_string());
        }
    }
}

fn main() {
    let args = Args::parse();
    let threads = (args.workers + args.transient + args.unbound) as u64;

    // Registered before formal initialization: the context is soft until then.
    let requests = global::register_with_custom_report("app.requests", PerThread { threads });
    let errors = global::register("app.errors");
    let started = global::register("threads.started");

    global::initialize(64, args.workers + 1, args.unbound > 0);
    global::reserve_dynamic(args.transient);
    global::increment(started);

    let mut handles = vec![];

    for i in 0..args.workers {
        let iterations = args.iterations;
        handles.push(thread::spawn(move || {
            let slot = i + 1;
            global::bind_static(slot);
            global::increment(started);
            for j in 0..iterations {
                global::increment(requests);
                if j % 97 == 0 {
                    global::increment(errors);
                }
            }
            global::unbind_static(slot);
        }));
    }

    for _ in 0..args.transient {
        let iterations = args.iterations;
        handles.push(thread::spawn(move || {
            let slot = global::acquire_dynamic();
            global::increment(started);
            global::add(requests, iterations);
            global::release_dynamic(slot);
        }));
    }

    for _ in 0..args.unbound {
        let iterations = args.iterations;
        handles.push(thread::spawn(move || {
            global::increment(started);
            for _ in 0..iterations {
                global::increment(requests);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let mut flags = WalkFlags::NONE;
    if args.skip_zero {
        flags = flags | WalkFlags::SKIP_ZERO;
    }
    if args.raw {
        flags = flags | WalkFlags::RAW;
    }

    global::walk_subtree(
        &args.prefix,
        |name, value| println!("{name:<24} {value}"),
        args.selector.into(),
        flags,
    );
}
