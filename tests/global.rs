//! The process-wide context, from soft start to formal initialization.
//!
//! Everything runs in a single test: the context is shared by the whole
//! test binary and its startup thread is whichever thread touches it first.

use std::thread;

use conteggi::{global, Handle, ThreadSelector, WalkFlags};

#[test]
fn test_global_lifecycle() {
    // Reading the invalid handle does not need a context.
    assert_eq!(global::get(Handle::INVALID), 0);

    // Soft start: registration and updates before initialize.
    let x = global::register("x");
    let early = global::register("app.early");
    global::add(early, 10);
    global::increment(x);
    assert_eq!(global::get(early), 10);
    assert!(!global::counters().is_initialized());

    // Formal initialization discards early counts; this thread keeps slot 0.
    global::initialize(600, 2, false);
    assert_eq!(global::get(early), 0);
    assert_eq!(global::get(x), 0);
    assert_eq!(global::counters().current_slot(), Some(0));

    global::increment(x);
    assert_eq!(global::get(x), 1);

    // Static worker.
    thread::spawn(move || {
        global::bind_static(1);
        global::add(x, 5);
        global::unbind_static(1);
    })
    .join()
    .unwrap();
    assert_eq!(global::get(global::lookup("x").unwrap()), 6);

    // Dynamic workers reuse the same slot.
    global::reserve_dynamic(1);
    for _ in 0..2 {
        thread::spawn(move || {
            let slot = global::acquire_dynamic();
            global::increment(x);
            global::release_dynamic(slot);
        })
        .join()
        .unwrap();
    }
    assert_eq!(global::get(x), 8);
    assert_eq!(global::counters().capacity(), 3);

    // Sharing is disabled: an unbound thread hits the fatal path.
    let result = thread::spawn(move || global::increment(x)).join();
    assert!(result.is_err());
    assert_eq!(global::get(x), 8);

    // Combine handlers and enumeration.
    let gauge = global::register_with_combine("app.gauge", |_: ThreadSelector| 99u64);
    global::add(gauge, 1);
    assert_eq!(global::get(gauge), 99);
    assert_eq!(global::count_registered(), 3);
    assert!(global::is_valid(gauge));
    assert_eq!(global::name_of(gauge).as_deref(), Some("app.gauge"));

    let names: Vec<_> = (0..global::count_registered())
        .filter_map(global::nth_sorted)
        .filter_map(global::name_of)
        .collect();
    assert!(names.windows(2).all(|w| w[0] <= w[1]));

    let mut lines = Vec::new();
    global::walk_subtree(
        "app",
        |name, value| lines.push(format!("{name}={value}")),
        ThreadSelector::All,
        WalkFlags::SKIP_ZERO,
    );
    assert_eq!(lines, ["app.gauge=99"]);

    let mut out = vec![0; global::count_registered() + 1];
    global::combine(&mut out, ThreadSelector::All);
    assert_eq!(out[x.as_raw() as usize], 8);
    assert_eq!(global::snapshot(ThreadSelector::All).get(x), 8);
}
