//! Handle failures emit exactly one categorized error record.

use std::cell::RefCell;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

use booster_shell::{BoosterHandle, HandleRegistry};

// =============================================================================
// Capturing logger
// =============================================================================

thread_local! {
    static RECORDS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        RECORDS.with(|r| r.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

/// Run `f` and return the error records it logged on this thread.
fn errors_logged(f: impl FnOnce()) -> Vec<String> {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Trace);
    });
    RECORDS.with(|r| r.borrow_mut().clear());
    f();
    RECORDS.with(|r| {
        r.borrow()
            .iter()
            .filter(|(level, _)| *level == Level::Error)
            .map(|(_, msg)| msg.clone())
            .collect()
    })
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn null_handle_logs_once() {
    let mut registry = HandleRegistry::new();
    let errors = errors_logged(|| {
        assert!(registry.fill_allocations(BoosterHandle::NULL).is_err());
    });
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("null"), "{}", errors[0]);
}

#[test]
fn freed_handle_logs_once() {
    let mut registry = HandleRegistry::new();
    let h = registry.create();
    registry.free(h).unwrap();

    let errors = errors_logged(|| {
        assert!(registry.free(h).is_err());
    });
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("freed"), "{}", errors[0]);
}

#[test]
fn foreign_handle_logs_once() {
    let mut registry = HandleRegistry::new();
    let errors = errors_logged(|| {
        assert!(registry.prepare_term(BoosterHandle::from_raw(0x0000_0001_0000_0009), 0).is_err());
    });
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("invalid"), "{}", errors[0]);
}

#[test]
fn status_query_is_silent() {
    let mut registry = HandleRegistry::new();
    let h = registry.create();
    registry.free(h).unwrap();

    let errors = errors_logged(|| {
        registry.status(h);
        registry.status(BoosterHandle::NULL);
    });
    assert!(errors.is_empty());
}

#[test]
fn valid_lifecycle_logs_no_errors() {
    let mut registry = HandleRegistry::new();
    let errors = errors_logged(|| {
        let h = registry.create();
        registry.set_term_index(h, Some(0)).unwrap();
        registry.free(h).unwrap();
    });
    assert!(errors.is_empty());
}
