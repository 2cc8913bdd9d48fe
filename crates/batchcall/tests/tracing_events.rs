//! Flush and clear emit structured tracing events.

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use batchcall::{Batcher, ManualScheduler};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<String>>>);

impl Capture {
    fn lines(&self) -> Vec<String> {
        self.0.lock().expect("capture lock").clone()
    }
}

#[derive(Default)]
struct Fields(String);

impl Visit for Fields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: tracing::Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        self.0.lock().expect("capture lock").push(fields.0);
    }
}

#[test]
fn flush_events_carry_reason_and_size() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let clock = ManualScheduler::new();
        let batched = Batcher::from_fn(|_: Vec<u32>| {})
            .interval(Duration::from_millis(10))
            .limit(3)
            .scheduler(clock.clone())
            .build()
            .unwrap();

        batched.call(1).unwrap();
        batched.call(2).unwrap();
        clock.advance(Duration::from_millis(10));

        for i in 0..4 {
            batched.call(i).unwrap();
        }

        batched.call(5).unwrap();
        batched.clear();
    });

    let lines = capture.lines();
    let flushes: Vec<&String> = lines
        .iter()
        .filter(|l| l.contains("message=flushing batch"))
        .collect();
    assert_eq!(flushes.len(), 2, "{lines:#?}");
    assert!(flushes[0].contains("reason=timer"));
    assert!(flushes[0].contains("size=2"));
    assert!(flushes[1].contains("reason=limit"));
    assert!(flushes[1].contains("size=4"));

    assert!(
        lines
            .iter()
            .any(|l| l.contains("message=cleared batch") && l.contains("discarded=1"))
    );
}

#[test]
fn timer_sink_errors_are_logged_without_a_hook() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        let clock = ManualScheduler::new();
        let batched = Batcher::<u32, String>::builder()
            .sink(|_| Err("downstream unavailable".to_string()))
            .interval(Duration::from_millis(5))
            .scheduler(clock.clone())
            .build()
            .unwrap();

        batched.call(1).unwrap();
        clock.advance(Duration::from_millis(5));
    });

    let lines = capture.lines();
    assert!(
        lines.iter().any(|l| l.contains("sink failed during timer flush")
            && l.contains("downstream unavailable")),
        "{lines:#?}"
    );
}
