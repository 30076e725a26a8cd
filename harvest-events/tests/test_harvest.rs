use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use harvest_config::TransactionEventsConfig;
use harvest_events::{ConfigChange, LazyEvent, NameCache, TransactionEventsService};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde_json::json;

mod common;

use common::{Outcome, ScriptedTransmitter, TestEvent, config, event};

fn service(
    config_json: serde_json::Value,
    transmitter: &Arc<ScriptedTransmitter>,
) -> TransactionEventsService<TestEvent> {
    harvest_log::init_test!();
    TransactionEventsService::new(config(config_json), transmitter.clone())
}

fn small_reservoirs() -> serde_json::Value {
    json!({ "transaction_events": { "max_samples_stored": 10 } })
}

#[test]
fn test_successful_harvest_sends_and_resets() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    for id in 0..3 {
        service.record("app", event(id, 0.1 * (id + 1) as f64));
    }
    service.harvest("app");

    let attempts = transmitter.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].app_name, "app");
    assert_eq!(attempts[0].max_size, 10);
    assert_eq!(attempts[0].number_of_tries, 3);
    // Ordered by descending priority.
    assert_eq!(attempts[0].ids, [2, 1, 0]);

    let live = service.reservoir("app").unwrap();
    assert!(live.is_empty());
    assert_eq!(live.decided_last(), 3);

    // Nothing to send on the next harvest.
    service.harvest("app");
    assert_eq!(transmitter.attempts().len(), 1);
}

#[test]
fn test_transient_failure_resamples_with_new_events() {
    let transmitter = ScriptedTransmitter::new([Outcome::Transient]);
    let service = service(small_reservoirs(), &transmitter);

    for id in 0..8 {
        service.record("app", event(id, (id + 1) as f64 / 100.0));
    }
    service.harvest("app");

    // The harvested events are back in the live reservoir.
    let live = service.reservoir("app").unwrap();
    assert_eq!(live.len(), 8);
    assert_eq!(live.number_of_tries(), 8);

    for id in 100..105 {
        service.record("app", event(id, 0.5 + id as f64 / 1000.0));
    }
    service.harvest("app");

    let attempts = transmitter.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].outcome, Outcome::Transient);
    assert_eq!(attempts[0].ids.len(), 8);

    let delivered = transmitter.delivered();
    assert_eq!(delivered.len(), 1);
    let batch = &delivered[0];
    assert_eq!(batch.ids.len(), 10);
    assert_eq!(batch.number_of_tries, 13);

    let ids: BTreeSet<u64> = batch.ids.iter().copied().collect();
    assert_eq!(ids.len(), batch.ids.len());
    for id in 100..105 {
        assert!(ids.contains(&id));
    }
    for id in 3..8 {
        assert!(ids.contains(&id));
    }

    // Delivered events are never sent again.
    service.harvest("app");
    assert_eq!(transmitter.delivered().len(), 1);
}

#[test]
fn test_permanent_failure_drops_batch() {
    let transmitter = ScriptedTransmitter::new([Outcome::Permanent]);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.harvest("app");

    assert!(service.reservoir("app").unwrap().is_empty());
    service.harvest("app");
    assert_eq!(transmitter.attempts().len(), 1);
}

#[test]
fn test_unexpected_failure_is_discarded_by_default() {
    let transmitter = ScriptedTransmitter::new([Outcome::Unexpected]);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.harvest("app");

    assert!(service.reservoir("app").unwrap().is_empty());
}

#[test]
fn test_unexpected_failure_retry_policy() {
    let transmitter = ScriptedTransmitter::new([Outcome::Unexpected]);
    let service = service(
        json!({ "harvest": { "unexpected_errors": "retry" } }),
        &transmitter,
    );

    service.record("app", event(1, 0.5));
    service.harvest("app");
    assert_eq!(service.reservoir("app").unwrap().len(), 1);

    service.harvest("app");
    let delivered = transmitter.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].ids, [1]);
}

#[test]
fn test_harvest_metrics() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    let reservoir = service.get_or_create_reservoir("app");
    service.record("app", event(1, 0.5));
    service.record("app", event(2, 0.6));
    reservoir.increment_number_of_tries();

    let captures = harvest_statsd::with_capturing_test_client(|| service.harvest("app"));

    assert!(captures.contains(&"events.synthetics.pending:0|g".to_owned()));
    assert!(captures.contains(&"events.harvest.limit:10|g|#app:app".to_owned()));
    assert!(captures.contains(&"events.transaction.sent:2|c|#app:app".to_owned()));
    assert!(captures.contains(&"events.transaction.seen:3|c|#app:app".to_owned()));
    assert!(
        captures
            .iter()
            .any(|line| line.starts_with("events.harvest.transmit:") && line.ends_with("|d|#app:app"))
    );
}

#[test]
fn test_failure_metrics() {
    let transmitter = ScriptedTransmitter::new([Outcome::Transient, Outcome::Permanent]);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    let retried = harvest_statsd::with_capturing_test_client(|| service.harvest("app"));
    assert!(retried.contains(&"events.harvest.retried:1|c|#app:app,kind:ordinary".to_owned()));

    let discarded = harvest_statsd::with_capturing_test_client(|| service.harvest("app"));
    assert!(
        discarded.contains(&"events.harvest.discarded:1|c|#app:app,kind:ordinary".to_owned())
    );
}

#[test]
fn test_skips_building_events_that_cannot_be_retained() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(json!({ "transaction_events": { "max_samples_stored": 1 } }), &transmitter);

    service.record("app", event(1, 0.5));

    let built = AtomicBool::new(false);
    service.record(
        "app",
        LazyEvent::new(0.5, |names: &NameCache| {
            built.store(true, Ordering::SeqCst);
            TestEvent {
                id: 2,
                name: names.intern_name("never"),
                priority: 0.5,
            }
        }),
    );

    assert!(!built.load(Ordering::SeqCst));
    let live = service.reservoir("app").unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live.number_of_tries(), 2);
}

#[test]
fn test_per_app_overrides() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(
        json!({
            "transaction_events": { "max_samples_stored": 10 },
            "apps": { "small": { "max_samples_stored": 2 } }
        }),
        &transmitter,
    );

    for id in 0..5 {
        service.record("small", event(id, id as f64 / 10.0));
        service.record("large", event(id, id as f64 / 10.0));
    }

    let small = service.reservoir("small").unwrap();
    assert_eq!(small.max_size(), 2);
    assert_eq!(small.len(), 2);
    assert_eq!(small.number_of_tries(), 5);
    assert_eq!(service.reservoir("large").unwrap().len(), 5);
}

#[test]
fn test_disabled_app_drops_reservoir_and_recovers() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.record("other", event(2, 0.5));

    service.config_changed(ConfigChange::App {
        app_name: "app".to_owned(),
        config: TransactionEventsConfig {
            enabled: false,
            ..Default::default()
        },
    });

    assert!(service.reservoir("app").is_none());
    assert!(service.reservoir("other").is_some());
    assert!(!service.is_enabled_for("app"));

    service.record("app", event(3, 0.5));
    assert!(service.reservoir("app").is_none());
    service.harvest("app");
    assert!(transmitter.attempts().is_empty());

    service.config_changed(ConfigChange::App {
        app_name: "app".to_owned(),
        config: TransactionEventsConfig::default(),
    });

    service.record("app", event(4, 0.5));
    let live = service.reservoir("app").unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live.number_of_tries(), 1);
    assert_eq!(live.max_size(), 2000);
}

#[test]
fn test_reload_disables_apps() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.record("other", event(2, 0.5));

    service.config_changed(ConfigChange::Reloaded(config(json!({
        "apps": { "app": { "enabled": false } },
        "harvest": { "synthetics": { "max_pending_batches": 3 } }
    }))));

    assert!(service.reservoir("app").is_none());
    assert!(service.reservoir("other").is_some());
    assert_eq!(service.synthetic_backlog().capacity(), 3);
}

#[test]
fn test_max_samples_stored_applies_after_harvest() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.set_max_samples_stored(3);
    assert_eq!(service.max_samples_stored(), 3);
    assert_eq!(service.reservoir("app").unwrap().max_size(), 10);

    service.harvest("app");
    assert_eq!(service.reservoir("app").unwrap().max_size(), 3);
    assert_eq!(transmitter.attempts()[0].max_size, 10);
}

#[test]
fn test_intern_name_shares_allocation() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.record("app", event(2, 0.6));

    let events = service.reservoir("app").unwrap().as_list();
    assert!(Arc::ptr_eq(&events[0].name, &events[1].name));
    assert!(Arc::ptr_eq(
        &events[0].name,
        &service.intern_name("WebTransaction/Uri/test")
    ));
}

#[test]
fn test_next_priority_samples_target_first() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(
        json!({ "transaction_events": { "target_samples_stored": 3 } }),
        &transmitter,
    );

    let mut rng = Pcg32::seed_from_u64(0);
    let priorities: Vec<f64> = (0..5)
        .map(|_| service.next_priority("app", &mut rng))
        .collect();

    assert!(priorities[..3].iter().all(|p| *p >= 1.0));
    assert!(priorities[3..].iter().all(|p| *p < 1.0));
    assert_eq!(service.reservoir("app").unwrap().sampled_count(), 3);
}

#[test]
fn test_shutdown_stops_collection() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("app", event(1, 0.5));
    service.shutdown();

    assert!(service.is_shut_down());
    assert!(service.reservoir("app").is_none());

    service.record("app", event(2, 0.5));
    service.harvest("app");
    assert!(service.reservoir("app").is_none());
    assert!(transmitter.attempts().is_empty());
}

#[test]
fn test_disabled_service_ignores_events() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(json!({ "transaction_events": { "enabled": false } }), &transmitter);

    assert!(!service.is_enabled());
    service.record("app", event(1, 0.5));
    service.harvest("app");

    assert!(service.reservoir("app").is_none());
    assert!(transmitter.attempts().is_empty());
}

#[test]
fn test_clear_reservoirs() {
    let transmitter = ScriptedTransmitter::always(Outcome::Success);
    let service = service(small_reservoirs(), &transmitter);

    service.record("a", event(1, 0.5));
    service.record("b", event(2, 0.5));
    service.clear_reservoirs();

    assert!(service.reservoir("a").is_none());
    assert!(service.reservoir("b").is_none());
}
