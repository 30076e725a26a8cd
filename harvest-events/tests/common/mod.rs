#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use harvest_config::Config;
use harvest_events::{Batch, LazyEvent, NameCache, PendingEvent, TransmitError, Transmitter};
use harvest_sampling::Prioritized;
use parking_lot::Mutex;

#[derive(Clone, Debug, PartialEq)]
pub struct TestEvent {
    pub id: u64,
    pub name: Arc<str>,
    pub priority: f64,
}

impl Prioritized for TestEvent {
    fn priority(&self) -> f64 {
        self.priority
    }
}

pub fn event(id: u64, priority: f64) -> impl PendingEvent<Event = TestEvent> {
    LazyEvent::new(priority, move |names: &NameCache| TestEvent {
        id,
        name: names.intern_name("WebTransaction/Uri/test"),
        priority,
    })
}

pub fn synthetic(id: u64, priority: f64) -> impl PendingEvent<Event = TestEvent> {
    LazyEvent::synthetic(priority, move |names: &NameCache| TestEvent {
        id,
        name: names.intern_name("WebTransaction/Uri/synthetic"),
        priority,
    })
}

pub fn config(value: serde_json::Value) -> Arc<Config> {
    Arc::new(Config::from_json_value(value).unwrap())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Transient,
    Permanent,
    Unexpected,
}

impl Outcome {
    fn into_result(self) -> Result<(), TransmitError> {
        match self {
            Self::Success => Ok(()),
            Self::Transient => Err(TransmitError::Transient("service unavailable".to_owned())),
            Self::Permanent => Err(TransmitError::Permanent("payload too large".to_owned())),
            Self::Unexpected => Err(TransmitError::unexpected(io::Error::other("reset"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Attempt {
    pub app_name: String,
    pub max_size: usize,
    pub number_of_tries: u64,
    pub ids: Vec<u64>,
    pub outcome: Outcome,
}

/// Answers sends with scripted outcomes and records every attempt.
pub struct ScriptedTransmitter {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: Mutex<Vec<Attempt>>,
}

impl ScriptedTransmitter {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Outcome::Success,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: outcome,
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn delivered(&self) -> Vec<Attempt> {
        self.attempts()
            .into_iter()
            .filter(|attempt| attempt.outcome == Outcome::Success)
            .collect()
    }
}

impl Transmitter<TestEvent> for ScriptedTransmitter {
    fn send(&self, app_name: &str, batch: Batch<'_, TestEvent>) -> Result<(), TransmitError> {
        let outcome = self.script.lock().pop_front().unwrap_or(self.fallback);

        self.attempts.lock().push(Attempt {
            app_name: app_name.to_owned(),
            max_size: batch.max_size,
            number_of_tries: batch.number_of_tries,
            ids: batch.events.iter().map(|event| event.id).collect(),
            outcome,
        });

        outcome.into_result()
    }
}
