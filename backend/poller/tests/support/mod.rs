#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use collections::CollectionSet;
use poller::{error::PollError, remote::SyncSource};
use serde_json::Value;

pub enum Scripted {
    Payload(Value),
    Status(u16),
}

/// Replays scripted responses in order, repeating the last one forever.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Scripted>>,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().expect("script").push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("requested").clone()
    }

    fn next(&self) -> Result<Value, PollError> {
        let mut script = self.script.lock().expect("script");

        let response = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().map(|last| match last {
                Scripted::Payload(value) => Scripted::Payload(value.clone()),
                Scripted::Status(status) => Scripted::Status(*status),
            })
        };

        match response {
            Some(Scripted::Payload(value)) => Ok(value),
            Some(Scripted::Status(status)) => Err(PollError::Status {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Err(PollError::Malformed("empty script".to_string())),
        }
    }
}

#[async_trait]
impl SyncSource for ScriptedSource {
    async fn fetch(&self, collections: &CollectionSet) -> Result<Value, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("requested")
            .push(collections.to_query());

        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.next()
    }
}

/// Records every value a callback receives.
#[derive(Clone, Default)]
pub struct Recorder {
    values: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn callback(&self) -> impl Fn(&Value) + Send + Sync + use<> {
        let values = self.values.clone();
        move |value: &Value| values.lock().expect("recorder").push(value.clone())
    }

    pub fn values(&self) -> Vec<Value> {
        self.values.lock().expect("recorder").clone()
    }

    pub fn count(&self) -> usize {
        self.values.lock().expect("recorder").len()
    }
}
