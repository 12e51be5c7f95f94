//! Decision, reward and event tracking.
//!
//! [`DecisionTracker`] turns decisions into JSON bodies and queues them for a background
//! delivery thread, which hands them to a [`Transport`]. Queuing never waits on the network, so
//! the decision path is not delayed by a slow or failing endpoint. Delivery failures and
//! statuses >= 400 are logged on the delivery thread and counted in [`DeliveryStats`]. Nothing
//! is retried.
//!
//! Body shapes:
//!
//! ```text
//! decision: {"type":"decision","model","count","item","sample"?,"context"?,"message_id"}
//! reward:   {"type":"reward","model","decision_id","reward","message_id"}
//! event:    {"type":"event","event","properties"?,"message_id"}
//! ```
//!
//! For decisions, `message_id` is the decision id itself, so a reward's `decision_id` joins
//! directly against it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{debug, warn};

use crate::ksuid::{is_valid_id, KsuidGenerator};
use crate::model::is_valid_model_name;
use crate::{Error, Result};

pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const APPLICATION_JSON: &str = "application/json";
pub const TRACK_API_KEY_HEADER: &str = "x-api-key";

/// Outbound POST capability.
pub trait Transport: Send + Sync {
    /// POST `body` to `url` and return the response status.
    ///
    /// Runs on the tracker's delivery thread, never on the caller's; it may block.
    fn post(&self, url: &str, headers: &BTreeMap<String, String>, body: &Value) -> Result<u16>;
}

/// Where and how tracked bodies are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub track_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl TrackerConfig {
    pub fn new(track_url: impl Into<String>) -> Self {
        Self {
            track_url: track_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn headers(&self) -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert(CONTENT_TYPE_HEADER.to_string(), APPLICATION_JSON.to_string());
        if let Some(ref key) = self.api_key {
            h.insert(TRACK_API_KEY_HEADER.to_string(), key.clone());
        }
        h
    }
}

/// Delivery counters, as seen by the delivery thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Bodies answered with a status below 400.
    pub delivered: u64,
    /// Transport errors plus statuses >= 400.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

enum Job {
    Post(Value),
    Flush(mpsc::Sender<()>),
}

/// Builds tracking bodies and queues them for delivery.
pub struct DecisionTracker {
    cfg: TrackerConfig,
    queue: mpsc::Sender<Job>,
    counters: Arc<Counters>,
    ids: KsuidGenerator,
}

impl std::fmt::Debug for DecisionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionTracker")
            .field("track_url", &self.cfg.track_url)
            .field("api_key", &self.cfg.api_key.as_ref().map(|_| "<redacted>"))
            .field("stats", &self.stats())
            .finish()
    }
}

impl DecisionTracker {
    /// Create a tracker and start its delivery thread.
    ///
    /// Fails if `cfg.track_url` is empty or the thread cannot be spawned. The thread exits once
    /// the tracker is dropped and the queue is drained.
    pub fn new(cfg: TrackerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if cfg.track_url.trim().is_empty() {
            return Err(Error::invalid("track_url must be non-empty"));
        }
        let counters = Arc::new(Counters::default());
        let queue = spawn_delivery(&cfg, transport, Arc::clone(&counters))?;
        Ok(Self {
            cfg,
            queue,
            counters,
            ids: KsuidGenerator::new(),
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Block until every body queued before this call has been handed to the transport.
    pub fn flush(&self) -> Result<()> {
        let (done, wait) = mpsc::channel();
        self.queue
            .send(Job::Flush(done))
            .map_err(|_| Error::transport("tracking delivery thread stopped"))?;
        wait.recv()
            .map_err(|_| Error::transport("tracking delivery thread stopped"))
    }

    /// Queue `candidates[chosen]` as the decision `decision_id` of `model_name`.
    ///
    /// A uniformly drawn other candidate is attached as `sample` when there is one.
    pub fn track_decision(
        &self,
        model_name: &str,
        decision_id: &str,
        candidates: &[Value],
        chosen: usize,
        context: Option<&Value>,
    ) -> Result<()> {
        if !is_valid_model_name(model_name) {
            return Err(Error::invalid(format!("invalid model name: [{model_name}]")));
        }
        if chosen >= candidates.len() {
            return Err(Error::invalid(format!(
                "chosen index {chosen} out of bounds for {} candidates",
                candidates.len()
            )));
        }
        let sample =
            sample_index(candidates.len(), chosen, &mut rand::rng()).map(|i| &candidates[i]);
        let body = decision_body(
            model_name,
            decision_id,
            &candidates[chosen],
            candidates.len(),
            sample,
            context,
        );
        self.enqueue(body)
    }

    /// Queue a reward for a previously tracked decision.
    pub fn add_reward(&self, model_name: &str, decision_id: &str, reward: f64) -> Result<()> {
        if !reward.is_finite() {
            return Err(Error::invalid("reward must not be NaN or infinite"));
        }
        if !is_valid_id(decision_id) {
            return Err(Error::invalid(format!("invalid decision id: [{decision_id}]")));
        }
        if !is_valid_model_name(model_name) {
            return Err(Error::invalid(format!("invalid model name: [{model_name}]")));
        }
        let message_id = self.ids.next()?;
        self.enqueue(reward_body(model_name, decision_id, reward, &message_id))
    }

    /// Queue a free-form named event.
    pub fn track_event(&self, event: &str, properties: Option<&Value>) -> Result<()> {
        let message_id = self.ids.next()?;
        self.enqueue(event_body(event, properties, &message_id))
    }

    fn enqueue(&self, body: Value) -> Result<()> {
        self.queue
            .send(Job::Post(body))
            .map_err(|_| Error::transport("tracking delivery thread stopped"))
    }
}

fn spawn_delivery(
    cfg: &TrackerConfig,
    transport: Arc<dyn Transport>,
    counters: Arc<Counters>,
) -> Result<mpsc::Sender<Job>> {
    let (tx, rx) = mpsc::channel::<Job>();
    let url = cfg.track_url.clone();
    let headers = cfg.headers();
    thread::Builder::new()
        .name("verdict-tracker".into())
        .spawn(move || {
            for job in rx {
                match job {
                    Job::Post(body) => deliver(&*transport, &url, &headers, &body, &counters),
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        })?;
    Ok(tx)
}

fn deliver(
    transport: &dyn Transport,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: &Value,
    counters: &Counters,
) {
    match transport.post(url, headers, body) {
        Ok(status) if status < 400 => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(status, kind = %body["type"], "tracking body delivered");
        }
        Ok(status) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(status, url, kind = %body["type"], "tracking endpoint rejected body");
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, url, kind = %body["type"], "tracking body not delivered");
        }
    }
}

/// Pick a uniformly random index in `0..count` other than `chosen`, if any exists.
fn sample_index<R: Rng + ?Sized>(count: usize, chosen: usize, rng: &mut R) -> Option<usize> {
    if count <= 1 {
        return None;
    }
    // Draw from the count-1 others and skip over `chosen`.
    let i = rng.random_range(0..count - 1);
    Some(if i >= chosen { i + 1 } else { i })
}

pub fn decision_body(
    model_name: &str,
    decision_id: &str,
    item: &Value,
    count: usize,
    sample: Option<&Value>,
    context: Option<&Value>,
) -> Value {
    let mut body = Map::new();
    body.insert("type".into(), json!("decision"));
    body.insert("model".into(), json!(model_name));
    body.insert("message_id".into(), json!(decision_id));
    body.insert("count".into(), json!(count));
    body.insert("item".into(), item.clone());
    if let Some(sample) = sample {
        body.insert("sample".into(), sample.clone());
    }
    if let Some(context) = context {
        body.insert("context".into(), context.clone());
    }
    Value::Object(body)
}

pub fn reward_body(model_name: &str, decision_id: &str, reward: f64, message_id: &str) -> Value {
    json!({
        "type": "reward",
        "model": model_name,
        "message_id": message_id,
        "decision_id": decision_id,
        "reward": reward,
    })
}

pub fn event_body(event: &str, properties: Option<&Value>, message_id: &str) -> Value {
    let mut body = Map::new();
    body.insert("type".into(), json!("event"));
    body.insert("event".into(), json!(event));
    body.insert("message_id".into(), json!(message_id));
    if let Some(p) = properties {
        body.insert("properties".into(), p.clone());
    }
    Value::Object(body)
}
