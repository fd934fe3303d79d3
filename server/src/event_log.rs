//! Bounded log of discrete world events.
//!
//! Events live in a circular buffer; once full, the oldest entry is
//! overwritten without notice. Ids increase by one per logged event, so
//! buffer order and id order agree. The whole log can be exported with
//! bincode and imported elsewhere for session handoff or offline replay.

use serde::{Deserialize, Serialize};
use shared::wire::Value;
use shared::PlayerId;
use std::collections::VecDeque;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    PlayerJoined,
    PlayerLeft,
    PlayerReconnected,
    AppEvent,
    TeleportDetected,
    ModuleError,
    Custom(String),
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            EventKind::PlayerJoined => "playerJoined",
            EventKind::PlayerLeft => "playerLeft",
            EventKind::PlayerReconnected => "playerReconnected",
            EventKind::AppEvent => "appEvent",
            EventKind::TeleportDetected => "teleportDetected",
            EventKind::ModuleError => "moduleError",
            EventKind::Custom(name) => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub actor: Option<PlayerId>,
    pub reason: Option<String>,
    pub source_app: Option<String>,
    pub source_entity: Option<String>,
    pub causal_event_id: Option<u64>,
}

impl EventMeta {
    pub fn actor(actor: PlayerId) -> Self {
        Self {
            actor: Some(actor),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn caused_by(mut self, event_id: u64) -> Self {
        self.causal_event_id = Some(event_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub tick: u32,
    pub timestamp: i64,
    pub kind: EventKind,
    pub data: Value,
    pub meta: EventMeta,
}

impl Event {
    /// Wire form used in state-recovery messages.
    pub fn to_value(&self) -> Value {
        let mut meta = Vec::new();
        if let Some(actor) = self.meta.actor {
            meta.push(("actor".to_string(), Value::from(actor)));
        }
        if let Some(reason) = &self.meta.reason {
            meta.push(("reason".to_string(), Value::from(reason.as_str())));
        }
        if let Some(app) = &self.meta.source_app {
            meta.push(("sourceApp".to_string(), Value::from(app.as_str())));
        }
        if let Some(entity) = &self.meta.source_entity {
            meta.push(("sourceEntity".to_string(), Value::from(entity.as_str())));
        }
        if let Some(cause) = self.meta.causal_event_id {
            meta.push(("causalEventId".to_string(), Value::from(cause)));
        }

        Value::map([
            ("id", Value::from(self.id)),
            ("tick", Value::from(self.tick)),
            ("timestamp", Value::Int(self.timestamp)),
            ("type", Value::from(self.kind.name())),
            ("data", self.data.clone()),
            ("meta", Value::Map(meta)),
        ])
    }
}

/// Query over the log. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kinds: Vec<EventKind>,
    pub from_tick: Option<u32>,
    pub to_tick: Option<u32>,
    pub actor: Option<PlayerId>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn ticks(mut self, from: u32, to: u32) -> Self {
        self.from_tick = Some(from);
        self.to_tick = Some(to);
        self
    }

    pub fn since(mut self, tick: u32) -> Self {
        self.from_tick = Some(tick);
        self
    }

    pub fn actor(mut self, actor: PlayerId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && self.from_tick.map_or(true, |t| event.tick >= t)
            && self.to_tick.map_or(true, |t| event.tick <= t)
            && self.actor.map_or(true, |a| event.meta.actor == Some(a))
    }
}

/// Upper bound on up-front allocation; larger logs grow as events arrive.
const PREALLOCATED_EVENTS: usize = 1024;

#[derive(Serialize, Deserialize)]
struct ExportedLog {
    capacity: usize,
    next_id: u64,
    events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
    next_id: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(PREALLOCATED_EVENTS)),
            capacity,
            next_id: 1,
        }
    }

    pub fn log(&mut self, tick: u32, timestamp: i64, kind: EventKind, data: Value, meta: EventMeta) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(Event {
            id,
            tick,
            timestamp,
            kind,
            data,
            meta,
        });
        id
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        // Ids are contiguous within the buffer.
        let first = self.events.front()?.id;
        let index = id.checked_sub(first)?;
        self.events.get(usize::try_from(index).ok()?)
    }

    /// Matching events in log order, truncated to the filter's limit.
    pub fn query(&self, filter: &EventFilter) -> Vec<&Event> {
        let matching = self.events.iter().filter(|e| filter.matches(e));
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Feeds matching events to `apply` oldest first. Returns how many were replayed.
    pub fn replay<F: FnMut(&Event)>(&self, filter: &EventFilter, mut apply: F) -> usize {
        let events = self.query(filter);
        for event in &events {
            apply(event);
        }
        events.len()
    }

    /// Walks `causal_event_id` links back from `id`, newest first. Stops at
    /// the first link that has been overwritten.
    pub fn causal_chain(&self, id: u64) -> Vec<&Event> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id);
        while let Some(event) = cursor {
            chain.push(event);
            if chain.len() > self.events.len() {
                break;
            }
            cursor = event
                .meta
                .causal_event_id
                .filter(|cause| *cause < event.id)
                .and_then(|cause| self.get(cause));
        }
        chain
    }

    pub fn export(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&ExportedLog {
            capacity: self.capacity,
            next_id: self.next_id,
            events: self.events.iter().cloned().collect(),
        })
    }

    pub fn import(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let exported: ExportedLog = bincode::deserialize(bytes)?;
        let mut log = EventLog::new(exported.capacity);
        let skip = exported.events.len().saturating_sub(log.capacity);
        log.events.extend(exported.events.into_iter().skip(skip));
        let after_last = log.events.back().map_or(1, |e| e.id + 1);
        log.next_id = exported.next_id.max(after_last);
        Ok(log)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
