//! Analytics event processor.
//!
//! Collects identify/custom/alias events and full feature events, and
//! aggregates every evaluation into per-flag summary counters keyed by
//! `(version, variation)`.  `bundle_payload` drains the batch, appending
//! at most one summary event; the workers own delivery.
//!
//! The individual-event list is bounded by `events_capacity`; overflow
//! drops the event with a warning.  Summary counters are exempt, so heavy
//! evaluation traffic never loses its aggregate.

use crate::config::Config;
use crate::user::{RedactionPolicy, User, user_to_json};
use crate::util::unix_millis;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tk_protocol::{ContextKind, Counter, EventUser, FlagRecord, FlagSummary, OutputEvent};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterKey {
    Known { version: u32, variation: i32 },
    Unknown,
}

struct FlagCounters {
    default: Option<Value>,
    counters: Vec<(CounterKey, Counter)>,
}

#[derive(Default)]
struct EventBatch {
    events: Vec<OutputEvent>,
    summary: BTreeMap<String, FlagCounters>,
    /// Wall-clock millis of the first evaluation in this window; 0 = empty.
    summary_start: u64,
}

pub(crate) struct EventProcessor {
    capacity: usize,
    inline_users: bool,
    all_attributes_private: bool,
    private_attribute_names: Vec<String>,
    state: Mutex<EventBatch>,
}

impl EventProcessor {
    pub fn new(config: &Config) -> Self {
        EventProcessor {
            capacity: config.events_capacity,
            inline_users: config.inline_users_in_events,
            all_attributes_private: config.all_attributes_private,
            private_attribute_names: config.private_attribute_names.clone(),
            state: Mutex::new(EventBatch::default()),
        }
    }

    fn policy(&self) -> RedactionPolicy<'_> {
        RedactionPolicy {
            all_attributes_private: self.all_attributes_private,
            global_private_names: &self.private_attribute_names,
        }
    }

    fn event_user(&self, user: &User) -> EventUser {
        if self.inline_users {
            EventUser::Inline(user_to_json(user, true, &self.policy()))
        } else {
            EventUser::Key(user.key.clone())
        }
    }

    fn push_event(&self, batch: &mut EventBatch, event: OutputEvent) {
        if batch.events.len() >= self.capacity {
            warn!("event capacity exceeded, dropping event");
            return;
        }
        batch.events.push(event);
    }

    pub fn identify(&self, user: &User) {
        let event = OutputEvent::Identify {
            creation_date: unix_millis(),
            key: user.key.clone(),
            user: user_to_json(user, true, &self.policy()),
        };
        let mut batch = self.state.lock().unwrap();
        self.push_event(&mut batch, event);
    }

    pub fn track(&self, user: &User, key: &str, data: Option<Value>, metric_value: Option<f64>) {
        let event = OutputEvent::Custom {
            creation_date: unix_millis(),
            key: key.to_owned(),
            user: self.event_user(user),
            data,
            metric_value,
            context_kind: ContextKind::tag(user.anonymous),
        };
        let mut batch = self.state.lock().unwrap();
        self.push_event(&mut batch, event);
    }

    pub fn alias(&self, current: &User, previous: &User) {
        let event = OutputEvent::Alias {
            creation_date: unix_millis(),
            key: current.key.clone(),
            previous_key: previous.key.clone(),
            context_kind: ContextKind::of(current.anonymous),
            previous_context_kind: ContextKind::of(previous.anonymous),
        };
        let mut batch = self.state.lock().unwrap();
        self.push_event(&mut batch, event);
    }

    /// Record one evaluation: always bumps the summary counter, and emits a
    /// full feature event when the flag asks for it (`track_events`, or a
    /// debug window that has not passed yet).
    pub fn process_eval(
        &self,
        user: &User,
        flag_key: &str,
        entry: Option<&FlagRecord>,
        value: &Value,
        fallback: &Value,
        detailed: bool,
    ) {
        let now = unix_millis();
        let mut batch = self.state.lock().unwrap();

        if batch.summary_start == 0 {
            batch.summary_start = now;
        }

        let flag_counters = batch
            .summary
            .entry(flag_key.to_owned())
            .or_insert_with(|| FlagCounters {
                default: Some(fallback.clone()),
                counters: Vec::new(),
            });

        let counter_key = match entry {
            Some(flag) => CounterKey::Known {
                version: flag.display_version(),
                variation: flag.variation.unwrap_or(-1),
            },
            None => CounterKey::Unknown,
        };
        match flag_counters
            .counters
            .iter_mut()
            .find(|(key, _)| *key == counter_key)
        {
            Some((_, counter)) => counter.count += 1,
            None => flag_counters.counters.push((
                counter_key,
                Counter {
                    count: 1,
                    value: value.clone(),
                    version: entry.map(FlagRecord::display_version),
                    variation: entry.and_then(FlagRecord::chosen_variation),
                    unknown: entry.is_none(),
                },
            )),
        }

        let Some(flag) = entry else { return };
        if flag.track_events || flag.debug_events_until_date > now {
            let event = OutputEvent::Feature {
                creation_date: now,
                key: flag_key.to_owned(),
                user: self.event_user(user),
                value: value.clone(),
                default: fallback.clone(),
                version: Some(flag.display_version()),
                variation: flag.chosen_variation(),
                reason: if detailed { flag.reason.clone() } else { None },
                context_kind: ContextKind::tag(user.anonymous),
            };
            self.push_event(&mut batch, event);
        }
    }

    /// Drain the batch for delivery.  Returns `None` when there is nothing
    /// to send; otherwise the individual events followed by one summary
    /// covering the window since the previous bundle.
    pub fn bundle_payload(&self) -> Option<Vec<OutputEvent>> {
        let now = unix_millis();
        let mut batch = self.state.lock().unwrap();

        if batch.events.is_empty() && batch.summary.is_empty() {
            return None;
        }

        let mut events = std::mem::take(&mut batch.events);
        if batch.summary_start != 0 {
            let features = std::mem::take(&mut batch.summary)
                .into_iter()
                .map(|(key, flag_counters)| {
                    (
                        key,
                        FlagSummary {
                            default: flag_counters.default,
                            counters: flag_counters
                                .counters
                                .into_iter()
                                .map(|(_, counter)| counter)
                                .collect(),
                        },
                    )
                })
                .collect();
            events.push(OutputEvent::Summary {
                start_date: batch.summary_start,
                end_date: now,
                features,
            });
            batch.summary_start = 0;
        }

        Some(events)
    }
}
