//! Subscription registry: local tokens, per-key deduplication against the
//! master node, and inbound record dispatch.
//!
//! Every distinct [`SubscriptionKey`] owns one entry.  The first token for
//! a key registers it with the master node, the last token removed
//! withdraws it; tokens in between only touch local state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tn_domain::error::{Error, Result};
use tn_domain::trace::TraceEvent;
use tn_protocol::topics::{info, services};
use tn_protocol::{ComponentList, ComponentProfile, Record, ServiceRequest, TopicSubscription};
use tokio::sync::OwnedMutexGuard;

use crate::filter;
use crate::transport::ServiceCaller;
use crate::types::RecordCallback;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys and tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Topic,
    Regex,
    Component,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionKind::Topic => "topic",
            SubscriptionKind::Regex => "regex",
            SubscriptionKind::Component => "component",
        };
        f.write_str(s)
    }
}

/// What a subscription is addressed by.  Profiles compare by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKey {
    Topic(String),
    Regex(String),
    Component(ComponentProfile),
}

impl SubscriptionKey {
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            SubscriptionKey::Topic(_) => SubscriptionKind::Topic,
            SubscriptionKey::Regex(_) => SubscriptionKind::Regex,
            SubscriptionKey::Component(_) => SubscriptionKind::Component,
        }
    }

    fn describe(&self) -> String {
        match self {
            SubscriptionKey::Topic(t) | SubscriptionKey::Regex(t) => t.clone(),
            SubscriptionKey::Component(p) => serde_json::to_string(p).unwrap_or_default(),
        }
    }
}

/// Handle returned by every subscribe call.  The only way to remove the
/// subscription is to hand it back to
/// [`SubscriptionRegistry::unsubscribe`].
#[derive(Debug)]
#[must_use = "dropping the token makes the subscription impossible to remove"]
pub struct SubscriptionToken {
    id: u64,
    key: SubscriptionKey,
}

impl SubscriptionToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.key.kind()
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-key serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type KeyMutex = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct KeyLocks {
    map: Mutex<HashMap<SubscriptionKey, KeyMutex>>,
}

impl KeyLocks {
    async fn lock(&self, key: &SubscriptionKey) -> KeyGuard<'_> {
        let mutex = self.map.lock().entry(key.clone()).or_default().clone();
        let guard = mutex.clone().lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.clone(),
            mutex,
            guard: Some(guard),
        }
    }
}

struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: SubscriptionKey,
    mutex: KeyMutex,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.map.lock();
        // Only the map and this guard still hold the mutex: nobody waits.
        if Arc::strong_count(&self.mutex) == 2 {
            map.remove(&self.key);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    subscribers: Vec<(u64, RecordCallback)>,
    pattern: Option<Regex>,
    /// Topics of available components matching a component key.
    component_topics: BTreeSet<String>,
    /// Whether the master node holds a registration for this key.
    registered: bool,
}

impl Entry {
    fn new(pattern: Option<Regex>) -> Self {
        Self {
            subscribers: Vec::new(),
            pattern,
            component_topics: BTreeSet::new(),
            registered: false,
        }
    }

    fn receives(&self, key: &SubscriptionKey, topic: &str) -> bool {
        match key {
            SubscriptionKey::Topic(t) => t == topic,
            SubscriptionKey::Regex(_) => self.pattern.as_ref().is_some_and(|p| p.is_match(topic)),
            SubscriptionKey::Component(_) => self.component_topics.contains(topic),
        }
    }
}

struct RegistryInner {
    service: Arc<dyn ServiceCaller>,
    entries: Mutex<HashMap<SubscriptionKey, Entry>>,
    key_locks: KeyLocks,
    /// Internal subscription to new-component announcements, held while
    /// at least one component subscription exists.
    announcements: tokio::sync::Mutex<Option<SubscriptionToken>>,
    next_id: AtomicU64,
}

/// Owns every local subscription of a client node.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(service: Arc<dyn ServiceCaller>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                service,
                entries: Mutex::new(HashMap::new()),
                key_locks: KeyLocks::default(),
                announcements: tokio::sync::Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to records published on exactly `topic`.
    pub async fn subscribe_topic<F>(&self, topic: &str, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        validate_topic(topic)?;
        self.inner
            .subscribe(SubscriptionKey::Topic(topic.to_string()), None, Arc::new(callback))
            .await
    }

    /// Subscribe to every topic matching `pattern`.
    pub async fn subscribe_regex<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        if pattern.is_empty() {
            return Err(Error::Validation("regex pattern must not be empty".into()));
        }
        let compiled = Regex::new(pattern)
            .map_err(|e| Error::Validation(format!("invalid regex {pattern:?}: {e}")))?;
        self.inner
            .subscribe(
                SubscriptionKey::Regex(pattern.to_string()),
                Some(compiled),
                Arc::new(callback),
            )
            .await
    }

    /// Subscribe to the topics of every component matching `profile`,
    /// now and as new components are announced.
    pub async fn subscribe_components<F>(
        &self,
        profile: ComponentProfile,
        callback: F,
    ) -> Result<SubscriptionToken>
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        if profile.is_wildcard() {
            return Err(Error::Validation(
                "component profile must set at least one field".into(),
            ));
        }

        let mut announcements = self.inner.announcements.lock().await;
        if announcements.as_ref().is_some_and(|t| !self.inner.holds(t)) {
            // Cleared by a release while the slot was locked.
            announcements.take();
        }
        if announcements.is_none() {
            let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
            let token = self
                .inner
                .subscribe(
                    SubscriptionKey::Topic(info::NEW_COMPONENTS.to_string()),
                    None,
                    Arc::new(move |record: &Record| {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_components_announced(record);
                        }
                    }),
                )
                .await?;
            *announcements = Some(token);
        }

        let result = self
            .inner
            .subscribe(SubscriptionKey::Component(profile), None, Arc::new(callback))
            .await;

        if result.is_err() && !self.inner.has_component_entries() {
            self.inner.release_announcements(&mut announcements).await;
        }
        result
    }

    /// Remove a subscription.  Withdrawing the last token for a key also
    /// withdraws it from the master node; a failure there is returned but
    /// the local subscription is gone either way.
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        if token.kind() != SubscriptionKind::Component {
            return self.inner.unsubscribe(token).await;
        }

        let mut announcements = self.inner.announcements.lock().await;
        let result = self.inner.unsubscribe(token).await;
        if !self.inner.has_component_entries() {
            self.inner.release_announcements(&mut announcements).await;
        }
        result
    }

    /// Deliver `record` to every matching subscription.  Returns the number
    /// of callbacks invoked.
    pub fn dispatch(&self, record: &Record) -> usize {
        let callbacks: Vec<RecordCallback> = {
            let entries = self.inner.entries.lock();
            entries
                .iter()
                .filter(|(key, entry)| entry.receives(key, &record.topic))
                .flat_map(|(_, entry)| entry.subscribers.iter().map(|(_, cb)| cb.clone()))
                .collect()
        };

        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
                tracing::error!(topic = %record.topic, "subscription callback panicked");
            }
        }
        callbacks.len()
    }

    /// Build one request withdrawing every registered key and clear the
    /// registry.  Outstanding tokens become stale.
    pub fn release_request(&self, client_id: &str) -> Option<TopicSubscription> {
        let drained: Vec<SubscriptionKey> = self
            .inner
            .entries
            .lock()
            .drain()
            .filter(|(_, entry)| entry.registered)
            .map(|(key, _)| key)
            .collect();

        if let Ok(mut slot) = self.inner.announcements.try_lock() {
            slot.take();
        }

        if drained.is_empty() {
            return None;
        }

        let mut request = TopicSubscription::new(client_id);
        for key in drained {
            match key {
                SubscriptionKey::Topic(t) => request.unsubscribe_topics.push(t),
                SubscriptionKey::Regex(p) => request.unsubscribe_topic_regexp.push(p),
                SubscriptionKey::Component(c) => request.unsubscribe_components.push(c),
            }
        }
        Some(request)
    }

    /// Build one request registering every held key again.
    pub fn resubscribe_request(&self, client_id: &str) -> Option<TopicSubscription> {
        let entries = self.inner.entries.lock();
        let mut request = TopicSubscription::new(client_id);
        for key in entries.iter().filter(|(_, e)| e.registered).map(|(k, _)| k) {
            match key {
                SubscriptionKey::Topic(t) => request.subscribe_topics.push(t.clone()),
                SubscriptionKey::Regex(p) => request.subscribe_topic_regexp.push(p.clone()),
                SubscriptionKey::Component(c) => request.subscribe_components.push(c.clone()),
            }
        }
        (!request.is_empty()).then_some(request)
    }

    /// Re-register every held key with the master node in one request.
    pub async fn resubscribe_all(&self) -> Result<()> {
        let client_id = self.inner.service.client_id().ok_or(Error::NotConnected)?;
        let Some(request) = self.resubscribe_request(&client_id) else {
            return Ok(());
        };

        tracing::info!(
            topics = request.subscribe_topics.len(),
            regexes = request.subscribe_topic_regexp.len(),
            components = request.subscribe_components.len(),
            "re-registering subscriptions"
        );
        self.inner
            .service
            .call_service(
                ServiceRequest::new(services::TOPIC_SUBSCRIPTION).with_topic_subscription(request),
            )
            .await?;
        Ok(())
    }

    /// Number of local tokens held for `key`.
    pub fn local_subscribers(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(0, |e| e.subscribers.len())
    }

    /// Topics currently associated with a component subscription.
    pub fn component_topics(&self, profile: &ComponentProfile) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .get(&SubscriptionKey::Component(profile.clone()))
            .map(|e| e.component_topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryInner {
    async fn subscribe(
        &self,
        key: SubscriptionKey,
        pattern: Option<Regex>,
        callback: RecordCallback,
    ) -> Result<SubscriptionToken> {
        let _serial = self.key_locks.lock(&key).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Insert first so the token is dispatch-ready immediately.
        let needs_registration = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Entry::new(pattern));
            entry.subscribers.push((id, callback));
            !entry.registered
        };

        if needs_registration {
            match self.register_remote(&key).await {
                Ok(topics) => {
                    let present = match self.entries.lock().get_mut(&key) {
                        Some(entry) => {
                            entry.registered = true;
                            entry.component_topics.extend(topics);
                            true
                        }
                        None => false,
                    };
                    if !present {
                        // Released while the registration was in flight.
                        if let Err(e) = self.unregister_remote(&key).await {
                            tracing::warn!(error = %e, "failed to withdraw released subscription");
                        }
                        return Err(Error::Cancelled);
                    }
                }
                Err(e) => {
                    self.entries.lock().remove(&key);
                    tracing::warn!(
                        kind = %key.kind(),
                        key = %key.describe(),
                        error = %e,
                        "subscription rejected, rolled back"
                    );
                    return Err(e);
                }
            }
        }

        TraceEvent::SubscriptionRegistered {
            kind: key.kind().to_string(),
            key: key.describe(),
            local_subscribers: self.entries.lock().get(&key).map_or(0, |e| e.subscribers.len()),
        }
        .emit();

        Ok(SubscriptionToken { id, key })
    }

    async fn unsubscribe(&self, token: SubscriptionToken) -> Result<()> {
        let _serial = self.key_locks.lock(&token.key).await;

        let was_last = {
            let mut entries = self.entries.lock();
            let entry = entries
                .get_mut(&token.key)
                .ok_or_else(|| Error::Validation("unknown subscription token".into()))?;
            let before = entry.subscribers.len();
            entry.subscribers.retain(|(id, _)| *id != token.id);
            if entry.subscribers.len() == before {
                return Err(Error::Validation("unknown subscription token".into()));
            }
            let was_last = entry.subscribers.is_empty();
            if was_last {
                entries.remove(&token.key);
            }
            was_last
        };

        if !was_last {
            return Ok(());
        }

        TraceEvent::SubscriptionReleased {
            kind: token.kind().to_string(),
            key: token.key.describe(),
        }
        .emit();
        self.unregister_remote(&token.key).await
    }

    /// Register `key` with the master node.  For component keys this also
    /// resolves the topics of components already available.
    async fn register_remote(&self, key: &SubscriptionKey) -> Result<Vec<String>> {
        let client_id = self.service.client_id().ok_or(Error::NotConnected)?;
        let mut request = TopicSubscription::new(client_id);
        match key {
            SubscriptionKey::Topic(t) => request.subscribe_topics.push(t.clone()),
            SubscriptionKey::Regex(p) => request.subscribe_topic_regexp.push(p.clone()),
            SubscriptionKey::Component(c) => request.subscribe_components.push(c.clone()),
        }
        self.service
            .call_service(
                ServiceRequest::new(services::TOPIC_SUBSCRIPTION).with_topic_subscription(request),
            )
            .await?;

        let SubscriptionKey::Component(profile) = key else {
            return Ok(Vec::new());
        };
        match self.available_topics(profile).await {
            Ok(topics) => Ok(topics),
            Err(e) => {
                if let Err(withdraw) = self.unregister_remote(key).await {
                    tracing::warn!(error = %withdraw, "failed to withdraw component registration");
                }
                Err(e)
            }
        }
    }

    async fn unregister_remote(&self, key: &SubscriptionKey) -> Result<()> {
        let client_id = self.service.client_id().ok_or(Error::NotConnected)?;
        let mut request = TopicSubscription::new(client_id);
        match key {
            SubscriptionKey::Topic(t) => request.unsubscribe_topics.push(t.clone()),
            SubscriptionKey::Regex(p) => request.unsubscribe_topic_regexp.push(p.clone()),
            SubscriptionKey::Component(c) => request.unsubscribe_components.push(c.clone()),
        }
        self.service
            .call_service(
                ServiceRequest::new(services::TOPIC_SUBSCRIPTION).with_topic_subscription(request),
            )
            .await?;
        Ok(())
    }

    async fn available_topics(&self, profile: &ComponentProfile) -> Result<Vec<String>> {
        let reply = self
            .service
            .call_service(
                ServiceRequest::new(services::COMPONENT_LIST).with_component_list(ComponentList {
                    elements: vec![profile.clone()],
                }),
            )
            .await?;
        let available = reply.component_list.unwrap_or_default().elements;

        Ok(filter::filter_all(std::slice::from_ref(profile), &available)
            .into_iter()
            .filter_map(|c| c.topic.clone())
            .collect())
    }

    fn on_components_announced(&self, record: &Record) {
        let announced = announced_components(&record.payload);
        let mut entries = self.entries.lock();

        for component in &announced {
            let Some(topic) = &component.topic else {
                continue;
            };
            let mut matched = 0;
            for (key, entry) in entries.iter_mut() {
                if let SubscriptionKey::Component(profile) = key {
                    if filter::matches(profile, component) {
                        entry.component_topics.insert(topic.clone());
                        matched += 1;
                    }
                }
            }
            TraceEvent::ComponentAnnounced {
                topic: Some(topic.clone()),
                matched_subscriptions: matched,
            }
            .emit();
        }
    }

    fn has_component_entries(&self) -> bool {
        self.entries
            .lock()
            .keys()
            .any(|k| k.kind() == SubscriptionKind::Component)
    }

    fn holds(&self, token: &SubscriptionToken) -> bool {
        self.entries
            .lock()
            .get(&token.key)
            .is_some_and(|e| e.subscribers.iter().any(|(id, _)| *id == token.id))
    }

    async fn release_announcements(&self, slot: &mut Option<SubscriptionToken>) {
        if let Some(token) = slot.take().filter(|t| self.holds(t)) {
            if let Err(e) = self.unsubscribe(token).await {
                tracing::warn!(error = %e, "failed to release component announcements");
            }
        }
    }
}

/// Announcements carry a component list, a bare array, or one profile.
fn announced_components(payload: &Value) -> Vec<ComponentProfile> {
    let parsed = match payload {
        Value::Object(map) if map.contains_key("elements") => {
            serde_json::from_value::<ComponentList>(payload.clone()).map(|l| l.elements)
        }
        Value::Array(_) => serde_json::from_value::<Vec<ComponentProfile>>(payload.clone()),
        Value::Object(_) => serde_json::from_value::<ComponentProfile>(payload.clone()).map(|c| vec![c]),
        _ => Ok(Vec::new()),
    };
    parsed.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "unreadable component announcement");
        Vec::new()
    })
}

fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::Validation("topic must not be empty".into()));
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("topic {topic:?} contains whitespace")));
    }
    Ok(())
}
