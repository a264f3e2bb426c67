//! Live state publication
//!
//! Drivers mirror their state (ADC test mode, coupling, invert, gain level,
//! DAC value) into an optional [`MibSink`] under hierarchical keys. The mirror
//! is a side channel: a missing sink, a disabled node or a sink that refuses
//! a value never changes what the hardware operation returns.

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Key separator
pub const SEP: char = '.';

/// Value published for a node
#[derive(Debug, Clone, PartialEq)]
pub enum MibValue {
    /// Boolean
    Bool(bool),
    /// Unsigned integer
    Uint(u64),
    /// Signed integer
    Int(i64),
    /// Real
    Real(f64),
    /// Text
    Text(String),
}

impl fmt::Display for MibValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Sink refused a publication
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mib: {key}: {reason}")]
pub struct MibError {
    /// Key being published
    pub key: String,
    /// Reason given by the sink
    pub reason: String,
}

/// Publication point for live driver state
pub trait MibSink: Debug + Send + Sync {
    /// Publish or update a value
    ///
    /// # Errors
    ///
    /// Returns error if the sink cannot take the value. Callers log and
    /// continue.
    fn publish(&self, key: &str, value: &MibValue) -> Result<(), MibError>;

    /// Remove a key
    fn remove(&self, key: &str);
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MibRegistry {
    nodes: Mutex<BTreeMap<String, MibValue>>,
}

impl MibRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a key
    pub fn get(&self, key: &str) -> Option<MibValue> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    /// Snapshot of every key under `prefix`
    pub fn entries(&self, prefix: &str) -> Vec<(String, MibValue)> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of published keys
    pub fn len(&self) -> usize {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if nothing is published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MibSink for MibRegistry {
    fn publish(&self, key: &str, value: &MibValue) -> Result<(), MibError> {
        self.nodes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }
}

/// One mirrored value
///
/// The node keeps the last value locally so enabling it later publishes the
/// current state.
pub struct MibNode {
    key: String,
    sink: Option<Arc<dyn MibSink>>,
    enabled: AtomicBool,
    value: Mutex<Option<MibValue>>,
}

impl MibNode {
    /// Create a disabled node
    pub fn new(sink: Option<Arc<dyn MibSink>>, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sink,
            enabled: AtomicBool::new(false),
            value: Mutex::new(None),
        }
    }

    /// Node key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last value set
    pub fn value(&self) -> Option<MibValue> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// True when the node publishes
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Update the value and publish it if enabled
    pub fn set(&self, value: MibValue) {
        let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        *current = Some(value);
        if self.is_enabled() {
            if let Some(value) = current.as_ref() {
                self.publish(value);
            }
        }
    }

    /// Register with the sink and publish the current value
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        if let Some(value) = self.value() {
            self.publish(&value);
        }
    }

    /// Deregister from the sink
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            if let Some(sink) = &self.sink {
                sink.remove(&self.key);
            }
        }
    }

    fn publish(&self, value: &MibValue) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.publish(&self.key, value) {
                tracing::warn!("{e}");
            }
        }
    }
}

impl Debug for MibNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MibNode")
            .field("key", &self.key)
            .field("enabled", &self.is_enabled())
            .field("value", &self.value())
            .finish_non_exhaustive()
    }
}

impl Drop for MibNode {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Join key parts with the separator
pub fn key(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if !out.is_empty() {
            out.push(SEP);
        }
        out.push_str(part);
    }
    out
}
