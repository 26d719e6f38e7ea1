//! Usage collector: the registry of measures and views
//!
//! The registry owns every registered measure and view, the reverse
//! measure -> consuming views association, and the recording path that fans
//! a measurement out to those views.
//!
//! `Registry` itself is single-writer (`&mut self`). Share it across threads
//! with [`SharedRegistry`] or funnel all calls through a
//! [`StatsWorker`](super::worker::StatsWorker).
//!
//! Unregistering a measure does not cascade: views built on it stay
//! registered and retrievable, but no longer receive samples.

use super::error::StatsError;
use super::measure::{MeasureDesc, Measurement};
use super::tags::TagSet;
use super::view::{View, ViewDesc, ViewSender, ViewState};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct MeasureEntry {
    desc: Arc<MeasureDesc>,
    /// Names of the registered views that consume this measure
    views: BTreeSet<String>,
}

/// Registry of measures and views
#[derive(Debug, Default)]
pub struct Registry {
    measures: BTreeMap<String, MeasureEntry>,
    views: BTreeMap<String, ViewState>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a measure under its name
    ///
    /// Descriptor names are fixed at construction, so the name check also
    /// rejects a descriptor that is already registered.
    pub fn register_measure(&mut self, desc: Arc<MeasureDesc>) -> Result<(), StatsError> {
        if self.measures.contains_key(desc.name()) {
            return Err(StatsError::DuplicateMeasure {
                name: desc.name().to_string(),
            });
        }

        debug!(measure = desc.name(), kind = %desc.kind(), "registered measure");
        self.measures.insert(
            desc.name().to_string(),
            MeasureEntry {
                desc,
                views: BTreeSet::new(),
            },
        );
        Ok(())
    }

    pub fn unregister_measure(&mut self, name: &str) -> Result<(), StatsError> {
        let entry = self
            .measures
            .remove(name)
            .ok_or_else(|| StatsError::UnknownMeasure {
                name: name.to_string(),
            })?;
        if entry.views.is_empty() {
            debug!(measure = name, "unregistered measure");
        } else {
            warn!(
                measure = name,
                views = ?entry.views,
                "unregistered measure that still has views; they will receive no further samples"
            );
        }
        Ok(())
    }

    /// Register a view; its aggregation window starts at `now_ms`
    pub fn register_view(&mut self, desc: Arc<ViewDesc>, now_ms: u64) -> Result<(), StatsError> {
        let measure = self
            .measures
            .get(desc.measure_name())
            .ok_or_else(|| StatsError::UnknownMeasure {
                name: desc.measure_name().to_string(),
            })?;
        if self.views.contains_key(desc.name()) {
            return Err(StatsError::DuplicateView {
                name: desc.name().to_string(),
            });
        }
        desc.validate(&measure.desc)?;

        // All checks passed; nothing below can fail.
        let name = desc.name().to_string();
        let measure_name = desc.measure_name().to_string();
        self.views
            .insert(name.clone(), ViewState::new(desc, now_ms));
        if let Some(measure) = self.measures.get_mut(&measure_name) {
            measure.views.insert(name.clone());
        }
        debug!(view = %name, measure = %measure_name, start_ms = now_ms, "registered view");
        Ok(())
    }

    pub fn unregister_view(&mut self, name: &str) -> Result<(), StatsError> {
        let state = self
            .views
            .remove(name)
            .ok_or_else(|| StatsError::UnknownView {
                name: name.to_string(),
            })?;
        // The measure may already be gone if it was unregistered first.
        if let Some(measure) = self.measures.get_mut(state.desc().measure_name()) {
            measure.views.remove(name);
        }
        debug!(view = name, "unregistered view");
        Ok(())
    }

    pub fn subscribe(&mut self, view_name: &str, tx: ViewSender) -> Result<(), StatsError> {
        self.view_state_mut(view_name)?.subscribe(tx)
    }

    pub fn unsubscribe(&mut self, view_name: &str, tx: &ViewSender) -> Result<(), StatsError> {
        self.view_state_mut(view_name)?.unsubscribe(tx)
    }

    /// Subscriber channels of a view
    pub fn subscribers(&self, view_name: &str) -> Result<&[ViewSender], StatsError> {
        Ok(self.view_state(view_name)?.subscribers())
    }

    /// Record one measurement against every view of its measure
    pub fn record(&mut self, now_ms: u64, tags: &TagSet, m: &Measurement) -> Result<(), StatsError> {
        self.check_measure(m)?;
        self.record_checked(now_ms, tags, m)
    }

    /// Record several measurements sharing one tag set
    ///
    /// Every measurement is checked before any is recorded. Once checks
    /// pass, a later failure does not undo earlier measurements.
    pub fn record_batch(
        &mut self,
        now_ms: u64,
        tags: &TagSet,
        ms: &[Measurement],
    ) -> Result<(), StatsError> {
        for m in ms {
            self.check_measure(m)?;
        }
        for m in ms {
            self.record_checked(now_ms, tags, m)?;
        }
        Ok(())
    }

    /// Snapshot every registered view; fails on the first view that fails
    pub fn retrieve_views(&self, now_ms: u64) -> Result<Vec<View>, StatsError> {
        self.views
            .values()
            .map(|state| state.retrieve_view(now_ms))
            .collect()
    }

    /// Snapshot one view; `desc` must be the descriptor that was registered
    pub fn retrieve_view(&self, now_ms: u64, desc: &Arc<ViewDesc>) -> Result<View, StatsError> {
        let state = self.view_state(desc.name())?;
        if !Arc::ptr_eq(state.desc(), desc) {
            return Err(StatsError::ViewMismatch {
                name: desc.name().to_string(),
            });
        }
        state.retrieve_view(now_ms)
    }

    pub fn measure(&self, name: &str) -> Option<&Arc<MeasureDesc>> {
        self.measures.get(name).map(|e| &e.desc)
    }

    pub fn view(&self, name: &str) -> Option<&ViewState> {
        self.views.get(name)
    }

    /// Names of the views consuming a measure
    pub fn views_of(&self, measure_name: &str) -> Option<impl Iterator<Item = &str>> {
        self.measures
            .get(measure_name)
            .map(|e| e.views.iter().map(String::as_str))
    }

    pub fn view_names(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    pub(crate) fn views_mut(&mut self) -> impl Iterator<Item = &mut ViewState> {
        self.views.values_mut()
    }

    fn check_measure(&self, m: &Measurement) -> Result<(), StatsError> {
        let desc = m.measure();
        match self.measures.get(desc.name()) {
            Some(entry) if Arc::ptr_eq(&entry.desc, desc) => Ok(()),
            _ => Err(StatsError::MeasureMismatch {
                name: desc.name().to_string(),
            }),
        }
    }

    fn record_checked(
        &mut self,
        now_ms: u64,
        tags: &TagSet,
        m: &Measurement,
    ) -> Result<(), StatsError> {
        let Some(entry) = self.measures.get(m.measure().name()) else {
            return Ok(());
        };
        for view_name in &entry.views {
            if let Some(state) = self.views.get_mut(view_name) {
                state.add(tags, m, now_ms)?;
            }
        }
        Ok(())
    }

    fn view_state(&self, name: &str) -> Result<&ViewState, StatsError> {
        self.views.get(name).ok_or_else(|| StatsError::UnknownView {
            name: name.to_string(),
        })
    }

    fn view_state_mut(&mut self, name: &str) -> Result<&mut ViewState, StatsError> {
        self.views.get_mut(name).ok_or_else(|| StatsError::UnknownView {
            name: name.to_string(),
        })
    }
}

/// Cloneable, thread-safe handle to a [`Registry`]
///
/// Every call holds the lock for its whole duration, so the lookup-or-create
/// of an aggregator for a new tag signature is atomic.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        SharedRegistry {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Run `f` with exclusive access to the registry
    pub fn with<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn record(&self, now_ms: u64, tags: &TagSet, m: &Measurement) -> Result<(), StatsError> {
        self.inner.lock().record(now_ms, tags, m)
    }

    pub fn record_batch(
        &self,
        now_ms: u64,
        tags: &TagSet,
        ms: &[Measurement],
    ) -> Result<(), StatsError> {
        self.inner.lock().record_batch(now_ms, tags, ms)
    }

    pub fn retrieve_views(&self, now_ms: u64) -> Result<Vec<View>, StatsError> {
        self.inner.lock().retrieve_views(now_ms)
    }
}
