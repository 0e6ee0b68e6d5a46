//! Event-count rolling windows
//!
//! A scale window holds the last `W` qualifying events (trade prints and book
//! deltas) in sequence order. Size is counted in events, never in time.

use super::config::ScaleSpec;
use super::types::{AggressorSide, BookLevel, NormalizedEvent, Payload};
use std::collections::VecDeque;
use std::sync::Arc;

/// Qualifying event as stored in a window. Shared between every scale of a
/// symbol, so each event is stored once.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    Trade {
        sequence_no: u64,
        price: f64,
        size: f64,
        side: Option<AggressorSide>,
    },
    Book {
        sequence_no: u64,
        levels: Vec<BookLevel>,
        snapshot: bool,
    },
}

impl WindowEvent {
    /// `None` for aux ticks, which never enter a window
    pub fn from_event(event: &NormalizedEvent) -> Option<Self> {
        match &event.payload {
            Payload::TradePrint { price, size, side } => Some(WindowEvent::Trade {
                sequence_no: event.sequence_no,
                price: *price,
                size: *size,
                side: *side,
            }),
            Payload::BookDelta { levels, snapshot } => Some(WindowEvent::Book {
                sequence_no: event.sequence_no,
                levels: levels.clone(),
                snapshot: *snapshot,
            }),
            _ => None,
        }
    }

    pub fn sequence_no(&self) -> u64 {
        match self {
            WindowEvent::Trade { sequence_no, .. } | WindowEvent::Book { sequence_no, .. } => {
                *sequence_no
            }
        }
    }
}

/// A bounded buffer of recent events
pub trait RollingWindow {
    /// Append an event, evicting the oldest if the bound is exceeded.
    /// Returns the evicted event, if any.
    fn add_event(&mut self, event: Arc<WindowEvent>) -> Option<Arc<WindowEvent>>;

    /// Check if the window is empty
    fn is_empty(&self) -> bool;

    /// Get the number of events in this window
    fn len(&self) -> usize;
}

/// Window for one configured scale
#[derive(Debug, Clone)]
pub struct ScaleWindow {
    spec: ScaleSpec,
    events: VecDeque<Arc<WindowEvent>>,
}

impl ScaleWindow {
    pub fn new(spec: ScaleSpec) -> Self {
        // cap the up-front allocation; large windows grow on demand
        let capacity = spec.window.min(4_096);
        Self { spec, events: VecDeque::with_capacity(capacity) }
    }

    pub fn spec(&self) -> &ScaleSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn capacity(&self) -> usize {
        self.spec.window
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.spec.window
    }

    /// Events oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &WindowEvent> + '_ {
        self.events.iter().map(|e| e.as_ref())
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.events.back().map(|e| e.sequence_no())
    }
}

impl RollingWindow for ScaleWindow {
    fn add_event(&mut self, event: Arc<WindowEvent>) -> Option<Arc<WindowEvent>> {
        self.events.push_back(event);
        if self.events.len() > self.spec.window {
            self.events.pop_front()
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

/// All scale windows of one symbol, finest first
#[derive(Debug, Clone)]
pub struct ScaleSet {
    windows: Vec<ScaleWindow>,
    last_sequence: Option<u64>,
}

impl ScaleSet {
    pub fn new(specs: &[ScaleSpec]) -> Self {
        Self {
            windows: specs.iter().cloned().map(ScaleWindow::new).collect(),
            last_sequence: None,
        }
    }

    /// Push a qualifying event into every window
    ///
    /// Returns `false` and leaves the windows untouched for aux ticks and
    /// for events at or below the last accepted `sequence_no`.
    pub fn update(&mut self, event: &NormalizedEvent) -> bool {
        if let Some(last) = self.last_sequence {
            if event.sequence_no <= last {
                log::warn!(
                    "⚠️  Ignoring {} event {} at or below window head {}",
                    event.symbol,
                    event.sequence_no,
                    last
                );
                return false;
            }
        }

        let Some(entry) = WindowEvent::from_event(event) else {
            return false;
        };
        let entry = Arc::new(entry);

        for window in &mut self.windows {
            window.add_event(Arc::clone(&entry));
        }
        self.last_sequence = Some(event.sequence_no);
        true
    }

    pub fn windows(&self) -> &[ScaleWindow] {
        &self.windows
    }
}
