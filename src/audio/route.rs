//! Output route notifications
//!
//! Route monitors (platform glue, or the audio stream's own error callback)
//! push [`RouteEvent`]s into a [`RouteEventQueue`]; the engine drains the
//! queue on its control thread and stops playback when the active output
//! becomes unsuitable.
//!
//! Uses a lock-free ring buffer. Producer side has a Mutex for multi-producer
//! access; the audio thread only ever uses `try_lock` so it never blocks.

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of output currently routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Wired headphones or headset
    Wired,
    /// Bluetooth, AirPlay or other wireless headphones
    Wireless,
    /// Built-in or external speakers
    Speaker,
    #[default]
    Unknown,
}

impl OutputKind {
    pub fn is_headphones(self) -> bool {
        matches!(self, OutputKind::Wired | OutputKind::Wireless)
    }

    /// Best-effort classification from a device/port name
    pub fn classify(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        const WIRELESS: [&str; 5] = ["bluetooth", "airpods", "a2dp", "airplay", "wireless"];
        const WIRED: [&str; 3] = ["headphone", "headset", "earphone"];
        const SPEAKER: [&str; 3] = ["speaker", "built-in output", "hdmi"];

        if WIRELESS.iter().any(|k| name.contains(k)) {
            OutputKind::Wireless
        } else if WIRED.iter().any(|k| name.contains(k)) {
            OutputKind::Wired
        } else if SPEAKER.iter().any(|k| name.contains(k)) {
            OutputKind::Speaker
        } else {
            OutputKind::Unknown
        }
    }
}

/// Why the route changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteChangeReason {
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    /// The platform reports a new active output
    DeviceRouteChanged {
        reason: RouteChangeReason,
        output: OutputKind,
    },
    /// The open stream lost its device
    DeviceLost,
}

const DEFAULT_CAPACITY: usize = 64;

struct QueueInner {
    producer: Mutex<ringbuf::HeapProd<RouteEvent>>,
    consumer: Mutex<ringbuf::HeapCons<RouteEvent>>,
    capacity: usize,
}

/// Cloneable handle to the engine's route event queue
#[derive(Clone)]
pub struct RouteEventQueue {
    inner: Arc<QueueInner>,
}

impl RouteEventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (producer, consumer) = HeapRb::<RouteEvent>::new(capacity).split();
        Self {
            inner: Arc::new(QueueInner {
                producer: Mutex::new(producer),
                consumer: Mutex::new(consumer),
                capacity,
            }),
        }
    }

    /// Push an event from a control or monitor thread. Returns false if full.
    pub fn push(&self, event: RouteEvent) -> bool {
        let ok = self.inner.producer.lock().try_push(event).is_ok();
        if !ok {
            log::warn!(
                "Route event queue full (capacity {}), dropping {:?}",
                self.inner.capacity,
                event
            );
        }
        ok
    }

    /// Push from the audio thread: never blocks, never logs
    pub fn try_push(&self, event: RouteEvent) -> bool {
        match self.inner.producer.try_lock() {
            Some(mut producer) => producer.try_push(event).is_ok(),
            None => false,
        }
    }

    /// Convenience for monitors reporting a new output
    pub fn route_changed(&self, reason: RouteChangeReason, output: OutputKind) -> bool {
        self.push(RouteEvent::DeviceRouteChanged { reason, output })
    }

    /// Drain pending events into a pre-allocated buffer
    pub fn drain_into(&self, buffer: &mut Vec<RouteEvent>) -> usize {
        let mut consumer = self.inner.consumer.lock();
        let mut count = 0;
        while let Some(event) = consumer.try_pop() {
            buffer.push(event);
            count += 1;
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.consumer.lock().is_empty()
    }
}

impl Default for RouteEventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
