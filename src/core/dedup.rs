//! Dedup and staleness gate for outbound commands
//!
//! Two layers decide whether a workspace command reaches the wire:
//! - [`PortClock`]: every pin keeps the logical time of the last command
//!   applied to it; only strictly newer commands pass, and a composite port
//!   needs every pin to be stale.
//! - [`RecentCommandCache`]: remembers the last `(kind, payload)` sent per
//!   port and suppresses exact repeats. Singleton kinds allow one live port
//!   at a time, and bypass kinds (momentary triggers) are never suppressed.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::core::protocol::Port;

/// Per-pin logical clock
#[derive(Debug, Clone, Default)]
pub struct PortClock {
    times: HashMap<u8, f64>,
}

impl PortClock {
    /// Create a clock with every pin at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied time of a pin
    pub fn last(&self, pin: u8) -> f64 {
        self.times.get(&pin).copied().unwrap_or(0.0)
    }

    /// Is `time` strictly newer than every pin of `port`?
    pub fn is_stale(&self, port: &Port, time: f64) -> bool {
        port.pins().into_iter().all(|pin| time > self.last(pin))
    }

    /// Record `time` on every pin of `port`
    pub fn advance(&mut self, port: &Port, time: f64) {
        for pin in port.pins() {
            self.times.insert(pin, time);
        }
    }

    /// Advance when stale; returns whether the command is newer
    pub fn try_advance(&mut self, port: &Port, time: f64) -> bool {
        if self.is_stale(port, time) {
            self.advance(port, time);
            true
        } else {
            false
        }
    }

    /// Forget every recorded time
    pub fn clear(&mut self) {
        self.times.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CacheEntry<K, P> {
    kind: K,
    payload: P,
}

/// Last command sent per port
#[derive(Debug, Clone)]
pub struct RecentCommandCache<K, P> {
    entries: HashMap<Port, CacheEntry<K, P>>,
    singletons: HashSet<K>,
    bypass: HashSet<K>,
    force_resend: bool,
}

impl<K, P> RecentCommandCache<K, P>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    P: Clone + PartialEq,
{
    /// Create an empty cache
    pub fn new(singletons: impl IntoIterator<Item = K>, bypass: impl IntoIterator<Item = K>) -> Self {
        Self {
            entries: HashMap::new(),
            singletons: singletons.into_iter().collect(),
            bypass: bypass.into_iter().collect(),
            force_resend: false,
        }
    }

    /// Is `kind` a singleton class?
    pub fn is_singleton(&self, kind: K) -> bool {
        self.singletons.contains(&kind)
    }

    /// Replace the set of singleton kinds
    pub fn set_singletons(&mut self, singletons: impl IntoIterator<Item = K>) {
        self.singletons = singletons.into_iter().collect();
    }

    /// Force the next singleton command through, as after a fresh connection
    pub fn force_resend(&mut self) {
        self.force_resend = true;
    }

    /// Is a forced resend still pending?
    pub fn resend_pending(&self) -> bool {
        self.force_resend
    }

    /// Decide whether a command must go out
    ///
    /// A singleton command evicts every other port holding the same kind;
    /// it is sent when something was evicted, when its port is new, or when
    /// a forced resend is pending (which it then consumes). Other commands
    /// are suppressed only when the port already holds the same kind and
    /// payload, unless the kind bypasses dedup.
    pub fn should_send(&mut self, port: &Port, kind: K, payload: &P) -> bool {
        if self.singletons.contains(&kind) {
            let before = self.entries.len();
            self.entries
                .retain(|key, entry| key == port || entry.kind != kind);
            let evicted = self.entries.len() != before;

            if evicted || !self.entries.contains_key(port) || self.force_resend {
                self.force_resend = false;
                return true;
            }
            return false;
        }

        if self.bypass.contains(&kind) {
            return true;
        }

        match self.entries.get(port) {
            Some(entry) => !(entry.kind == kind && entry.payload == *payload),
            None => true,
        }
    }

    /// Record a command as sent
    pub fn remember(&mut self, port: Port, kind: K, payload: P) {
        self.entries.insert(port, CacheEntry { kind, payload });
    }

    /// [`should_send`](Self::should_send) followed by [`remember`](Self::remember)
    pub fn admit(&mut self, port: Port, kind: K, payload: P) -> bool {
        if self.should_send(&port, kind, &payload) {
            self.remember(port, kind, payload);
            true
        } else {
            false
        }
    }

    /// Ports currently holding `kind`
    pub fn ports_of(&self, kind: K) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(port, _)| *port)
            .collect();
        ports.sort();
        ports
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the cache empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Clock and cache applied together
///
/// The clock advances whenever a command is newer, even if the cache then
/// suppresses it.
#[derive(Debug, Clone)]
pub struct DedupGate<K, P> {
    clock: PortClock,
    cache: RecentCommandCache<K, P>,
}

impl<K, P> DedupGate<K, P>
where
    K: Copy + Eq + Hash + std::fmt::Debug,
    P: Clone + PartialEq,
{
    /// Create a gate
    pub fn new(singletons: impl IntoIterator<Item = K>, bypass: impl IntoIterator<Item = K>) -> Self {
        Self {
            clock: PortClock::new(),
            cache: RecentCommandCache::new(singletons, bypass),
        }
    }

    /// Should a command issued at `time` be sent?
    pub fn admit(&mut self, port: Port, time: f64, kind: K, payload: P) -> bool {
        if !self.clock.try_advance(&port, time) {
            tracing::trace!("Stale command for port {} at {}", port, time);
            return false;
        }
        let send = self.cache.admit(port, kind, payload);
        if !send {
            tracing::trace!("Suppressed repeat {:?} on port {}", kind, port);
        }
        send
    }

    /// Per-pin clock
    pub fn clock(&self) -> &PortClock {
        &self.clock
    }

    /// Recent command cache
    pub fn cache(&self) -> &RecentCommandCache<K, P> {
        &self.cache
    }

    /// Force the next singleton command through
    pub fn force_resend(&mut self) {
        self.cache.force_resend();
    }

    /// Replace the set of singleton kinds
    pub fn set_singletons(&mut self, singletons: impl IntoIterator<Item = K>) {
        self.cache.set_singletons(singletons);
    }

    /// Forget clocks and cached commands
    pub fn clear(&mut self) {
        self.clock.clear();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Digital,
        Tone,
        Ultrasonic,
    }

    fn cache() -> RecentCommandCache<Kind, i32> {
        RecentCommandCache::new([Kind::Ultrasonic], [Kind::Tone])
    }

    #[test]
    fn test_clock_requires_strictly_newer() {
        let mut clock = PortClock::new();
        assert!(clock.try_advance(&Port::Pin(3), 1.0));
        assert!(!clock.try_advance(&Port::Pin(3), 1.0));
        assert!(!clock.try_advance(&Port::Pin(3), 0.5));
        assert!(clock.try_advance(&Port::Pin(3), 2.0));
        assert_eq!(clock.last(3), 2.0);
    }

    #[test]
    fn test_clock_composite_needs_every_pin_stale() {
        let mut clock = PortClock::new();
        clock.advance(&Port::Pin(3), 5.0);
        assert!(!clock.is_stale(&Port::Pair(2, 3), 4.0));
        assert!(clock.try_advance(&Port::Pair(2, 3), 6.0));
        assert_eq!(clock.last(2), 6.0);
        assert_eq!(clock.last(3), 6.0);
    }

    #[test]
    fn test_identical_set_sent_once() {
        let mut cache = cache();
        assert!(cache.admit(Port::Pin(4), Kind::Digital, 255));
        assert!(!cache.admit(Port::Pin(4), Kind::Digital, 255));
        assert!(cache.admit(Port::Pin(4), Kind::Digital, 0));
    }

    #[test]
    fn test_tone_always_sent() {
        let mut cache = cache();
        for _ in 0..3 {
            assert!(cache.admit(Port::Pin(8), Kind::Tone, 262));
        }
    }

    #[test]
    fn test_singleton_keeps_one_entry() {
        let mut cache = cache();
        assert!(cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
        assert!(!cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
        assert!(cache.admit(Port::Pair(4, 5), Kind::Ultrasonic, 0));
        assert_eq!(cache.ports_of(Kind::Ultrasonic), vec![Port::Pair(4, 5)]);

        // Switching back evicts the other port again, so it is resent
        assert!(cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
        assert_eq!(cache.ports_of(Kind::Ultrasonic), vec![Port::Pair(2, 3)]);
    }

    #[test]
    fn test_force_resend_consumed_once() {
        let mut cache = cache();
        assert!(cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
        cache.force_resend();
        assert!(cache.resend_pending());
        assert!(cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
        assert!(!cache.resend_pending());
        assert!(!cache.admit(Port::Pair(2, 3), Kind::Ultrasonic, 0));
    }

    #[test]
    fn test_gate_advances_clock_when_suppressed() {
        let mut gate: DedupGate<Kind, i32> = DedupGate::new([Kind::Ultrasonic], [Kind::Tone]);
        assert!(gate.admit(Port::Pin(7), 1.0, Kind::Digital, 1));
        assert!(!gate.admit(Port::Pin(7), 2.0, Kind::Digital, 1));
        assert_eq!(gate.clock().last(7), 2.0);
        assert!(!gate.admit(Port::Pin(7), 2.0, Kind::Digital, 0));
        assert!(gate.admit(Port::Pin(7), 3.0, Kind::Digital, 0));
    }
}
