//! The address resolution cache.
//!
//! One cache serves one interface. Every destination the interface talks to
//! gets an [Entry] holding the resolved link-layer address, a retry count
//! and a bounded queue of packets waiting for the resolution to finish.
//!
//! Unresolved entries are not given individual timers. The cache arms a
//! single shared sweep timer the first time any entry starts waiting for a
//! reply; each firing scans the whole table, retransmits requests for
//! entries that still have retries left and fails the rest, draining their
//! queues into the [DropSink]. The sweep reschedules itself only while at
//! least one entry still wants a retry, so an idle cache holds no timer at
//! all.

use std::collections::{HashMap, VecDeque};
use std::io;

use core::fmt;

use log::{debug, trace, warn};

use crate::netdev::NetDev;
use crate::pkbuf::PacketBuffer;
use crate::sched::{Scheduler, TimerToken};
use crate::storage::{Empty, Full};
use crate::time::{Duration, Instant};
use crate::wire::{EthernetAddress, Ipv4Address, Ipv4Packet, Ipv4Repr};

/// A queued payload together with the network header it was going to be
/// sent under. The header travels with the payload so it can be reattached
/// for diagnostics if the packet is dropped.
pub type PayloadHeaderPair = (PacketBuffer, Ipv4Repr);

/// Emits resolution requests on behalf of the cache.
///
/// Called for the initial retransmission window and for every retry after
/// it; the cache makes no assumption about delivery success.
pub trait RequestSender {
    fn send_request(&mut self, target: Ipv4Address);
}

/// Receives packets discarded after resolution retries are exhausted.
///
/// Invoked exactly once per queued packet, in the order the packets were
/// queued, with the network header serialized back in front of the payload.
pub trait DropSink {
    fn drop_packet(&mut self, packet: PacketBuffer);
}

/// Cache tuning knobs, fixed for the lifetime of a cache.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// How long a resolved entry stays current before it needs refreshing.
    pub alive_timeout: Duration,
    /// How long a failed entry is remembered before a new attempt is made.
    pub dead_timeout: Duration,
    /// Sweep cadence while any entry is waiting for a reply.
    pub wait_reply_timeout: Duration,
    /// Number of sweep windows an entry may sit unanswered before it is
    /// failed and its queue drained.
    pub max_retries: u32,
    /// Capacity of the per-entry queue of packets pending resolution.
    pub pending_queue_size: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            alive_timeout: Duration::from_secs(120),
            dead_timeout: Duration::from_secs(100),
            wait_reply_timeout: Duration::from_secs(1),
            max_retries: 3,
            pending_queue_size: 3,
        }
    }
}

/// Resolution state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Resolved and current.
    Fresh,
    /// A resolution request is outstanding; packets queue behind it.
    AwaitingReply,
    /// Retries were exhausted without an answer.
    Failed,
    /// Configured by hand; never expires.
    Permanent,
    /// Installed by bulk population; never expires, removable in bulk.
    AutoGenerated,
}

/// A single destination's resolution state.
///
/// Entries are owned by their cache and live until removed or flushed.
/// State transitions are guarded: calling a `mark_*` method from the wrong
/// state is a caller bug and panics.
pub struct Entry {
    addr: Ipv4Address,
    link_addr: Option<EthernetAddress>,
    state: State,
    retries: u32,
    last_seen: Instant,
    pending: VecDeque<PayloadHeaderPair>,
    config: Config,
}

impl Entry {
    fn new(addr: Ipv4Address, config: Config) -> Entry {
        Entry {
            addr,
            link_addr: None,
            state: State::Fresh,
            retries: 0,
            last_seen: Instant::ZERO,
            pending: VecDeque::new(),
            config,
        }
    }

    pub fn addr(&self) -> Ipv4Address {
        self.addr
    }

    pub fn link_addr(&self) -> Option<EthernetAddress> {
        self.link_addr
    }

    /// Overwrite the link-layer address without touching the state.
    ///
    /// Used when populating permanent or auto-generated entries, where the
    /// address is known out of band.
    pub fn set_link_addr(&mut self, link_addr: EthernetAddress) {
        self.link_addr = Some(link_addr);
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_fresh(&self) -> bool {
        self.state == State::Fresh
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.state == State::AwaitingReply
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    pub fn is_permanent(&self) -> bool {
        self.state == State::Permanent
    }

    pub fn is_auto_generated(&self) -> bool {
        self.state == State::AutoGenerated
    }

    /// Record a resolution answer: store the link address and return to
    /// the resolved state.
    ///
    /// The queue is not drained here; the caller transmits the queued
    /// packets now that the link address is known.
    ///
    /// # Panics
    /// Panics unless the entry is awaiting a reply.
    pub fn mark_fresh(&mut self, link_addr: EthernetAddress, now: Instant) {
        assert!(
            self.state == State::AwaitingReply,
            "resolution answer for an entry that was not waiting for one"
        );
        self.link_addr = Some(link_addr);
        self.state = State::Fresh;
        self.retries = 0;
        self.last_seen = now;
    }

    /// Mark the entry failed.
    ///
    /// # Panics
    /// Panics if the entry is permanent or auto-generated.
    pub fn mark_failed(&mut self, now: Instant) {
        assert!(
            matches!(
                self.state,
                State::Fresh | State::AwaitingReply | State::Failed
            ),
            "static entries cannot fail"
        );
        self.state = State::Failed;
        self.retries = 0;
        self.last_seen = now;
    }

    /// Pin the entry as hand-configured, exempt from expiry.
    ///
    /// # Panics
    /// Panics if no link address has been set.
    pub fn mark_permanent(&mut self, now: Instant) {
        assert!(
            self.link_addr.is_some(),
            "a permanent entry needs a link address"
        );
        self.state = State::Permanent;
        self.retries = 0;
        self.last_seen = now;
    }

    /// Mark the entry as installed by bulk population.
    ///
    /// # Panics
    /// Panics if no link address has been set.
    pub fn mark_auto_generated(&mut self, now: Instant) {
        assert!(
            self.link_addr.is_some(),
            "an auto-generated entry needs a link address"
        );
        self.state = State::AutoGenerated;
        self.retries = 0;
        self.last_seen = now;
    }

    /// Queue another packet behind an outstanding resolution.
    ///
    /// Over capacity this is a soft failure: the queue is unchanged and the
    /// caller decides the packet's fate.
    ///
    /// # Panics
    /// Panics unless the entry is awaiting a reply.
    pub fn enqueue_pending(&mut self, waiting: PayloadHeaderPair) -> Result<(), Full> {
        assert!(
            self.state == State::AwaitingReply,
            "packets queue only behind an outstanding resolution"
        );
        if self.pending.len() >= self.config.pending_queue_size {
            return Err(Full);
        }
        self.pending.push_back(waiting);
        Ok(())
    }

    /// Remove and return the oldest queued packet.
    pub fn dequeue_pending(&mut self) -> Result<PayloadHeaderPair, Empty> {
        self.pending.pop_front().ok_or(Empty)
    }

    /// Expiry deadline for the current state.
    pub fn timeout(&self) -> Duration {
        match self.state {
            State::AwaitingReply => self.config.wait_reply_timeout,
            State::Failed => self.config.dead_timeout,
            State::Fresh => self.config.alive_timeout,
            State::Permanent | State::AutoGenerated => Duration::MAX,
        }
    }

    /// Whether the entry has sat in its current state past its timeout.
    pub fn is_expired(&self, now: Instant) -> bool {
        now - self.last_seen > self.timeout()
    }

    fn mark_awaiting(&mut self, waiting: PayloadHeaderPair, now: Instant) {
        assert!(
            matches!(self.state, State::Fresh | State::Failed),
            "cannot start resolving from state {:?}",
            self.state
        );
        assert!(
            self.pending.is_empty(),
            "stale packets queued outside a resolution window"
        );
        self.state = State::AwaitingReply;
        self.pending.push_back(waiting);
        self.last_seen = now;
    }

    fn increment_retries(&mut self, now: Instant) {
        self.retries += 1;
        self.last_seen = now;
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} lladdr ", self.addr)?;
        if let Some(link_addr) = self.link_addr {
            write!(f, "{link_addr}")?;
        }
        write!(f, " state {:?} last seen {}", self.state, self.last_seen)?;
        if self.timeout() == Duration::MAX {
            write!(f, " timeout forever")
        } else {
            write!(f, " timeout {}", self.timeout())
        }
    }
}

/// The cache proper: a table of entries plus the shared sweep timer.
pub struct ArpCache {
    config: Config,
    entries: HashMap<Ipv4Address, Entry>,
    sweep_timer: Option<TimerToken>,
}

impl ArpCache {
    pub fn new(config: Config) -> ArpCache {
        ArpCache {
            config,
            entries: HashMap::new(),
            sweep_timer: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry for a destination address.
    pub fn lookup(&self, addr: Ipv4Address) -> Option<&Entry> {
        self.entries.get(&addr)
    }

    pub fn lookup_mut(&mut self, addr: Ipv4Address) -> Option<&mut Entry> {
        self.entries.get_mut(&addr)
    }

    /// Find every entry resolved to the given link-layer address.
    ///
    /// Linear in the table size; used for reverse and proxy lookups.
    pub fn lookup_inverse(&self, link_addr: EthernetAddress) -> Vec<&Entry> {
        self.entries
            .values()
            .filter(|entry| entry.link_addr == Some(link_addr))
            .collect()
    }

    /// Create the entry for a destination address.
    ///
    /// The new entry is nominally fresh but carries no link address yet;
    /// callers start a resolution with [mark_awaiting_reply] right after,
    /// or populate the link address by hand for static entries.
    ///
    /// [mark_awaiting_reply]: #method.mark_awaiting_reply
    ///
    /// # Panics
    /// Panics if an entry for `addr` already exists.
    pub fn add(&mut self, addr: Ipv4Address) -> &mut Entry {
        assert!(
            !self.entries.contains_key(&addr),
            "entry for {addr} already exists"
        );
        self.entries
            .entry(addr)
            .or_insert_with(|| Entry::new(addr, self.config))
    }

    /// Start resolving `addr`: transition its entry into the awaiting-reply
    /// state, queue the first packet behind it and make sure the shared
    /// sweep timer is running.
    ///
    /// # Panics
    /// Panics if the entry is missing, is neither fresh nor failed, or
    /// still has packets queued.
    pub fn mark_awaiting_reply<S: Scheduler>(
        &mut self,
        sched: &mut S,
        addr: Ipv4Address,
        waiting: PayloadHeaderPair,
    ) {
        let now = sched.now();
        let entry = self
            .entries
            .get_mut(&addr)
            .unwrap_or_else(|| panic!("no entry for {addr}"));
        entry.mark_awaiting(waiting, now);
        self.start_wait_reply_timer(sched);
    }

    /// Erase the entry for `addr`, discarding its queued packets.
    ///
    /// This is an administrative delete, not a resolution failure: the
    /// queued packets are dropped without notifying any sink. Removing an
    /// address with no entry logs a warning and does nothing.
    pub fn remove(&mut self, addr: Ipv4Address) {
        match self.entries.remove(&addr) {
            Some(mut entry) => entry.clear_pending(),
            None => warn!("no entry for {addr} in this cache"),
        }
    }

    /// Drop every entry and stop the sweep timer.
    pub fn flush<S: Scheduler>(&mut self, sched: &mut S) {
        self.entries.clear();
        if let Some(token) = self.sweep_timer.take() {
            if sched.is_pending(token) {
                debug!("stopping wait-reply sweep at {}: cache flushed", sched.now());
                sched.cancel(token);
            }
        }
    }

    /// Drop only the auto-generated entries, leaving the rest untouched.
    pub fn remove_auto_generated(&mut self) {
        self.entries.retain(|_, entry| !entry.is_auto_generated());
    }

    /// The shared sweep, fired by the scheduler.
    ///
    /// Every awaiting entry consumes one retry window per firing: if it has
    /// windows left a new request goes out through `sender`, otherwise the
    /// entry fails and its queue drains into `sink` in FIFO order, each
    /// payload with its network header serialized back in front. The sweep
    /// reschedules itself only when some entry still has retries to burn.
    pub fn on_wait_reply_timeout<S, R, D>(&mut self, sched: &mut S, sender: &mut R, sink: &mut D)
    where
        S: Scheduler,
        R: RequestSender,
        D: DropSink,
    {
        let now = sched.now();
        let mut restart = false;
        for entry in self.entries.values_mut() {
            if !entry.is_awaiting_reply() {
                continue;
            }
            entry.increment_retries(now);
            if entry.retries() < self.config.max_retries {
                debug!(
                    "wait reply for {} expired, retransmitting request (retries = {})",
                    entry.addr(),
                    entry.retries()
                );
                sender.send_request(entry.addr());
                restart = true;
            } else {
                debug!(
                    "wait reply for {} expired, max retries exceeded, dropping queue",
                    entry.addr()
                );
                entry.mark_failed(now);
                while let Ok((mut packet, header)) = entry.dequeue_pending() {
                    // reattach the header so the sink sees the whole datagram
                    let mut header_bytes = vec![0; header.buffer_len()];
                    header.emit(&mut Ipv4Packet::new_unchecked(&mut header_bytes[..]));
                    packet.prepend(&header_bytes);
                    sink.drop_packet(packet);
                }
            }
        }
        if restart {
            trace!("restarting wait-reply sweep at {}", now);
            self.sweep_timer = Some(sched.schedule(self.config.wait_reply_timeout));
        }
    }

    /// Token of the armed sweep timer, for dispatch by the event loop.
    pub fn sweep_token(&self) -> Option<TimerToken> {
        self.sweep_timer
    }

    /// Whether the shared sweep timer is currently armed.
    pub fn sweep_scheduled<S: Scheduler>(&self, sched: &S) -> bool {
        self.sweep_timer
            .map_or(false, |token| sched.is_pending(token))
    }

    fn start_wait_reply_timer<S: Scheduler>(&mut self, sched: &mut S) {
        if !self.sweep_scheduled(sched) {
            trace!(
                "starting wait-reply sweep at {} for {}",
                sched.now(),
                self.config.wait_reply_timeout
            );
            self.sweep_timer = Some(sched.schedule(self.config.wait_reply_timeout));
        }
    }

    /// Write the neighbour table in the `ip neigh` flavoured dump format,
    /// one line per entry:
    ///
    /// ```text
    /// <address> dev <nameOrIndex> lladdr <linkAddress> <LABEL>
    /// ```
    pub fn print<W: io::Write>(&self, dev: &dyn NetDev, writer: &mut W) -> io::Result<()> {
        for (addr, entry) in &self.entries {
            write!(writer, "{addr} dev ")?;
            match dev.name() {
                Some(name) if !name.is_empty() => write!(writer, "{name}")?,
                _ => write!(writer, "{}", dev.ifindex())?,
            }
            write!(writer, " lladdr ")?;
            if let Some(link_addr) = entry.link_addr {
                write!(writer, "{link_addr}")?;
            }
            let label = if entry.is_fresh() {
                "REACHABLE"
            } else if entry.is_awaiting_reply() {
                "DELAY"
            } else if entry.is_permanent() {
                "PERMANENT"
            } else if entry.is_auto_generated() {
                "STATIC_AUTOGENERATED"
            } else {
                "STALE"
            };
            writeln!(writer, " {label}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::EventScheduler;
    use crate::wire::IpProtocol;

    fn addr(last: u8) -> Ipv4Address {
        Ipv4Address::new(10, 0, 0, last)
    }

    fn link(last: u8) -> EthernetAddress {
        EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    fn pair(tag: u8) -> PayloadHeaderPair {
        let header = Ipv4Repr {
            src_addr: addr(1),
            dst_addr: addr(2),
            next_header: IpProtocol::Udp,
            payload_len: 8,
            hop_limit: 64,
        };
        (PacketBuffer::from_bytes(&[tag; 8]), header)
    }

    #[derive(Default)]
    struct RequestLog {
        sent: Vec<Ipv4Address>,
    }

    impl RequestSender for RequestLog {
        fn send_request(&mut self, target: Ipv4Address) {
            self.sent.push(target);
        }
    }

    #[derive(Default)]
    struct DropLog {
        packets: Vec<PacketBuffer>,
    }

    impl DropSink for DropLog {
        fn drop_packet(&mut self, packet: PacketBuffer) {
            self.packets.push(packet);
        }
    }

    struct FakeDev {
        name: Option<&'static str>,
        ifindex: u32,
    }

    impl NetDev for FakeDev {
        fn name(&self) -> Option<&str> {
            self.name
        }

        fn ifindex(&self) -> u32 {
            self.ifindex
        }
    }

    /// Pop the armed sweep timer off the scheduler and run the handler.
    fn fire_sweep(
        cache: &mut ArpCache,
        sched: &mut EventScheduler,
        sender: &mut RequestLog,
        sink: &mut DropLog,
    ) {
        let token = sched.advance().expect("no sweep timer armed");
        assert_eq!(cache.sweep_token(), Some(token));
        cache.on_wait_reply_timeout(sched, sender, sink);
    }

    #[test]
    fn add_starts_fresh_without_link_addr() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));

        let entry = cache.lookup(addr(2)).unwrap();
        assert_eq!(entry.state(), State::Fresh);
        assert_eq!(entry.link_addr(), None);
        assert_eq!(entry.retries(), 0);
        assert!(cache.lookup(addr(3)).is_none());
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn duplicate_add_is_fatal() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.add(addr(2));
    }

    #[test]
    fn timeout_follows_state() {
        let mut sched = EventScheduler::new();
        let config = Config::default();
        let mut cache = ArpCache::new(config);
        cache.add(addr(2));

        assert_eq!(cache.lookup(addr(2)).unwrap().timeout(), config.alive_timeout);

        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
        assert_eq!(
            cache.lookup(addr(2)).unwrap().timeout(),
            config.wait_reply_timeout
        );

        let now = sched.now();
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.mark_failed(now);
        entry.dequeue_pending().unwrap();
        assert_eq!(entry.timeout(), config.dead_timeout);

        entry.set_link_addr(link(1));
        entry.mark_permanent(now);
        assert_eq!(entry.timeout(), Duration::MAX);

        entry.mark_auto_generated(now);
        assert_eq!(entry.timeout(), Duration::MAX);
    }

    #[test]
    fn expiry_is_strictly_past_the_timeout() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));

        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.mark_fresh(link(1), Instant::ZERO);
        entry.dequeue_pending().unwrap();
        assert!(!entry.is_expired(Instant::from_secs(120)));
        assert!(entry.is_expired(Instant::from_millis(120_001)));

        entry.mark_permanent(Instant::ZERO);
        assert!(!entry.is_expired(Instant::from_secs(1_000_000)));
    }

    #[test]
    #[should_panic(expected = "not waiting")]
    fn mark_fresh_outside_resolution_is_fatal() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache
            .lookup_mut(addr(2))
            .unwrap()
            .mark_fresh(link(1), Instant::ZERO);
    }

    #[test]
    #[should_panic(expected = "needs a link address")]
    fn mark_permanent_without_link_addr_is_fatal() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.lookup_mut(addr(2)).unwrap().mark_permanent(Instant::ZERO);
    }

    #[test]
    #[should_panic(expected = "cannot start resolving")]
    fn resolving_twice_is_fatal() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(2));
    }

    #[test]
    #[should_panic(expected = "stale packets")]
    fn resolving_with_undrained_queue_is_fatal() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));

        // The answer arrives but the caller forgets to drain the queue.
        let now = sched.now();
        cache.lookup_mut(addr(2)).unwrap().mark_fresh(link(1), now);
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(2));
    }

    #[test]
    fn queue_rejects_overflow_untouched() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));

        let entry = cache.lookup_mut(addr(2)).unwrap();
        assert_eq!(entry.pending_len(), 1);
        assert_eq!(entry.enqueue_pending(pair(2)), Ok(()));
        assert_eq!(entry.enqueue_pending(pair(3)), Ok(()));
        assert_eq!(entry.pending_len(), 3);
        assert_eq!(entry.enqueue_pending(pair(4)), Err(Full));
        assert_eq!(entry.enqueue_pending(pair(5)), Err(Full));
        assert_eq!(entry.pending_len(), 3);
    }

    #[test]
    fn retry_exhaustion_fails_entry_and_drains_queue_in_order() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        let mut sender = RequestLog::default();
        let mut sink = DropLog::default();

        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
        cache
            .lookup_mut(addr(2))
            .unwrap()
            .enqueue_pending(pair(2))
            .unwrap();
        assert!(cache.sweep_scheduled(&sched));
        let entry = cache.lookup(addr(2)).unwrap();
        assert_eq!(entry.state(), State::AwaitingReply);
        assert_eq!(entry.retries(), 0);

        // Two sweeps burn retry windows and retransmit.
        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent, vec![addr(2)]);
        assert_eq!(cache.lookup(addr(2)).unwrap().retries(), 1);
        assert!(cache.sweep_scheduled(&sched));

        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent, vec![addr(2), addr(2)]);
        assert_eq!(cache.lookup(addr(2)).unwrap().retries(), 2);
        assert!(sink.packets.is_empty());

        // Third sweep exhausts the retries: no request, entry failed,
        // queue drained oldest first.
        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent.len(), 2);

        let entry = cache.lookup(addr(2)).unwrap();
        assert_eq!(entry.state(), State::Failed);
        assert_eq!(entry.retries(), 0);
        assert_eq!(entry.pending_len(), 0);

        assert_eq!(sink.packets.len(), 2);
        for (packet, tag) in sink.packets.iter().zip([1u8, 2]) {
            let header = Ipv4Packet::new_checked(&packet.payload[..]).unwrap();
            assert_eq!(header.dst_addr(), addr(2));
            assert!(header.verify_checksum());
            assert_eq!(&packet.payload[header.header_len() as usize..], &[tag; 8]);
        }

        // Nothing is awaiting anymore, so the timer goes idle.
        assert!(!cache.sweep_scheduled(&sched));
        assert_eq!(sched.advance(), None);
    }

    #[test]
    fn resolution_answer_stops_the_retry_loop() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        let mut sender = RequestLog::default();
        let mut sink = DropLog::default();

        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(7));
        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent.len(), 1);

        // The reply comes in; the caller stores it and drains the queue.
        let now = sched.now();
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.mark_fresh(link(9), now);
        assert_eq!(entry.state(), State::Fresh);
        assert_eq!(entry.link_addr(), Some(link(9)));
        assert_eq!(entry.retries(), 0);

        let (packet, header) = entry.dequeue_pending().unwrap();
        assert_eq!(packet.payload, [7; 8]);
        assert_eq!(header.dst_addr, addr(2));
        assert_eq!(entry.dequeue_pending().err(), Some(Empty));

        // The already-armed sweep finds nothing to do and goes idle.
        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent.len(), 1);
        assert!(sink.packets.is_empty());
        assert!(!cache.sweep_scheduled(&sched));
        assert_eq!(sched.advance(), None);
    }

    #[test]
    fn sweep_only_touches_awaiting_entries() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        let mut sender = RequestLog::default();
        let mut sink = DropLog::default();

        cache.add(addr(2));
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.set_link_addr(link(2));
        entry.mark_permanent(Instant::ZERO);

        cache.add(addr(3));
        cache.mark_awaiting_reply(&mut sched, addr(3), pair(1));

        fire_sweep(&mut cache, &mut sched, &mut sender, &mut sink);
        assert_eq!(sender.sent, vec![addr(3)]);
        assert_eq!(cache.lookup(addr(2)).unwrap().state(), State::Permanent);
    }

    #[test]
    fn shared_timer_is_armed_once_for_many_entries() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());

        cache.add(addr(2));
        cache.add(addr(3));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
        cache.mark_awaiting_reply(&mut sched, addr(3), pair(2));

        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn flush_empties_table_and_cancels_sweep() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());

        cache.add(addr(2));
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.set_link_addr(link(2));
        entry.mark_permanent(Instant::ZERO);
        cache.add(addr(3));
        cache.mark_awaiting_reply(&mut sched, addr(3), pair(1));
        assert!(cache.sweep_scheduled(&sched));

        cache.flush(&mut sched);
        assert!(cache.is_empty());
        assert!(!cache.sweep_scheduled(&sched));
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(sched.advance(), None);
    }

    #[test]
    fn remove_discards_queue_without_dropping() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());

        cache.add(addr(2));
        cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
        cache
            .lookup_mut(addr(2))
            .unwrap()
            .enqueue_pending(pair(2))
            .unwrap();

        cache.remove(addr(2));
        assert!(cache.lookup(addr(2)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_of_unknown_address_is_a_noop() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        cache.remove(addr(200));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_auto_generated_spares_everything_else() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());

        cache.add(addr(2));
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.set_link_addr(link(2));
        entry.mark_auto_generated(Instant::ZERO);

        cache.add(addr(3));
        let entry = cache.lookup_mut(addr(3)).unwrap();
        entry.set_link_addr(link(3));
        entry.mark_permanent(Instant::ZERO);

        cache.add(addr(4));
        cache.mark_awaiting_reply(&mut sched, addr(4), pair(1));

        cache.remove_auto_generated();
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(addr(2)).is_none());
        assert_eq!(cache.lookup(addr(3)).unwrap().state(), State::Permanent);
        let survivor = cache.lookup(addr(4)).unwrap();
        assert_eq!(survivor.state(), State::AwaitingReply);
        assert_eq!(survivor.pending_len(), 1);
    }

    #[test]
    fn lookup_inverse_finds_all_matches() {
        let mut cache = ArpCache::new(Config::default());

        for (last, shared) in [(2, true), (3, true), (4, false)] {
            cache.add(addr(last));
            let entry = cache.lookup_mut(addr(last)).unwrap();
            entry.set_link_addr(if shared { link(9) } else { link(4) });
            entry.mark_permanent(Instant::ZERO);
        }

        let mut matches: Vec<_> = cache
            .lookup_inverse(link(9))
            .iter()
            .map(|entry| entry.addr())
            .collect();
        matches.sort();
        assert_eq!(matches, vec![addr(2), addr(3)]);
        assert!(cache.lookup_inverse(link(77)).is_empty());
    }

    #[test]
    fn print_uses_device_name_when_present() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.set_link_addr(link(1));
        entry.mark_permanent(Instant::ZERO);

        let dev = FakeDev {
            name: Some("eth0"),
            ifindex: 4,
        };
        let mut out = Vec::new();
        cache.print(&dev, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "10.0.0.2 dev eth0 lladdr 02:00:00:00:00:01 PERMANENT\n"
        );
    }

    #[test]
    fn print_falls_back_to_ifindex_and_blank_lladdr() {
        let mut sched = EventScheduler::new();
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(9));
        cache.mark_awaiting_reply(&mut sched, addr(9), pair(1));

        let dev = FakeDev {
            name: None,
            ifindex: 4,
        };
        let mut out = Vec::new();
        cache.print(&dev, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "10.0.0.9 dev 4 lladdr  DELAY\n"
        );
    }

    #[test]
    fn print_labels_cover_every_state() {
        let mut sched = EventScheduler::new();
        let dev = FakeDev {
            name: Some("eth0"),
            ifindex: 0,
        };

        let expectations = [
            (State::Fresh, "REACHABLE"),
            (State::AwaitingReply, "DELAY"),
            (State::Failed, "STALE"),
            (State::Permanent, "PERMANENT"),
            (State::AutoGenerated, "STATIC_AUTOGENERATED"),
        ];
        for (state, label) in expectations {
            let mut cache = ArpCache::new(Config::default());
            cache.add(addr(2));
            match state {
                State::Fresh => {
                    cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
                    let entry = cache.lookup_mut(addr(2)).unwrap();
                    entry.mark_fresh(link(1), Instant::ZERO);
                    entry.dequeue_pending().unwrap();
                }
                State::AwaitingReply => {
                    cache.mark_awaiting_reply(&mut sched, addr(2), pair(1));
                }
                State::Failed => {
                    cache.lookup_mut(addr(2)).unwrap().mark_failed(Instant::ZERO);
                }
                State::Permanent => {
                    let entry = cache.lookup_mut(addr(2)).unwrap();
                    entry.set_link_addr(link(1));
                    entry.mark_permanent(Instant::ZERO);
                }
                State::AutoGenerated => {
                    let entry = cache.lookup_mut(addr(2)).unwrap();
                    entry.set_link_addr(link(1));
                    entry.mark_auto_generated(Instant::ZERO);
                }
            }
            let mut out = Vec::new();
            cache.print(&dev, &mut out).unwrap();
            let line = String::from_utf8(out).unwrap();
            assert!(
                line.trim_end().ends_with(label),
                "state {state:?}: {line:?} should end with {label}"
            );
        }
    }

    #[test]
    fn entry_display_mentions_state_and_timeout() {
        let mut cache = ArpCache::new(Config::default());
        cache.add(addr(2));
        let entry = cache.lookup_mut(addr(2)).unwrap();
        entry.set_link_addr(link(1));
        entry.mark_permanent(Instant::from_secs(3));

        let line = format!("{entry}");
        assert!(line.starts_with("10.0.0.2 lladdr 02:00:00:00:00:01"));
        assert!(line.contains("state Permanent"));
        assert!(line.contains("last seen 3.000s"));
        assert!(line.ends_with("timeout forever"));
    }
}
