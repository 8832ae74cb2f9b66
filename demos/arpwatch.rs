//! Scripted resolution run: one destination answers on the second request,
//! one never answers. Prints the request/drop activity and the final cache
//! dump.
//!
//! cargo run --example arpwatch -- --answer-after 2

use std::env;
use std::io;
use std::process::exit;

use arpcache_rs::iface::{ArpCache, Config, DropSink, PayloadHeaderPair, RequestSender};
use arpcache_rs::netdev::NetDev;
use arpcache_rs::pkbuf::PacketBuffer;
use arpcache_rs::sched::{EventScheduler, Scheduler};
use arpcache_rs::wire::{EthernetAddress, IpProtocol, Ipv4Address, Ipv4Repr};

struct TapDev;

impl NetDev for TapDev {
    fn name(&self) -> Option<&str> {
        Some("tap0")
    }

    fn ifindex(&self) -> u32 {
        0
    }
}

/// Counts outgoing requests so the main loop can script the reply.
#[derive(Default)]
struct RequestCounter {
    sent: Vec<Ipv4Address>,
}

impl RequestSender for RequestCounter {
    fn send_request(&mut self, target: Ipv4Address) {
        println!("who-has {target}? (request {})", self.sent.len() + 1);
        self.sent.push(target);
    }
}

#[derive(Default)]
struct StdoutDrops {
    count: usize,
}

impl DropSink for StdoutDrops {
    fn drop_packet(&mut self, packet: PacketBuffer) {
        self.count += 1;
        println!("dropped {} byte packet after retry exhaustion", packet.len());
    }
}

fn waiting_packet(dst: Ipv4Address) -> PayloadHeaderPair {
    let header = Ipv4Repr {
        src_addr: Ipv4Address::new(192, 168, 69, 1),
        dst_addr: dst,
        next_header: IpProtocol::Udp,
        payload_len: 40,
        hop_limit: 64,
    };
    (PacketBuffer::new(40), header)
}

fn main() {
    env_logger::init();

    let mut opts = getopts::Options::new();
    opts.optopt(
        "a",
        "answer-after",
        "answer the reachable host after N requests",
        "N",
    );
    opts.optflag("h", "help", "print this help menu");
    let matches = match opts.parse(env::args().skip(1)) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{err}");
            exit(1);
        }
    };
    if matches.opt_present("h") {
        print!("{}", opts.usage("Usage: arpwatch [options]"));
        return;
    }
    let answer_after: u32 = matches
        .opt_str("a")
        .map(|n| n.parse().expect("--answer-after takes a number"))
        .unwrap_or(2);

    let reachable = Ipv4Address::new(192, 168, 69, 100);
    let silent = Ipv4Address::new(192, 168, 69, 200);
    let reachable_mac = EthernetAddress(rand::random());

    let mut sched = EventScheduler::new();
    let mut cache = ArpCache::new(Config::default());
    let mut sender = RequestCounter::default();
    let mut drops = StdoutDrops::default();

    cache.add(reachable);
    cache.mark_awaiting_reply(&mut sched, reachable, waiting_packet(reachable));
    cache.add(silent);
    cache.mark_awaiting_reply(&mut sched, silent, waiting_packet(silent));

    while let Some(token) = sched.advance() {
        if cache.sweep_token() != Some(token) {
            continue;
        }
        cache.on_wait_reply_timeout(&mut sched, &mut sender, &mut drops);

        let answered = sender.sent.iter().filter(|a| **a == reachable).count() as u32;
        if let Some(entry) = cache.lookup_mut(reachable) {
            if entry.is_awaiting_reply() && answered >= answer_after {
                println!("{reachable} is-at {reachable_mac}");
                entry.mark_fresh(reachable_mac, sched.now());
                while let Ok((packet, header)) = entry.dequeue_pending() {
                    println!("sending {} byte packet to {}", packet.len(), header.dst_addr);
                }
            }
        }
    }

    println!("\nfinal cache after {} (drops: {}):", sched.now(), drops.count);
    let mut stdout = io::stdout();
    cache.print(&TapDev, &mut stdout).expect("write to stdout");
}
