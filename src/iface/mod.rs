mod arp_cache;

pub use self::arp_cache::{
    ArpCache, Config, DropSink, Entry, PayloadHeaderPair, RequestSender, State,
};
