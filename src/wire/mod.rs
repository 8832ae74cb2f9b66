mod ethernet;
pub mod ipv4;

pub use self::ethernet::Address as EthernetAddress;
pub use self::ipv4::{
    Address as Ipv4Address, Packet as Ipv4Packet, Protocol as IpProtocol, Repr as Ipv4Repr,
};

mod field {
    pub type Field = ::core::ops::Range<usize>;
    #[allow(unused)]
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

/// Parsing error: the buffer is too short or a field is malformed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Error;

pub type Result<T> = core::result::Result<T, Error>;
