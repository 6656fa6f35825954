//! Core data model: parsed packets and alerts

pub mod alert;
pub mod packet;
pub mod parser;

pub use alert::{Alert, RuleId, Severity};
pub use packet::{
    IpHeader, IpOption, IpOptionKind, IpProtocol, LinkFrame, ParseFlaw, ParsedPacket, TcpFlags,
    TransportHeader,
};
pub use parser::parse;
