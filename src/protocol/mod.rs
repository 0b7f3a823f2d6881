pub mod commands;
pub mod crc;
pub mod packet;

pub use packet::Command;
