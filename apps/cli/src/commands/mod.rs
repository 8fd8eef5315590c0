//! 命令定义和实现

pub mod checksum;
pub mod config;
pub mod devices;
pub mod send;
pub mod stream;

pub use checksum::ChecksumCommand;
pub use config::ConfigCommand;
pub use devices::DevicesCommand;
pub use send::SendCommand;
pub use stream::StreamCommand;
