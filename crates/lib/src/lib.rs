//! SMS bridge core library: signature checks, the sender → forum-topic cache, Telegram
//! delivery, and the HTTP/WebSocket gateway used by the CLI.

pub mod channels;
pub mod config;
pub mod delivery;
pub mod gateway;
pub mod init;
pub mod routing;
pub mod signature;
