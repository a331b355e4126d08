pub mod client;
pub mod packet;
pub mod server;
