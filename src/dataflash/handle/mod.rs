mod bus;
mod client;

pub use bus::BusEventHandle;
pub use client::ClientHandle;
