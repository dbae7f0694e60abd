pub mod client;

pub use client::MarkbenchClient;
