pub mod client;
pub mod transit_realtime;
pub mod vehicles;

pub use client::{FeedClient, FeedError};
