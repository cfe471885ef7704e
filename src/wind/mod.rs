pub mod cache;
pub mod client;

pub use cache::{CacheKey, WindCache};
pub use client::{altitude_for_pressure, nearest_pressure_level, Location, WindClient};
