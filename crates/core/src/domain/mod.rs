pub mod analysis;
pub mod ranking;
pub mod stock;
