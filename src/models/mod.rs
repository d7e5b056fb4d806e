pub mod address;
pub mod detection;
