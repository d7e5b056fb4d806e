pub mod engine;
pub mod ip_index;
pub mod patterns;
