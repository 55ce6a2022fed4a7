pub mod arena;
pub mod cache;
pub mod dbg;
pub mod engine;
