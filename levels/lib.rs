#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod config;
pub mod data;
pub mod encode;
pub mod orchestrate;
pub mod scoring;
pub mod select;
pub mod store;
pub mod types;
