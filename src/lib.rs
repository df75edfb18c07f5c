#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod admission;
pub mod browser_controller;
pub mod config;
pub mod crawler;
pub mod extractor;
pub mod fetcher;
pub mod identity;
pub mod normalize;
pub mod runner;
pub mod sink;
pub mod sites;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod utils;
pub mod worker;
