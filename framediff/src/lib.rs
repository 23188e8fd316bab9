#![allow(dead_code)]

mod capture;
mod common;
mod config;
mod controller;
mod frame;
mod gpu;
mod kernel;
mod motion;
mod pool;
mod renderer;

pub mod prelude;

pub use prelude::*;
