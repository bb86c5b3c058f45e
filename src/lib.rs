extern crate serde;
extern crate toml;

pub mod characterization;
pub mod circlefit;
pub mod configs;
pub mod decimation;
pub mod frame;
pub mod interferometer;
pub mod inversion;
pub mod pipeline;
mod util;
