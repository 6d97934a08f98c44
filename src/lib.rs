pub mod codec;
pub mod compare;
pub mod config;
pub mod error;
pub mod fit;
pub mod ir;
pub mod misfit;
pub mod netlist;
pub mod optimize;
pub mod output;
pub mod parser;
pub mod schematic;
pub mod session;
pub mod simulator;
pub mod stats;
pub mod switches;
pub mod target;
pub mod z123;
