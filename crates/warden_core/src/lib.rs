#![forbid(unsafe_code)]

pub mod admission;
pub mod health;
pub mod microstructure;
pub mod risk;
pub mod sequential;
