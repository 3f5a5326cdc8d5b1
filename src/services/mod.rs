//! Business logic services

pub mod generator;
pub mod import;
pub mod pipe;
