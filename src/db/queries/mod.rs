//! Database queries

pub mod contact;
