//! Core library for tend: day-record models, the local store, schema
//! migration, the push/pull sync engine, and the first-sync bootstrap flow.

pub mod bootstrap;
pub mod db;
pub mod hosted;
pub mod migrate;
pub mod models;
pub mod service;
pub mod sync;
