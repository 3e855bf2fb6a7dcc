//! Appraisal - member ratings and leaderboard over a document store
//!
//! Generic record services (filtering, population, relation writes, search,
//! cascade cleanup) for entities described by a [`schema::SchemaRegistry`],
//! plus a ranking aggregator that averages rating criteria per member.

pub mod cli;
pub mod config;
pub mod db;
pub mod schema;
pub mod seed;
pub mod services;
