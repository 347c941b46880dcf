//! Database layer for Cropgate

pub mod mongo;
pub mod schemas;

pub use mongo::{MongoClient, MongoCollection};
