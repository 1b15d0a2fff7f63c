//! SQLite database module for the commission engine.
mod sqlite_impl;

pub mod db;

pub use sqlite_impl::{SqliteActivityStore, SqliteDatabase};
