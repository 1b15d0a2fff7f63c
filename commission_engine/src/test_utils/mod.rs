//! Helpers for integration tests: a clean throwaway database and seed data for the affiliate programme.
pub mod prepare_env;
pub mod seeds;
