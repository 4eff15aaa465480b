//! Helpers for tests: throw-away SQLite databases, in-memory fakes of the external collaborators, and a fully wired
//! engine.
pub mod fakes;
pub mod prepare_env;
pub mod system;
