//! Data transfer objects handed to the engine at launch time

pub mod launch;
