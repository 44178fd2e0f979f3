//! Core domain types
//!
//! This module contains the domain structures shared between the launch
//! surface (which persists them) and the execution engine (which drives
//! them through their lifecycle).

pub mod activity;
pub mod credential;
pub mod inventory;
pub mod job;
pub mod output;
pub mod project;
pub mod template;
