//! Drover Core
//!
//! Core types and abstractions for the Drover automation engine.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, Credential, Inventory, ...)
//! - DTOs: Launch-time request shapes handed to the engine

pub mod domain;
pub mod dto;
