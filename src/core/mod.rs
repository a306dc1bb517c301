//! Core topology logic: model, flattening, evaluation, planning and ordering.

pub mod assignment;
pub mod attributes;
pub mod digest;
pub mod error;
pub mod eval;
pub mod flatten;
pub mod normative;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod types;
