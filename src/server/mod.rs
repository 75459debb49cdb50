//! HTTP service: task registry, document service and API routes

pub mod api;
pub mod service;
pub mod tasks;
