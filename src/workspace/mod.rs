//! Workspace source: Power BI datasets and their refresh history

pub mod client;

pub use client::WorkspaceClient;
