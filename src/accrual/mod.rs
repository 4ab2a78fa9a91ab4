pub mod client;
pub mod reconciler;

pub use client::{AccrualClient, AccrualSource};
pub use reconciler::{ReconcileConfig, ReconcileSignal, Reconciler, ReconcilerHandle};
