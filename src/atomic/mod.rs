//! The `atomic:operations` extension: conversion, validation and transactional execution of
//! write batches.

pub mod adapter;
pub mod local_ids;
pub mod processor;
pub mod request;
pub mod validation;

pub use adapter::AtomicOperationsAdapter;
pub use local_ids::{LocalIdTracker, LocalIdValidator};
pub use processor::{AtomicOperationsProcessor, BatchState};
pub use request::{
    AtomicOperationCode, AtomicOperationObject, AtomicReference, AtomicResultsDocument, IdentityRef, OperationContainer,
    OperationKind, PendingTargets, OPERATIONS_MEMBER,
};
pub use validation::{ErrorCollector, RequestValidator};
