//! Run context: the immutable input of one pipeline run.
//!
//! A run starts from a [`TriggerPayload`] (the JSON document posted by an
//! upstream trigger). It is turned once into a [`RunContext`] which every
//! component receives explicitly; nothing reads run state from ambient globals.
//!
//! Credentials are wrapped in [`Credential`], whose `Debug` and `Display`
//! implementations are redacted.

pub mod credential;
pub mod trigger;

pub use credential::{Base64Token, Credential, PlainToken, TokenDecryptor};
pub use trigger::{Provenance, RunContext, TriggerPayload};
