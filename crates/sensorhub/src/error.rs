// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy of the ingestion pipeline.
//!
//! Client-input errors ([`DecodeError`]) and infrastructure errors
//! ([`StoreError`]) are both recoverable: they are reported to whoever sent or
//! read the data and the session or broadcast loop keeps running.

use thiserror::Error;

/// Why a raw inbound message could not be decoded into a reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Not parseable as a JSON object.
    #[error("malformed syntax: {0}")]
    MalformedSyntax(String),

    /// `sensor_type` is not one of the known sensor variants.
    #[error("unknown variant: sensor_type `{0}` is not one of distance, grip_force, axis, air_pressure")]
    UnknownVariant(String),

    /// A field is missing or mistyped, or the `data` keys do not match the
    /// metric set of the sensor type.
    #[error("schema mismatch{}: {reason}", field_suffix(.field))]
    SchemaMismatch {
        field: Option<String>,
        reason: String,
    },
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" at `{f}`"))
        .unwrap_or_default()
}

impl DecodeError {
    pub(crate) fn mismatch(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: Some(field.into()),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSyntax(_) => "malformed_syntax",
            Self::UnknownVariant(_) => "unknown_variant",
            Self::SchemaMismatch { .. } => "schema_mismatch",
        }
    }

    /// Offending field, when known.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::UnknownVariant(_) => Some("sensor_type"),
            Self::SchemaMismatch { field, .. } => field.as_deref(),
            Self::MalformedSyntax(_) => None,
        }
    }
}

/// Storage transport failure (connectivity, protocol, timeout).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure while ingesting one message; reported back to the sender.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The peer of a session or observer connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport closed")]
pub struct TransportClosed;
