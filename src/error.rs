// src/error.rs
//! Error type for the bridge internals.
//!
//! Nothing in here crosses the plugin ABI: public bridge operations turn an
//! `Error` into a log line plus a neutral return value. Inside the crate,
//! fallible paths return `crate::Result<T>` and chain context with
//! [`crate::context::Context`].

use std::fmt;
use thiserror::Error;

use crate::resource_table::Handle;
use crate::sdk::SdkError;

/// Which resource table a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Shader,
    Asset,
    Instance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Shader => "shader",
            ResourceKind::Asset => "asset",
            ResourceKind::Instance => "instance",
        })
    }
}

/// Main error type. Send + Sync + 'static so it can travel with log records.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Shader bytecode and config file reads.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Out-of-range, released, or failed-reload handle.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: ResourceKind, handle: Handle },

    /// The hair SDK reported a failure code.
    #[error("{call} failed: {source}")]
    Sdk {
        call: &'static str,
        #[source]
        source: SdkError,
    },

    /// The GPU device refused to create something.
    #[error("device could not create {0}")]
    Device(&'static str),

    /// The context has no SDK/device attached yet (or was finalized).
    #[error("hair context is not initialized")]
    NotInitialized,

    /// Skinning upload that can never fit the ring buffer.
    #[error("cannot reserve {requested} skinning matrices (capacity {capacity})")]
    SkinningRange { requested: usize, capacity: usize },

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining, see [`crate::context::Context`].
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Formatted custom error, used by `bail!`.
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn sdk(call: &'static str, source: SdkError) -> Self {
        Self::Sdk { call, source }
    }

    /// Wrap `self` with a higher-level message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self.root(), Error::Io(_))
    }

    #[inline]
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self.root(), Error::InvalidHandle { .. })
    }

    #[inline]
    pub fn is_sdk(&self) -> bool {
        matches!(self.root(), Error::Sdk { .. })
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
