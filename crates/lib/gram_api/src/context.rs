//! Per-request values the global middleware attach to request extensions.
//!
//! Handlers read these with `Extension<T>` (or `Option<Extension<T>>` when the
//! value may be absent).

use std::fmt;

/// Tenant binding for a request that arrived on a custom domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDomainContext {
    pub domain_id: String,
    pub organization_id: String,
    pub project_id: String,
    pub domain: String,
}

/// Dashboard session id presented by the caller. Not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

/// Organization slug an operator asked to act as. Not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOverride(pub String);

/// W3C trace context for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl TraceContext {
    /// Fresh trace with a random trace id and span id.
    pub fn new_root() -> Self {
        Self {
            trace_id: nonzero_u128(),
            span_id: nonzero_u64(),
            sampled: true,
        }
    }

    /// Continue the trace in a `traceparent` header with a new span id.
    ///
    /// Returns `None` for anything that is not a well-formed version-00 header
    /// with non-zero ids.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let (Some(version), Some(trace), Some(parent), Some(flags), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return None;
        };

        if version != "00" || trace.len() != 32 || parent.len() != 16 || flags.len() != 2 {
            return None;
        }
        let trace_id = u128::from_str_radix(trace, 16).ok()?;
        let parent_id = u64::from_str_radix(parent, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || parent_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            span_id: nonzero_u64(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        Self {
            span_id: nonzero_u64(),
            ..*self
        }
    }

    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    /// Datadog renders the low 64 bits of the trace id in decimal.
    pub fn dd_trace_id(&self) -> String {
        (self.trace_id as u64).to_string()
    }

    pub fn dd_span_id(&self) -> String {
        self.span_id.to_string()
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{flags}", self.trace_id_hex(), self.span_id_hex())
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_traceparent())
    }
}

fn nonzero_u128() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn nonzero_u64() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}
