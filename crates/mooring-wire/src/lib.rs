//! Message envelope and codec for the Mooring wire protocol.
//!
//! The wire format is one UTF-8 JSON object per line, terminated by
//! `\n`, with no length prefix. Recognized top-level keys are
//! `sessionID`, `type`, `signal`, `requestID`, `requestType`,
//! `response`, `code`, `data`, and `error`; everything else is
//! ignored. The `data` value is an arbitrary JSON payload kept as raw
//! bytes until a consumer decodes it into a concrete shape.
//!
//! # Example
//!
//! ```
//! use mooring_wire::{Kind, Message};
//!
//! let m = Message::response("abc123", "r1", "join", 200, "success");
//! assert_eq!(m.kind(), &Kind::Response);
//!
//! let line = m.serialize().unwrap();
//! let parsed = Message::parse(&line).unwrap();
//! assert_eq!(parsed.session_id(), "abc123");
//! assert_eq!(parsed.code(), 200);
//! ```

pub mod error;
pub mod message;

// Re-exports for convenience
pub use error::{WireError, WireResult};
pub use message::{Kind, Message};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        // Verify all public types are accessible
        let _msg = Message::greeting("s1");
        let _kind = Kind::Greeting;
        let _err: WireResult<()> = Err(WireError::DataMissing);
    }
}
