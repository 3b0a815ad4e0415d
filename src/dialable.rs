//! Dialable number builder

use std::fmt::Write;

/// Builds a destination number in the subsystem's canonical dialable form.
///
/// One `,` is one second of pause on most modems; the exact duration is
/// driver specific.
///
/// ```rust
/// use tapi_modem_tokio::DialableNumberBuilder;
///
/// let number = DialableNumberBuilder::new()
///     .country_code(1)
///     .area_code(555)
///     .number("0100")
///     .pause(2)
///     .number("42")
///     .build();
/// assert_eq!(number, "+ 1 [555] 0100,,42");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialableNumberBuilder {
    dialable: String,
}

impl DialableNumberBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `+ <code> `.
    pub fn country_code(mut self, code: u32) -> Self {
        let _ = write!(self.dialable, "+ {} ", code);
        self
    }

    /// Append `[<code>] `.
    pub fn area_code(mut self, code: u32) -> Self {
        let _ = write!(self.dialable, "[{}] ", code);
        self
    }

    /// Append digits verbatim.
    pub fn number(mut self, digits: &str) -> Self {
        self.dialable
            .push_str(digits);
        self
    }

    /// Append one `,` per second. Zero appends nothing.
    pub fn pause(mut self, seconds: u32) -> Self {
        self.dialable
            .extend(std::iter::repeat(',').take(seconds as usize));
        self
    }

    /// The assembled number
    pub fn build(self) -> String {
        self.dialable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder() {
        assert_eq!(DialableNumberBuilder::new().build(), "");
    }

    #[test]
    fn canonical_prefixes() {
        let number = DialableNumberBuilder::new()
            .country_code(48)
            .area_code(22)
            .number("1234567")
            .build();
        assert_eq!(number, "+ 48 [22] 1234567");
    }

    #[test]
    fn zero_pause_appends_nothing() {
        let number = DialableNumberBuilder::new()
            .number("9")
            .pause(0)
            .number("555")
            .build();
        assert_eq!(number, "9555");
    }

    #[test]
    fn pauses_between_digits() {
        let number = DialableNumberBuilder::new()
            .number("9")
            .pause(3)
            .number("5550100")
            .build();
        assert_eq!(number, "9,,,5550100");
    }
}
