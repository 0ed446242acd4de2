//! String helpers for wire formatting

use std::fmt::{self, Display, Formatter};

/// Displays a string as RFC 3461 xtext.
///
/// Bytes outside printable US-ASCII, `+` and `=` are hex-escaped so the
/// value can be embedded in an ESMTP parameter.
#[derive(Debug, Clone, Copy)]
pub struct XText<'a>(pub &'a str);

impl<'a> Display for XText<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for byte in self.0.bytes() {
            if byte < 0x21 || byte > 0x7e || byte == b'+' || byte == b'=' {
                write!(f, "+{:02X}", byte)?;
            } else {
                write!(f, "{}", char::from(byte))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::XText;

    #[test]
    fn test_xtext() {
        assert_eq!(format!("{}", XText("abcDEF123")), "abcDEF123");
        assert_eq!(format!("{}", XText("a=b+c")), "a+3Db+2Bc");
        assert_eq!(format!("{}", XText("with space")), "with+20space");
        assert_eq!(format!("{}", XText("tracking@id")), "tracking@id");
    }
}
