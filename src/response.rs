//! SMTP response, containing a mandatory reply code and an optional text message

use std::fmt::{self, Display, Formatter};

use nom::{
    branch::alt,
    bytes::streaming::take_while,
    character::streaming::{char, line_ending, one_of},
    combinator::{map, opt},
    multi::many0,
    IResult,
};

/// First digit indicates severity
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Severity {
    /// 2yx
    PositiveCompletion,
    /// 3yz
    PositiveIntermediate,
    /// 4yz
    TransientNegativeCompletion,
    /// 5yz
    PermanentNegativeCompletion,
}

impl Severity {
    fn value(self) -> u16 {
        match self {
            Severity::PositiveCompletion => 2,
            Severity::PositiveIntermediate => 3,
            Severity::TransientNegativeCompletion => 4,
            Severity::PermanentNegativeCompletion => 5,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Second digit of the reply code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Category {
    /// x0z
    Syntax,
    /// x1z
    Information,
    /// x2z
    Connections,
    /// x3z
    Unspecified3,
    /// x4z
    Unspecified4,
    /// x5z
    MailSystem,
}

impl Category {
    fn value(self) -> u16 {
        match self {
            Category::Syntax => 0,
            Category::Information => 1,
            Category::Connections => 2,
            Category::Unspecified3 => 3,
            Category::Unspecified4 => 4,
            Category::MailSystem => 5,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Third digit of the reply code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[allow(missing_docs)]
pub enum Detail {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
}

impl Detail {
    fn value(self) -> u16 {
        match self {
            Detail::Zero => 0,
            Detail::One => 1,
            Detail::Two => 2,
            Detail::Three => 3,
            Detail::Four => 4,
            Detail::Five => 5,
            Detail::Six => 6,
            Detail::Seven => 7,
            Detail::Eight => 8,
            Detail::Nine => 9,
        }
    }
}

impl Display for Detail {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A three-digit SMTP reply code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Code {
    /// First digit of the code
    pub severity: Severity,
    /// Second digit of the code
    pub category: Category,
    /// Third digit of the code
    pub detail: Detail,
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}{}{}", self.severity, self.category, self.detail)
    }
}

impl Code {
    /// Creates a new `Code` structure
    pub fn new(severity: Severity, category: Category, detail: Detail) -> Code {
        Code {
            severity,
            category,
            detail,
        }
    }

    /// Returns the code as the three-digit number sent on the wire
    pub fn value(self) -> u16 {
        self.severity.value() * 100 + self.category.value() * 10 + self.detail.value()
    }
}

/// One logical server reply: a code and the collected text of all its lines
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    /// Reply code of the final line
    pub code: Code,
    /// Text of every line, in arrival order, continuation markers stripped
    pub message: Vec<String>,
}

impl Response {
    /// Creates a new `Response`
    pub fn new(code: Code, message: Vec<String>) -> Response {
        Response { code, message }
    }

    /// Tells if the response is positive (2yz or 3yz)
    pub fn is_positive(&self) -> bool {
        match self.code.severity {
            Severity::PositiveCompletion | Severity::PositiveIntermediate => true,
            _ => false,
        }
    }

    /// Tests code equality
    pub fn has_code(&self, code: u16) -> bool {
        self.code.value() == code
    }

    /// Returns only the first word of the message, if possible
    pub fn first_word(&self) -> Option<&str> {
        self.message
            .first()
            .and_then(|line| line.split_whitespace().next())
    }

    /// Returns the first line of the message, if possible
    pub fn first_line(&self) -> Option<&str> {
        self.message.first().map(String::as_str)
    }
}

fn parse_severity(i: &str) -> IResult<&str, Severity> {
    alt((
        map(char('2'), |_| Severity::PositiveCompletion),
        map(char('3'), |_| Severity::PositiveIntermediate),
        map(char('4'), |_| Severity::TransientNegativeCompletion),
        map(char('5'), |_| Severity::PermanentNegativeCompletion),
    ))(i)
}

fn parse_category(i: &str) -> IResult<&str, Category> {
    map(one_of("012345"), |digit| match digit {
        '0' => Category::Syntax,
        '1' => Category::Information,
        '2' => Category::Connections,
        '3' => Category::Unspecified3,
        '4' => Category::Unspecified4,
        _ => Category::MailSystem,
    })(i)
}

fn parse_detail(i: &str) -> IResult<&str, Detail> {
    map(one_of("0123456789"), |digit| match digit {
        '0' => Detail::Zero,
        '1' => Detail::One,
        '2' => Detail::Two,
        '3' => Detail::Three,
        '4' => Detail::Four,
        '5' => Detail::Five,
        '6' => Detail::Six,
        '7' => Detail::Seven,
        '8' => Detail::Eight,
        _ => Detail::Nine,
    })(i)
}

fn parse_code(i: &str) -> IResult<&str, Code> {
    let (i, severity) = parse_severity(i)?;
    let (i, category) = parse_category(i)?;
    let (i, detail) = parse_detail(i)?;
    Ok((i, Code::new(severity, category, detail)))
}

fn line_text(i: &str) -> IResult<&str, &str> {
    take_while(|c| c != '\r' && c != '\n')(i)
}

// `<code>-<text><crlf>`, the non-final line of a multi-line reply
fn parse_continuation_line(i: &str) -> IResult<&str, String> {
    let (i, _) = parse_code(i)?;
    let (i, _) = char('-')(i)?;
    let (i, text) = line_text(i)?;
    let (i, _) = line_ending(i)?;
    Ok((i, text.to_string()))
}

// `<code>[ <text>]<crlf>`, the line that closes a reply
fn parse_last_line(i: &str) -> IResult<&str, (Code, String)> {
    let (i, code) = parse_code(i)?;
    let (i, _) = opt(char(' '))(i)?;
    let (i, text) = line_text(i)?;
    let (i, _) = line_ending(i)?;
    Ok((i, (code, text.to_string())))
}

/// Parses one complete logical response, coalescing multi-line replies.
///
/// Built on streaming combinators: a partial reply yields
/// `nom::Err::Incomplete` so the caller can read more bytes and retry,
/// which makes the result independent of how the input was chunked.
pub fn parse_response(i: &str) -> IResult<&str, Response> {
    let (i, mut message) = many0(parse_continuation_line)(i)?;
    let (i, (code, last)) = parse_last_line(i)?;
    message.push(last);
    Ok((i, Response::new(code, message)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_code_value() {
        assert_eq!(
            Code::new(
                Severity::PositiveCompletion,
                Category::MailSystem,
                Detail::Zero
            )
            .value(),
            250
        );
        assert_eq!(
            format!(
                "{}",
                Code::new(
                    Severity::PositiveIntermediate,
                    Category::Unspecified3,
                    Detail::Four
                )
            ),
            "334"
        );
    }

    #[test]
    fn test_parse_single_line() {
        let (remaining, response) = parse_response("250 Ok\r\n").unwrap();
        assert!(remaining.is_empty());
        assert!(response.is_positive());
        assert!(response.has_code(250));
        assert_eq!(response.message, vec!["Ok".to_string()]);
    }

    #[test]
    fn test_parse_bare_code() {
        let (_, response) = parse_response("354\r\n").unwrap();
        assert!(response.has_code(354));
        assert_eq!(response.message, vec!["".to_string()]);
    }

    #[test]
    fn test_parse_multiline() {
        let raw = "250-smtp.example.org\r\n250-SIZE 10485760\r\n250-AUTH LOGIN PLAIN XOAUTH2\r\n250 HELP\r\n";
        let (remaining, response) = parse_response(raw).unwrap();
        assert!(remaining.is_empty());
        assert!(response.has_code(250));
        assert_eq!(
            response.message,
            vec![
                "smtp.example.org".to_string(),
                "SIZE 10485760".to_string(),
                "AUTH LOGIN PLAIN XOAUTH2".to_string(),
                "HELP".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_lf_only() {
        let (_, response) = parse_response("220 hi\n").unwrap();
        assert!(response.has_code(220));
        assert_eq!(response.first_line(), Some("hi"));
    }

    #[test]
    fn test_incomplete_keeps_asking() {
        let raw = "250-one\r\n250-two\r\n250 three\r\n";
        // Feeding any strict prefix must report Incomplete, never a bogus
        // short response; the full buffer must parse to the same value as
        // byte-by-byte accumulation.
        for cut in 1..raw.len() {
            match parse_response(&raw[..cut]) {
                Err(nom::Err::Incomplete(_)) => {}
                other => panic!("prefix {:?} gave {:?}", &raw[..cut], other),
            }
        }
        let (_, full) = parse_response(raw).unwrap();
        assert_eq!(full.message, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_negative_is_not_positive() {
        let (_, response) = parse_response("550 No such user\r\n").unwrap();
        assert!(!response.is_positive());
        assert!(response.has_code(550));
        assert_eq!(response.first_word(), Some("No"));
    }
}
