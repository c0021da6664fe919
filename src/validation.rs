//! Client-side style field validation for the lead form.
//!
//! These checks are a usability aid, not a security boundary.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

pub const MESSAGE_MIN: usize = 10;
pub const MESSAGE_MAX: usize = 2000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Please enter a valid name (at least 2 letters)")]
    InvalidName,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Please enter a valid phone number (7-20 digits)")]
    InvalidPhone,

    #[error("Message must be at least 10 characters")]
    MessageTooShort,

    #[error("Message must be at most 2000 characters")]
    MessageTooLong,

    #[error("Message contains disallowed content")]
    UnsafeContent,
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 .\-]{2,}$").expect("static regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("static regex")
    })
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{7,20}$").expect("static regex"))
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::Required("Name"));
    }
    if !name_re().is_match(name) {
        return Err(ValidationError::InvalidName);
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Required("Email"));
    }
    if !email_re().is_match(email) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

/// Spaces, dashes, dots and parentheses are ignored before counting digits.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err(ValidationError::Required("Phone"));
    }
    let compact: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    if !phone_re().is_match(&compact) {
        return Err(ValidationError::InvalidPhone);
    }
    Ok(())
}

pub fn validate_message(message: &str) -> Result<(), ValidationError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(ValidationError::Required("Message"));
    }
    let len = message.chars().count();
    if len < MESSAGE_MIN {
        return Err(ValidationError::MessageTooShort);
    }
    if len > MESSAGE_MAX {
        return Err(ValidationError::MessageTooLong);
    }
    if contains_script(message) {
        return Err(ValidationError::UnsafeContent);
    }
    Ok(())
}

/// Naive check for `<script` and `javascript:` in any case.
pub fn contains_script(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("<script") || lower.contains("javascript:")
}

/// Trim and drop angle brackets before a value is stored or compared.
pub fn sanitize(input: &str) -> String {
    input.trim().chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

/// Escape text for interpolation into HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        assert!(validate_name("Jo").is_ok());
        assert!(validate_name("Dr. Anne-Marie 2").is_ok());
        assert_eq!(validate_name("J"), Err(ValidationError::InvalidName));
        assert_eq!(validate_name("Bob!"), Err(ValidationError::InvalidName));
        assert_eq!(validate_name("  "), Err(ValidationError::Required("Name")));
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("jo@example.com").is_ok());
        assert!(validate_email("first.last+tag@sub.example.co.in").is_ok());
        assert_eq!(validate_email("jo@example"), Err(ValidationError::InvalidEmail));
        assert_eq!(validate_email("jo example.com"), Err(ValidationError::InvalidEmail));
    }

    #[test]
    fn test_phone_rules() {
        assert!(validate_phone("+91 98765-43210").is_ok());
        assert!(validate_phone("(022) 555.1234").is_ok());
        assert_eq!(validate_phone("12345"), Err(ValidationError::InvalidPhone));
        assert_eq!(validate_phone("123456789012345678901"), Err(ValidationError::InvalidPhone));
        assert_eq!(validate_phone("98765abc43"), Err(ValidationError::InvalidPhone));
    }

    #[test]
    fn test_message_rules() {
        assert!(validate_message("Need a quote for services").is_ok());
        assert_eq!(validate_message("too short"), Err(ValidationError::MessageTooShort));
        assert_eq!(
            validate_message(&"a".repeat(MESSAGE_MAX + 1)),
            Err(ValidationError::MessageTooLong)
        );
        assert_eq!(
            validate_message("hello <SCRIPT>alert(1)</script>"),
            Err(ValidationError::UnsafeContent)
        );
        assert_eq!(
            validate_message("click JavaScript:void(0) please"),
            Err(ValidationError::UnsafeContent)
        );
    }

    #[test]
    fn test_sanitize_and_escape() {
        assert_eq!(sanitize("  <admin@x.com> "), "admin@x.com");
        assert_eq!(escape_html("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
