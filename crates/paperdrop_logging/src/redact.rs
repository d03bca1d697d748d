//! Conservative masking for common PII-like patterns.
//!
//! Applied to every message that leaves the process (webhook notifications,
//! terminal-failure log lines). Extracted document text never leaves the
//! process at all; this is a second line of defense for error strings that
//! may quote fragments of a document.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static RE_SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3})[- ]?(\d{2})[- ]?(\d{4})\b").unwrap());
static RE_DOB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(19|20)\d{2}[-/](0[1-9]|1[0-2])[-/](0[1-9]|[12]\d|3[01])\b").unwrap()
});
static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z0-9._%+-]){1,64}@[A-Za-z0-9.-]{1,255}\.[A-Za-z]{2,}\b").unwrap()
});

/// Mask SSN-like, date-of-birth-like and email-like substrings.
pub fn redact(text: &str) -> String {
    let text = RE_SSN.replace_all(text, |caps: &Captures<'_>| format!("***-**-{}", &caps[3]));
    let text = RE_DOB.replace_all(&text, "****-**-**");
    let text = RE_EMAIL.replace_all(&text, "<masked-email>");
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_ssn_keeping_last_four() {
        assert_eq!(redact("ssn 123-45-6789 ok"), "ssn ***-**-6789 ok");
        assert_eq!(redact("123 45 6789"), "***-**-6789");
    }

    #[test]
    fn masks_dob() {
        assert_eq!(redact("born 1984-07-31"), "born ****-**-**");
        assert_eq!(redact("born 2001/12/03"), "born ****-**-**");
    }

    #[test]
    fn masks_email() {
        assert_eq!(
            redact("contact jane.doe@example.com now"),
            "contact <masked-email> now"
        );
    }

    #[test]
    fn leaves_plain_text_alone() {
        let msg = "Accio HTTP 503: upstream unavailable";
        assert_eq!(redact(msg), msg);
    }
}
