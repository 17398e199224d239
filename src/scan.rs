//! Lenient extraction of fields from single-line JSON-shaped fragments.
//!
//! Worker output is scanned field by field rather than parsed. Every lookup
//! is total: a missing key, a value of the wrong shape or an unbalanced
//! object yields the zero value for that lookup instead of an error, so a
//! garbled line can never abort the consumer.
//!
//! Braces and quotes inside string literals are not special-cased.


/// Borrowed view over a payload fragment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Payload<'a> {
    text: &'a str,
}

impl<'a> Payload<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Value of `"key": "value"`, taken verbatim up to the next quote.
    pub fn string(&self, key: &str) -> &'a str {
        self.values(key)
            .find_map(|rest| {
                let rest = rest.strip_prefix('"')?;
                let end = rest.find('"')?;
                Some(&rest[..end])
            })
            .unwrap_or("")
    }

    /// Value of `"key": true|false`, `false` when absent.
    pub fn boolean(&self, key: &str) -> bool {
        self.values(key)
            .find_map(|rest| {
                if rest.starts_with("true") {
                    Some(true)
                } else if rest.starts_with("false") {
                    Some(false)
                } else {
                    None
                }
            })
            .unwrap_or(false)
    }

    /// Value of `"key": <digits>`, `0` when absent or out of range.
    pub fn integer(&self, key: &str) -> u64 {
        self.values(key)
            .find_map(|rest| {
                let digits = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                if digits == 0 {
                    None
                } else {
                    Some(rest[..digits].parse().unwrap_or(0))
                }
            })
            .unwrap_or(0)
    }

    /// Nested `{...}` following the first `"key":`, braces included.
    pub fn object(&self, key: &str) -> Payload<'a> {
        let Some(after_key) = self.values(key).next() else {
            return Payload::default();
        };
        let offset = self.text.len() - after_key.len();
        let Some(start) = self.text[offset..].find('{').map(|i| i + offset) else {
            return Payload::default();
        };

        let mut depth = 0usize;
        for (i, c) in self.text[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Payload::new(&self.text[start..=start + i]);
                    }
                }
                _ => {}
            }
        }

        Payload::default()
    }

    /// Remainders of the fragment directly after each `"key":` occurrence,
    /// with leading whitespace skipped.
    fn values(&self, key: &str) -> impl Iterator<Item = &'a str> + '_ {
        let text = self.text;
        let quoted = format!("\"{}\"", key);
        let mut from = 0;

        std::iter::from_fn(move || {
            while let Some(found) = text[from..].find(&quoted) {
                let after = from + found + quoted.len();
                from = after;
                let rest = text[after..].trim_start();
                if let Some(rest) = rest.strip_prefix(':') {
                    return Some(rest.trim_start());
                }
            }
            None
        })
    }
}
