//! Redacting wrapper for credentials.
//!
//! `Debug`, `Display` and serialization print a placeholder; deserialization
//! accepts the plain value so profiles can carry passwords in from the UI.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const REDACTED: &str = "[REDACTED]";

/// A secret that never shows up in logs or responses.
/// Read it with [`Sensitive::expose`].
#[derive(Clone, Default, Eq, PartialEq, Hash)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Sensitive<String> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Sensitive<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Sensitive<String> {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Serialize for Sensitive<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Sensitive<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converted_passwords_stay_redacted() {
        let from_str: Sensitive<String> = "hunter2".into();
        let from_string = Sensitive::from(String::from("hunter2"));
        assert_eq!(from_str, from_string);
        assert_eq!(from_str.expose(), "hunter2");
        assert_eq!(format!("{from_str:?} {from_str}"), "[REDACTED] [REDACTED]");
    }

    #[test]
    fn empty_password_detection() {
        assert!(Sensitive::<String>::default().is_empty());
        assert!(Sensitive::from("").is_empty());
        assert!(!Sensitive::from("x").is_empty());
    }

    #[test]
    fn deserializes_plain_value_and_hides_it_on_output() {
        let secret: Sensitive<String> = serde_json::from_str("\"hunter2\"").unwrap();
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"***\"");
    }
}
