use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

// Both identifiers are opaque transport strings; ordering is plain byte order, which
// matches creation order for time-ordered formats (UUIDv7, ULID).
macro_rules! define_timeline_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(raw: impl AsRef<str>) -> Self {
                Self(Arc::from(raw.as_ref()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Arc::from(value))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_timeline_id!(ConversationId);
define_timeline_id!(MessageId);

impl MessageId {
    /// Mints a time-ordered identifier (hyphenated UUIDv7).
    pub fn new_v7() -> Self {
        Self::from(Uuid::now_v7().to_string())
    }

    /// Creation time encoded in a UUIDv7 identifier, in unix milliseconds.
    ///
    /// Returns `None` for identifiers that are not UUIDv7.
    pub fn created_at_unix_ms(&self) -> Option<u64> {
        let parsed = Uuid::parse_str(&self.0).ok()?;
        let timestamp = parsed.get_timestamp()?;
        let (seconds, nanos) = timestamp.to_unix();
        Some(seconds * 1_000 + u64::from(nanos) / 1_000_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_string_order() {
        let mut ids = vec![
            MessageId::new("m010"),
            MessageId::new("m002"),
            MessageId::new("m001"),
        ];
        ids.sort();
        let raw = ids.iter().map(MessageId::as_str).collect::<Vec<_>>();
        assert_eq!(raw, vec!["m001", "m002", "m010"]);
    }

    #[test]
    fn v7_ids_sort_by_creation_and_expose_timestamp() {
        let first = MessageId::new_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = MessageId::new_v7();

        assert!(first < second);
        let first_ms = first.created_at_unix_ms().unwrap_or_default();
        let second_ms = second.created_at_unix_ms().unwrap_or_default();
        assert!(first_ms > 0);
        assert!(second_ms >= first_ms);
    }

    #[test]
    fn non_uuid_ids_have_no_timestamp() {
        assert_eq!(MessageId::new("m001").created_at_unix_ms(), None);
    }
}
