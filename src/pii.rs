//! Keyed hashing of PII-marked property values.

use crate::event::TelemetryEvent;
use crate::property::PropertyValue;
use crate::session::TelemetrySession;
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Suffix of the property carrying the raw value next to its hash.
pub const NOT_HASHED_SUFFIX: &str = ".NotHashed";

/// Fixed salt. Changing it changes every hash ever emitted.
const PII_HASH_KEY: &[u8] = b"telemetry.pii.hash.v1:5f0c2e7a9b1d4c36a8e2f7b0d9c1e4a3";

/// Converts PII-marked values to deterministic HMAC-SHA256 hex digests.
#[derive(Clone)]
pub struct PiiProcessor {
    mac: HmacSha256,
}

impl PiiProcessor {
    pub fn new() -> Self {
        let mac = HmacSha256::new_from_slice(PII_HASH_KEY)
            .expect("HMAC can accept any key length");
        Self { mac }
    }

    /// Lowercase hex digest of `text`. Identical for identical input bytes on
    /// every platform.
    pub fn hash(&self, text: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(text.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Replaces every PII value of the event with its hash.
    ///
    /// When the session may collect private information the raw value is
    /// also attached as `<name>.NotHashed`. Values with no invariant string
    /// form are removed. Returns the number of values hashed.
    pub fn process(&self, event: &mut TelemetryEvent, session: &TelemetrySession) -> usize {
        let pii_names: Vec<String> = event
            .properties()
            .iter()
            .filter(|(_, value)| matches!(value, PropertyValue::Pii(_)))
            .map(|(name, _)| name.to_string())
            .collect();
        if pii_names.is_empty() {
            return 0;
        }

        let attach_raw = session.can_collect_private_information();
        let mut hashed = 0;

        for name in pii_names {
            let text = match event.properties().get(&name).map(PropertyValue::to_invariant_string) {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    debug!("Removing PII property {}: {}", name, e);
                    event.properties_mut().remove(&name);
                    continue;
                }
                None => continue,
            };

            let digest = self.hash(&text);
            event
                .properties_mut()
                .insert(name.clone(), PropertyValue::String(digest));
            // An excluded property never gains a transmitted raw companion.
            if attach_raw && !event.is_excluded(&name) {
                event
                    .properties_mut()
                    .insert(not_hashed_name(&name), PropertyValue::String(text));
            }
            hashed += 1;
        }
        hashed
    }
}

impl Default for PiiProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of the property carrying the raw value of PII property `name`.
pub fn not_hashed_name(name: &str) -> String {
    format!("{}{}", name, NOT_HASHED_SUFFIX)
}

/// True for properties carrying an unhashed PII value.
pub fn is_not_hashed_property(name: &str) -> bool {
    name.len()
        .checked_sub(NOT_HASHED_SUFFIX.len())
        .and_then(|start| name.get(start..))
        .map_or(false, |tail| tail.eq_ignore_ascii_case(NOT_HASHED_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pii_event() -> TelemetryEvent {
        TelemetryEvent::new("Op/Login")
            .unwrap()
            .with_property("User.Email", PropertyValue::pii("someone@example.com"))
            .unwrap()
            .with_property("Attempts", 3)
            .unwrap()
    }

    #[test]
    fn test_hash_is_deterministic_across_instances() {
        let a = PiiProcessor::new();
        let b = PiiProcessor::new();
        assert_eq!(a.hash("value"), a.hash("value"));
        assert_eq!(a.hash(""), b.hash(""));
        assert_eq!(a.hash("value"), b.hash("value"));
        assert_ne!(a.hash("value"), a.hash("Value"));
        assert_eq!(a.hash("value").len(), 64);
    }

    #[test]
    fn test_raw_value_omitted_without_private_information_policy() {
        let session = TelemetrySession::new();
        let mut event = pii_event();
        let processor = PiiProcessor::new();

        assert_eq!(processor.process(&mut event, &session), 1);
        let expected = processor.hash("someone@example.com");
        assert_eq!(
            event.property("User.Email"),
            Some(&PropertyValue::String(expected))
        );
        assert!(event.property("User.Email.NotHashed").is_none());
    }

    #[test]
    fn test_raw_value_attached_when_policy_allows() {
        let session = TelemetrySession::new();
        session.set_can_collect_private_information(true);
        let mut event = pii_event();
        PiiProcessor::new().process(&mut event, &session);

        assert_eq!(
            event.property("User.Email.NotHashed"),
            Some(&PropertyValue::String("someone@example.com".into()))
        );
    }

    #[test]
    fn test_excluded_property_gets_no_raw_companion() {
        let session = TelemetrySession::new();
        session.set_can_collect_private_information(true);
        let mut event = pii_event();
        event.exclude_property("User.Email");

        assert_eq!(PiiProcessor::new().process(&mut event, &session), 1);
        assert!(!event.properties().contains("User.Email.NotHashed"));
        assert!(event.is_excluded("User.Email"));
    }

    #[test]
    fn test_policy_is_read_per_event() {
        let session = TelemetrySession::new();
        let processor = PiiProcessor::new();

        session.set_can_collect_private_information(true);
        let mut first = pii_event();
        processor.process(&mut first, &session);

        session.set_can_collect_private_information(false);
        let mut second = pii_event();
        processor.process(&mut second, &session);

        assert!(first.property("User.Email.NotHashed").is_some());
        assert!(second.property("User.Email.NotHashed").is_none());
    }

    #[test]
    fn test_unconvertible_value_is_removed() {
        let session = TelemetrySession::new();
        let mut event = TelemetryEvent::new("Op/Login")
            .unwrap()
            .with_property("Score", PropertyValue::pii(f64::NAN))
            .unwrap();
        assert_eq!(PiiProcessor::new().process(&mut event, &session), 0);
        assert!(event.property("Score").is_none());
    }

    #[test]
    fn test_numbers_hash_by_invariant_text() {
        let session = TelemetrySession::new();
        let processor = PiiProcessor::new();
        let mut event = TelemetryEvent::new("Op/Login")
            .unwrap()
            .with_property("Port", PropertyValue::pii(8080))
            .unwrap();
        processor.process(&mut event, &session);
        assert_eq!(
            event.property("Port"),
            Some(&PropertyValue::String(processor.hash("8080")))
        );
    }

    #[test]
    fn test_not_hashed_suffix_detection() {
        assert!(is_not_hashed_property("User.Email.NotHashed"));
        assert!(is_not_hashed_property("x.nothashed"));
        assert!(!is_not_hashed_property("User.Email"));
    }
}
