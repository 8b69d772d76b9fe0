//! Binding-mode inference for the signatures of a received security header.

use crate::config::HeaderLayout;
use crate::error::Result;
use crate::header_entry::{BindingMode, HeaderElementEntry, HeaderItem};
use tracing::debug;

/// Assigns every signature entry exactly one binding mode.
///
/// Non-signature entries are left alone: their role follows from their category
/// and from what the signatures cover.
pub trait HeaderClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn classify(&self, entries: &mut [HeaderElementEntry], message_security: bool) -> Result<()>;
}

/// The first signature in wire order is primary iff message security is on;
/// every other signature is endorsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictClassifier;

/// The primary signature is the first one that does not cover another
/// signature, wherever it sits; every other signature is endorsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaxClassifier;

pub static STRICT_CLASSIFIER: StrictClassifier = StrictClassifier;
pub static LAX_CLASSIFIER: LaxClassifier = LaxClassifier;

/// Classifier for the configured layout.
pub fn classifier_for(layout: HeaderLayout) -> &'static dyn HeaderClassifier {
    match layout {
        HeaderLayout::Strict => &STRICT_CLASSIFIER,
        HeaderLayout::Lax => &LAX_CLASSIFIER,
    }
}

impl HeaderClassifier for StrictClassifier {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn classify(&self, entries: &mut [HeaderElementEntry], message_security: bool) -> Result<()> {
        let mut primary_assigned = false;
        for entry in entries.iter_mut() {
            if !matches!(entry.item(), HeaderItem::Signature(_)) {
                continue;
            }
            let mode = if message_security && !primary_assigned {
                primary_assigned = true;
                BindingMode::PRIMARY
            } else {
                BindingMode::ENDORSING
            };
            debug!(position = entry.position(), mode = mode.label(), "Classified signature");
            entry.set_binding_mode(mode)?;
        }
        Ok(())
    }
}

impl HeaderClassifier for LaxClassifier {
    fn name(&self) -> &'static str {
        "lax"
    }

    fn classify(&self, entries: &mut [HeaderElementEntry], message_security: bool) -> Result<()> {
        let signature_ids: Vec<String> = entries
            .iter()
            .filter(|entry| matches!(entry.item(), HeaderItem::Signature(_)))
            .filter_map(|entry| entry.id().map(str::to_string))
            .collect();

        let primary_position = if message_security {
            entries.iter().find_map(|entry| match entry.item() {
                HeaderItem::Signature(signature)
                    if !signature_ids
                        .iter()
                        .any(|id| signature.signed_info.references_id(id)) =>
                {
                    Some(entry.position())
                }
                _ => None,
            })
        } else {
            None
        };

        for entry in entries.iter_mut() {
            if !matches!(entry.item(), HeaderItem::Signature(_)) {
                continue;
            }
            let mode = if Some(entry.position()) == primary_position {
                BindingMode::PRIMARY
            } else {
                BindingMode::ENDORSING
            };
            debug!(position = entry.position(), mode = mode.label(), "Classified signature");
            entry.set_binding_mode(mode)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header_entry::ReceivedToken;
    use crate::signature::{SignatureElement, SignatureReference, SignedInfo};
    use crate::timestamp::SecurityTimestamp;
    use crate::token::BinarySecurityToken;

    fn signature(id: &str, covers: &[&str]) -> HeaderItem {
        let mut signed_info = SignedInfo::new("c14n", "hmac");
        for covered in covers {
            signed_info.references.push(SignatureReference {
                id: covered.to_string(),
                digest_method: "sha256".into(),
                digest: vec![0; 32],
            });
        }
        HeaderItem::Signature(SignatureElement {
            id: id.into(),
            signed_info,
            value: vec![1],
            key_info: None,
        })
    }

    fn token(id: &str) -> HeaderItem {
        HeaderItem::Token(ReceivedToken {
            wire: BinarySecurityToken {
                id: id.into(),
                value_type: "urn:t".into(),
                data: vec![1],
            },
            specification: None,
        })
    }

    fn entries(items: Vec<HeaderItem>) -> Vec<HeaderElementEntry> {
        items
            .into_iter()
            .enumerate()
            .map(|(position, item)| HeaderElementEntry::new(position, item))
            .collect()
    }

    fn modes(entries: &[HeaderElementEntry]) -> Vec<BindingMode> {
        entries.iter().map(|e| e.binding_mode()).collect()
    }

    fn header() -> Vec<HeaderElementEntry> {
        entries(vec![
            HeaderItem::Timestamp(SecurityTimestamp {
                id: "_0".into(),
                created: "2030-01-01T00:00:00Z".into(),
                expires: None,
            }),
            token("_1"),
            signature("_2", &["_body", "_0"]),
            signature("_3", &["_2"]),
            signature("_4", &["_2"]),
        ])
    }

    #[test]
    fn test_strict_message_security() {
        let mut entries = header();
        STRICT_CLASSIFIER.classify(&mut entries, true).unwrap();
        assert_eq!(
            modes(&entries),
            vec![
                BindingMode::UNKNOWN,
                BindingMode::UNKNOWN,
                BindingMode::PRIMARY,
                BindingMode::ENDORSING,
                BindingMode::ENDORSING,
            ]
        );
    }

    #[test]
    fn test_strict_transport_security() {
        let mut entries = header();
        STRICT_CLASSIFIER.classify(&mut entries, false).unwrap();
        assert!(entries
            .iter()
            .filter(|e| matches!(e.item(), HeaderItem::Signature(_)))
            .all(|e| e.binding_mode() == BindingMode::ENDORSING));
    }

    #[test]
    fn test_strict_uses_wire_order() {
        // an endorsing signature placed first is still taken as primary
        let mut entries = entries(vec![signature("_3", &["_2"]), signature("_2", &["_body"])]);
        STRICT_CLASSIFIER.classify(&mut entries, true).unwrap();
        assert_eq!(modes(&entries), vec![BindingMode::PRIMARY, BindingMode::ENDORSING]);
    }

    #[test]
    fn test_lax_tolerates_out_of_order_signatures() {
        let mut entries = entries(vec![signature("_3", &["_2"]), signature("_2", &["_body"])]);
        LAX_CLASSIFIER.classify(&mut entries, true).unwrap();
        assert_eq!(modes(&entries), vec![BindingMode::ENDORSING, BindingMode::PRIMARY]);
    }

    #[test]
    fn test_classification_happens_once() {
        let mut entries = header();
        STRICT_CLASSIFIER.classify(&mut entries, true).unwrap();
        assert!(STRICT_CLASSIFIER.classify(&mut entries, true).is_err());
    }

    #[test]
    fn test_classifier_for_layout() {
        assert_eq!(classifier_for(HeaderLayout::Strict).name(), "strict");
        assert_eq!(classifier_for(HeaderLayout::Lax).name(), "lax");
    }
}
