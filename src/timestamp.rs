//! wsu:Timestamp generation and freshness checks.

use crate::config::TimestampConfig;
use crate::error::{Result, WsSecurityError};
use crate::names::{attributes, elements, qnames, xmlns, WSU_NS};
use crate::xml::{self, ElementParts, XmlWriter};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Security header timestamp. Instants are kept in their wire (RFC 3339) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityTimestamp {
    pub id: String,
    pub created: String,
    pub expires: Option<String>,
}

impl SecurityTimestamp {
    /// Timestamp created at `now` that expires `time_to_live_secs` later.
    pub fn new(id: impl Into<String>, now: DateTime<Utc>, time_to_live_secs: u64) -> Result<Self> {
        let expires = now
            .checked_add_signed(seconds(time_to_live_secs, "time_to_live_secs")?)
            .ok_or_else(|| {
                WsSecurityError::Config(format!(
                    "timestamp expiry {}s after {} is out of range",
                    time_to_live_secs, now
                ))
            })?;
        Ok(Self {
            id: id.into(),
            created: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            expires: Some(expires.to_rfc3339_opts(SecondsFormat::Millis, true)),
        })
    }

    /// Check the timestamp is neither too old, expired, nor from the future.
    pub fn validate(&self, config: &TimestampConfig, now: DateTime<Utc>) -> Result<()> {
        let created = parse_instant(&self.created, "Created")?;
        let skew = seconds(config.max_clock_skew_secs, "max_clock_skew_secs")?;

        let age = now.signed_duration_since(created);
        if age < -skew {
            return Err(WsSecurityError::MessageSecurity(format!(
                "timestamp '{}' was created in the future",
                self.id
            )));
        }
        let max_age = seconds(config.time_to_live_secs, "time_to_live_secs")? + skew;
        if age > max_age {
            return Err(WsSecurityError::MessageExpired(format!(
                "timestamp is too old: {} seconds (max: {})",
                age.num_seconds(),
                max_age.num_seconds()
            )));
        }

        if let Some(expires) = &self.expires {
            let expires = parse_instant(expires, "Expires")?;
            if expires < created {
                return Err(WsSecurityError::SecurityFormat(
                    "timestamp expires before it was created".into(),
                ));
            }
            if expires.checked_add_signed(skew).is_some_and(|limit| now > limit) {
                return Err(WsSecurityError::MessageExpired(
                    "security timestamp has expired".into(),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn write_to(&self, writer: &mut XmlWriter) -> Result<()> {
        xml::start(
            writer,
            qnames::TIMESTAMP,
            &[(xmlns::WSU, WSU_NS), (qnames::WSU_ID, &self.id)],
        )?;
        xml::text_element(writer, qnames::CREATED, &[], &self.created)?;
        if let Some(expires) = &self.expires {
            xml::text_element(writer, qnames::EXPIRES, &[], expires)?;
        }
        xml::end(writer, qnames::TIMESTAMP)
    }

    pub(crate) fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = xml::writer();
        self.write_to(&mut writer)?;
        Ok(writer.into_inner())
    }

    pub(crate) fn read_from(xml: &str) -> Result<Self> {
        let parts = ElementParts::parse_expected(xml, elements::TIMESTAMP)?;
        let mut created = None;
        let mut expires = None;
        for child in parts.children()? {
            match child.local_name.as_str() {
                elements::CREATED if created.is_none() => {
                    created = Some(ElementParts::parse(child.xml)?.text()?);
                }
                elements::EXPIRES if expires.is_none() => {
                    expires = Some(ElementParts::parse(child.xml)?.text()?);
                }
                other => {
                    return Err(WsSecurityError::SecurityFormat(format!(
                        "unexpected <{}> in timestamp",
                        other
                    )))
                }
            }
        }
        Ok(Self {
            id: parts.required_attribute(attributes::ID)?.to_string(),
            created: created.ok_or_else(|| {
                WsSecurityError::SecurityFormat("timestamp has no Created element".into())
            })?,
            expires,
        })
    }
}

/// Convert a configured number of seconds, rejecting values chrono cannot represent.
pub(crate) fn seconds(secs: u64, what: &str) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| WsSecurityError::Config(format!("{} is out of range: {}", what, secs)))
}

fn parse_instant(value: &str, what: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| {
            WsSecurityError::SecurityFormat(format!("invalid {} timestamp format: {}", what, value))
        })
}
