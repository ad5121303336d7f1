//! Queue-attribute validation and defaulting.
//!
//! Every attribute has a documented range and default. Validation never
//! mutates in place: [`QueueAttributes::with`] builds a validated copy, so a
//! failing request leaves the queue untouched.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::SqsError;

/// Attributes compared on a CreateQueue of an existing name, in the order
/// mismatches are reported.
pub const COMPARABLE_ATTRIBUTES: [&str; 8] = [
    "DelaySeconds",
    "MaximumMessageSize",
    "MessageRetentionPeriod",
    "ReceiveMessageWaitTimeSeconds",
    "KmsDataKeyReusePeriodSeconds",
    "KmsMasterKeyId",
    "VisibilityTimeout",
    "ContentBasedDeduplication",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_target_arn: String,
    pub max_receive_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedrivePolicyWire {
    dead_letter_target_arn: Option<String>,
    max_receive_count: Option<serde_json::Value>,
}

impl RedrivePolicy {
    pub fn from_json(s: &str) -> Result<Self, SqsError> {
        let wire: RedrivePolicyWire = serde_json::from_str(s).map_err(|e| {
            SqsError::InvalidAttributeValue(format!("Invalid RedrivePolicy JSON: {e}"))
        })?;
        let dead_letter_target_arn = wire.dead_letter_target_arn.ok_or_else(|| {
            SqsError::InvalidAttributeValue(
                "RedrivePolicy must contain deadLetterTargetArn".into(),
            )
        })?;
        let max_receive_count = wire
            .max_receive_count
            .as_ref()
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| {
                SqsError::InvalidAttributeValue(
                    "RedrivePolicy must contain maxReceiveCount".into(),
                )
            })? as u32;
        if max_receive_count < 1 {
            return Err(SqsError::InvalidAttributeValue(
                "maxReceiveCount must be at least 1".into(),
            ));
        }
        Ok(RedrivePolicy {
            dead_letter_target_arn,
            max_receive_count,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "deadLetterTargetArn": self.dead_letter_target_arn,
            "maxReceiveCount": self.max_receive_count,
        })
        .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct QueueAttributes {
    pub delay_seconds: u32,
    pub maximum_message_size: u32,
    pub message_retention_period: u32,
    pub receive_message_wait_time_seconds: u32,
    pub visibility_timeout: u32,
    pub kms_data_key_reuse_period_seconds: u32,
    pub kms_master_key_id: Option<String>,
    pub fifo_queue: bool,
    pub content_based_deduplication: bool,
    pub redrive_policy: Option<RedrivePolicy>,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            delay_seconds: 0,
            maximum_message_size: 262_144,
            message_retention_period: 345_600,
            receive_message_wait_time_seconds: 0,
            visibility_timeout: 30,
            kms_data_key_reuse_period_seconds: 300,
            kms_master_key_id: None,
            fifo_queue: false,
            content_based_deduplication: false,
            redrive_policy: None,
        }
    }
}

impl QueueAttributes {
    /// Build attributes for a new queue. `FifoQueue` is honored here and
    /// nowhere else; it is immutable for the rest of the queue's life.
    pub fn from_create(attrs: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut base = QueueAttributes::default();
        if let Some(v) = attrs.get("FifoQueue") {
            base.fifo_queue = parse_bool("FifoQueue", v)?;
        }
        let mut rest = attrs.clone();
        rest.remove("FifoQueue");
        base.with(&rest)
    }

    /// Validate `attrs` against this base and return the updated copy.
    /// Any failure leaves the base untouched.
    pub fn with(&self, attrs: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut next = self.clone();
        for (name, value) in attrs {
            match name.as_str() {
                "DelaySeconds" => {
                    next.delay_seconds = parse_ranged(name, value, 0, 900)?;
                }
                "MaximumMessageSize" => {
                    next.maximum_message_size = parse_ranged(name, value, 1024, 262_144)?;
                }
                "MessageRetentionPeriod" => {
                    next.message_retention_period = parse_ranged(name, value, 60, 1_209_600)?;
                }
                "ReceiveMessageWaitTimeSeconds" => {
                    next.receive_message_wait_time_seconds = parse_ranged(name, value, 0, 20)?;
                }
                "VisibilityTimeout" => {
                    next.visibility_timeout = parse_ranged(name, value, 0, 43_200)?;
                }
                "KmsDataKeyReusePeriodSeconds" => {
                    next.kms_data_key_reuse_period_seconds =
                        parse_ranged(name, value, 60, 86_400)?;
                }
                "KmsMasterKeyId" => {
                    next.kms_master_key_id = if value.is_empty() {
                        None
                    } else {
                        Some(value.clone())
                    };
                }
                "ContentBasedDeduplication" => {
                    let enabled = parse_bool(name, value)?;
                    if !next.fifo_queue {
                        return Err(SqsError::InvalidAttributeValue(
                            "ContentBasedDeduplication is only valid for FIFO queues".into(),
                        ));
                    }
                    next.content_based_deduplication = enabled;
                }
                "RedrivePolicy" => {
                    next.redrive_policy = if value.is_empty() {
                        None
                    } else {
                        Some(RedrivePolicy::from_json(value)?)
                    };
                }
                "FifoQueue" => {
                    return Err(SqsError::InvalidAttributeName(
                        "FifoQueue cannot be changed after queue creation".into(),
                    ));
                }
                _ => {
                    return Err(SqsError::InvalidAttributeName(format!(
                        "Unknown attribute: {name}"
                    )));
                }
            }
        }
        Ok(next)
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("DelaySeconds".into(), self.delay_seconds.to_string());
        m.insert(
            "MaximumMessageSize".into(),
            self.maximum_message_size.to_string(),
        );
        m.insert(
            "MessageRetentionPeriod".into(),
            self.message_retention_period.to_string(),
        );
        m.insert(
            "ReceiveMessageWaitTimeSeconds".into(),
            self.receive_message_wait_time_seconds.to_string(),
        );
        m.insert(
            "VisibilityTimeout".into(),
            self.visibility_timeout.to_string(),
        );
        m.insert(
            "KmsDataKeyReusePeriodSeconds".into(),
            self.kms_data_key_reuse_period_seconds.to_string(),
        );
        if let Some(ref key) = self.kms_master_key_id {
            m.insert("KmsMasterKeyId".into(), key.clone());
        }
        m.insert("FifoQueue".into(), self.fifo_queue.to_string());
        if self.fifo_queue {
            m.insert(
                "ContentBasedDeduplication".into(),
                self.content_based_deduplication.to_string(),
            );
        }
        if let Some(ref rp) = self.redrive_policy {
            m.insert("RedrivePolicy".into(), rp.to_json());
        }
        m
    }
}

pub(crate) fn parse_bool(name: &str, value: &str) -> Result<bool, SqsError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(SqsError::InvalidAttributeValue(format!(
            "Invalid value for {name}: {value} (expected true or false)"
        ))),
    }
}

fn parse_ranged(name: &str, value: &str, min: u32, max: u32) -> Result<u32, SqsError> {
    let parsed: u32 = value.parse().map_err(|_| {
        SqsError::InvalidAttributeValue(format!("Invalid value for {name}: {value}"))
    })?;
    if parsed < min || parsed > max {
        return Err(SqsError::InvalidAttributeValue(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(parsed)
}

/// Queue names are 1-80 characters of `[A-Za-z0-9_-]`, with a mandatory
/// `.fifo` suffix exactly when the queue is FIFO.
pub fn validate_queue_name(name: &str, is_fifo: bool) -> Result<(), SqsError> {
    if name.is_empty() || name.len() > 80 {
        return Err(SqsError::InvalidParameterValue(
            "Queue name must be between 1 and 80 characters".into(),
        ));
    }
    let base = if is_fifo {
        name.strip_suffix(".fifo").ok_or_else(|| {
            SqsError::InvalidParameterValue("FIFO queue name must end with .fifo".into())
        })?
    } else {
        if name.ends_with(".fifo") {
            return Err(SqsError::InvalidParameterValue(
                "Queue name must not end with .fifo unless FifoQueue is true".into(),
            ));
        }
        name
    };
    if base.is_empty()
        || !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SqsError::InvalidParameterValue(
            "Queue name can only contain alphanumeric characters, hyphens, and underscores"
                .into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(name: &str, value: &str) -> HashMap<String, String> {
        HashMap::from([(name.to_string(), value.to_string())])
    }

    #[test]
    fn defaults_match_documented_values() {
        let attrs = QueueAttributes::default();
        assert_eq!(attrs.delay_seconds, 0);
        assert_eq!(attrs.maximum_message_size, 262_144);
        assert_eq!(attrs.message_retention_period, 345_600);
        assert_eq!(attrs.receive_message_wait_time_seconds, 0);
        assert_eq!(attrs.visibility_timeout, 30);
        assert_eq!(attrs.kms_data_key_reuse_period_seconds, 300);
        assert!(!attrs.fifo_queue);
        assert!(!attrs.content_based_deduplication);
        assert!(attrs.redrive_policy.is_none());
    }

    #[test]
    fn in_range_values_are_stored() {
        let attrs = QueueAttributes::from_create(&one("VisibilityTimeout", "120")).unwrap();
        assert_eq!(attrs.visibility_timeout, 120);
        let attrs = QueueAttributes::from_create(&one("DelaySeconds", "900")).unwrap();
        assert_eq!(attrs.delay_seconds, 900);
        let attrs = QueueAttributes::from_create(&one("MaximumMessageSize", "1024")).unwrap();
        assert_eq!(attrs.maximum_message_size, 1024);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for (name, value) in [
            ("DelaySeconds", "901"),
            ("MaximumMessageSize", "1023"),
            ("MaximumMessageSize", "262145"),
            ("MessageRetentionPeriod", "59"),
            ("MessageRetentionPeriod", "1209601"),
            ("ReceiveMessageWaitTimeSeconds", "21"),
            ("VisibilityTimeout", "43201"),
            ("KmsDataKeyReusePeriodSeconds", "59"),
            ("VisibilityTimeout", "-1"),
            ("DelaySeconds", "abc"),
        ] {
            let err = QueueAttributes::from_create(&one(name, value)).unwrap_err();
            assert!(
                matches!(err, SqsError::InvalidAttributeValue(_)),
                "{name}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn unknown_attribute_name_is_rejected() {
        let err = QueueAttributes::from_create(&one("NoSuchAttribute", "1")).unwrap_err();
        assert!(matches!(err, SqsError::InvalidAttributeName(_)));
    }

    #[test]
    fn content_based_dedup_requires_fifo() {
        let err =
            QueueAttributes::from_create(&one("ContentBasedDeduplication", "true")).unwrap_err();
        assert!(matches!(err, SqsError::InvalidAttributeValue(_)));

        let attrs = QueueAttributes::from_create(&HashMap::from([
            ("FifoQueue".to_string(), "true".to_string()),
            ("ContentBasedDeduplication".to_string(), "true".to_string()),
        ]))
        .unwrap();
        assert!(attrs.fifo_queue);
        assert!(attrs.content_based_deduplication);
    }

    #[test]
    fn failed_update_leaves_base_untouched() {
        let base = QueueAttributes::default();
        let attrs = HashMap::from([
            ("DelaySeconds".to_string(), "10".to_string()),
            ("VisibilityTimeout".to_string(), "99999".to_string()),
        ]);
        assert!(base.with(&attrs).is_err());
        assert_eq!(base.delay_seconds, 0);
    }

    #[test]
    fn redrive_policy_requires_both_fields() {
        let err = RedrivePolicy::from_json(r#"{"maxReceiveCount": 3}"#).unwrap_err();
        assert!(err.to_string().contains("deadLetterTargetArn"));

        let err =
            RedrivePolicy::from_json(r#"{"deadLetterTargetArn": "arn:aws:sqs:us-east-1:000000000000:dlq"}"#)
                .unwrap_err();
        assert!(err.to_string().contains("maxReceiveCount"));

        let rp = RedrivePolicy::from_json(
            r#"{"deadLetterTargetArn": "arn:aws:sqs:us-east-1:000000000000:dlq", "maxReceiveCount": "5"}"#,
        )
        .unwrap();
        assert_eq!(rp.max_receive_count, 5);
    }

    #[test]
    fn redrive_policy_round_trips_through_json() {
        let rp = RedrivePolicy {
            dead_letter_target_arn: "arn:aws:sqs:us-east-1:000000000000:dlq".into(),
            max_receive_count: 3,
        };
        assert_eq!(RedrivePolicy::from_json(&rp.to_json()).unwrap(), rp);
    }

    #[test]
    fn queue_name_rules() {
        assert!(validate_queue_name("orders", false).is_ok());
        assert!(validate_queue_name("orders-2_test", false).is_ok());
        assert!(validate_queue_name("orders.fifo", true).is_ok());
        assert!(validate_queue_name("", false).is_err());
        assert!(validate_queue_name(&"q".repeat(81), false).is_err());
        assert!(validate_queue_name("orders.fifo", false).is_err());
        assert!(validate_queue_name("orders", true).is_err());
        assert!(validate_queue_name("bad name", false).is_err());
        assert!(validate_queue_name("dots.inside", false).is_err());
        assert!(validate_queue_name(".fifo", true).is_err());
    }

    #[test]
    fn fifo_queue_cannot_be_updated() {
        let base = QueueAttributes::default();
        let err = base.with(&one("FifoQueue", "true")).unwrap_err();
        assert!(matches!(err, SqsError::InvalidAttributeName(_)));
    }
}
