//! Per-queue message store and lifecycle engine.
//!
//! Messages are keyed by enqueue order in a `BTreeMap`; a message that
//! returns from in-flight keeps its key, so FIFO per-group order survives a
//! visibility expiry. In-flight deadlines live in an ordered index so
//! reconciliation only touches the expired prefix. The receipt handle minted
//! by the latest receive stays the message's current handle (and stays valid
//! for deletion) until the message is received again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use tokio::time::Instant;
use uuid::Uuid;

use crate::attributes::QueueAttributes;
use crate::checksum;
use crate::error::SqsError;
use crate::types::{MessageAttributeValue, ReceivedMessage, SendMessageResponse};

const DEDUP_WINDOW: Duration = Duration::from_secs(300);
const MAX_MESSAGE_ATTRIBUTES: usize = 10;
const TRACE_HEADER: &str = "AWSTraceHeader";
const FIFO_INFLIGHT_LIMIT: usize = 20_000;
const STANDARD_INFLIGHT_LIMIT: usize = 120_000;

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Available,
    InFlight,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_message_attributes: Option<String>,
    pub system_attributes: HashMap<String, MessageAttributeValue>,
    pub md5_of_system_attributes: Option<String>,
    pub sent_timestamp: u64,
    pub state: MessageState,
    pub visible_at: Instant,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<u64>,
    pub receipt_handle: Option<String>,
    pub message_group_id: Option<String>,
    pub dedup_id: Option<String>,
    pub sequence_number: Option<String>,
}

/// A message detached from its source store because it exceeded the redrive
/// threshold; the registry appends it to the dead-letter queue's store.
pub struct Redrive {
    pub target_arn: String,
    pub message: Message,
}

#[derive(Debug)]
pub struct ReceiveOutcome {
    pub messages: Vec<ReceivedMessage>,
    /// Earliest instant at which a delayed or in-flight message changes
    /// state without outside intervention; long polls wake no later.
    pub next_transition: Option<Instant>,
}

pub struct Queue {
    pub attributes: QueueAttributes,
    pub tags: HashMap<String, String>,
    pub created_at: u64,
    pub last_modified: u64,
    messages: BTreeMap<u64, Message>,
    by_handle: HashMap<String, u64>,
    inflight_expiry: BTreeSet<(Instant, u64)>,
    next_key: u64,
    locked_groups: HashSet<String>,
    dedup_cache: HashMap<String, (SendMessageResponse, Instant)>,
    sequence_counter: u64,
}

impl Queue {
    pub fn new(attributes: QueueAttributes) -> Self {
        let now = now_secs();
        Queue {
            attributes,
            tags: HashMap::new(),
            created_at: now,
            last_modified: now,
            messages: BTreeMap::new(),
            by_handle: HashMap::new(),
            inflight_expiry: BTreeSet::new(),
            next_key: 0,
            locked_groups: HashSet::new(),
            dedup_cache: HashMap::new(),
            sequence_counter: 0,
        }
    }

    /// Apply every pending time-based transition. In-flight messages whose
    /// deadline has lapsed either return to their original position or, when
    /// the redrive threshold is exceeded, are detached for the caller to
    /// deliver to the dead-letter queue.
    pub fn reconcile(&mut self) -> Vec<Redrive> {
        let now = Instant::now();
        let mut redrives = Vec::new();
        while let Some(&(deadline, key)) = self.inflight_expiry.iter().next() {
            if deadline > now {
                break;
            }
            self.inflight_expiry.remove(&(deadline, key));
            let (group, receive_count) = match self.messages.get(&key) {
                Some(m) => (m.message_group_id.clone(), m.receive_count),
                None => continue,
            };
            if let Some(ref gid) = group {
                self.locked_groups.remove(gid);
            }
            let target = self
                .attributes
                .redrive_policy
                .as_ref()
                .filter(|rp| receive_count > rp.max_receive_count)
                .map(|rp| rp.dead_letter_target_arn.clone());
            match target {
                Some(target_arn) => {
                    let mut message =
                        self.messages.remove(&key).expect("indexed message exists");
                    if let Some(handle) = message.receipt_handle.take() {
                        self.by_handle.remove(&handle);
                    }
                    message.state = MessageState::Available;
                    redrives.push(Redrive {
                        target_arn,
                        message,
                    });
                }
                None => {
                    let msg = self.messages.get_mut(&key).expect("indexed message exists");
                    msg.state = MessageState::Available;
                }
            }
        }
        redrives
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_message(
        &mut self,
        body: String,
        delay_seconds: Option<i32>,
        message_attributes: HashMap<String, MessageAttributeValue>,
        system_attributes: HashMap<String, MessageAttributeValue>,
        dedup_id: Option<String>,
        group_id: Option<String>,
    ) -> Result<SendMessageResponse, SqsError> {
        if body.is_empty() {
            return Err(SqsError::InvalidParameterValue(
                "Message body must not be empty".into(),
            ));
        }
        if body.len() > self.attributes.maximum_message_size as usize {
            return Err(SqsError::InvalidParameterValue(format!(
                "Message body must be shorter than {} bytes",
                self.attributes.maximum_message_size
            )));
        }
        if let Some(d) = delay_seconds {
            if !(0..=900).contains(&d) {
                return Err(SqsError::InvalidParameterValue(
                    "DelaySeconds must be between 0 and 900".into(),
                ));
            }
        }
        validate_message_attributes(&message_attributes)?;
        for name in system_attributes.keys() {
            if name != TRACE_HEADER {
                return Err(SqsError::InvalidParameterValue(format!(
                    "Message system attribute name {name} is invalid"
                )));
            }
        }

        if self.attributes.fifo_queue {
            if group_id.is_none() {
                return Err(SqsError::MissingParameter(
                    "The request must contain the parameter MessageGroupId".into(),
                ));
            }
            if delay_seconds.is_some() {
                return Err(SqsError::InvalidParameterValue(
                    "DelaySeconds is invalid for FIFO queues; set it on the queue instead"
                        .into(),
                ));
            }
        }

        let effective_dedup_id = if self.attributes.fifo_queue {
            match dedup_id {
                Some(id) => Some(id),
                None if self.attributes.content_based_deduplication => {
                    Some(checksum::sha256_hex(body.as_bytes()))
                }
                None => {
                    return Err(SqsError::InvalidParameterValue(
                        "The queue should either have ContentBasedDeduplication enabled or \
                         MessageDeduplicationId provided explicitly"
                            .into(),
                    ));
                }
            }
        } else {
            None
        };

        self.evict_dedup_cache();
        if let Some(ref did) = effective_dedup_id {
            if let Some((original, _)) = self.dedup_cache.get(did) {
                return Ok(original.clone());
            }
        }

        let delay = delay_seconds.unwrap_or(self.attributes.delay_seconds as i32) as u64;
        let message_id = Uuid::new_v4().to_string();
        let md5_of_body = checksum::of_body(&body);
        let md5_of_message_attributes = checksum::of_attributes(&message_attributes);
        let md5_of_system_attributes = checksum::of_attributes(&system_attributes);

        let sequence_number = if self.attributes.fifo_queue {
            self.sequence_counter += 1;
            Some(format!("{:020}", self.sequence_counter))
        } else {
            None
        };

        let now = Instant::now();
        let message = Message {
            message_id: message_id.clone(),
            body,
            md5_of_body: md5_of_body.clone(),
            message_attributes,
            md5_of_message_attributes: md5_of_message_attributes.clone(),
            system_attributes,
            md5_of_system_attributes: md5_of_system_attributes.clone(),
            sent_timestamp: now_millis(),
            state: MessageState::Available,
            visible_at: now + Duration::from_secs(delay),
            receive_count: 0,
            first_receive_timestamp: None,
            receipt_handle: None,
            message_group_id: group_id,
            dedup_id: effective_dedup_id.clone(),
            sequence_number: sequence_number.clone(),
        };
        let key = self.next_key;
        self.next_key += 1;
        self.messages.insert(key, message);

        let response = SendMessageResponse {
            message_id,
            md5_of_message_body: md5_of_body,
            md5_of_message_attributes,
            md5_of_message_system_attributes: md5_of_system_attributes,
            sequence_number,
        };
        if let Some(did) = effective_dedup_id {
            self.dedup_cache.insert(did, (response.clone(), now));
        }
        Ok(response)
    }

    pub fn receive(
        &mut self,
        max_count: usize,
        visibility_override: Option<i32>,
        account_id: &str,
    ) -> Result<ReceiveOutcome, SqsError> {
        let vis_timeout = match visibility_override {
            Some(v) if !(0..=43_200).contains(&v) => {
                return Err(SqsError::InvalidParameterValue(
                    "VisibilityTimeout must be between 0 and 43200".into(),
                ));
            }
            Some(v) => v as u64,
            None => self.attributes.visibility_timeout as u64,
        };
        let inflight_limit = if self.attributes.fifo_queue {
            FIFO_INFLIGHT_LIMIT
        } else {
            STANDARD_INFLIGHT_LIMIT
        };
        if self.inflight_expiry.len() >= inflight_limit {
            return Err(SqsError::OverLimit("Too many messages in flight".into()));
        }

        let now = Instant::now();
        let now_ms = now_millis();
        let retention_cutoff =
            now_ms.saturating_sub(self.attributes.message_retention_period as u64 * 1000);

        let mut selected: Vec<u64> = Vec::new();
        let mut retention_expired: Vec<u64> = Vec::new();
        let mut groups_this_call: HashSet<String> = HashSet::new();
        let mut next_transition: Option<Instant> = None;

        for (&key, msg) in &self.messages {
            if msg.state == MessageState::InFlight {
                continue;
            }
            if msg.sent_timestamp < retention_cutoff {
                retention_expired.push(key);
                continue;
            }
            if msg.visible_at > now {
                next_transition =
                    Some(next_transition.map_or(msg.visible_at, |t| t.min(msg.visible_at)));
                continue;
            }
            if selected.len() >= max_count {
                continue;
            }
            if let Some(ref gid) = msg.message_group_id {
                if self.locked_groups.contains(gid) || groups_this_call.contains(gid) {
                    continue;
                }
                groups_this_call.insert(gid.clone());
            }
            selected.push(key);
        }

        for key in retention_expired {
            if let Some(mut msg) = self.messages.remove(&key) {
                if let Some(handle) = msg.receipt_handle.take() {
                    self.by_handle.remove(&handle);
                }
            }
        }

        let mut messages = Vec::with_capacity(selected.len());
        for key in selected {
            let handle = Uuid::new_v4().to_string();
            let deadline = now + Duration::from_secs(vis_timeout);
            let (received, group, old_handle) = {
                let msg = self.messages.get_mut(&key).expect("selected message exists");
                let old_handle = msg.receipt_handle.replace(handle.clone());
                msg.receive_count += 1;
                if msg.first_receive_timestamp.is_none() {
                    msg.first_receive_timestamp = Some(now_ms);
                }
                msg.state = MessageState::InFlight;
                msg.visible_at = deadline;
                (
                    render_received(msg, &handle, account_id),
                    msg.message_group_id.clone(),
                    old_handle,
                )
            };
            if let Some(old) = old_handle {
                self.by_handle.remove(&old);
            }
            self.by_handle.insert(handle, key);
            self.inflight_expiry.insert((deadline, key));
            if let Some(gid) = group {
                self.locked_groups.insert(gid);
            }
            messages.push(received);
        }

        if let Some(&(deadline, _)) = self.inflight_expiry.iter().next() {
            next_transition = Some(next_transition.map_or(deadline, |t| t.min(deadline)));
        }

        Ok(ReceiveOutcome {
            messages,
            next_transition,
        })
    }

    pub fn delete_message(&mut self, receipt_handle: &str) -> Result<(), SqsError> {
        let key = *self.by_handle.get(receipt_handle).ok_or_else(|| {
            SqsError::ReceiptHandleIsInvalid(format!(
                "The receipt handle {receipt_handle} is not valid"
            ))
        })?;
        let message = self.messages.remove(&key).expect("handle points at message");
        self.by_handle.remove(receipt_handle);
        if message.state == MessageState::InFlight {
            self.inflight_expiry.remove(&(message.visible_at, key));
            if let Some(ref gid) = message.message_group_id {
                self.locked_groups.remove(gid);
            }
        }
        Ok(())
    }

    pub fn change_visibility(
        &mut self,
        receipt_handle: &str,
        visibility_timeout: i32,
    ) -> Result<(), SqsError> {
        if !(0..=43_200).contains(&visibility_timeout) {
            return Err(SqsError::InvalidParameterValue(
                "VisibilityTimeout must be between 0 and 43200".into(),
            ));
        }
        let key = *self.by_handle.get(receipt_handle).ok_or_else(|| {
            SqsError::ReceiptHandleIsInvalid(format!(
                "The receipt handle {receipt_handle} is not valid"
            ))
        })?;
        let (state, old_deadline, group) = {
            let msg = self.messages.get(&key).expect("handle points at message");
            (msg.state, msg.visible_at, msg.message_group_id.clone())
        };
        if state != MessageState::InFlight {
            return Err(SqsError::MessageNotInflight(
                "The message referred to is not in flight".into(),
            ));
        }
        self.inflight_expiry.remove(&(old_deadline, key));
        let now = Instant::now();
        if visibility_timeout == 0 {
            let msg = self.messages.get_mut(&key).expect("handle points at message");
            msg.state = MessageState::Available;
            msg.visible_at = now;
            if let Some(gid) = group {
                self.locked_groups.remove(&gid);
            }
        } else {
            let deadline = now + Duration::from_secs(visibility_timeout as u64);
            let msg = self.messages.get_mut(&key).expect("handle points at message");
            msg.visible_at = deadline;
            self.inflight_expiry.insert((deadline, key));
        }
        Ok(())
    }

    /// Append a message redriven from a source queue: fresh position, no
    /// receipt handle, immediately visible, dedup bypassed.
    pub fn push_redriven(&mut self, mut message: Message) {
        message.state = MessageState::Available;
        message.receipt_handle = None;
        message.visible_at = Instant::now();
        let key = self.next_key;
        self.next_key += 1;
        self.messages.insert(key, message);
    }

    pub fn purge(&mut self) {
        self.messages.clear();
        self.by_handle.clear();
        self.inflight_expiry.clear();
        self.locked_groups.clear();
    }

    pub fn get_attributes(
        &self,
        names: &Option<Vec<String>>,
        arn: &str,
    ) -> HashMap<String, String> {
        let all = match names {
            None => true,
            Some(names) => names.is_empty() || names.iter().any(|n| n == "All"),
        };
        let include = |name: &str| -> bool {
            all || names
                .as_ref()
                .map(|n| n.iter().any(|x| x == name))
                .unwrap_or(false)
        };

        let mut result = HashMap::new();
        for (name, value) in self.attributes.to_map() {
            if include(&name) {
                result.insert(name, value);
            }
        }
        if include("QueueArn") {
            result.insert("QueueArn".into(), arn.to_string());
        }
        if include("CreatedTimestamp") {
            result.insert("CreatedTimestamp".into(), self.created_at.to_string());
        }
        if include("LastModifiedTimestamp") {
            result.insert(
                "LastModifiedTimestamp".into(),
                self.last_modified.to_string(),
            );
        }
        let now = Instant::now();
        if include("ApproximateNumberOfMessages") {
            let visible = self
                .messages
                .values()
                .filter(|m| m.state == MessageState::Available && m.visible_at <= now)
                .count();
            result.insert("ApproximateNumberOfMessages".into(), visible.to_string());
        }
        if include("ApproximateNumberOfMessagesNotVisible") {
            result.insert(
                "ApproximateNumberOfMessagesNotVisible".into(),
                self.inflight_expiry.len().to_string(),
            );
        }
        if include("ApproximateNumberOfMessagesDelayed") {
            let delayed = self
                .messages
                .values()
                .filter(|m| m.state == MessageState::Available && m.visible_at > now)
                .count();
            result.insert(
                "ApproximateNumberOfMessagesDelayed".into(),
                delayed.to_string(),
            );
        }
        result
    }

    fn evict_dedup_cache(&mut self) {
        self.dedup_cache
            .retain(|_, (_, first_send)| first_send.elapsed() < DEDUP_WINDOW);
    }
}

fn validate_message_attributes(
    attrs: &HashMap<String, MessageAttributeValue>,
) -> Result<(), SqsError> {
    if attrs.len() > MAX_MESSAGE_ATTRIBUTES {
        return Err(SqsError::InvalidParameterValue(format!(
            "Number of message attributes cannot exceed {MAX_MESSAGE_ATTRIBUTES}"
        )));
    }
    for (name, attr) in attrs {
        let family_ok = ["String", "Number", "Binary"]
            .iter()
            .any(|f| attr.data_type == *f || attr.data_type.starts_with(&format!("{f}.")));
        if !family_ok {
            return Err(SqsError::InvalidParameterValue(format!(
                "The message attribute '{name}' has an invalid data type '{}'",
                attr.data_type
            )));
        }
        if attr.data_type.starts_with("Binary") {
            let value = attr.binary_value.as_deref().ok_or_else(|| {
                SqsError::InvalidParameterValue(format!(
                    "The message attribute '{name}' must contain a Binary value"
                ))
            })?;
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|_| {
                    SqsError::InvalidParameterValue(format!(
                        "The message attribute '{name}' has an invalid base64 Binary value"
                    ))
                })?;
        } else if attr.string_value.as_deref().map_or(true, str::is_empty) {
            return Err(SqsError::InvalidParameterValue(format!(
                "The message attribute '{name}' must contain a non-empty String value"
            )));
        }
    }
    Ok(())
}

fn render_received(msg: &Message, handle: &str, account_id: &str) -> ReceivedMessage {
    let mut attributes = HashMap::new();
    attributes.insert("SenderId".into(), account_id.to_string());
    attributes.insert("SentTimestamp".into(), msg.sent_timestamp.to_string());
    attributes.insert(
        "ApproximateReceiveCount".into(),
        msg.receive_count.to_string(),
    );
    if let Some(first) = msg.first_receive_timestamp {
        attributes.insert(
            "ApproximateFirstReceiveTimestamp".into(),
            first.to_string(),
        );
    }
    if let Some(ref did) = msg.dedup_id {
        attributes.insert("MessageDeduplicationId".into(), did.clone());
    }
    if let Some(ref gid) = msg.message_group_id {
        attributes.insert("MessageGroupId".into(), gid.clone());
    }
    if let Some(ref seq) = msg.sequence_number {
        attributes.insert("SequenceNumber".into(), seq.clone());
    }
    if let Some(trace) = msg.system_attributes.get(TRACE_HEADER) {
        if let Some(ref value) = trace.string_value {
            attributes.insert(TRACE_HEADER.into(), value.clone());
        }
    }
    ReceivedMessage {
        message_id: msg.message_id.clone(),
        receipt_handle: handle.to_string(),
        body: msg.body.clone(),
        md5_of_body: msg.md5_of_body.clone(),
        md5_of_message_attributes: msg.md5_of_message_attributes.clone(),
        attributes,
        message_attributes: msg.message_attributes.clone(),
    }
}
