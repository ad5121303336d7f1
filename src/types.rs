//! Typed request/response shapes for every queue operation. The wire layer
//! parses raw query-protocol parameters into these before the engine runs;
//! the engine never sees a raw key-value bag.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageAttributeValue {
    pub data_type: String,
    pub string_value: Option<String>,
    /// Base64-encoded, as it travels on the wire.
    pub binary_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BatchResultErrorEntry {
    pub id: String,
    pub code: String,
    pub message: String,
    pub sender_fault: bool,
}

// --- CreateQueue ---

#[derive(Debug, Clone, Default)]
pub struct CreateQueueRequest {
    pub queue_name: String,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateQueueResponse {
    pub queue_url: String,
}

// --- DeleteQueue / PurgeQueue ---

#[derive(Debug, Clone)]
pub struct DeleteQueueRequest {
    pub queue_url: String,
}

#[derive(Debug, Clone)]
pub struct PurgeQueueRequest {
    pub queue_url: String,
}

// --- GetQueueUrl ---

#[derive(Debug, Clone)]
pub struct GetQueueUrlRequest {
    pub queue_name: String,
}

#[derive(Debug, Clone)]
pub struct GetQueueUrlResponse {
    pub queue_url: String,
}

// --- ListQueues ---

#[derive(Debug, Clone, Default)]
pub struct ListQueuesRequest {
    pub queue_name_prefix: Option<String>,
    pub max_results: Option<i32>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListQueuesResponse {
    pub queue_urls: Vec<String>,
    pub next_token: Option<String>,
}

// --- Queue attributes ---

#[derive(Debug, Clone)]
pub struct GetQueueAttributesRequest {
    pub queue_url: String,
    pub attribute_names: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct GetQueueAttributesResponse {
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SetQueueAttributesRequest {
    pub queue_url: String,
    pub attributes: HashMap<String, String>,
}

// --- SendMessage ---

#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub message_body: String,
    pub delay_seconds: Option<i32>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub message_system_attributes: HashMap<String, MessageAttributeValue>,
    pub message_deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub md5_of_message_body: String,
    pub md5_of_message_attributes: Option<String>,
    pub md5_of_message_system_attributes: Option<String>,
    pub sequence_number: Option<String>,
}

// --- SendMessageBatch ---

#[derive(Debug, Clone)]
pub struct SendMessageBatchRequest {
    pub queue_url: String,
    pub entries: Vec<SendMessageBatchEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageBatchEntry {
    pub id: String,
    pub message_body: String,
    pub delay_seconds: Option<i32>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub message_system_attributes: HashMap<String, MessageAttributeValue>,
    pub message_deduplication_id: Option<String>,
    pub message_group_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageBatchResponse {
    pub successful: Vec<SendMessageBatchResultEntry>,
    pub failed: Vec<BatchResultErrorEntry>,
}

#[derive(Debug, Clone)]
pub struct SendMessageBatchResultEntry {
    pub id: String,
    pub message_id: String,
    pub md5_of_message_body: String,
    pub md5_of_message_attributes: Option<String>,
    pub md5_of_message_system_attributes: Option<String>,
    pub sequence_number: Option<String>,
}

// --- ReceiveMessage ---

#[derive(Debug, Clone, Default)]
pub struct ReceiveMessageRequest {
    pub queue_url: String,
    pub max_number_of_messages: Option<i32>,
    pub visibility_timeout: Option<i32>,
    pub wait_time_seconds: Option<i32>,
    pub attribute_names: Option<Vec<String>>,
    pub message_attribute_names: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ReceiveMessageResponse {
    pub messages: Vec<ReceivedMessage>,
}

/// One delivered message, after attribute filtering.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    pub md5_of_message_attributes: Option<String>,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
}

// --- DeleteMessage ---

#[derive(Debug, Clone)]
pub struct DeleteMessageRequest {
    pub queue_url: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageBatchRequest {
    pub queue_url: String,
    pub entries: Vec<DeleteMessageBatchEntry>,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageBatchEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct DeleteMessageBatchResponse {
    pub successful: Vec<String>,
    pub failed: Vec<BatchResultErrorEntry>,
}

// --- ChangeMessageVisibility ---

#[derive(Debug, Clone)]
pub struct ChangeMessageVisibilityRequest {
    pub queue_url: String,
    pub receipt_handle: String,
    pub visibility_timeout: i32,
}

#[derive(Debug, Clone)]
pub struct ChangeMessageVisibilityBatchRequest {
    pub queue_url: String,
    pub entries: Vec<ChangeMessageVisibilityBatchEntry>,
}

#[derive(Debug, Clone)]
pub struct ChangeMessageVisibilityBatchEntry {
    pub id: String,
    pub receipt_handle: String,
    pub visibility_timeout: i32,
}

#[derive(Debug, Clone)]
pub struct ChangeMessageVisibilityBatchResponse {
    pub successful: Vec<String>,
    pub failed: Vec<BatchResultErrorEntry>,
}

// --- Tags ---

#[derive(Debug, Clone)]
pub struct TagQueueRequest {
    pub queue_url: String,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct UntagQueueRequest {
    pub queue_url: String,
    pub tag_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ListQueueTagsRequest {
    pub queue_url: String,
}

#[derive(Debug, Clone)]
pub struct ListQueueTagsResponse {
    pub tags: HashMap<String, String>,
}

// --- ListDeadLetterSourceQueues ---

#[derive(Debug, Clone)]
pub struct ListDeadLetterSourceQueuesRequest {
    pub queue_url: String,
    pub max_results: Option<i32>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListDeadLetterSourceQueuesResponse {
    pub queue_urls: Vec<String>,
    pub next_token: Option<String>,
}
