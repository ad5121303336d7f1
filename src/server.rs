//! Query-protocol boundary: form-encoded `Action` requests in, XML response
//! envelopes out. Everything here is translation; the engine behind
//! [`SqsService`] owns the semantics.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use uuid::Uuid;

use crate::error::{xml_escape, SqsError};
use crate::registry::SqsService;
use crate::types::*;

const NS: &str = "http://queue.amazonaws.com/doc/2012-11-05/";

// ── form parsing helpers ───────────────────────────────────────────────

type Params = HashMap<String, String>;

fn parse_form(body: &str) -> Params {
    form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn param(params: &Params, key: &str) -> Option<String> {
    params.get(key).cloned()
}

fn require(params: &Params, key: &str) -> Result<String, SqsError> {
    param(params, key).ok_or_else(|| {
        SqsError::MissingParameter(format!("The request must contain the parameter {key}"))
    })
}

fn param_i32(params: &Params, key: &str) -> Result<Option<i32>, SqsError> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            SqsError::InvalidParameterValue(format!("Invalid value for {key}: {raw}"))
        }),
    }
}

/// Parse `Prefix.N.Name` / `Prefix.N.Value` pairs into a map.
fn parse_name_value_entries(params: &Params, prefix: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for i in 1..=100 {
        let name_key = format!("{prefix}.{i}.Name");
        let value_key = format!("{prefix}.{i}.Value");
        match (params.get(&name_key), params.get(&value_key)) {
            (Some(name), Some(value)) => {
                map.insert(name.clone(), value.clone());
            }
            _ => break,
        }
    }
    map
}

/// Parse `Prefix.N.Key` / `Prefix.N.Value` tag pairs.
fn parse_tag_entries(params: &Params, prefix: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for i in 1..=100 {
        let key_key = format!("{prefix}.{i}.Key");
        let value_key = format!("{prefix}.{i}.Value");
        match (params.get(&key_key), params.get(&value_key)) {
            (Some(key), Some(value)) => {
                map.insert(key.clone(), value.clone());
            }
            _ => break,
        }
    }
    map
}

/// Parse a flat `Prefix.N` string list.
fn parse_string_list(params: &Params, prefix: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    for i in 1..=100 {
        match params.get(&format!("{prefix}.{i}")) {
            Some(value) => items.push(value.clone()),
            None => break,
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Parse `Prefix.N.Name` + `Prefix.N.Value.{DataType,StringValue,BinaryValue}`
/// message-attribute entries.
fn parse_message_attributes(
    params: &Params,
    prefix: &str,
) -> HashMap<String, MessageAttributeValue> {
    let mut map = HashMap::new();
    for i in 1..=100 {
        let name_key = format!("{prefix}.{i}.Name");
        let Some(name) = params.get(&name_key) else {
            break;
        };
        map.insert(
            name.clone(),
            MessageAttributeValue {
                data_type: params
                    .get(&format!("{prefix}.{i}.Value.DataType"))
                    .cloned()
                    .unwrap_or_default(),
                string_value: params.get(&format!("{prefix}.{i}.Value.StringValue")).cloned(),
                binary_value: params.get(&format!("{prefix}.{i}.Value.BinaryValue")).cloned(),
            },
        );
    }
    map
}

// ── XML response helpers ───────────────────────────────────────────────

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

fn xml_ok(action: &str, result_body: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <{action}Result>
{result_body}
  </{action}Result>
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = request_id(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn xml_empty(action: &str) -> Response {
    let xml = format!(
        r#"<{action}Response xmlns="{NS}">
  <{action}Result/>
  <ResponseMetadata>
    <RequestId>{rid}</RequestId>
  </ResponseMetadata>
</{action}Response>"#,
        rid = request_id(),
    );
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/xml")],
        xml,
    )
        .into_response()
}

fn send_result_fields(
    out: &mut String,
    message_id: &str,
    md5_of_body: &str,
    md5_of_attributes: Option<&str>,
    md5_of_system_attributes: Option<&str>,
    sequence_number: Option<&str>,
) {
    out.push_str(&format!(
        "    <MessageId>{}</MessageId>\n    <MD5OfMessageBody>{}</MD5OfMessageBody>",
        xml_escape(message_id),
        md5_of_body,
    ));
    if let Some(md5) = md5_of_attributes {
        out.push_str(&format!(
            "\n    <MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>"
        ));
    }
    if let Some(md5) = md5_of_system_attributes {
        out.push_str(&format!(
            "\n    <MD5OfMessageSystemAttributes>{md5}</MD5OfMessageSystemAttributes>"
        ));
    }
    if let Some(seq) = sequence_number {
        out.push_str(&format!("\n    <SequenceNumber>{seq}</SequenceNumber>"));
    }
}

fn message_xml(msg: &ReceivedMessage) -> String {
    let mut xml = String::from("    <Message>\n");
    xml.push_str(&format!(
        "      <MessageId>{}</MessageId>\n",
        xml_escape(&msg.message_id)
    ));
    xml.push_str(&format!(
        "      <ReceiptHandle>{}</ReceiptHandle>\n",
        xml_escape(&msg.receipt_handle)
    ));
    xml.push_str(&format!("      <MD5OfBody>{}</MD5OfBody>\n", msg.md5_of_body));
    xml.push_str(&format!("      <Body>{}</Body>\n", xml_escape(&msg.body)));

    let mut attr_names: Vec<&String> = msg.attributes.keys().collect();
    attr_names.sort();
    for name in attr_names {
        xml.push_str(&format!(
            "      <Attribute><Name>{}</Name><Value>{}</Value></Attribute>\n",
            xml_escape(name),
            xml_escape(&msg.attributes[name]),
        ));
    }

    if !msg.message_attributes.is_empty() {
        if let Some(ref md5) = msg.md5_of_message_attributes {
            xml.push_str(&format!(
                "      <MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>\n"
            ));
        }
        let mut names: Vec<&String> = msg.message_attributes.keys().collect();
        names.sort();
        for name in names {
            let attr = &msg.message_attributes[name];
            xml.push_str(&format!(
                "      <MessageAttribute><Name>{}</Name><Value><DataType>{}</DataType>",
                xml_escape(name),
                xml_escape(&attr.data_type),
            ));
            if let Some(ref value) = attr.string_value {
                xml.push_str(&format!(
                    "<StringValue>{}</StringValue>",
                    xml_escape(value)
                ));
            }
            if let Some(ref value) = attr.binary_value {
                xml.push_str(&format!(
                    "<BinaryValue>{}</BinaryValue>",
                    xml_escape(value)
                ));
            }
            xml.push_str("</Value></MessageAttribute>\n");
        }
    }

    xml.push_str("    </Message>");
    xml
}

fn batch_error_xml(entries: &[BatchResultErrorEntry]) -> String {
    let mut xml = String::new();
    for entry in entries {
        xml.push_str(&format!(
            "    <BatchResultErrorEntry><Id>{}</Id><Code>{}</Code><Message>{}</Message><SenderFault>{}</SenderFault></BatchResultErrorEntry>\n",
            xml_escape(&entry.id),
            xml_escape(&entry.code),
            xml_escape(&entry.message),
            entry.sender_fault,
        ));
    }
    xml
}

// ── dispatch ───────────────────────────────────────────────────────────

async fn handle_request(
    State(state): State<Arc<SqsService>>,
    body: String,
) -> Result<Response, SqsError> {
    let params = parse_form(&body);
    let action = param(&params, "Action")
        .ok_or_else(|| SqsError::InvalidAction("Missing Action parameter".into()))?;

    match action.as_str() {
        "CreateQueue" => handle_create_queue(state, params).await,
        "DeleteQueue" => handle_delete_queue(state, params).await,
        "GetQueueUrl" => handle_get_queue_url(state, params).await,
        "ListQueues" => handle_list_queues(state, params).await,
        "GetQueueAttributes" => handle_get_queue_attributes(state, params).await,
        "SetQueueAttributes" => handle_set_queue_attributes(state, params).await,
        "PurgeQueue" => handle_purge_queue(state, params).await,
        "SendMessage" => handle_send_message(state, params).await,
        "SendMessageBatch" => handle_send_message_batch(state, params).await,
        "ReceiveMessage" => handle_receive_message(state, params).await,
        "DeleteMessage" => handle_delete_message(state, params).await,
        "DeleteMessageBatch" => handle_delete_message_batch(state, params).await,
        "ChangeMessageVisibility" => handle_change_message_visibility(state, params).await,
        "ChangeMessageVisibilityBatch" => {
            handle_change_message_visibility_batch(state, params).await
        }
        "TagQueue" => handle_tag_queue(state, params).await,
        "UntagQueue" => handle_untag_queue(state, params).await,
        "ListQueueTags" => handle_list_queue_tags(state, params).await,
        "ListDeadLetterSourceQueues" => {
            handle_list_dead_letter_source_queues(state, params).await
        }
        _ => Err(SqsError::InvalidAction(format!("Unknown action: {action}"))),
    }
}

// ── action handlers ────────────────────────────────────────────────────

async fn handle_create_queue(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = CreateQueueRequest {
        queue_name: require(&params, "QueueName")?,
        attributes: parse_name_value_entries(&params, "Attribute"),
        tags: parse_tag_entries(&params, "Tag"),
    };
    let resp = state.create_queue(req).await?;
    Ok(xml_ok(
        "CreateQueue",
        &format!("    <QueueUrl>{}</QueueUrl>", xml_escape(&resp.queue_url)),
    ))
}

async fn handle_delete_queue(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    state
        .delete_queue(DeleteQueueRequest {
            queue_url: require(&params, "QueueUrl")?,
        })
        .await?;
    Ok(xml_empty("DeleteQueue"))
}

async fn handle_get_queue_url(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let resp = state
        .get_queue_url(GetQueueUrlRequest {
            queue_name: require(&params, "QueueName")?,
        })
        .await?;
    Ok(xml_ok(
        "GetQueueUrl",
        &format!("    <QueueUrl>{}</QueueUrl>", xml_escape(&resp.queue_url)),
    ))
}

async fn handle_list_queues(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = ListQueuesRequest {
        queue_name_prefix: param(&params, "QueueNamePrefix"),
        max_results: param_i32(&params, "MaxResults")?,
        next_token: param(&params, "NextToken"),
    };
    let resp = state.list_queues(req).await?;
    let mut body = String::new();
    for url in &resp.queue_urls {
        body.push_str(&format!("    <QueueUrl>{}</QueueUrl>\n", xml_escape(url)));
    }
    if let Some(ref token) = resp.next_token {
        body.push_str(&format!(
            "    <NextToken>{}</NextToken>\n",
            xml_escape(token)
        ));
    }
    Ok(xml_ok("ListQueues", body.trim_end_matches('\n')))
}

async fn handle_get_queue_attributes(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = GetQueueAttributesRequest {
        queue_url: require(&params, "QueueUrl")?,
        attribute_names: parse_string_list(&params, "AttributeName"),
    };
    let resp = state.get_queue_attributes(req).await?;
    let mut names: Vec<&String> = resp.attributes.keys().collect();
    names.sort();
    let mut body = String::new();
    for name in names {
        body.push_str(&format!(
            "    <Attribute><Name>{}</Name><Value>{}</Value></Attribute>\n",
            xml_escape(name),
            xml_escape(&resp.attributes[name]),
        ));
    }
    Ok(xml_ok("GetQueueAttributes", body.trim_end_matches('\n')))
}

async fn handle_set_queue_attributes(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = SetQueueAttributesRequest {
        queue_url: require(&params, "QueueUrl")?,
        attributes: parse_name_value_entries(&params, "Attribute"),
    };
    state.set_queue_attributes(req).await?;
    Ok(xml_empty("SetQueueAttributes"))
}

async fn handle_purge_queue(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    state
        .purge_queue(PurgeQueueRequest {
            queue_url: require(&params, "QueueUrl")?,
        })
        .await?;
    Ok(xml_empty("PurgeQueue"))
}

async fn handle_send_message(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = SendMessageRequest {
        queue_url: require(&params, "QueueUrl")?,
        message_body: require(&params, "MessageBody")?,
        delay_seconds: param_i32(&params, "DelaySeconds")?,
        message_attributes: parse_message_attributes(&params, "MessageAttribute"),
        message_system_attributes: parse_message_attributes(
            &params,
            "MessageSystemAttribute",
        ),
        message_deduplication_id: param(&params, "MessageDeduplicationId"),
        message_group_id: param(&params, "MessageGroupId"),
    };
    let resp = state.send_message(req).await?;
    let mut body = String::new();
    send_result_fields(
        &mut body,
        &resp.message_id,
        &resp.md5_of_message_body,
        resp.md5_of_message_attributes.as_deref(),
        resp.md5_of_message_system_attributes.as_deref(),
        resp.sequence_number.as_deref(),
    );
    Ok(xml_ok("SendMessage", &body))
}

async fn handle_send_message_batch(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let queue_url = require(&params, "QueueUrl")?;
    let mut entries = Vec::new();
    for i in 1..=100 {
        let prefix = format!("SendMessageBatchRequestEntry.{i}");
        let Some(id) = params.get(&format!("{prefix}.Id")) else {
            break;
        };
        entries.push(SendMessageBatchEntry {
            id: id.clone(),
            message_body: require(&params, &format!("{prefix}.MessageBody"))?,
            delay_seconds: param_i32(&params, &format!("{prefix}.DelaySeconds"))?,
            message_attributes: parse_message_attributes(
                &params,
                &format!("{prefix}.MessageAttribute"),
            ),
            message_system_attributes: parse_message_attributes(
                &params,
                &format!("{prefix}.MessageSystemAttribute"),
            ),
            message_deduplication_id: param(&params, &format!("{prefix}.MessageDeduplicationId")),
            message_group_id: param(&params, &format!("{prefix}.MessageGroupId")),
        });
    }
    let resp = state
        .send_message_batch(SendMessageBatchRequest { queue_url, entries })
        .await?;

    let mut body = String::new();
    for entry in &resp.successful {
        body.push_str("    <SendMessageBatchResultEntry>\n");
        body.push_str(&format!("      <Id>{}</Id>\n", xml_escape(&entry.id)));
        body.push_str(&format!(
            "      <MessageId>{}</MessageId>\n      <MD5OfMessageBody>{}</MD5OfMessageBody>\n",
            xml_escape(&entry.message_id),
            entry.md5_of_message_body,
        ));
        if let Some(ref md5) = entry.md5_of_message_attributes {
            body.push_str(&format!(
                "      <MD5OfMessageAttributes>{md5}</MD5OfMessageAttributes>\n"
            ));
        }
        if let Some(ref md5) = entry.md5_of_message_system_attributes {
            body.push_str(&format!(
                "      <MD5OfMessageSystemAttributes>{md5}</MD5OfMessageSystemAttributes>\n"
            ));
        }
        if let Some(ref seq) = entry.sequence_number {
            body.push_str(&format!("      <SequenceNumber>{seq}</SequenceNumber>\n"));
        }
        body.push_str("    </SendMessageBatchResultEntry>\n");
    }
    body.push_str(&batch_error_xml(&resp.failed));
    Ok(xml_ok("SendMessageBatch", body.trim_end_matches('\n')))
}

async fn handle_receive_message(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = ReceiveMessageRequest {
        queue_url: require(&params, "QueueUrl")?,
        max_number_of_messages: param_i32(&params, "MaxNumberOfMessages")?,
        visibility_timeout: param_i32(&params, "VisibilityTimeout")?,
        wait_time_seconds: param_i32(&params, "WaitTimeSeconds")?,
        attribute_names: parse_string_list(&params, "AttributeName"),
        message_attribute_names: parse_string_list(&params, "MessageAttributeName"),
    };
    let resp = state.receive_message(req).await?;
    if resp.messages.is_empty() {
        return Ok(xml_empty("ReceiveMessage"));
    }
    let body: Vec<String> = resp.messages.iter().map(message_xml).collect();
    Ok(xml_ok("ReceiveMessage", &body.join("\n")))
}

async fn handle_delete_message(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    state
        .delete_message(DeleteMessageRequest {
            queue_url: require(&params, "QueueUrl")?,
            receipt_handle: require(&params, "ReceiptHandle")?,
        })
        .await?;
    Ok(xml_empty("DeleteMessage"))
}

async fn handle_delete_message_batch(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let queue_url = require(&params, "QueueUrl")?;
    let mut entries = Vec::new();
    for i in 1..=100 {
        let prefix = format!("DeleteMessageBatchRequestEntry.{i}");
        let Some(id) = params.get(&format!("{prefix}.Id")) else {
            break;
        };
        entries.push(DeleteMessageBatchEntry {
            id: id.clone(),
            receipt_handle: require(&params, &format!("{prefix}.ReceiptHandle"))?,
        });
    }
    let resp = state
        .delete_message_batch(DeleteMessageBatchRequest { queue_url, entries })
        .await?;
    let mut body = String::new();
    for id in &resp.successful {
        body.push_str(&format!(
            "    <DeleteMessageBatchResultEntry><Id>{}</Id></DeleteMessageBatchResultEntry>\n",
            xml_escape(id)
        ));
    }
    body.push_str(&batch_error_xml(&resp.failed));
    Ok(xml_ok("DeleteMessageBatch", body.trim_end_matches('\n')))
}

async fn handle_change_message_visibility(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let timeout = require(&params, "VisibilityTimeout")?;
    let visibility_timeout = timeout.parse().map_err(|_| {
        SqsError::InvalidParameterValue(format!("Invalid value for VisibilityTimeout: {timeout}"))
    })?;
    state
        .change_message_visibility(ChangeMessageVisibilityRequest {
            queue_url: require(&params, "QueueUrl")?,
            receipt_handle: require(&params, "ReceiptHandle")?,
            visibility_timeout,
        })
        .await?;
    Ok(xml_empty("ChangeMessageVisibility"))
}

async fn handle_change_message_visibility_batch(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let queue_url = require(&params, "QueueUrl")?;
    let mut entries = Vec::new();
    for i in 1..=100 {
        let prefix = format!("ChangeMessageVisibilityBatchRequestEntry.{i}");
        let Some(id) = params.get(&format!("{prefix}.Id")) else {
            break;
        };
        let timeout = require(&params, &format!("{prefix}.VisibilityTimeout"))?;
        entries.push(ChangeMessageVisibilityBatchEntry {
            id: id.clone(),
            receipt_handle: require(&params, &format!("{prefix}.ReceiptHandle"))?,
            visibility_timeout: timeout.parse().map_err(|_| {
                SqsError::InvalidParameterValue(format!(
                    "Invalid value for VisibilityTimeout: {timeout}"
                ))
            })?,
        });
    }
    let resp = state
        .change_message_visibility_batch(ChangeMessageVisibilityBatchRequest {
            queue_url,
            entries,
        })
        .await?;
    let mut body = String::new();
    for id in &resp.successful {
        body.push_str(&format!(
            "    <ChangeMessageVisibilityBatchResultEntry><Id>{}</Id></ChangeMessageVisibilityBatchResultEntry>\n",
            xml_escape(id)
        ));
    }
    body.push_str(&batch_error_xml(&resp.failed));
    Ok(xml_ok(
        "ChangeMessageVisibilityBatch",
        body.trim_end_matches('\n'),
    ))
}

async fn handle_tag_queue(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    state
        .tag_queue(TagQueueRequest {
            queue_url: require(&params, "QueueUrl")?,
            tags: parse_tag_entries(&params, "Tag"),
        })
        .await?;
    Ok(xml_empty("TagQueue"))
}

async fn handle_untag_queue(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    state
        .untag_queue(UntagQueueRequest {
            queue_url: require(&params, "QueueUrl")?,
            tag_keys: parse_string_list(&params, "TagKey").unwrap_or_default(),
        })
        .await?;
    Ok(xml_empty("UntagQueue"))
}

async fn handle_list_queue_tags(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let resp = state
        .list_queue_tags(ListQueueTagsRequest {
            queue_url: require(&params, "QueueUrl")?,
        })
        .await?;
    let mut keys: Vec<&String> = resp.tags.keys().collect();
    keys.sort();
    let mut body = String::new();
    for key in keys {
        body.push_str(&format!(
            "    <Tag><Key>{}</Key><Value>{}</Value></Tag>\n",
            xml_escape(key),
            xml_escape(&resp.tags[key]),
        ));
    }
    Ok(xml_ok("ListQueueTags", body.trim_end_matches('\n')))
}

async fn handle_list_dead_letter_source_queues(
    state: Arc<SqsService>,
    params: Params,
) -> Result<Response, SqsError> {
    let req = ListDeadLetterSourceQueuesRequest {
        queue_url: require(&params, "QueueUrl")?,
        max_results: param_i32(&params, "MaxResults")?,
        next_token: param(&params, "NextToken"),
    };
    let resp = state.list_dead_letter_source_queues(req).await?;
    let mut body = String::new();
    for url in &resp.queue_urls {
        body.push_str(&format!("    <QueueUrl>{}</QueueUrl>\n", xml_escape(url)));
    }
    if let Some(ref token) = resp.next_token {
        body.push_str(&format!(
            "    <NextToken>{}</NextToken>\n",
            xml_escape(token)
        ));
    }
    Ok(xml_ok(
        "ListDeadLetterSourceQueues",
        body.trim_end_matches('\n'),
    ))
}

// ── router ─────────────────────────────────────────────────────────────

pub fn create_router(state: Arc<SqsService>) -> Router {
    // SDKs speaking the query protocol post to the queue URL itself; the
    // body names the queue either way.
    Router::new()
        .route("/", post(handle_request))
        .route("/{account_id}/{queue_name}", post(handle_request))
        .with_state(state)
}
