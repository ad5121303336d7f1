//! Wire-level tests: form-encoded query-protocol requests through the
//! router, assertions on the XML envelopes.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::util::ServiceExt;

use sqs_local::registry::SqsService;
use sqs_local::server::create_router;

fn app() -> Router {
    create_router(Arc::new(SqsService::new(
        "000000000000".into(),
        "us-east-1".into(),
        9324,
    )))
}

async fn call(app: &Router, form: &[(&str, &str)]) -> (StatusCode, String) {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form {
        serializer.append_pair(key, value);
    }
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(serializer.finish()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn extract(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

async fn create_queue(app: &Router, name: &str) -> String {
    let (status, body) = call(app, &[("Action", "CreateQueue"), ("QueueName", name)]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    extract(&body, "QueueUrl").unwrap()
}

#[tokio::test]
async fn create_queue_returns_url_envelope() {
    let app = app();
    let (status, body) =
        call(&app, &[("Action", "CreateQueue"), ("QueueName", "orders")]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<CreateQueueResponse xmlns=\"http://queue.amazonaws.com/doc/2012-11-05/\">"));
    assert_eq!(
        extract(&body, "QueueUrl").unwrap(),
        "http://localhost:9324/000000000000/orders"
    );
    assert!(extract(&body, "RequestId").is_some());
}

#[tokio::test]
async fn send_receive_delete_round_trip() {
    let app = app();
    let url = create_queue(&app, "orders").await;

    let (status, body) = call(
        &app,
        &[
            ("Action", "SendMessage"),
            ("QueueUrl", &url),
            ("MessageBody", "Hello, queue!"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        extract(&body, "MD5OfMessageBody").unwrap(),
        "15b76386c3bb8647abbf4aaee4b86121"
    );
    let message_id = extract(&body, "MessageId").unwrap();

    let (status, body) = call(
        &app,
        &[
            ("Action", "ReceiveMessage"),
            ("QueueUrl", &url),
            ("AttributeName.1", "All"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(extract(&body, "MessageId").unwrap(), message_id);
    assert_eq!(extract(&body, "Body").unwrap(), "Hello, queue!");
    assert!(body.contains("<Attribute><Name>ApproximateReceiveCount</Name><Value>1</Value></Attribute>"));
    let handle = extract(&body, "ReceiptHandle").unwrap();

    let (status, _) = call(
        &app,
        &[
            ("Action", "DeleteMessage"),
            ("QueueUrl", &url),
            ("ReceiptHandle", &handle),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The handle was consumed by the delete.
    let (status, body) = call(
        &app,
        &[
            ("Action", "DeleteMessage"),
            ("QueueUrl", &url),
            ("ReceiptHandle", &handle),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(extract(&body, "Code").unwrap(), "ReceiptHandleIsInvalid");
}

#[tokio::test]
async fn message_attributes_round_trip_with_checksum() {
    let app = app();
    let url = create_queue(&app, "orders").await;

    let (status, body) = call(
        &app,
        &[
            ("Action", "SendMessage"),
            ("QueueUrl", &url),
            ("MessageBody", "attribute test"),
            ("MessageAttribute.1.Name", "SellerName"),
            ("MessageAttribute.1.Value.DataType", "String"),
            ("MessageAttribute.1.Value.StringValue", "Example Store"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(
        extract(&body, "MD5OfMessageAttributes").unwrap(),
        "cd28f3b68aeee4b2eac9c66f2f694b58"
    );

    let (_, body) = call(
        &app,
        &[
            ("Action", "ReceiveMessage"),
            ("QueueUrl", &url),
            ("MessageAttributeName.1", "All"),
        ],
    )
    .await;
    assert!(body.contains("<MessageAttribute><Name>SellerName</Name>"));
    assert!(body.contains("<StringValue>Example Store</StringValue>"));
    assert_eq!(
        extract(&body, "MD5OfMessageAttributes").unwrap(),
        "cd28f3b68aeee4b2eac9c66f2f694b58"
    );
}

#[tokio::test]
async fn missing_queue_renders_error_envelope() {
    let app = app();
    let (status, body) = call(
        &app,
        &[
            ("Action", "SendMessage"),
            ("QueueUrl", "http://localhost:9324/000000000000/missing"),
            ("MessageBody", "hi"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.starts_with("<ErrorResponse><Error><Type>Sender</Type>"));
    assert_eq!(
        extract(&body, "Code").unwrap(),
        "AWS.SimpleQueueService.NonExistentQueue"
    );
    assert!(extract(&body, "RequestId").is_some());
}

#[tokio::test]
async fn fifo_send_returns_sequence_and_dedups() {
    let app = app();
    let (status, body) = call(
        &app,
        &[
            ("Action", "CreateQueue"),
            ("QueueName", "orders.fifo"),
            ("Attribute.1.Name", "FifoQueue"),
            ("Attribute.1.Value", "true"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let url = extract(&body, "QueueUrl").unwrap();

    let send = [
        ("Action", "SendMessage"),
        ("QueueUrl", url.as_str()),
        ("MessageBody", "fifo payload"),
        ("MessageGroupId", "orders"),
        ("MessageDeduplicationId", "dedup-1"),
    ];
    let (_, first) = call(&app, &send).await;
    assert_eq!(
        extract(&first, "SequenceNumber").unwrap(),
        "00000000000000000001"
    );

    let (_, second) = call(&app, &send).await;
    assert_eq!(
        extract(&first, "MessageId").unwrap(),
        extract(&second, "MessageId").unwrap()
    );
}

#[tokio::test]
async fn get_queue_attributes_lists_arn() {
    let app = app();
    let url = create_queue(&app, "orders").await;

    let (status, body) = call(
        &app,
        &[
            ("Action", "GetQueueAttributes"),
            ("QueueUrl", &url),
            ("AttributeName.1", "All"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(
        "<Attribute><Name>QueueArn</Name><Value>arn:aws:sqs:us-east-1:000000000000:orders</Value></Attribute>"
    ));
    assert!(body.contains("<Attribute><Name>VisibilityTimeout</Name><Value>30</Value></Attribute>"));
}

#[tokio::test]
async fn invalid_attribute_value_is_rejected() {
    let app = app();
    let (status, body) = call(
        &app,
        &[
            ("Action", "CreateQueue"),
            ("QueueName", "orders"),
            ("Attribute.1.Name", "DelaySeconds"),
            ("Attribute.1.Value", "901"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(extract(&body, "Code").unwrap(), "InvalidAttributeValue");
}

#[tokio::test]
async fn tags_round_trip() {
    let app = app();
    let url = create_queue(&app, "orders").await;

    let (status, _) = call(
        &app,
        &[
            ("Action", "TagQueue"),
            ("QueueUrl", &url),
            ("Tag.1.Key", "env"),
            ("Tag.1.Value", "test"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, &[("Action", "ListQueueTags"), ("QueueUrl", &url)]).await;
    assert!(body.contains("<Tag><Key>env</Key><Value>test</Value></Tag>"));
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let app = app();
    let (status, body) = call(&app, &[("Action", "LaunchMissiles")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(extract(&body, "Code").unwrap(), "InvalidAction");
}

#[tokio::test]
async fn purge_then_receive_returns_empty_result() {
    let app = app();
    let url = create_queue(&app, "orders").await;
    call(
        &app,
        &[
            ("Action", "SendMessage"),
            ("QueueUrl", &url),
            ("MessageBody", "to be purged"),
        ],
    )
    .await;

    let (status, _) = call(&app, &[("Action", "PurgeQueue"), ("QueueUrl", &url)]).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        call(&app, &[("Action", "ReceiveMessage"), ("QueueUrl", &url)]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<ReceiveMessageResult/>"));
}

#[tokio::test]
async fn batch_send_on_the_wire() {
    let app = app();
    let url = create_queue(&app, "orders").await;

    let (status, body) = call(
        &app,
        &[
            ("Action", "SendMessageBatch"),
            ("QueueUrl", &url),
            ("SendMessageBatchRequestEntry.1.Id", "first"),
            ("SendMessageBatchRequestEntry.1.MessageBody", "one"),
            ("SendMessageBatchRequestEntry.2.Id", "second"),
            ("SendMessageBatchRequestEntry.2.MessageBody", "two"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains("<Id>first</Id>"));
    assert!(body.contains("<Id>second</Id>"));
    assert_eq!(body.matches("<SendMessageBatchResultEntry>").count(), 2);
}
