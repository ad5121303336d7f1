//! Queue registry and operation surface.
//!
//! The registry owns the name→queue map behind its own lock, held only for
//! lookup, insert, and remove. Each queue is an [`QueueHandle`]: immutable
//! identity plus a `Mutex<Queue>` and a `Notify`, so operations on one queue
//! linearize while different queues proceed in parallel. Lock order is
//! always registry before queue, and never two queue locks at once; a
//! redrive detaches messages under the source lock and appends them under
//! the target lock afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::attributes::{self, QueueAttributes, COMPARABLE_ATTRIBUTES};
use crate::error::SqsError;
use crate::queue::{now_secs, Queue, Redrive};
use crate::types::*;

const MAX_TAGS_PER_QUEUE: usize = 50;
const MAX_BATCH_ENTRIES: usize = 10;
const MAX_LIST_RESULTS: usize = 1000;

pub struct QueueHandle {
    pub name: String,
    pub url: String,
    pub arn: String,
    state: Mutex<Queue>,
    notify: Notify,
}

pub struct SqsService {
    queues: Mutex<HashMap<String, Arc<QueueHandle>>>,
    account_id: String,
    region: String,
    base_url: String,
}

impl SqsService {
    pub fn new(account_id: String, region: String, port: u16) -> Self {
        SqsService {
            queues: Mutex::new(HashMap::new()),
            account_id,
            region,
            base_url: format!("http://localhost:{port}"),
        }
    }

    fn queue_name_from_url(queue_url: &str) -> Result<String, SqsError> {
        queue_url
            .split('/')
            .next_back()
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| SqsError::NonExistentQueue("Invalid queue URL".into()))
    }

    async fn handle_by_url(&self, queue_url: &str) -> Result<Arc<QueueHandle>, SqsError> {
        let name = Self::queue_name_from_url(queue_url)?;
        let queues = self.queues.lock().await;
        queues.get(&name).cloned().ok_or_else(|| {
            SqsError::NonExistentQueue("The specified queue does not exist.".into())
        })
    }

    /// Deliver detached redrive messages to their dead-letter queues. Called
    /// after the source lock is released; a missing target drops the
    /// message, as the real service does when the DLQ has been deleted.
    async fn apply_redrives(&self, redrives: Vec<Redrive>) {
        for redrive in redrives {
            let target = {
                let queues = self.queues.lock().await;
                queues
                    .values()
                    .find(|h| h.arn == redrive.target_arn)
                    .cloned()
            };
            match target {
                Some(handle) => {
                    let message_id = redrive.message.message_id.clone();
                    {
                        let mut state = handle.state.lock().await;
                        state.push_redriven(redrive.message);
                    }
                    handle.notify.notify_waiters();
                    info!(queue = %handle.name, message_id = %message_id, "redrove message to dead-letter queue");
                }
                None => {
                    warn!(target = %redrive.target_arn, "dead-letter target missing; message dropped");
                }
            }
        }
    }

    pub async fn create_queue(
        &self,
        req: CreateQueueRequest,
    ) -> Result<CreateQueueResponse, SqsError> {
        let attrs = QueueAttributes::from_create(&req.attributes)?;
        attributes::validate_queue_name(&req.queue_name, attrs.fifo_queue)?;

        let mut queues = self.queues.lock().await;

        if let Some(existing) = queues.get(&req.queue_name) {
            let existing_map = {
                let state = existing.state.lock().await;
                state.attributes.to_map()
            };
            for name in COMPARABLE_ATTRIBUTES {
                if let Some(requested) = req.attributes.get(name) {
                    let current = existing_map.get(name).cloned().unwrap_or_default();
                    if *requested != current {
                        return Err(SqsError::QueueAlreadyExists(format!(
                            "A queue named {} already exists with a different value for attribute {name}",
                            req.queue_name
                        )));
                    }
                }
            }
            return Ok(CreateQueueResponse {
                queue_url: existing.url.clone(),
            });
        }

        if let Some(ref rp) = attrs.redrive_policy {
            let target = queues
                .values()
                .find(|h| h.arn == rp.dead_letter_target_arn)
                .cloned()
                .ok_or_else(|| {
                    SqsError::InvalidParameterValue(format!(
                        "Value {} for parameter RedrivePolicy is invalid. Reason: Dead letter target does not exist.",
                        rp.dead_letter_target_arn
                    ))
                })?;
            let target_fifo = target.state.lock().await.attributes.fifo_queue;
            if target_fifo != attrs.fifo_queue {
                return Err(SqsError::InvalidParameterValue(
                    "Value for parameter RedrivePolicy is invalid. Reason: Dead letter target must be of the same queue type as the source queue.".into(),
                ));
            }
        }

        let url = format!("{}/{}/{}", self.base_url, self.account_id, req.queue_name);
        let arn = format!(
            "arn:aws:sqs:{}:{}:{}",
            self.region, self.account_id, req.queue_name
        );
        let mut queue = Queue::new(attrs);
        queue.tags = req.tags;

        let handle = Arc::new(QueueHandle {
            name: req.queue_name.clone(),
            url: url.clone(),
            arn,
            state: Mutex::new(queue),
            notify: Notify::new(),
        });
        queues.insert(req.queue_name.clone(), handle);
        info!(queue = %req.queue_name, url = %url, "created queue");

        Ok(CreateQueueResponse { queue_url: url })
    }

    pub async fn delete_queue(&self, req: DeleteQueueRequest) -> Result<(), SqsError> {
        let name = Self::queue_name_from_url(&req.queue_url)?;
        let mut queues = self.queues.lock().await;
        if queues.remove(&name).is_none() {
            return Err(SqsError::NonExistentQueue(
                "The specified queue does not exist.".into(),
            ));
        }
        info!(queue = %name, "deleted queue");
        Ok(())
    }

    pub async fn get_queue_url(
        &self,
        req: GetQueueUrlRequest,
    ) -> Result<GetQueueUrlResponse, SqsError> {
        let queues = self.queues.lock().await;
        queues
            .get(&req.queue_name)
            .map(|h| GetQueueUrlResponse {
                queue_url: h.url.clone(),
            })
            .ok_or_else(|| {
                SqsError::NonExistentQueue("The specified queue does not exist.".into())
            })
    }

    pub async fn list_queues(
        &self,
        req: ListQueuesRequest,
    ) -> Result<ListQueuesResponse, SqsError> {
        let queues = self.queues.lock().await;
        let mut names: Vec<&String> = queues.keys().collect();
        names.sort();
        if let Some(ref prefix) = req.queue_name_prefix {
            names.retain(|n| n.starts_with(prefix.as_str()));
        }
        let urls: Vec<String> = names.iter().map(|n| queues[*n].url.clone()).collect();
        let (page, next_token) = paginate(urls, req.max_results, req.next_token.as_deref());
        Ok(ListQueuesResponse {
            queue_urls: page,
            next_token,
        })
    }

    pub async fn get_queue_attributes(
        &self,
        req: GetQueueAttributesRequest,
    ) -> Result<GetQueueAttributesResponse, SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let (attributes, redrives) = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            (
                state.get_attributes(&req.attribute_names, &handle.arn),
                redrives,
            )
        };
        self.apply_redrives(redrives).await;
        Ok(GetQueueAttributesResponse { attributes })
    }

    pub async fn set_queue_attributes(
        &self,
        req: SetQueueAttributesRequest,
    ) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let (result, redrives) = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            let result = (|| {
                let mut attrs = req.attributes.clone();
                if let Some(value) = attrs.remove("FifoQueue") {
                    let requested = attributes::parse_bool("FifoQueue", &value)?;
                    if requested != state.attributes.fifo_queue {
                        return Err(SqsError::InvalidAttributeName(
                            "FifoQueue cannot be changed after queue creation".into(),
                        ));
                    }
                }
                state.attributes = state.attributes.with(&attrs)?;
                state.last_modified = now_secs();
                Ok(())
            })();
            (result, redrives)
        };
        self.apply_redrives(redrives).await;
        result
    }

    pub async fn purge_queue(&self, req: PurgeQueueRequest) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        {
            let mut state = handle.state.lock().await;
            state.purge();
        }
        info!(queue = %handle.name, "purged queue");
        Ok(())
    }

    pub async fn send_message(
        &self,
        req: SendMessageRequest,
    ) -> Result<SendMessageResponse, SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let (result, redrives) = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            let result = state.send_message(
                req.message_body,
                req.delay_seconds,
                req.message_attributes,
                req.message_system_attributes,
                req.message_deduplication_id,
                req.message_group_id,
            );
            (result, redrives)
        };
        self.apply_redrives(redrives).await;
        let response = result?;
        handle.notify.notify_waiters();
        Ok(response)
    }

    pub async fn send_message_batch(
        &self,
        req: SendMessageBatchRequest,
    ) -> Result<SendMessageBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        validate_batch_ids(&ids)?;

        let handle = self.handle_by_url(&req.queue_url).await?;
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let redrives = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            for entry in req.entries {
                match state.send_message(
                    entry.message_body,
                    entry.delay_seconds,
                    entry.message_attributes,
                    entry.message_system_attributes,
                    entry.message_deduplication_id,
                    entry.message_group_id,
                ) {
                    Ok(resp) => successful.push(SendMessageBatchResultEntry {
                        id: entry.id,
                        message_id: resp.message_id,
                        md5_of_message_body: resp.md5_of_message_body,
                        md5_of_message_attributes: resp.md5_of_message_attributes,
                        md5_of_message_system_attributes: resp.md5_of_message_system_attributes,
                        sequence_number: resp.sequence_number,
                    }),
                    Err(err) => failed.push(BatchResultErrorEntry {
                        id: entry.id,
                        code: err.code().to_string(),
                        message: err.to_string(),
                        sender_fault: true,
                    }),
                }
            }
            redrives
        };
        self.apply_redrives(redrives).await;
        if !successful.is_empty() {
            handle.notify.notify_waiters();
        }
        Ok(SendMessageBatchResponse { successful, failed })
    }

    pub async fn receive_message(
        &self,
        req: ReceiveMessageRequest,
    ) -> Result<ReceiveMessageResponse, SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let max_count = req.max_number_of_messages.unwrap_or(1).clamp(1, 10) as usize;
        let mut deadline: Option<Instant> = None;

        loop {
            // Created before the availability check so a notification fired
            // between releasing the lock and entering the wait is not lost.
            let notified = handle.notify.notified();
            let (outcome, redrives, default_wait) = {
                let mut state = handle.state.lock().await;
                let redrives = state.reconcile();
                let outcome =
                    state.receive(max_count, req.visibility_timeout, &self.account_id);
                let default_wait = state.attributes.receive_message_wait_time_seconds;
                (outcome, redrives, default_wait)
            };
            self.apply_redrives(redrives).await;
            let outcome = outcome?;

            if !outcome.messages.is_empty() {
                return Ok(ReceiveMessageResponse {
                    messages: filter_received(
                        outcome.messages,
                        &req.attribute_names,
                        &req.message_attribute_names,
                    ),
                });
            }

            let deadline = *deadline.get_or_insert_with(|| {
                let wait_secs = req
                    .wait_time_seconds
                    .map(|w| w.clamp(0, 20))
                    .unwrap_or(default_wait as i32) as u64;
                Instant::now() + Duration::from_secs(wait_secs)
            });

            let now = Instant::now();
            if now >= deadline {
                return Ok(ReceiveMessageResponse {
                    messages: Vec::new(),
                });
            }

            // Wake on a send/redrive notification, on the next time-based
            // transition, or at the poll deadline, whichever comes first.
            let wake = outcome.next_transition.map_or(deadline, |t| t.min(deadline));
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    pub async fn delete_message(&self, req: DeleteMessageRequest) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let (result, redrives) = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            (state.delete_message(&req.receipt_handle), redrives)
        };
        self.apply_redrives(redrives).await;
        result?;
        // Deleting an in-flight FIFO message unlocks its group.
        handle.notify.notify_waiters();
        Ok(())
    }

    pub async fn delete_message_batch(
        &self,
        req: DeleteMessageBatchRequest,
    ) -> Result<DeleteMessageBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        validate_batch_ids(&ids)?;

        let handle = self.handle_by_url(&req.queue_url).await?;
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let redrives = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            for entry in req.entries {
                match state.delete_message(&entry.receipt_handle) {
                    Ok(()) => successful.push(entry.id),
                    Err(err) => failed.push(BatchResultErrorEntry {
                        id: entry.id,
                        code: err.code().to_string(),
                        message: err.to_string(),
                        sender_fault: true,
                    }),
                }
            }
            redrives
        };
        self.apply_redrives(redrives).await;
        if !successful.is_empty() {
            handle.notify.notify_waiters();
        }
        Ok(DeleteMessageBatchResponse { successful, failed })
    }

    pub async fn change_message_visibility(
        &self,
        req: ChangeMessageVisibilityRequest,
    ) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let (result, redrives) = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            (
                state.change_visibility(&req.receipt_handle, req.visibility_timeout),
                redrives,
            )
        };
        self.apply_redrives(redrives).await;
        result?;
        if req.visibility_timeout == 0 {
            handle.notify.notify_waiters();
        }
        Ok(())
    }

    pub async fn change_message_visibility_batch(
        &self,
        req: ChangeMessageVisibilityBatchRequest,
    ) -> Result<ChangeMessageVisibilityBatchResponse, SqsError> {
        let ids: Vec<&str> = req.entries.iter().map(|e| e.id.as_str()).collect();
        validate_batch_ids(&ids)?;

        let handle = self.handle_by_url(&req.queue_url).await?;
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        let mut any_released = false;
        let redrives = {
            let mut state = handle.state.lock().await;
            let redrives = state.reconcile();
            for entry in req.entries {
                match state.change_visibility(&entry.receipt_handle, entry.visibility_timeout) {
                    Ok(()) => {
                        any_released |= entry.visibility_timeout == 0;
                        successful.push(entry.id);
                    }
                    Err(err) => failed.push(BatchResultErrorEntry {
                        id: entry.id,
                        code: err.code().to_string(),
                        message: err.to_string(),
                        sender_fault: true,
                    }),
                }
            }
            redrives
        };
        self.apply_redrives(redrives).await;
        if any_released {
            handle.notify.notify_waiters();
        }
        Ok(ChangeMessageVisibilityBatchResponse { successful, failed })
    }

    pub async fn tag_queue(&self, req: TagQueueRequest) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let mut state = handle.state.lock().await;
        let merged: HashSet<&String> =
            state.tags.keys().chain(req.tags.keys()).collect();
        if merged.len() > MAX_TAGS_PER_QUEUE {
            return Err(SqsError::InvalidParameterValue(format!(
                "A queue can have at most {MAX_TAGS_PER_QUEUE} tags"
            )));
        }
        for (key, value) in req.tags {
            state.tags.insert(key, value);
        }
        Ok(())
    }

    pub async fn untag_queue(&self, req: UntagQueueRequest) -> Result<(), SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let mut state = handle.state.lock().await;
        for key in &req.tag_keys {
            state.tags.remove(key);
        }
        Ok(())
    }

    pub async fn list_queue_tags(
        &self,
        req: ListQueueTagsRequest,
    ) -> Result<ListQueueTagsResponse, SqsError> {
        let handle = self.handle_by_url(&req.queue_url).await?;
        let state = handle.state.lock().await;
        Ok(ListQueueTagsResponse {
            tags: state.tags.clone(),
        })
    }

    pub async fn list_dead_letter_source_queues(
        &self,
        req: ListDeadLetterSourceQueuesRequest,
    ) -> Result<ListDeadLetterSourceQueuesResponse, SqsError> {
        let name = Self::queue_name_from_url(&req.queue_url)?;
        let handles: Vec<Arc<QueueHandle>> = {
            let queues = self.queues.lock().await;
            if !queues.contains_key(&name) {
                return Err(SqsError::NonExistentQueue(
                    "The specified queue does not exist.".into(),
                ));
            }
            queues.values().cloned().collect()
        };
        let target_arn = handles
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.arn.clone())
            .expect("queue present in snapshot");

        let mut source_urls = Vec::new();
        for handle in handles {
            let state = handle.state.lock().await;
            if state
                .attributes
                .redrive_policy
                .as_ref()
                .is_some_and(|rp| rp.dead_letter_target_arn == target_arn)
            {
                source_urls.push(handle.url.clone());
            }
        }
        source_urls.sort();
        let (page, next_token) =
            paginate(source_urls, req.max_results, req.next_token.as_deref());
        Ok(ListDeadLetterSourceQueuesResponse {
            queue_urls: page,
            next_token,
        })
    }
}

fn paginate(
    items: Vec<String>,
    max_results: Option<i32>,
    next_token: Option<&str>,
) -> (Vec<String>, Option<String>) {
    let max = max_results
        .map(|m| m.clamp(1, MAX_LIST_RESULTS as i32) as usize)
        .unwrap_or(MAX_LIST_RESULTS);
    let start = match next_token {
        Some(token) => items
            .iter()
            .position(|item| item.as_str() > token)
            .unwrap_or(items.len()),
        None => 0,
    };
    let page: Vec<String> = items[start..].iter().take(max).cloned().collect();
    let next = if start + max < items.len() {
        page.last().cloned()
    } else {
        None
    };
    (page, next)
}

fn validate_batch_ids(ids: &[&str]) -> Result<(), SqsError> {
    if ids.is_empty() {
        return Err(SqsError::EmptyBatchRequest(
            "The batch request doesn't contain any entries".into(),
        ));
    }
    if ids.len() > MAX_BATCH_ENTRIES {
        return Err(SqsError::TooManyEntriesInBatchRequest(format!(
            "The batch request contains more entries than permissible ({MAX_BATCH_ENTRIES})"
        )));
    }
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty()
            || id.len() > 80
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SqsError::InvalidBatchEntryId(format!(
                "The batch entry id {id} is invalid"
            )));
        }
        if !seen.insert(*id) {
            return Err(SqsError::BatchEntryIdsNotDistinct(format!(
                "The batch entry id {id} is repeated"
            )));
        }
    }
    Ok(())
}

fn filter_received(
    messages: Vec<ReceivedMessage>,
    attribute_names: &Option<Vec<String>>,
    message_attribute_names: &Option<Vec<String>>,
) -> Vec<ReceivedMessage> {
    messages
        .into_iter()
        .map(|mut msg| {
            match attribute_names {
                None => msg.attributes.clear(),
                Some(names) if names.iter().any(|n| n == "All") => {}
                Some(names) => {
                    msg.attributes.retain(|k, _| names.iter().any(|n| n == k));
                }
            }
            match message_attribute_names {
                None => msg.message_attributes.clear(),
                Some(names) if names.iter().any(|n| n == "All") => {}
                Some(names) => {
                    msg.message_attributes.retain(|k, _| {
                        names.iter().any(|n| {
                            n == k
                                || n.strip_suffix(".*")
                                    .is_some_and(|prefix| k.starts_with(prefix))
                        })
                    });
                }
            }
            msg
        })
        .collect()
}
