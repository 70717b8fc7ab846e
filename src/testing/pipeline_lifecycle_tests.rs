//! Scenario tests for batch futures: cancellation, timeouts, transport
//! failures and node failover.

#[cfg(test)]
mod tests {
    use super::super::{init_tracing, request_text, respond, RecordingSink};
    use crate::client::CollectionClient;
    use crate::collection::{PipelineBatch, StringTranscoder};
    use crate::config::ClientConfig;
    use crate::error::Error;
    use crate::node::MemcachedNode;
    use crate::operation::{CancelOnTimeout, Operation, OperationState, StatusCode};
    use crate::pipeline::NodeQueueSink;
    use bytes::BytesMut;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn setup(config: ClientConfig) -> (CollectionClient, Arc<RecordingSink>) {
        init_tracing();
        let sink = RecordingSink::new();
        let client = CollectionClient::new(config, sink.clone()).unwrap();
        (client, sink)
    }

    fn list_batch(client: &CollectionClient, keys: &[&str]) -> PipelineBatch {
        let mut pipe = client.pipeline::<String>(Arc::new(StringTranscoder::new()));
        for key in keys {
            pipe.lop_insert(key, -1, &"item".to_string(), None).unwrap();
        }
        pipe.build()
    }

    #[test]
    fn test_caller_cancel_resolves_and_cancels_operations() {
        let (client, sink) = setup(ClientConfig::default());
        let n1 = Arc::new(MemcachedNode::new("10.0.0.1:11211"));
        client.add_node(n1.clone());

        let future = client.execute(list_batch(&client, &["l1", "l2"])).unwrap();
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert!(matches!(future.get(), Err(Error::Cancelled(_))));

        let ops = sink.take_for(&n1);
        assert_eq!(ops[0].state(), OperationState::Cancelled);
        assert_eq!(client.in_flight(), 0);
        assert_eq!(client.metrics().snapshot().operations_cancelled, 1);

        // a late reply is swallowed without touching the future
        let mut buf = BytesMut::from(&b"RESPONSE 2\r\nSTORED\r\nSTORED\r\nEND\r\n"[..]);
        assert!(ops[0].read_from_buffer(&mut buf).unwrap());
        assert!(future.is_cancelled());
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let (client, sink) = setup(ClientConfig::default());
        client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));

        let future = client.execute(list_batch(&client, &["l"])).unwrap();
        let (_, op) = sink.take().remove(0);
        respond(&op, "RESPONSE 1\r\nSTORED\r\nEND\r\n").unwrap();

        assert!(!future.cancel());
        assert!(!future.is_cancelled());
        assert!(future.get().unwrap().is_all_success());
    }

    #[test]
    fn test_submit_failure_marks_commands_cancelled() {
        let (client, sink) = setup(ClientConfig::default());
        client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));
        sink.reject_submissions(true);

        let future = client.execute(list_batch(&client, &["a", "b"])).unwrap();
        assert!(future.is_done());

        let result = future.get().unwrap();
        assert_eq!(result.failures().len(), 2);
        assert_eq!(result.status(0).unwrap().code, StatusCode::Cancelled);
        assert!(result.status(0).unwrap().message.contains("unreachable"));
        assert_eq!(future.status().unwrap().code, StatusCode::FailedEnd);
    }

    #[test]
    fn test_one_failed_node_does_not_cancel_siblings() {
        let (client, sink) = setup(ClientConfig::default());
        let nodes: Vec<_> = (1..=3)
            .map(|i| Arc::new(MemcachedNode::new(format!("10.0.0.{}:11211", i))))
            .collect();
        client.update_nodes(nodes.clone());

        let keys: Vec<String> = (0..30).map(|i| format!("list:{}", i)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let future = client.execute(list_batch(&client, &key_refs)).unwrap();

        let submissions = sink.take();
        assert!(submissions.len() > 1);

        // the first node's connection drops; the others answer normally
        let (_, dropped) = &submissions[0];
        dropped.cancel("connection reset");
        for (_, op) in &submissions[1..] {
            let count = request_text(op).matches("lop insert").count();
            let reply = format!("RESPONSE {}\r\n{}END\r\n", count, "STORED\r\n".repeat(count));
            respond(op, &reply).unwrap();
        }

        let result = future.get().unwrap();
        let cancelled = result
            .statuses()
            .iter()
            .filter(|s| s.code == StatusCode::Cancelled)
            .count();
        let stored = result
            .statuses()
            .iter()
            .filter(|s| s.code == StatusCode::Stored)
            .count();
        assert!(cancelled > 0);
        assert_eq!(cancelled + stored, 30);
        assert!(result
            .statuses()
            .iter()
            .filter(|s| s.code == StatusCode::Cancelled)
            .all(|s| s.message.contains("connection reset")));
    }

    #[test]
    fn test_pipe_error_fails_remaining_commands() {
        let (client, sink) = setup(ClientConfig::default());
        client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));

        let future = client.execute(list_batch(&client, &["a", "b", "c"])).unwrap();
        let (_, op) = sink.take().remove(0);
        respond(&op, "RESPONSE 1\r\nSTORED\r\nPIPE_ERROR command overflow\r\n").unwrap();

        let result = future.get().unwrap();
        assert_eq!(result.status(0).unwrap().code, StatusCode::Stored);
        assert_eq!(result.status(1).unwrap().code, StatusCode::PipeError);
        assert_eq!(result.status(2).unwrap().message, "command overflow");
    }

    #[test]
    fn test_late_reply_resolves_as_timeout() {
        let config = ClientConfig::new().with_op_timeout(Duration::from_millis(30));
        let (client, sink) = setup(config);
        let n1 = Arc::new(MemcachedNode::new("10.0.0.1:11211"));
        client.add_node(n1.clone());

        let future = client.execute(list_batch(&client, &["slow"])).unwrap();
        thread::sleep(Duration::from_millis(60));

        let (_, op) = sink.take().remove(0);
        respond(&op, "RESPONSE 1\r\nSTORED\r\nEND\r\n").unwrap();

        assert_eq!(future.get().unwrap_err(), Error::Timeout);
        assert_eq!(client.metrics().snapshot().batches_timed_out, 1);
        assert_eq!(client.metrics().snapshot().batches_completed, 0);
        assert_eq!(n1.continuous_timeouts(), 1);
    }

    #[test]
    fn test_get_timeout_with_cancel_policy() {
        let config = ClientConfig::new().with_op_timeout(Duration::from_millis(20));
        let (client, sink) = setup(config);
        let n1 = Arc::new(MemcachedNode::new("10.0.0.1:11211"));
        client.add_node(n1.clone());

        let future = client
            .execute_with_policy(list_batch(&client, &["a"]), Arc::new(CancelOnTimeout))
            .unwrap();
        assert_eq!(future.get().unwrap_err(), Error::Timeout);

        let (_, op) = sink.take().remove(0);
        assert_eq!(op.state(), OperationState::Cancelled);
        assert_eq!(n1.continuous_timeouts(), 1);
        assert_eq!(client.in_flight(), 0);
    }

    #[test]
    fn test_failover_moves_queued_batch() {
        init_tracing();
        let client =
            CollectionClient::new(ClientConfig::default(), Arc::new(NodeQueueSink)).unwrap();
        let primary = Arc::new(MemcachedNode::new("10.0.0.1:11211"));
        let standby = Arc::new(MemcachedNode::new("10.0.0.2:11211"));
        client.add_node(primary.clone());

        let future = client.execute(list_batch(&client, &["l1", "l2"])).unwrap();
        assert_eq!(primary.input_queue_len(), 1);

        assert_eq!(primary.move_operations_to(&standby), 1);
        assert_eq!(standby.write_queue_len(), 1);

        let op = standby.take_write_op().unwrap();
        assert_eq!(op.handling_node().unwrap().name(), "10.0.0.2:11211");
        assert!(request_text(&op).starts_with("PIPE 2\r\nlop insert l1 -1 4\r\nitem\r\n"));
        op.write_complete();

        let read_op = standby.current_read_op().unwrap();
        let mut buf = BytesMut::from(&b"RESPONSE 2\r\nSTORED\r\nSTORED\r\nEND\r\n"[..]);
        assert!(read_op.read_from_buffer(&mut buf).unwrap());
        standby.complete_read_op();

        assert!(future.get().unwrap().is_all_success());
        assert_eq!(standby.read_queue_len(), 0);
    }

    #[tokio::test]
    async fn test_await_batch_answered_from_another_thread() {
        let (client, sink) = setup(ClientConfig::default());
        client.add_node(Arc::new(MemcachedNode::new("10.0.0.1:11211")));

        let future = client.execute(list_batch(&client, &["a", "b"])).unwrap();
        let responder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let (_, op) = sink.take().remove(0);
            respond(&op, "RESPONSE 2\r\nSTORED\r\n").unwrap();
            respond_tail(&op);
        });

        let result = future.wait().await.unwrap();
        responder.join().unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.is_all_success());
    }

    fn respond_tail(op: &Arc<dyn Operation>) {
        let mut buf = BytesMut::from(&b"STORED\r\nEND\r\n"[..]);
        assert!(op.read_from_buffer(&mut buf).unwrap());
    }
}
