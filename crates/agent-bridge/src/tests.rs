/// Turn-completion tests driven through a real `EventBus`.
#[cfg(test)]
mod waiter {
    use std::time::Duration;

    use serde_json::json;

    use crate::types::{methods, BusEvent};
    use crate::waiter::{wait_for_tracked, wait_for_turn, TrackedSession, TurnProgress};
    use crate::{AgentError, EventBus};

    fn ev(ws: &str, method: &str, params: serde_json::Value) -> BusEvent {
        BusEvent::new(ws, method, params)
    }

    #[test]
    fn promotion_requires_a_tracked_source() {
        let mut tracked = TrackedSession::new("a");
        assert!(!tracked.promote("x", "y"));
        assert!(tracked.promote("a", "b"));
        assert!(!tracked.promote("a", "b"));
        assert!(tracked.contains("a") && tracked.contains("b"));
    }

    #[tokio::test]
    async fn completes_with_turn_text() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "t1", "text": "{\"summary\":\"ok\"}"})));
        let outcome = wait_for_turn(rx, "ws", "t1", Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.text, "{\"summary\":\"ok\"}");
    }

    #[tokio::test]
    async fn falls_back_to_accumulated_deltas() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev("ws", methods::MESSAGE_DELTA, json!({"threadId": "t1", "delta": "hel"})));
        bus.publish(ev("ws", methods::MESSAGE_DELTA, json!({"threadId": "t1", "delta": "lo"})));
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "t1"})));
        let mut deltas = Vec::new();
        let outcome = wait_for_turn(rx, "ws", "t1", Duration::from_secs(5), |p| {
            if let TurnProgress::Delta(d) = p {
                deltas.push(d);
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.text, "hello");
        assert_eq!(deltas, vec!["hel", "lo"]);
    }

    #[tokio::test]
    async fn follows_promoted_session_id() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev(
            "ws",
            methods::THREAD_STARTED,
            json!({"threadId": "durable", "previousThreadId": "pending-1"}),
        ));
        bus.publish(ev("ws", methods::MESSAGE_DELTA, json!({"threadId": "pending-1", "delta": "a"})));
        bus.publish(ev("ws", methods::MESSAGE_DELTA, json!({"threadId": "durable", "delta": "b"})));
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "durable"})));

        let mut promoted = Vec::new();
        let outcome = wait_for_turn(rx, "ws", "pending-1", Duration::from_secs(5), |p| {
            if let TurnProgress::Promoted { from, to } = p {
                promoted.push((from, to));
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.text, "ab");
        assert_eq!(promoted, vec![("pending-1".to_string(), "durable".to_string())]);
        assert_eq!(outcome.session_ids, vec!["durable", "pending-1"]);
    }

    #[tokio::test]
    async fn ignores_other_workspaces_and_sessions() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev("other", methods::TURN_COMPLETED, json!({"threadId": "t1", "text": "wrong"})));
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "t2", "text": "wrong"})));
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "t1", "text": "right"})));
        let outcome = wait_for_turn(rx, "ws", "t1", Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.text, "right");
    }

    #[tokio::test]
    async fn seeded_ids_all_complete_the_turn() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev("ws", methods::TURN_COMPLETED, json!({"threadId": "t9", "text": "done"})));
        let mut tracked = TrackedSession::new("t1");
        assert!(tracked.track("t9"));
        assert!(!tracked.track("t1"));
        let outcome = wait_for_tracked(rx, "ws", tracked, Duration::from_secs(5), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.session_ids, vec!["t1".to_string(), "t9".to_string()]);
    }

    #[tokio::test]
    async fn error_event_rejects() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        bus.publish(ev("ws", methods::ERROR, json!({"threadId": "t1", "error": {"message": "quota"}})));
        let err = wait_for_turn(rx, "ws", "t1", Duration::from_secs(5), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Turn(ref m) if m == "quota"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_unsubscribes() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        let err = wait_for_turn(rx, "ws", "t1", Duration::from_secs(900), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(d) if d == Duration::from_secs(900)));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
