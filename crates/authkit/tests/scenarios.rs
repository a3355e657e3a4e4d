//! End-to-end behaviour of actions, batches and the helper dispatcher over
//! the in-process transport.

mod common;

use std::sync::Arc;

use authkit::testing::FakeBackend;
use authkit::{Action, ActionReply, AuthStatus, Capabilities, ErrorCode, VariantMap};
use authkit_protocol::HelperEvent;
use authkit_protocol::wire::encode_map;
use common::{HELPER, Setup, next_performed};

// ============================================================================
// Validity and status
// ============================================================================

mod validity {
    use super::*;

    #[test]
    fn test_existence_check_decides_validity() {
        let backend = FakeBackend::helper_side()
            .with_capabilities(
                Capabilities::AUTHORIZE_FROM_HELPER | Capabilities::CHECK_ACTION_EXISTENCE,
            )
            .with_existing(["org.example.read"]);
        let setup = Setup::new(backend, FakeBackend::helper_side());

        let action = setup.registry.action("org.example.read");
        assert!(action.is_valid());
        assert_eq!(action.status(), AuthStatus::AuthRequired);

        // Grammatically fine, but the backend does not know it.
        assert!(!setup.registry.action("org.example.write").is_valid());
    }

    #[test]
    fn test_grammar_decides_validity_without_existence_check() {
        let setup = Setup::helper_side();
        let names = [
            ("org.example.read", true),
            ("read", true),
            ("", false),
            ("org.example.", false),
            (".org", false),
            ("org.Example", false),
            ("org.ex-ample", false),
            ("org.example2", false),
        ];
        for (name, valid) in names {
            assert_eq!(setup.registry.action(name).is_valid(), valid, "{name:?}");
        }
        let long = "a".repeat(256);
        assert!(!setup.registry.action(&long).is_valid());
    }

    #[test]
    fn test_status_changes_reach_subscribers() {
        let setup = Setup::helper_side();
        let mut statuses = setup.registry.subscribe_status("org.example.read");
        assert!(setup.client.notify("org.example.read", AuthStatus::Authorized));
        assert_eq!(statuses.try_recv().unwrap(), AuthStatus::Authorized);
    }
}

// ============================================================================
// Single actions
// ============================================================================

mod execute {
    use super::*;

    #[tokio::test]
    async fn test_handler_runs_once_and_reply_is_forwarded() {
        let setup = Setup::helper_side();
        let action = setup
            .registry
            .action("org.example.read")
            .with_helper(HELPER)
            .with_argument("path", "/etc/hostname")
            .with_argument("offset", 0);

        let reply = action.execute().await;

        let expected = ActionReply::success()
            .with_data("content", "hello")
            .with_data("size", 5);
        assert_eq!(reply, expected);
        assert_eq!(reply.encode().unwrap(), expected.encode().unwrap());

        assert_eq!(setup.recorder.calls(), 1);
        let mut args = VariantMap::new();
        args.insert("path".to_string(), "/etc/hostname".into());
        args.insert("offset".to_string(), 0.into());
        assert_eq!(setup.recorder.args(), vec![args]);
        assert_eq!(setup.dispatcher.current_action(), None);
    }

    #[tokio::test]
    async fn test_helper_denies_unauthorized_caller() {
        let helper = FakeBackend::helper_side().deny_caller_for("org.example.read");
        let setup = Setup::new(FakeBackend::helper_side(), helper);

        let reply = setup
            .registry
            .action("org.example.read")
            .with_helper(HELPER)
            .execute()
            .await;

        assert_eq!(reply.authkit_error(), Some(ErrorCode::AuthorizationDenied));
        assert_eq!(setup.recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_is_no_such_action() {
        let setup = Setup::helper_side();
        let reply = setup
            .registry
            .action("org.example.write")
            .with_helper(HELPER)
            .execute()
            .await;
        assert_eq!(reply.authkit_error(), Some(ErrorCode::NoSuchAction));
    }

    #[tokio::test]
    async fn test_client_denial_never_contacts_helper() {
        let client =
            FakeBackend::client_side().with_authorize("org.example.read", AuthStatus::Denied);
        let setup = Setup::new(client, FakeBackend::helper_side());

        let reply = setup
            .registry
            .action("org.example.read")
            .with_helper(HELPER)
            .execute()
            .await;

        assert_eq!(reply.authkit_error(), Some(ErrorCode::AuthorizationDenied));
        assert_eq!(setup.recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_authorize_asks_helper_backend() {
        let helper = FakeBackend::helper_side().deny_caller_for("org.example.write");
        let setup = Setup::new(FakeBackend::helper_side(), helper);

        let read = setup.registry.action("org.example.read").with_helper(HELPER);
        let write = setup.registry.action("org.example.write").with_helper(HELPER);
        assert_eq!(read.authorize().await, AuthStatus::Authorized);
        assert_eq!(write.authorize().await, AuthStatus::Denied);
        assert_eq!(setup.recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_events_for_single_action() {
        let setup = Setup::helper_side();
        let mut events = setup.subscribe("org.example.echo");

        let reply = setup
            .registry
            .action("org.example.echo")
            .with_helper(HELPER)
            .with_argument("x", 1)
            .execute()
            .await;
        assert!(reply.succeeded());

        assert_eq!(events.recv().await, Some(HelperEvent::Started));
        assert_eq!(events.recv().await, Some(HelperEvent::Performed(reply)));
    }
}

// ============================================================================
// Batches
// ============================================================================

mod batches {
    use super::*;

    #[tokio::test]
    async fn test_mixed_batch_sends_only_authorized() {
        let client =
            FakeBackend::client_side().with_authorize("org.example.echo", AuthStatus::Denied);
        let setup = Setup::new(client, FakeBackend::helper_side());
        let mut read_events = setup.subscribe("org.example.read");
        let mut echo_events = setup.subscribe("org.example.echo");

        let actions = vec![
            setup.registry.action("org.example.read").with_argument("n", 1),
            setup.registry.action("org.example.echo"),
        ];
        let mut denied = Vec::new();
        let sent =
            Action::execute_actions(&setup.registry, &actions, Some(&mut denied), HELPER).await;

        assert!(sent);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].name(), "org.example.echo");

        let reply = next_performed(&mut read_events).await;
        assert!(reply.succeeded());
        assert_eq!(setup.recorder.calls(), 1);
        assert!(echo_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_all_denied_batch_is_not_sent() {
        let client = FakeBackend::client_side()
            .with_authorize("org.example.read", AuthStatus::Denied)
            .with_authorize("org.example.echo", AuthStatus::UserCancelled);
        let setup = Setup::new(client, FakeBackend::helper_side());
        let mut events = setup.subscribe("org.example.read");

        let actions = vec![
            setup.registry.action("org.example.read"),
            setup.registry.action("org.example.echo"),
        ];
        let mut denied = Vec::new();
        let sent =
            Action::execute_actions(&setup.registry, &actions, Some(&mut denied), HELPER).await;

        assert!(!sent);
        assert_eq!(denied.len(), 2);
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
        assert_eq!(setup.recorder.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_members_are_denied_without_output_list() {
        let setup = Setup::helper_side();
        let actions = vec![setup.registry.action("Not Valid")];
        assert!(!Action::execute_actions(&setup.registry, &actions, None, HELPER).await);
    }

    #[tokio::test]
    async fn test_batch_members_run_in_order() {
        let setup = Setup::helper_side();
        let mut read_events = setup.subscribe("org.example.read");
        let mut echo_events = setup.subscribe("org.example.echo");

        let actions = vec![
            setup.registry.action("org.example.read").with_argument("n", 1),
            setup.registry.action("org.example.echo").with_argument("n", 2),
            setup.registry.action("org.example.read").with_argument("n", 3),
        ];
        assert!(Action::execute_actions(&setup.registry, &actions, None, HELPER).await);

        next_performed(&mut read_events).await;
        let echoed = next_performed(&mut echo_events).await;
        next_performed(&mut read_events).await;

        assert_eq!(echoed.data().get("n"), Some(&2.into()));
        let seen: Vec<_> = setup
            .recorder
            .args()
            .iter()
            .map(|args| args.get("n").and_then(|v| v.as_i64()))
            .collect();
        assert_eq!(seen, vec![Some(1), Some(3)]);
    }

    #[tokio::test]
    async fn test_unknown_helper_batch_is_not_sent() {
        let setup = Setup::helper_side();
        let actions = vec![setup.registry.action("org.example.read")];
        assert!(!Action::execute_actions(&setup.registry, &actions, None, "org.missing").await);
    }
}

// ============================================================================
// One action at a time
// ============================================================================

mod busy {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_second_action_is_rejected_while_busy() {
        let setup = Setup::helper_side();
        let slow = setup.registry.action("org.example.slow").with_helper(HELPER);
        let running = tokio::spawn(async move { slow.execute().await });
        setup.wait_until_running("org.example.slow").await;

        let args = encode_map(&VariantMap::new()).unwrap();
        for name in ["org.example.read", "org.example.slow", "x"] {
            let blob = setup
                .dispatcher
                .perform_action(name, b"caller", &args)
                .await
                .unwrap();
            let reply = ActionReply::decode(&blob).unwrap();
            assert_eq!(reply.authkit_error(), Some(ErrorCode::HelperBusy), "{name}");
            assert_eq!(
                setup.dispatcher.current_action().as_deref(),
                Some("org.example.slow")
            );
            assert!(!setup.dispatcher.has_to_stop_action());
        }
        assert_eq!(setup.recorder.calls(), 0);

        assert!(setup.dispatcher.stop_action("org.example.slow"));
        let reply = running.await.unwrap();
        assert_eq!(reply.error_description(), Some("stopped"));
        assert_eq!(setup.dispatcher.current_action(), None);

        // The slot is free again.
        let reply = setup
            .registry
            .action("org.example.read")
            .with_helper(HELPER)
            .execute()
            .await;
        assert!(reply.succeeded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_batch_while_busy_reports_helper_busy() {
        let setup = Setup::helper_side();
        let slow = setup.registry.action("org.example.slow").with_helper(HELPER);
        let running = tokio::spawn(async move { slow.execute().await });
        setup.wait_until_running("org.example.slow").await;

        let mut events = setup.subscribe("org.example.read");
        let actions = vec![setup.registry.action("org.example.read")];
        assert!(Action::execute_actions(&setup.registry, &actions, None, HELPER).await);
        let reply = next_performed(&mut events).await;
        assert_eq!(reply.authkit_error(), Some(ErrorCode::HelperBusy));
        assert_eq!(setup.recorder.calls(), 0);

        setup.dispatcher.stop_action("org.example.slow");
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_helper_without_responder_has_no_responder() {
        let dispatcher =
            authkit::HelperDispatcher::new(HELPER, Arc::new(FakeBackend::helper_side())).unwrap();
        let args = encode_map(&VariantMap::new()).unwrap();
        let blob = dispatcher
            .perform_action("org.example.read", b"caller", &args)
            .await
            .unwrap();
        assert_eq!(
            ActionReply::decode(&blob).unwrap().authkit_error(),
            Some(ErrorCode::NoResponder)
        );
        assert_eq!(dispatcher.current_action(), None);
    }
}
