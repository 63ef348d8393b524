#[cfg(test)]
mod tests {
    use foreman_config::ForemanConfig;
    use foreman_core::{Context, ForemanError, Role, StreamEvent, ToolCall};
    use foreman_llm::MockModel;
    use foreman_memory::{CheckpointStore, EntityKind, EntityStore, InMemoryStore, SqliteStore};
    use foreman_runtime::apps::{self, AppDeps};
    use foreman_runtime::ChatService;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        model: Arc<MockModel>,
        store: Arc<InMemoryStore>,
        service: ChatService,
    }

    fn harness(model: MockModel) -> Harness {
        harness_with(model, |deps| deps)
    }

    fn harness_with(model: MockModel, tune: impl FnOnce(AppDeps) -> AppDeps) -> Harness {
        let model = Arc::new(model);
        let store = Arc::new(InMemoryStore::new());
        let deps = tune(AppDeps::new(model.clone(), store.clone()));
        let service = ChatService::new(store.clone(), store.clone());
        for app in apps::builtin(&deps) {
            service.add_app(app);
        }
        Harness {
            model,
            store,
            service,
        }
    }

    async fn iiot_session(h: &Harness) -> Context {
        let session = h.service.create_session("iiot").await.unwrap();
        Context::for_session(session.id).with_customer("c1")
    }

    fn roles(messages: &[foreman_core::Message]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    // ── Apps and sessions ──────────────────────────────────────

    #[tokio::test]
    async fn test_builtin_apps_listed() {
        let h = harness(MockModel::new());
        let ids: Vec<String> = h.service.list_apps().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["assistant", "iiot"]);
        assert!(h.service.find_app("iiot").is_some());
        assert!(h.service.find_app("nope").is_none());
    }

    #[tokio::test]
    async fn test_create_session_unknown_app() {
        let h = harness(MockModel::new());
        let err = h.service.create_session("nope").await.unwrap_err();
        assert!(matches!(err, ForemanError::UnknownApp(_)));
        assert!(h.service.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preconditions_fail_before_any_model_call() {
        let h = harness(MockModel::new().with_response("never"));

        let err = h.service.run_turn(&Context::default(), "hi").await.unwrap_err();
        assert!(matches!(err, ForemanError::MissingSession));

        let err = h
            .service
            .run_turn(&Context::for_session("missing"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::SessionNotFound(_)));

        let err = h
            .service
            .stream_turn(&Context::for_session("missing"), "hi")
            .await
            .err()
            .unwrap();
        assert!(err.is_precondition());

        assert!(h.model.decide_requests.lock().is_empty());
        assert_eq!(h.model.pending_decisions(), 1);
    }

    #[tokio::test]
    async fn test_service_from_config() {
        let mut config = ForemanConfig::default();
        config.model.provider = "mock".into();
        config.memory.backend = "memory".into();
        let service = ChatService::from_config(&config).unwrap();
        assert_eq!(service.list_apps().len(), 2);

        let session = service.create_session("assistant").await.unwrap();
        let reply = service
            .run_turn(&Context::for_session(session.id), "hello")
            .await
            .unwrap();
        assert_eq!(reply, "(mock: no more queued responses)");

        config.agent.window_unit = "pages".into();
        assert!(matches!(
            ChatService::from_config(&config),
            Err(ForemanError::ConfigValidation { .. })
        ));
    }

    // ── Turns ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_customer_update_turn() {
        let h = harness(
            MockModel::new()
                .with_route("update_customer", "customer name is Acme")
                .with_extraction(json!({"name": "Acme"}))
                .with_response("Saved Acme as the customer."),
        );
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "Customer is Acme").await.unwrap();
        assert_eq!(reply, "Saved Acme as the customer.");

        let customer = h.store.find(EntityKind::Customer, "c1").await.unwrap().unwrap();
        assert_eq!(customer, json!({"customer_id": "c1", "name": "Acme"}));

        let session_id = ctx.session_id.as_deref().unwrap();
        let state = h.store.load(session_id).await.unwrap();
        assert_eq!(roles(&state.messages), vec![Role::Human, Role::Ai, Role::Tool, Role::Ai]);
        assert_eq!(state.messages[2].content, "updated customer");
        assert_eq!(
            state.messages[2].tool_call_id.as_deref(),
            Some(state.messages[1].tool_calls[0].id.as_str())
        );

        // The route decision has no content and is hidden from listings
        let visible = h.service.list_messages(session_id).await.unwrap();
        assert_eq!(roles(&visible), vec![Role::Human, Role::Tool, Role::Ai]);
    }

    #[tokio::test]
    async fn test_supervisor_sees_updated_snapshot() {
        let h = harness(
            MockModel::new()
                .with_route("update_customer", "")
                .with_extraction(json!({"name": "Acme"}))
                .with_response("ok"),
        );
        let ctx = iiot_session(&h).await;
        h.service.run_turn(&ctx, "Customer is Acme").await.unwrap();

        let requests = h.model.decide_requests.lock();
        assert!(requests[0].system.contains("<customer>\nNone\n</customer>"));
        assert!(requests[1].system.contains("\"Acme\""));
    }

    #[tokio::test]
    async fn test_second_tool_call_ignored() {
        let first = ToolCall::new(
            "RouteIntent",
            json!({"route": "update_customer", "supervisor_message": "name is Acme"}),
        );
        let second = ToolCall::new("RouteIntent", json!({"route": "nonexistent"}));
        let h = harness(
            MockModel::new()
                .with_tool_calls(vec![first.clone(), second])
                .with_extraction(json!({"name": "Acme"}))
                .with_response("Done."),
        );
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "Customer is Acme").await.unwrap();
        assert_eq!(reply, "Done.");

        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(roles(&state.messages), vec![Role::Human, Role::Ai, Role::Tool, Role::Ai]);
        assert_eq!(state.messages[2].tool_call_id.as_deref(), Some(first.id.as_str()));
        assert_eq!(state.messages[2].content, "updated customer");
        assert_eq!(h.model.extract_requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_recovers() {
        let h = harness(
            MockModel::new()
                .with_route("nonexistent", "")
                .with_response("Sorry, I cannot do that."),
        );
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "do the thing").await.unwrap();
        assert_eq!(reply, "Sorry, I cannot do that.");

        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(state.messages[2].content, "error: unknown route nonexistent");
        assert_eq!(state.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_nested_survey_agent_updates_survey() {
        let h = harness(
            MockModel::new()
                .with_route("survey", "record the factory name")
                .with_bare_route("survey")
                .with_extraction(json!({"factory_name": "Plant 1"}))
                .with_response("Recorded the factory name.")
                .with_response("The survey now names Plant 1."),
        );
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "The factory is Plant 1").await.unwrap();
        assert_eq!(reply, "The survey now names Plant 1.");

        let survey = h.store.find(EntityKind::SurveyFactory, "c1").await.unwrap().unwrap();
        assert_eq!(survey["factory_name"], "Plant 1");
        assert_eq!(survey["customer_id"], "c1");

        // The nested router got the supervisor's instruction and not the
        // decision that routed to it
        let requests = h.model.decide_requests.lock();
        assert!(requests[1].system.ends_with(
            "Please review the following message from the supervisor agent: record the factory name"
        ));
        assert_eq!(requests[1].decision.name, "UpdateMemory");
        assert!(requests[1].messages.iter().all(|m| m.tool_calls.is_empty()));

        // Only the top-level exchange is checkpointed
        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(roles(&state.messages), vec![Role::Human, Role::Ai, Role::Tool, Role::Ai]);
        assert_eq!(state.messages[2].content, "Recorded the factory name.");
    }

    #[tokio::test]
    async fn test_worker_failure_is_contained() {
        let h = harness(
            MockModel::new()
                .with_route("update_customer", "")
                .with_extraction_error("quota exhausted")
                .with_response("I could not save that."),
        );
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "Customer is Acme").await.unwrap();
        assert_eq!(reply, "I could not save that.");

        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(state.messages[2].content, "error: model error: quota exhausted");
        assert!(h.store.find(EntityKind::Customer, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_customer_scope_is_contained() {
        let h = harness(
            MockModel::new()
                .with_route("update_customer", "")
                .with_response("I need to know which customer."),
        );
        let session = h.service.create_session("iiot").await.unwrap();
        let ctx = Context::for_session(session.id.clone());

        h.service.run_turn(&ctx, "Customer is Acme").await.unwrap();
        let state = h.store.load(&session.id).await.unwrap();
        assert!(state.messages[2].content.starts_with("error: "));
        assert!(state.messages[2].content.contains("customer_id"));
        assert!(h.model.extract_requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_extraction_writes_nothing() {
        let h = harness(
            MockModel::new()
                .with_route("update_customer", "")
                .with_extraction(json!({"status": "bankrupt"}))
                .with_response("That status is not valid."),
        );
        let ctx = iiot_session(&h).await;

        h.service.run_turn(&ctx, "Mark them bankrupt").await.unwrap();
        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert!(state.messages[2].content.starts_with("error: invalid Customer"));
        assert!(h.store.find(EntityKind::Customer, "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_supervisor_failure_becomes_diagnostic() {
        let h = harness(MockModel::new().with_error("HTTP 503: unavailable"));
        let ctx = iiot_session(&h).await;

        let reply = h.service.run_turn(&ctx, "hello").await.unwrap();
        assert_eq!(reply, "error: model error: HTTP 503: unavailable");

        // The human message was committed before the failure
        let visible = h
            .service
            .list_messages(ctx.session_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].content, "hello");
    }

    #[tokio::test]
    async fn test_cycle_limit_is_fatal() {
        let h = harness_with(
            MockModel::new()
                .with_route("nonexistent", "")
                .with_route("nonexistent", "")
                .with_route("nonexistent", ""),
            |deps| deps.with_max_cycles(2),
        );
        let ctx = iiot_session(&h).await;

        let err = h.service.run_turn(&ctx, "loop").await.unwrap_err();
        assert!(matches!(err, ForemanError::CycleLimitExceeded { limit: 2 }));
        assert_eq!(h.model.pending_decisions(), 1);
    }

    #[tokio::test]
    async fn test_turns_on_one_session_are_serialized() {
        let h = harness(MockModel::new().with_response("first").with_response("second"));
        let ctx = iiot_session(&h).await;

        let (a, b) = tokio::join!(
            h.service.run_turn(&ctx, "one"),
            h.service.run_turn(&ctx, "two")
        );
        a.unwrap();
        b.unwrap();

        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(roles(&state.messages), vec![Role::Human, Role::Ai, Role::Human, Role::Ai]);
    }

    #[tokio::test]
    async fn test_assistant_remembers_triples() {
        let h = harness(
            MockModel::new()
                .with_route("remember", "")
                .with_extraction(json!({"triples": [
                    {"subject": "line 2", "predicate": "uses", "object": "modbus_tcp"}
                ]}))
                .with_response("Noted."),
        );
        let session = h.service.create_session("assistant").await.unwrap();
        let ctx = Context::for_session(session.id).with_workspace("w1");

        h.service.run_turn(&ctx, "Line 2 talks Modbus TCP").await.unwrap();
        let knowledge = h.store.find(EntityKind::Triple, "w1").await.unwrap().unwrap();
        assert_eq!(knowledge["workspace_id"], "w1");
        assert_eq!(knowledge["triples"][0]["object"], "modbus_tcp");
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreman.db");

        let session_id = {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let model = Arc::new(MockModel::new().with_response("hi there"));
            let service = ChatService::new(store.clone(), store.clone());
            for app in apps::builtin(&AppDeps::new(model, store.clone())) {
                service.add_app(app);
            }
            let session = service.create_session("assistant").await.unwrap();
            service
                .run_turn(&Context::for_session(session.id.clone()), "hello")
                .await
                .unwrap();
            session.id
        };

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let service = ChatService::new(store.clone(), store.clone());
        for app in apps::builtin(&AppDeps::new(Arc::new(MockModel::new()), store.clone())) {
            service.add_app(app);
        }
        let messages = service.list_messages(&session_id).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there"]);
    }

    // ── Streaming ──────────────────────────────────────────────

    fn path(event: &StreamEvent) -> Vec<&str> {
        event.node_path.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_stream_marks_node_boundaries() {
        let h = harness(
            MockModel::new()
                .with_route("survey", "ask about areas")
                .with_response("Which area is it in?")
                .with_response("I asked the survey agent."),
        );
        let ctx = iiot_session(&h).await;

        let events: Vec<StreamEvent> = h
            .service
            .stream_turn(&ctx, "Add a CNC machine")
            .await
            .unwrap()
            .collect()
            .await;

        // Boundaries exactly where the node path changes
        for (i, event) in events.iter().enumerate() {
            let changed = i == 0 || events[i - 1].node_path != event.node_path;
            assert_eq!(event.is_boundary, changed, "event {i}");
        }

        let nested: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| path(e) == ["supervisor", "survey_agent"])
            .collect();
        assert!(nested[0].is_boundary);
        let nested_text: String = nested.iter().map(|e| e.content_delta.as_str()).collect();
        assert_eq!(nested_text, "Which area is it in?");

        let tool = events.iter().find(|e| e.role == Role::Tool).unwrap();
        assert_eq!(path(tool), ["supervisor"]);
        assert!(tool.is_boundary);
        assert_eq!(tool.content_delta, "Which area is it in?");

        // The supervisor's decision arrives as tool-call deltas first
        assert_eq!(path(&events[0]), ["supervisor"]);
        assert!(!events[0].tool_call_deltas.is_empty());

        let last: String = events
            .iter()
            .skip_while(|e| e.role != Role::Tool)
            .skip(1)
            .map(|e| e.content_delta.as_str())
            .collect();
        assert_eq!(last, "I asked the survey agent.");
        assert!(events.iter().all(|e| !e.is_diagnostic()));

        let state = h.store.load(ctx.session_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(state.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_stream_failure_ends_with_diagnostic() {
        let h = harness(MockModel::new().with_error("connection reset"));
        let ctx = iiot_session(&h).await;

        let events: Vec<StreamEvent> = h
            .service
            .stream_turn(&ctx, "hello")
            .await
            .unwrap()
            .collect()
            .await;

        let last = events.last().unwrap();
        assert!(last.is_diagnostic());
        assert!(last.is_boundary);
        assert!(last.node_path.is_empty());
        assert_eq!(last.content_delta, "error: model error: connection reset");
    }
}
