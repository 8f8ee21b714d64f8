//! Property-based tests for the conversation store
//!
//! These drive the store with arbitrary operation sequences against the fake
//! service and check the view invariants after every step.

use super::*;
use crate::api::Role;
use crate::testing::{FakeApi, Op};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum StoreOp {
    Switch(usize),
    SwitchNone,
    Append(String),
    Clear,
    Refresh,
    DeleteActive,
    ActivateNew,
}

fn arb_store_op(conversations: usize) -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => (0..conversations).prop_map(StoreOp::Switch),
        1 => Just(StoreOp::SwitchNone),
        2 => "[a-z ]{1,12}".prop_map(StoreOp::Append),
        1 => Just(StoreOp::Clear),
        1 => Just(StoreOp::Refresh),
        1 => Just(StoreOp::DeleteActive),
        1 => Just(StoreOp::ActivateNew),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn seeded(conversations: usize) -> (Arc<FakeApi>, Vec<String>) {
    let api = Arc::new(FakeApi::new());
    let user = api.add_user("ana", "ana@example.com");
    let ids = (0..conversations)
        .map(|i| {
            let first = format!("first of {i}");
            let second = format!("second of {i}");
            api.seed_conversation(
                &user.id,
                &format!("c{i}"),
                &[(Role::User, first.as_str()), (Role::Assistant, second.as_str())],
            )
            .id
        })
        .collect();
    (api, ids)
}

proptest! {
    /// No active conversation means an empty transcript, nothing is left
    /// loading once every call has returned, and local messages stay on
    /// screen until the transcript is switched away or cleared.
    #[test]
    fn prop_view_invariants_hold(ops in proptest::collection::vec(arb_store_op(3), 1..25)) {
        let rt = runtime();
        rt.block_on(async {
            let (api, ids) = seeded(3);
            let store = ConversationStore::new(api.clone());
            let mut fresh = 0;
            let mut local: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    StoreOp::Switch(i) => {
                        let outcome = store.set_active(Some(&ids[i])).await.unwrap();
                        if outcome != ReloadOutcome::Unchanged {
                            local.clear();
                        }
                    }
                    StoreOp::SwitchNone => {
                        store.set_active(None).await.unwrap();
                        local.clear();
                    }
                    StoreOp::Append(text) => {
                        if let Some(active) = store.active_conversation_id() {
                            store.append(Message::local(active, Role::User, text.clone()));
                            local.push(text);
                        }
                    }
                    StoreOp::Clear => {
                        store.clear();
                        local.clear();
                    }
                    StoreOp::Refresh => {
                        // Freshly activated conversations are unknown to the
                        // service, so a refresh of them fails softly
                        let _ = store.refresh().await;
                    }
                    StoreOp::DeleteActive => {
                        if let Some(active) = store.active_conversation_id() {
                            prop_assert!(store.deactivate_if_active(&active));
                        }
                        local.clear();
                    }
                    StoreOp::ActivateNew => {
                        fresh += 1;
                        store.activate_new(&format!("fresh-{fresh}"));
                        local.clear();
                    }
                }

                let view = store.snapshot();
                prop_assert!(!view.is_loading_messages);
                if view.active_conversation_id.is_none() {
                    prop_assert!(view.messages.is_empty());
                }
                if let Some(active) = &view.active_conversation_id {
                    for message in &view.messages {
                        prop_assert_eq!(&message.conversation_id, active);
                    }
                }
                let shown: Vec<&str> = view
                    .messages
                    .iter()
                    .filter(|m| m.is_local())
                    .map(|m| m.content.as_str())
                    .collect();
                prop_assert_eq!(shown, local.iter().map(String::as_str).collect::<Vec<_>>());
            }
            Ok(())
        })?;
    }

    /// However the held loads are released, only the last switch is applied.
    #[test]
    fn prop_last_switch_wins(
        release_order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let rt = runtime();
        rt.block_on(async {
            let (api, ids) = seeded(4);
            let store = Arc::new(ConversationStore::new(api.clone()));
            let gates: Vec<_> = ids.iter().map(|id| api.hold_for(Op::ListMessages, id)).collect();

            let mut handles = Vec::new();
            for (id, gate) in ids.iter().zip(&gates) {
                let store = store.clone();
                let id = id.clone();
                handles.push(tokio::spawn(async move { store.set_active(Some(&id)).await }));
                gate.wait_entered().await;
            }

            for i in release_order {
                gates[i].release();
                tokio::task::yield_now().await;
            }

            let mut outcomes = Vec::new();
            for handle in handles {
                outcomes.push(handle.await.unwrap().unwrap());
            }

            let last = ids.last().unwrap();
            prop_assert_eq!(outcomes.last(), Some(&ReloadOutcome::Applied { count: 2 }));
            for outcome in &outcomes[..outcomes.len() - 1] {
                prop_assert_eq!(outcome, &ReloadOutcome::Stale);
            }
            let view = store.snapshot();
            prop_assert_eq!(view.active_conversation_id.as_ref(), Some(last));
            prop_assert_eq!(view.messages, api.server_messages(last));
            Ok(())
        })?;
    }
}
