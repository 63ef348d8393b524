//! General assistant that remembers who the user is and facts about the
//! workspace.

use foreman_llm::DecisionTool;
use foreman_memory::EntityKind;
use std::sync::Arc;

use super::{App, AppDeps, info};

const SUPERVISOR_PROMPT: &str = "You are a helpful assistant with long-term memory.

Answer the user directly whenever you can. Before answering, decide whether the latest message \
tells you something worth keeping:

- Personal details about the user (name, role, language, preferences) go to `update_profile`.
- Facts about the workspace, its systems or its people go to `remember`, stated as \
subject / predicate / object.

Route at most once per fact. When nothing needs storing, reply in natural language.

What you know about the user:
<profile>
{profile}
</profile>

What you know about the workspace:
<knowledge>
{knowledge}
</knowledge>";

const PROFILE_GUIDANCE: &str =
    "Keep the profile of the user current with what they said about themselves.";

const KNOWLEDGE_GUIDANCE: &str = "Keep the workspace knowledge current. Record each new fact as \
one triple and keep every existing triple the conversation does not contradict.";

pub fn app(deps: &AppDeps) -> App {
    let supervisor = deps
        .router(SUPERVISOR_PROMPT, DecisionTool::route_intent(&[]))
        .with_snapshot("profile", EntityKind::UserProfile)
        .with_snapshot("knowledge", EntityKind::Triple);

    let graph = deps
        .graph("supervisor", supervisor)
        .with_worker(
            "update_profile",
            "update_profile",
            deps.extraction(EntityKind::UserProfile, PROFILE_GUIDANCE),
        )
        .with_worker(
            "remember",
            "remember",
            deps.extraction(EntityKind::Triple, KNOWLEDGE_GUIDANCE),
        );

    App {
        info: info(
            "assistant",
            "Assistant",
            "General assistant that keeps a user profile and workspace facts",
        ),
        graph: Arc::new(graph),
    }
}
