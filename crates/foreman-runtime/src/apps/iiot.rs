//! IIoT project assistant: customer records, field surveys and the factory
//! model used for integration.

use foreman_llm::DecisionTool;
use foreman_memory::EntityKind;
use std::sync::Arc;

use super::{App, AppDeps, info};
use crate::graph::OrchestrationGraph;
use crate::node::AgentNode;

const SUPERVISOR_PROMPT: &str = "You coordinate an IIoT project for one customer. The project \
moves through stages recorded in the customer's `status`.

Read the status first, then pick the agent that owns the request:

- `update_customer`: company details such as name, industry and description, and changes of \
project status. Ask the user to confirm before moving the project to another stage.
- `survey`: anything found during the site survey while the status starts with `survey_`: \
survey date, factory name, areas, machines, controllers and points.
- `integration`: the deployable factory model while the status starts with `integration_`: \
production lines, machines, controllers, protocols and point mappings.

If a request does not fit the current stage, explain that to the user instead of routing. When \
you route, pass the agent a short instruction describing what to change. You may route several \
times in a row. Once everything is done, tell the user what changed.

Customer record:
<customer>
{customer}
</customer>";

const CUSTOMER_GUIDANCE: &str =
    "Keep the customer record current with the business details and project status discussed.";

const SURVEY_PROMPT: &str = "You record the field survey of the customer's factory: its areas, \
machines, controllers and the points they expose.

Whenever the conversation adds or corrects survey details, call UpdateMemory with \
`update_type` set to `survey`. Leave company and contact information alone; it belongs to \
another agent. If nothing needs recording, reply without calling the tool.

Current survey:
<survey>
{survey}
</survey>";

const SURVEY_GUIDANCE: &str = "Update the factory survey from the conversation. Machines \
mentioned without an area belong to a common area.";

const INTEGRATION_PROMPT: &str = "You turn the survey into a deployable factory model.

Route to `mapping` whenever the conversation defines or changes production lines, machines, \
controllers or the addresses and types of their points. Otherwise answer the user directly. \
Present mapping results and wait for the user to confirm them before moving on.

Current factory model:
<factory>
{factory}
</factory>";

const MAPPING_PROMPT: &str = "You maintain the factory model used for deployment.

Whenever the conversation adds or corrects production lines, machines, controllers or point \
mappings, call UpdateMemory with `update_type` set to `update_factory`. If nothing needs \
recording, reply without calling the tool.

Current factory model:
<factory>
{factory}
</factory>";

const FACTORY_GUIDANCE: &str = "Update the factory model from the conversation. Keep point \
addresses exactly as given and never guess protocols or data types.";

pub fn app(deps: &AppDeps) -> App {
    let graph = deps
        .graph(
            "supervisor",
            deps.router(SUPERVISOR_PROMPT, DecisionTool::route_intent(&[]))
                .with_snapshot("customer", EntityKind::Customer),
        )
        .with_worker(
            "update_customer",
            "update_customer",
            deps.extraction(EntityKind::Customer, CUSTOMER_GUIDANCE),
        )
        .with_worker(
            "survey",
            "survey_agent",
            AgentNode::SubgraphWorker(Arc::new(survey_agent(deps))),
        )
        .with_worker(
            "integration",
            "integration_agent",
            AgentNode::SubgraphWorker(Arc::new(integration_agent(deps))),
        );

    App {
        info: info(
            "iiot",
            "IIoT Project Assistant",
            "Tracks customers, factory surveys and integration for IIoT projects",
        ),
        graph: Arc::new(graph),
    }
}

fn survey_agent(deps: &AppDeps) -> OrchestrationGraph {
    let router = deps
        .router(SURVEY_PROMPT, DecisionTool::update_memory(&[]))
        .with_snapshot("survey", EntityKind::SurveyFactory);
    deps.graph("survey_agent", router).with_worker(
        "survey",
        "update_survey",
        deps.extraction(EntityKind::SurveyFactory, SURVEY_GUIDANCE),
    )
}

fn integration_agent(deps: &AppDeps) -> OrchestrationGraph {
    let router = deps
        .router(INTEGRATION_PROMPT, DecisionTool::route_intent(&[]))
        .with_snapshot("factory", EntityKind::Factory);
    deps.graph("integration_agent", router).with_worker(
        "mapping",
        "mapping_agent",
        AgentNode::SubgraphWorker(Arc::new(mapping_agent(deps))),
    )
}

fn mapping_agent(deps: &AppDeps) -> OrchestrationGraph {
    let router = deps
        .router(MAPPING_PROMPT, DecisionTool::update_memory(&[]))
        .with_snapshot("factory", EntityKind::Factory);
    deps.graph("mapping_agent", router).with_worker(
        "update_factory",
        "update_factory",
        deps.extraction(EntityKind::Factory, FACTORY_GUIDANCE),
    )
}
