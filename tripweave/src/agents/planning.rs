//! Planning agent: interprets the user request and chooses the tool plan.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agents::{Agent, AgentContext, AgentCore, TaskReport};
use crate::bridge::ToolBridge;
use crate::error::AgentError;
use crate::memory::MemorySystem;

/// Interpreter token set mapped to the canonical tool identifiers used by
/// the rest of the pipeline.
const INTERPRETER_TO_CANONICAL: &[(&str, &str)] = &[
    ("cities.recommender", "city_recommender"),
    ("poi.discovery", "poi_discovery"),
    ("restaurants.discovery", "restaurants_discovery"),
    ("fares.city", "city_fare"),
    ("fares.intercity", "intercity_fare"),
    ("fx.oracle", "currency"),
];

fn map_interpreter_tools(tools: &Value) -> Vec<String> {
    let mut out = Vec::new();
    let Some(list) = tools.as_array() else {
        return out;
    };
    for token in list.iter().filter_map(Value::as_str) {
        if let Some((_, canonical)) = INTERPRETER_TO_CANONICAL.iter().find(|(t, _)| *t == token) {
            if !out.contains(&canonical.to_string()) {
                out.push(canonical.to_string());
            }
        }
    }
    out
}

/// Union of `countries[].cities`, preserving first occurrence.
fn flatten_cities_from_countries(countries: &Value) -> Vec<Value> {
    let mut flat: Vec<Value> = Vec::new();
    if let Some(list) = countries.as_array() {
        for country in list {
            if let Some(cities) = country.get("cities").and_then(Value::as_array) {
                for city in cities {
                    if city.as_str().is_some() && !flat.contains(city) {
                        flat.push(city.clone());
                    }
                }
            }
        }
    }
    flat
}

/// Agent responsible for interpreting user requests and creating plans.
pub struct PlanningAgent {
    core: AgentCore,
    bridge: Arc<ToolBridge>,
}

impl PlanningAgent {
    pub fn new(memory: Arc<MemorySystem>, bridge: Arc<ToolBridge>) -> Self {
        Self {
            core: AgentCore::new("planning_agent", memory),
            bridge,
        }
    }

    /// Fallback plan builder for when the interpreter chose no tools.
    fn build_tool_plan(plan: &Value) -> Vec<String> {
        let mut tool_plan: Vec<String> = Vec::new();
        let has = |key: &str| {
            plan.get(key)
                .map(|v| match v {
                    Value::Array(a) => !a.is_empty(),
                    Value::Object(m) => !m.is_empty(),
                    Value::String(s) => !s.is_empty(),
                    Value::Null => false,
                    _ => true,
                })
                .unwrap_or(false)
        };

        if has("countries") {
            tool_plan.push("city_recommender".to_string());
        }
        if has("cities") {
            for t in ["poi_discovery", "restaurants_discovery", "city_fare", "intercity_fare"] {
                tool_plan.push(t.to_string());
            }
        }
        if has("target_currency") || has("countries") {
            tool_plan.push("currency".to_string());
        }
        for t in ["discoveries_costs", "optimizer", "trip_maker", "writer_report"] {
            tool_plan.push(t.to_string());
        }
        tool_plan
    }
}

#[async_trait]
impl Agent for PlanningAgent {
    fn id(&self) -> &str {
        self.core.agent_id()
    }

    async fn execute_task(&self, ctx: &mut AgentContext) -> Result<TaskReport, AgentError> {
        let started = Instant::now();

        let res = self
            .bridge
            .execute_tool(
                "interpreter",
                Some(json!({ "user_request": ctx.user_request })),
                None,
            )
            .await;

        if !res.is_success() {
            let msg = res.error.unwrap_or_else(|| "unknown interpreter error".to_string());
            self.core
                .observe("planning", false, started, ctx, &json!({"error": msg}))
                .await;
            return Ok(TaskReport::error(msg));
        }

        let mut plan = match res.result {
            Some(Value::Object(m)) => Value::Object(m),
            _ => json!({ "intent": "unknown" }),
        };

        let cities_missing = plan
            .get("cities")
            .and_then(Value::as_array)
            .map(|a| a.is_empty())
            .unwrap_or(true);
        if cities_missing {
            let flat = flatten_cities_from_countries(
                plan.get("countries").unwrap_or(&Value::Null),
            );
            if let Some(obj) = plan.as_object_mut() {
                obj.insert("cities".to_string(), Value::Array(flat));
            }
        }

        let mut tool_plan = map_interpreter_tools(
            plan.get("tool_plan").unwrap_or(&Value::Array(Vec::new())),
        );
        if tool_plan.is_empty() {
            tool_plan = Self::build_tool_plan(&plan);
        }
        if let Some(obj) = plan.as_object_mut() {
            obj.insert(
                "tool_plan".to_string(),
                Value::Array(tool_plan.iter().cloned().map(Value::String).collect()),
            );
        }

        tracing::debug!(tools = ?tool_plan, "planning chose tool plan");
        ctx.planning = plan.clone();
        ctx.tool_plan = tool_plan;

        self.core.observe("planning", true, started, ctx, &plan).await;
        Ok(TaskReport::success_with(json!({
            "planning_keys": plan.as_object().map(Map::len).unwrap_or(0),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bridge::tool_success;

    fn planning_agent(bridge: Arc<ToolBridge>) -> PlanningAgent {
        PlanningAgent::new(Arc::new(MemorySystem::new()), bridge)
    }

    /// **Scenario**: Interpreter tokens map to canonical ids, deduplicated in
    /// first-seen order; unknown tokens are dropped.
    #[test]
    fn interpreter_tokens_map_and_dedupe() {
        let tools = json!(["poi.discovery", "fares.city", "poi.discovery", "bogus.token"]);
        assert_eq!(
            map_interpreter_tools(&tools),
            vec!["poi_discovery".to_string(), "city_fare".to_string()]
        );
    }

    /// **Scenario**: Cities are flattened from countries when the interpreter
    /// gave none.
    #[test]
    fn cities_flatten_from_countries() {
        let countries = json!([
            {"country": "France", "cities": ["Paris", "Lyon"]},
            {"country": "Japan", "cities": ["Tokyo", "Paris"]},
        ]);
        assert_eq!(
            flatten_cities_from_countries(&countries),
            vec![json!("Paris"), json!("Lyon"), json!("Tokyo")]
        );
    }

    /// **Scenario**: The fallback plan includes per-city discovery tools only
    /// when cities are present, and always the post-processing chain.
    #[test]
    fn fallback_plan_shape() {
        let plan = json!({"countries": [{"country": "France"}], "cities": ["Paris"]});
        let tools = PlanningAgent::build_tool_plan(&plan);
        assert_eq!(tools[0], "city_recommender");
        assert!(tools.contains(&"poi_discovery".to_string()));
        assert!(tools.contains(&"currency".to_string()));
        assert!(tools.ends_with(&[
            "discoveries_costs".to_string(),
            "optimizer".to_string(),
            "trip_maker".to_string(),
            "writer_report".to_string()
        ]));

        let no_cities = json!({"countries": [{"country": "France"}]});
        let tools = PlanningAgent::build_tool_plan(&no_cities);
        assert!(!tools.contains(&"poi_discovery".to_string()));
    }

    /// **Scenario**: A successful interpreter call fills the planning bucket
    /// and the tool plan.
    #[tokio::test]
    async fn execute_fills_planning_bucket() {
        let bridge = Arc::new(ToolBridge::new());
        bridge.register_fn("interpreter", |_| {
            tool_success(json!({
                "cities": ["Paris"],
                "countries": [{"country": "France", "cities": ["Paris"]}],
                "tool_plan": ["cities.recommender", "poi.discovery"],
            }))
        });
        let agent = planning_agent(bridge);
        let mut ctx = AgentContext::empty("s1", "u1", "Plan 5 days in Paris");

        let report = agent.execute_task(&mut ctx).await.unwrap();
        assert_eq!(report.status, crate::agents::TaskStatus::Success);
        assert_eq!(ctx.tool_plan, vec!["city_recommender", "poi_discovery"]);
        assert_eq!(ctx.planning["cities"], json!(["Paris"]));
        assert_eq!(
            ctx.planning["tool_plan"],
            json!(["city_recommender", "poi_discovery"])
        );
    }

    /// **Scenario**: An interpreter failure becomes a stage error report, not
    /// a panic or an Err.
    #[tokio::test]
    async fn interpreter_failure_reports_error() {
        let bridge = Arc::new(ToolBridge::new());
        // No interpreter registered: unknown_tool error from the bridge.
        let agent = planning_agent(bridge);
        let mut ctx = AgentContext::empty("s1", "u1", "Plan");
        let report = agent.execute_task(&mut ctx).await.unwrap();
        assert_eq!(report.status, crate::agents::TaskStatus::Error);
        assert!(report.error.unwrap().contains("unknown_tool:interpreter"));
    }
}
