//! Model listings, synthesized from the configured rules.

use std::{collections::BTreeSet, sync::Arc};

use axum::{Json, extract::State};

use crate::{Gateway, dialect::{anthropic, openai}};

fn rule_models(gateway: &Gateway) -> Vec<String> {
    let config = gateway.config.current();
    let mut names = BTreeSet::new();

    for scenario in config.scenarios.values() {
        for rule in scenario.rules.iter().filter(|rule| rule.active) {
            names.insert(rule.request_model.clone());
        }
    }

    names.into_iter().collect()
}

pub(super) async fn openai_models(State(gateway): State<Arc<Gateway>>) -> Json<openai::ModelsResponse> {
    let data = rule_models(&gateway)
        .into_iter()
        .map(|id| openai::Model {
            id,
            object: openai::ObjectType::Model,
            created: 0,
            owned_by: "tingly".to_string(),
        })
        .collect();

    Json(openai::ModelsResponse {
        object: openai::ObjectType::List,
        data,
    })
}

pub(super) async fn anthropic_models(State(gateway): State<Arc<Gateway>>) -> Json<anthropic::ModelsResponse> {
    let data = rule_models(&gateway)
        .into_iter()
        .map(|id| anthropic::ModelInfo {
            info_type: "model".to_string(),
            display_name: id.clone(),
            id,
            created_at: String::new(),
        })
        .collect();

    Json(anthropic::ModelsResponse { data, has_more: false })
}
