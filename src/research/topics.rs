// Topic/query mapping: flattening caller topics into hunter queries and
// routing hunter results back to topics

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::hunter::HuntResult;
use super::run::RunId;
use super::types::Finding;

/// Caller-defined grouping of search queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    pub key: String,
    #[serde(default)]
    pub queries: Vec<String>,
}

impl TopicConfig {
    pub fn new(key: impl Into<String>, queries: Vec<String>) -> Self {
        Self {
            key: key.into(),
            queries,
        }
    }
}

/// Combined query list plus the reverse map from query to topic key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    pub queries: Vec<String>,
    pub topic_by_query: HashMap<String, String>,
}

impl QueryPlan {
    /// Flatten topics in order. A query listed under several topics is sent
    /// once and stays attributed to the first topic that listed it.
    pub fn from_topics(topics: &[TopicConfig]) -> Self {
        let mut plan = QueryPlan::default();
        for topic in topics {
            for query in &topic.queries {
                if plan.topic_by_query.contains_key(query) {
                    continue;
                }
                plan.topic_by_query
                    .insert(query.clone(), topic.key.clone());
                plan.queries.push(query.clone());
            }
        }
        plan
    }

    pub fn topic_for(&self, query: &str) -> Option<&str> {
        self.topic_by_query.get(query).map(String::as_str)
    }

    /// Topic that findings from a topic-unaware hunter are filed under: the
    /// topic of the first query, or `fallback` when there are no queries.
    pub fn primary_topic<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.queries
            .first()
            .and_then(|q| self.topic_for(q))
            .unwrap_or(fallback)
    }
}

/// Findings for one topic, in the order they should be reported
#[derive(Debug, Clone, PartialEq)]
pub struct TopicFindings {
    pub topic_key: String,
    pub findings: Vec<Finding>,
}

/// Turn a hunter's aggregate result into topic-scoped findings.
///
/// Hunters report counts, not topic-tagged results, so a hunter that
/// collected any sources yields exactly one summarizing finding filed under
/// the plan's primary topic. Nothing collected yields no groups.
pub fn synthesize_findings(
    run_id: &RunId,
    hunter_name: &str,
    result: &HuntResult,
    plan: &QueryPlan,
    default_topic: &str,
    relevance: f64,
) -> Vec<TopicFindings> {
    if result.sources_collected == 0 {
        return Vec::new();
    }

    let topic_key = plan.primary_topic(default_topic).to_string();
    let finding = Finding::new(
        format!("{}-{}-summary", run_id, hunter_name),
        format!(
            "{} collected {} sources",
            hunter_name, result.sources_collected
        ),
        format!(
            "{} sources collected and {} insights created across {} queries",
            result.sources_collected,
            result.insights_created,
            plan.queries.len()
        ),
        hunter_name,
        "hunter",
        relevance,
    )
    .with_tags(vec![topic_key.clone()]);

    group_by_topic(vec![(topic_key, finding)])
}

/// Group findings by topic, keeping first-appearance order of topics and the
/// original order of findings within each topic
pub fn group_by_topic(findings: Vec<(String, Finding)>) -> Vec<TopicFindings> {
    let mut groups: Vec<TopicFindings> = Vec::new();
    for (topic_key, finding) in findings {
        match groups.iter_mut().find(|g| g.topic_key == topic_key) {
            Some(group) => group.findings.push(finding),
            None => groups.push(TopicFindings {
                topic_key,
                findings: vec![finding],
            }),
        }
    }
    groups
}
