//! Builds the `QueryDefinition`s `SqlReceiver` runs from the raw SQL text in
//! [`queries`], substituting its `%s`/`%d` placeholders once at startup
//! rather than per tick. Database names come from trusted configuration,
//! not user input, so a quoted literal list is safe here.

use dbintel_core::{MetricColumnMapping, QueryDefinition, QueryOutputSpec, QueryRequirements};

use crate::queries::{extended_queries, ohi_queries};

/// Renders a query template's `%s` (database list) and `%d` (limit)
/// placeholders, then unescapes the literal `%%` the `ILIKE` patterns carry.
/// Order matters: `%%` is resolved last so it can't be mistaken for a second
/// `%s`/`%d` occurrence.
pub fn render_query(template: &str, databases: &[String], limit: u32) -> String {
    let quoted_list = databases
        .iter()
        .map(|d| format!("'{}'", d.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    template
        .replacen("%s", &quoted_list, 1)
        .replacen("%d", &limit.to_string(), 1)
        .replace("%%", "%")
}

fn metrics_output(metric_name: &str, value_column: &str, attribute_columns: &[&str]) -> QueryOutputSpec {
    QueryOutputSpec::Metrics(vec![MetricColumnMapping {
        metric_name: metric_name.to_string(),
        value_column: value_column.to_string(),
        attribute_columns: attribute_columns.iter().map(|s| s.to_string()).collect(),
        description: String::new(),
    }])
}

fn no_requirements() -> QueryRequirements {
    QueryRequirements {
        required_extensions: vec![],
        required_capabilities: vec![],
        minimum_version: None,
    }
}

fn requires(extensions: &[&str], minimum_version: Option<&str>) -> QueryRequirements {
    QueryRequirements {
        required_extensions: extensions.iter().map(|s| s.to_string()).collect(),
        required_capabilities: vec![],
        minimum_version: minimum_version.map(|s| s.to_string()),
    }
}

/// Builds the full OHI-compatible query library for the configured
/// databases and per-category row limit. One `QueryDefinition` per SQL
/// variant in [`ohi_queries`], each falling back to the next-lowest-priority
/// variant in its category when its own run fails.
pub fn build_query_library(databases: &[String], row_limit: u32) -> Vec<QueryDefinition> {
    let render = |template: &str| render_query(template, databases, row_limit);

    vec![
        QueryDefinition {
            name: "slow_queries_v13_above".to_string(),
            category: "slow_queries".to_string(),
            sql: render(ohi_queries::SLOW_QUERIES_V13_ABOVE),
            requirements: requires(&["pg_stat_statements"], Some("13")),
            priority: 100,
            fallback: Some("slow_queries_v12".to_string()),
            output: metrics_output(
                "db.query.duration",
                "avg_elapsed_time_ms",
                &["query_id", "database_name", "statement_type", "query_text"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "slow_queries_v12".to_string(),
            category: "slow_queries".to_string(),
            sql: render(ohi_queries::SLOW_QUERIES_V12),
            requirements: requires(&["pg_stat_statements"], None),
            priority: 50,
            fallback: None,
            output: metrics_output(
                "db.query.duration",
                "avg_elapsed_time_ms",
                &["query_id", "database_name", "statement_type", "query_text"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "wait_events".to_string(),
            category: "wait_events".to_string(),
            sql: render(ohi_queries::WAIT_EVENTS),
            requirements: requires(&["pg_wait_sampling"], None),
            priority: 100,
            fallback: Some("wait_events_rds".to_string()),
            output: metrics_output(
                "db.wait.duration",
                "wait_time_ms",
                &["wait_event_type", "wait_event", "database_name", "query_id"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "wait_events_rds".to_string(),
            category: "wait_events".to_string(),
            sql: render(ohi_queries::WAIT_EVENTS_RDS),
            requirements: no_requirements(),
            priority: 10,
            fallback: None,
            output: metrics_output(
                "db.wait.duration",
                "wait_time_ms",
                &["wait_event_type", "wait_event", "database_name", "query_id"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "blocking_v14_above".to_string(),
            category: "blocking_sessions".to_string(),
            sql: render(ohi_queries::BLOCKING_V14_ABOVE),
            requirements: requires(&[], Some("14")),
            priority: 100,
            fallback: Some("blocking_v12_13".to_string()),
            output: metrics_output(
                "db.blocking.duration",
                "blocked_duration_ms",
                &["blocking_pid", "blocked_pid", "blocking_database", "blocked_database"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "blocking_v12_13".to_string(),
            category: "blocking_sessions".to_string(),
            sql: render(ohi_queries::BLOCKING_V12_13),
            requirements: no_requirements(),
            priority: 50,
            fallback: Some("blocking_rds".to_string()),
            output: metrics_output(
                "db.blocking.duration",
                "blocked_duration_ms",
                &["blocking_pid", "blocked_pid", "blocking_database", "blocked_database"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "blocking_rds".to_string(),
            category: "blocking_sessions".to_string(),
            sql: render(ohi_queries::BLOCKING_RDS),
            requirements: no_requirements(),
            priority: 10,
            fallback: None,
            output: metrics_output(
                "db.blocking.duration",
                "blocked_duration_ms",
                &["blocking_pid", "blocked_pid", "blocking_database", "blocked_database"],
            ),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "individual_queries_v13_above".to_string(),
            category: "individual_queries".to_string(),
            sql: render(ohi_queries::INDIVIDUAL_V13_ABOVE),
            requirements: requires(&[], Some("13")),
            priority: 100,
            fallback: Some("individual_queries_v12".to_string()),
            output: metrics_output("db.query.active", "pid", &["database_name", "state", "query_text"]),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "individual_queries_v12".to_string(),
            category: "individual_queries".to_string(),
            sql: render(ohi_queries::INDIVIDUAL_V12),
            requirements: no_requirements(),
            priority: 50,
            fallback: None,
            output: metrics_output("db.query.active", "pid", &["database_name", "state", "query_text"]),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "plan_history".to_string(),
            category: "plan_history".to_string(),
            sql: extended_queries::PLAN_HISTORY.to_string(),
            requirements: requires(&["pg_stat_statements"], None),
            priority: 100,
            fallback: None,
            output: QueryOutputSpec::Logs(dbintel_core::LogColumnMapping {
                body_column: "query".to_string(),
                severity_column: None,
                attribute_columns: vec![
                    "query_id".to_string(),
                    "plan".to_string(),
                    "plan_count".to_string(),
                    "total_plan_time".to_string(),
                    "mean_plan_time".to_string(),
                ],
            }),
            parameters: vec![],
            timeout_secs: 30,
        },
        QueryDefinition {
            name: "buffer_stats_detail".to_string(),
            category: "buffer_stats".to_string(),
            sql: extended_queries::BUFFER_STATS_DETAIL.to_string(),
            requirements: requires(&["pg_stat_statements"], None),
            priority: 100,
            fallback: None,
            output: metrics_output("db.buffer.shared_blks_read", "shared_blks_read", &["query_id"]),
            parameters: vec![],
            timeout_secs: 30,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_query_substitutes_database_list_and_limit_then_unescapes_percent() {
        let rendered = render_query("WHERE d IN (%s) AND q ILIKE 'x%%' LIMIT %d;", &["a".to_string(), "b".to_string()], 25);
        assert_eq!(rendered, "WHERE d IN ('a', 'b') AND q ILIKE 'x%' LIMIT 25;");
    }

    #[test]
    fn build_query_library_renders_every_ohi_query_without_leftover_placeholders() {
        let library = build_query_library(&["postgres".to_string()], 10);
        for def in &library {
            assert!(!def.sql.contains("%s"), "{} left a %s placeholder unrendered", def.name);
            assert!(!def.sql.contains("%d"), "{} left a %d placeholder unrendered", def.name);
        }
    }

    #[test]
    fn slow_queries_category_has_both_priority_tiers_with_a_fallback_chain() {
        let library = build_query_library(&["postgres".to_string()], 10);
        let slow: Vec<_> = library.iter().filter(|d| d.category == "slow_queries").collect();
        assert_eq!(slow.len(), 2);
        let primary = slow.iter().find(|d| d.name == "slow_queries_v13_above").unwrap();
        assert_eq!(primary.fallback.as_deref(), Some("slow_queries_v12"));
    }
}
